//! Segments
//!
//! A [`Segment`] is the smallest analysis unit: a contiguous window of the
//! participant streams with its validity report, its full feature set and the
//! statistics of every AOI over the window. Segments only hold index ranges
//! into the streams, which stay owned by the participant.

use std::collections::BTreeMap;
use std::ops::Range;
use tracing::{debug, warn};

use crate::aoi::{Aoi, AoiStat, AoiWindow};
use crate::config::AnalysisConfig;
use crate::error::ComputeError;
use crate::features::{
    blink_features, distance_features, event_features, fixation_features, path_features,
    pupil_features, saccade_features, SupportCounts, UnitFeatures,
};
use crate::locator::{locate_fixations, locate_points};
use crate::types::{Event, Fixation, Saccade, Sample};
use crate::validity::{
    blink_gaps, count_labelled, ValidityMeasures, ValidityReport, ValidityVerdicts,
};

/// Borrowed view over the record streams of a recording
#[derive(Debug, Clone, Copy)]
pub struct Streams<'a> {
    pub samples: &'a [Sample],
    pub fixations: &'a [Fixation],
    pub saccades: Option<&'a [Saccade]>,
    pub events: Option<&'a [Event]>,
}

impl<'a> Streams<'a> {
    /// Sub-view covered by `ranges`
    pub fn window(&self, ranges: &StreamRanges) -> Streams<'a> {
        fn part<'b, T>(records: Option<&'b [T]>, range: &Option<Range<usize>>) -> Option<&'b [T]> {
            let records = records?;
            Some(match range {
                Some(r) => records.get(r.clone()).unwrap_or(&[]),
                None => &[],
            })
        }
        Streams {
            samples: self.samples.get(ranges.samples.clone()).unwrap_or(&[]),
            fixations: self.fixations.get(ranges.fixations.clone()).unwrap_or(&[]),
            saccades: part(self.saccades, &ranges.saccades),
            events: part(self.events, &ranges.events),
        }
    }
}

/// Index ranges of one unit in each stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamRanges {
    pub samples: Range<usize>,
    pub fixations: Range<usize>,
    pub saccades: Option<Range<usize>>,
    pub events: Option<Range<usize>>,
}

/// Locator hints for walking ascending, non-overlapping windows
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamCursor {
    samples: usize,
    fixations: usize,
    saccades: usize,
    events: usize,
}

impl StreamCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ranges of `[start, end]` in every stream, advancing the hints
    pub fn locate(
        &mut self,
        streams: &Streams<'_>,
        start: i64,
        end: i64,
        include_half: bool,
    ) -> StreamRanges {
        let samples = locate_points(streams.samples, self.samples, start, end);
        self.samples = samples.next;
        let fixations =
            locate_fixations(streams.fixations, self.fixations, start, end, include_half);
        self.fixations = fixations.next;
        let saccades = streams.saccades.map(|records| {
            let found = locate_points(records, self.saccades, start, end);
            self.saccades = found.next;
            found.range()
        });
        let events = streams.events.map(|records| {
            let found = locate_points(records, self.events, start, end);
            self.events = found.next;
            found.range()
        });
        StreamRanges {
            samples: samples.range(),
            fixations: fixations.range(),
            saccades,
            events,
        }
    }
}

/// The smallest analysis unit
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub id: String,
    /// Timestamp of the first sample
    pub start: i64,
    /// Timestamp of the last sample
    pub end: i64,
    pub ranges: StreamRanges,
    pub fixation_start: i64,
    pub fixation_end: i64,
    pub validity: ValidityReport,
    pub verdicts: ValidityVerdicts,
    /// Verdict of the configured validity method
    pub is_valid: bool,
    pub features: UnitFeatures,
    pub support: SupportCounts,
    pub aoi_stats: BTreeMap<String, AoiStat>,
    /// At least one AOI is active over the fixations of the segment
    pub has_aois: bool,
}

impl Segment {
    /// Locate `[start, end]` from scratch and build the segment
    pub fn locate(
        id: impl Into<String>,
        streams: &Streams<'_>,
        start: i64,
        end: i64,
        aois: &[Aoi],
        rest_pupil_size: f64,
        config: &AnalysisConfig,
    ) -> Result<Self, ComputeError> {
        let ranges =
            StreamCursor::new().locate(streams, start, end, config.include_half_fixations);
        Self::build(id, streams, ranges, aois, rest_pupil_size, config)
    }

    /// Build a segment over `ranges` of `streams`.
    pub fn build(
        id: impl Into<String>,
        streams: &Streams<'_>,
        ranges: StreamRanges,
        aois: &[Aoi],
        rest_pupil_size: f64,
        config: &AnalysisConfig,
    ) -> Result<Self, ComputeError> {
        let id = id.into();
        let window = streams.window(&ranges);
        let (samples, fixations) = (window.samples, window.fixations);

        let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
            return Err(ComputeError::EmptyWindow(id));
        };
        let (Some(first_fix), Some(last_fix)) = (fixations.first(), fixations.last()) else {
            return Err(ComputeError::NoFixations(id));
        };
        let (start, end) = (first.timestamp, last.timestamp);
        let length = end - start;
        if length == 0 {
            return Err(ComputeError::ZeroLength(id));
        }

        // Stage 1: validity
        let validity = ValidityReport::analyze(samples, start, end, true, config);
        let effective = length - validity.length_invalid;
        if effective <= 0 {
            return Err(ComputeError::NoValidDuration(id));
        }
        let verdicts = validity.verdicts(config);
        report_missing_data(&id, samples, fixations);

        // Stage 2: sample features
        let (pupil, numpupilsizes, numpupilvelocity) =
            pupil_features(samples, rest_pupil_size, config.pupil_adjustment);
        let (distance, numdistancedata) = distance_features(samples);
        let blinks = blink_features(&blink_gaps(samples), effective, config);

        // Stage 3: fixations and scan path
        let fixation_stats = fixation_features(fixations);
        let (path, path_counts) = path_features(fixations, effective);

        // Stage 4: saccades and events
        let saccades = saccade_features(window.saccades, fixation_stats.sumfixationduration);
        let events = event_features(window.events, start, effective, config);

        let support = SupportCounts {
            numpupilsizes,
            numpupilvelocity,
            numdistancedata,
            saccade_stream: window.saccades.is_some(),
            event_stream: window.events.is_some(),
            ..path_counts
        };

        let mut segment = Segment {
            start,
            end,
            ranges,
            fixation_start: first_fix.timestamp,
            fixation_end: last_fix.timestamp,
            is_valid: verdicts.select(config.validity_method),
            verdicts,
            features: UnitFeatures {
                completion_time: Some(length),
                length,
                length_invalid: validity.length_invalid,
                numsamples: count_labelled(samples),
                numsegments: None,
                numfixations: fixations.len(),
                fixationrate: fixations.len() as f64 / effective as f64,
                fixations: fixation_stats,
                path,
                blinks,
                pupil,
                distance,
                saccades,
                events,
                aoisequence: None,
            },
            validity,
            support,
            aoi_stats: BTreeMap::new(),
            has_aois: false,
            id,
        };

        // Stage 5: AOIs
        if !aois.is_empty() {
            segment.compute_aoi_stats(&window, aois, rest_pupil_size, config);
        }
        debug!(
            segment = %segment.id,
            start, end,
            valid = segment.is_valid,
            "segment built"
        );
        Ok(segment)
    }

    fn compute_aoi_stats(
        &mut self,
        window: &Streams<'_>,
        aois: &[Aoi],
        rest_pupil_size: f64,
        config: &AnalysisConfig,
    ) {
        let aoi_window = AoiWindow {
            samples: window.samples,
            fixations: window.fixations,
            events: window.events,
            start: self.start,
            end: self.end,
            sum_discarded: self.validity.length_invalid,
        };
        // Only AOIs active over the fixation span get statistics or count as
        // transition sources
        let active: Vec<Aoi> = aois
            .iter()
            .filter(|aoi| aoi.is_active(self.fixation_start, self.fixation_end))
            .cloned()
            .collect();
        for aoi in &active {
            let stat = AoiStat::compute(aoi, &aoi_window, &active, rest_pupil_size, config);
            self.aoi_stats.insert(aoi.aid.clone(), stat);
        }
        self.has_aois = !active.is_empty();
        if !self.has_aois {
            warn!(
                segment = %self.id,
                start = self.start,
                end = self.end,
                "no active AOI in segment"
            );
        }
        self.features.aoisequence = Some(aoi_sequence(window.fixations, aois));
    }

    pub fn measures(&self) -> ValidityMeasures {
        ValidityMeasures::from(&self.validity)
    }

    pub fn length(&self) -> i64 {
        self.features.length
    }

    /// Low-quality segment that auto-partitioning would split
    pub fn needs_partition(&self, config: &AnalysisConfig) -> bool {
        self.validity.largest_gap > config.max_seg_timegap
    }

    /// Split the window `[start, end]` this segment was built from around its
    /// long invalid gaps.
    ///
    /// Sub-ranges without fixations are skipped, as are sub-segments that
    /// fail to build or are not longer than `min_seg_size`.
    pub fn split_around_gaps(
        &self,
        streams: &Streams<'_>,
        start: i64,
        end: i64,
        aois: &[Aoi],
        rest_pupil_size: f64,
        config: &AnalysisConfig,
    ) -> Vec<Segment> {
        let mut bounds = Vec::with_capacity(self.validity.time_gaps.len() + 1);
        let mut sub_start = start;
        for &(gap_start, gap_end) in &self.validity.time_gaps {
            bounds.push((sub_start, gap_start));
            sub_start = gap_end;
        }
        bounds.push((sub_start, end));

        let mut cursor = StreamCursor::new();
        let mut parts = Vec::new();
        for (s, e) in bounds {
            let ranges = cursor.locate(streams, s, e, config.include_half_fixations);
            if ranges.fixations.is_empty() {
                continue;
            }
            let sub_id = format!("{}_{}", self.id, parts.len());
            match Segment::build(sub_id, streams, ranges, aois, rest_pupil_size, config) {
                Ok(sub) => parts.push(sub),
                Err(e) => warn!(segment = %self.id, error = %e, "sub-segment skipped"),
            }
        }
        parts.retain(|sub| sub.length() > config.min_seg_size);
        parts
    }
}

/// AOI of each fixation, in fixation order. A fixation inside several active
/// AOIs appears once per AOI.
pub fn aoi_sequence(fixations: &[Fixation], aois: &[Aoi]) -> Vec<String> {
    let mut sequence = Vec::new();
    for fixation in fixations {
        for aoi in aois {
            if aoi.contains_fixation(fixation)
                && aoi.is_active(fixation.timestamp, fixation.timestamp)
            {
                sequence.push(aoi.aid.clone());
            }
        }
    }
    sequence
}

fn report_missing_data(id: &str, samples: &[Sample], fixations: &[Fixation]) {
    let missing_pupil = samples
        .iter()
        .filter(|s| s.pupil_size == -1.0 && s.gaze_x > 0.0)
        .count();
    if missing_pupil > 0 {
        warn!(segment = %id, count = missing_pupil, "pupil size unavailable for valid samples");
    }
    let missing_distance = samples
        .iter()
        .filter(|s| s.distance <= 0.0 && s.gaze_x >= 0.0)
        .count();
    if missing_distance > 0 {
        warn!(segment = %id, count = missing_distance, "distance unavailable for valid samples");
    }
    let zero = fixations.iter().filter(|f| f.duration == 0).count();
    if zero > 0 {
        warn!(segment = %id, count = zero, "zero duration fixations");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::RecordingData;
    use crate::test_support::{fixation, sample};

    fn recording(invalid: &[(i64, i64)], fixations: Vec<Fixation>) -> RecordingData {
        crate::test_support::recording(1000, invalid, fixations)
    }

    fn gap_config() -> AnalysisConfig {
        AnalysisConfig {
            max_seg_timegap: 50,
            min_seg_size: 50,
            ..AnalysisConfig::default()
        }
    }

    #[test]
    fn test_build_clean_segment() {
        let data = recording(
            &[],
            vec![
                fixation(0, 100, 200, 10.0, 10.0),
                fixation(1, 400, 200, 40.0, 50.0),
            ],
        );
        let config = AnalysisConfig::default();
        let seg = Segment::locate("s1", &data.streams(), 0, 1000, &[], 0.0, &config).unwrap();
        assert_eq!(seg.start, 0);
        assert_eq!(seg.end, 1000);
        assert_eq!(seg.features.completion_time, Some(1000));
        assert_eq!(seg.features.numsamples, 101);
        assert_eq!(seg.features.numfixations, 2);
        assert!((seg.features.fixationrate - 0.002).abs() < 1e-12);
        assert!((seg.features.fixations.sumfixationduration - 400.0).abs() < 1e-12);
        assert!((seg.features.path.sumpathdistance - 50.0).abs() < 1e-12);
        assert!(seg.is_valid);
        assert_eq!(seg.features.aoisequence, None);
        assert_eq!(seg.features.saccades.numsaccades, 0);
        assert_eq!(seg.features.events.leftclicrate, -1.0);
        assert_eq!(seg.support.numpupilsizes, 101);
        assert!(!seg.support.event_stream);
    }

    #[test]
    fn test_zero_length_segment() {
        let data = RecordingData {
            samples: vec![sample(500, true)],
            fixations: vec![fixation(0, 500, 0, 1.0, 1.0)],
            saccades: None,
            events: None,
        };
        let config = AnalysisConfig::default();
        let err = Segment::locate("s", &data.streams(), 500, 500, &[], 0.0, &config).unwrap_err();
        assert!(matches!(err, ComputeError::ZeroLength(_)));
    }

    #[test]
    fn test_segment_errors() {
        let config = AnalysisConfig::default();
        let data = recording(&[], vec![fixation(0, 100, 200, 1.0, 1.0)]);
        let err = Segment::locate("s", &data.streams(), 2000, 3000, &[], 0.0, &config).unwrap_err();
        assert!(matches!(err, ComputeError::EmptyWindow(_)));

        let err = Segment::locate("s", &data.streams(), 500, 900, &[], 0.0, &config).unwrap_err();
        assert!(matches!(err, ComputeError::NoFixations(_)));

        let invalid = recording(&[(0, 2000)], vec![fixation(0, 100, 200, 1.0, 1.0)]);
        let err =
            Segment::locate("s", &invalid.streams(), 0, 1000, &[], 0.0, &config).unwrap_err();
        assert!(matches!(err, ComputeError::NoValidDuration(_)));
    }

    #[test]
    fn test_split_around_gaps() {
        let data = recording(
            &[(100, 500), (800, 900)],
            vec![
                fixation(0, 10, 50, 1.0, 1.0),
                fixation(1, 600, 100, 2.0, 2.0),
                fixation(2, 920, 50, 3.0, 3.0),
            ],
        );
        let config = gap_config();
        let streams = data.streams();
        let seg = Segment::locate("seg", &streams, 0, 1000, &[], 0.0, &config).unwrap();
        assert_eq!(seg.validity.time_gaps, vec![(100, 500), (800, 900)]);
        assert_eq!(seg.features.length_invalid, 500);
        assert!(seg.needs_partition(&config));

        let parts = seg.split_around_gaps(&streams, 0, 1000, &[], 0.0, &config);
        let summary: Vec<(&str, i64, i64)> = parts
            .iter()
            .map(|p| (p.id.as_str(), p.start, p.end))
            .collect();
        assert_eq!(
            summary,
            vec![("seg_0", 0, 100), ("seg_1", 500, 800), ("seg_2", 900, 1000)]
        );
        assert_eq!(parts[1].ranges.fixations, 1..2);
        assert_eq!(parts[2].ranges.samples, 90..101);
    }

    #[test]
    fn test_split_skips_ranges_without_fixations() {
        let data = recording(
            &[(100, 500), (800, 900)],
            vec![fixation(0, 10, 50, 1.0, 1.0), fixation(2, 920, 50, 3.0, 3.0)],
        );
        let config = gap_config();
        let streams = data.streams();
        let seg = Segment::locate("seg", &streams, 0, 1000, &[], 0.0, &config).unwrap();
        let parts = seg.split_around_gaps(&streams, 0, 1000, &[], 0.0, &config);
        let ids: Vec<&str> = parts.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["seg_0", "seg_1"]);
        assert_eq!(parts[1].start, 900);
    }

    #[test]
    fn test_cursor_chaining_matches_fresh_locate() {
        let data = recording(
            &[],
            (0..10).map(|i| fixation(i, i as i64 * 100, 80, 0.0, 0.0)).collect(),
        );
        let streams = data.streams();
        let mut cursor = StreamCursor::new();
        for (s, e) in [(0, 250), (300, 420), (600, 990)] {
            let chained = cursor.locate(&streams, s, e, true);
            let fresh = StreamCursor::new().locate(&streams, s, e, true);
            assert_eq!(chained, fresh);
        }
    }

    #[test]
    fn test_aoi_sequence_and_stats() {
        let left = Aoi::global("left", vec![(0.0, 0.0), (30.0, 0.0), (30.0, 30.0), (0.0, 30.0)]);
        let right = Aoi::global(
            "right",
            vec![(60.0, 0.0), (90.0, 0.0), (90.0, 30.0), (60.0, 30.0)],
        );
        let data = recording(
            &[],
            vec![
                fixation(0, 100, 100, 10.0, 10.0),
                fixation(1, 300, 100, 70.0, 10.0),
                fixation(2, 500, 100, 45.0, 10.0),
            ],
        );
        let config = AnalysisConfig::default();
        let aois = vec![left, right];
        let seg = Segment::locate("s", &data.streams(), 0, 1000, &aois, 0.0, &config).unwrap();
        assert!(seg.has_aois);
        assert_eq!(
            seg.features.aoisequence,
            Some(vec!["left".to_string(), "right".to_string()])
        );
        assert_eq!(seg.aoi_stats.len(), 2);
        assert_eq!(seg.aoi_stats["right"].transitions["left"].count, 1);
        assert_eq!(seg.aoi_stats["left"].features.numfixations, 1);
        // gaze of every sample is (50, 50), outside both AOIs
        assert_eq!(seg.aoi_stats["left"].support.numpupilsizes, 0);
    }

    #[test]
    fn test_inactive_aois_are_left_out() {
        let square = |x0: f64| vec![(x0, 0.0), (x0 + 30.0, 0.0), (x0 + 30.0, 30.0), (x0, 30.0)];
        let aois = vec![
            Aoi::global("A", square(0.0)),
            Aoi::windowed("B", square(60.0), vec![(5000, 6000)]),
            Aoi::windowed("C", square(120.0), vec![(0, 2000)]),
        ];
        let data = recording(
            &[],
            vec![
                fixation(0, 100, 100, 70.0, 10.0),
                fixation(1, 300, 100, 10.0, 10.0),
                fixation(2, 500, 100, 130.0, 10.0),
                fixation(3, 700, 100, 10.0, 10.0),
            ],
        );
        let config = AnalysisConfig::default();
        let seg = Segment::locate("s", &data.streams(), 0, 1000, &aois, 0.0, &config).unwrap();

        assert!(seg.has_aois);
        let ids: Vec<&str> = seg.aoi_stats.keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["A", "C"]);
        assert_eq!(
            seg.features.aoisequence,
            Some(vec!["A".to_string(), "C".to_string(), "A".to_string()])
        );

        let a = &seg.aoi_stats["A"];
        let sources: Vec<&str> = a.transitions.keys().map(String::as_str).collect();
        assert_eq!(sources, vec!["A", "C"]);
        // the B fixation before the first A fixation is not a transition
        assert_eq!(a.total_trans_from, 1);
        assert_eq!(a.transitions["C"].count, 1);
        assert!((a.transitions["C"].proportion - 1.0).abs() < 1e-9);
        let values = a.feature_values().unwrap();
        assert!(!values.contains_key("numtransfrom_B"));
        assert!(!values.contains_key("proptransfrom_B"));

        assert_eq!(seg.aoi_stats["C"].transitions["A"].count, 1);
    }

    #[test]
    fn test_no_active_aoi() {
        let late = Aoi::windowed(
            "late",
            vec![(0.0, 0.0), (30.0, 0.0), (30.0, 30.0), (0.0, 30.0)],
            vec![(5000, 6000)],
        );
        let data = recording(
            &[],
            vec![
                fixation(0, 100, 100, 10.0, 10.0),
                fixation(1, 400, 100, 10.0, 10.0),
            ],
        );
        let config = AnalysisConfig::default();
        let seg = Segment::locate("s", &data.streams(), 0, 1000, &[late], 0.0, &config).unwrap();
        assert!(!seg.has_aois);
        assert!(seg.aoi_stats.is_empty());
        assert_eq!(seg.features.aoisequence, Some(vec![]));
    }
}
