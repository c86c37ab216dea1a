//! Areas of Interest
//!
//! An [`Aoi`] is one or more shapes sharing an identifier. Each shape is an
//! outer polygon, an excluded inner polygon (possibly empty) and the time
//! intervals during which the shape is active. A shape without intervals is
//! always active, which makes the whole AOI global.
//!
//! [`AoiStat`] holds the features of one AOI over one unit's time window,
//! including the transitions into it from every AOI active in the same window.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::config::AnalysisConfig;
use crate::error::ComputeError;
use crate::features::{
    distance_features, feature_map, pupil_features, DistanceFeatures, EventLists, FeatureValue,
    PupilFeatures, SupportCounts, NA,
};
use crate::geometry::point_in_polygon;
use crate::locator::{locate_fixations, locate_points};
use crate::stats::{mean, stddev};
use crate::types::{Event, Fixation, Point, Polygon, Sample};

/// Time interval `(start, end)` in ms
pub type Interval = (i64, i64);

/// A named, possibly time-windowed screen region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aoi {
    pub aid: String,
    pub polyin: Vec<Polygon>,
    pub polyout: Vec<Polygon>,
    pub timeseq: Vec<Vec<Interval>>,
}

impl Aoi {
    /// Build a (possibly dynamic) AOI; the three shape lists must line up
    pub fn new(
        aid: impl Into<String>,
        polyin: Vec<Polygon>,
        polyout: Vec<Polygon>,
        timeseq: Vec<Vec<Interval>>,
    ) -> Result<Self, ComputeError> {
        let aid = aid.into();
        if polyin.len() != polyout.len() || polyin.len() != timeseq.len() {
            return Err(ComputeError::InvalidAoi(format!(
                "{}: {} outer polygons, {} inner polygons, {} interval lists",
                aid,
                polyin.len(),
                polyout.len(),
                timeseq.len()
            )));
        }
        Ok(Self {
            aid,
            polyin,
            polyout,
            timeseq,
        })
    }

    /// Single-shape AOI that is always active
    pub fn global(aid: impl Into<String>, polygon: Polygon) -> Self {
        Self {
            aid: aid.into(),
            polyin: vec![polygon],
            polyout: vec![Vec::new()],
            timeseq: vec![Vec::new()],
        }
    }

    /// Single-shape AOI active during `intervals`
    pub fn windowed(aid: impl Into<String>, polygon: Polygon, intervals: Vec<Interval>) -> Self {
        Self {
            aid: aid.into(),
            polyin: vec![polygon],
            polyout: vec![Vec::new()],
            timeseq: vec![intervals],
        }
    }

    /// Add a shape, turning the AOI into a dynamic one
    pub fn push_shape(&mut self, polyin: Polygon, polyout: Polygon, intervals: Vec<Interval>) {
        self.polyin.push(polyin);
        self.polyout.push(polyout);
        self.timeseq.push(intervals);
    }

    /// True when at least one shape has no activation interval
    pub fn is_global(&self) -> bool {
        self.timeseq.iter().any(Vec::is_empty)
    }

    /// Whether an interval contains the window start or end
    pub fn is_active(&self, start: i64, end: i64) -> bool {
        if start == -1 {
            return false;
        }
        if self.is_global() {
            return true;
        }
        let mut enclosed = false;
        for &(i0, i1) in self.timeseq.iter().flatten() {
            if (start >= i0 && start < i1) || (end > i0 && end <= i1) {
                return true;
            }
            if start < i0 && end > i1 {
                enclosed = true;
            }
        }
        if enclosed {
            warn!(
                aoi = %self.aid,
                start, end, "activation interval strictly inside the window, AOI skipped"
            );
        }
        false
    }

    /// Activation over `[start, end]`.
    ///
    /// Returns `(true, [])` when the AOI is global or its merged intervals
    /// cover the whole window, otherwise the merged overlaps of the window
    /// with every intersecting interval.
    pub fn active_partition(&self, start: i64, end: i64) -> (bool, Vec<Interval>) {
        if start == -1 {
            return (false, Vec::new());
        }
        if self.is_global() {
            return (true, Vec::new());
        }
        let mut overlaps: Vec<Interval> = Vec::new();
        for &(i0, i1) in self.timeseq.iter().flatten() {
            if start <= i1 && end >= i0 {
                overlaps.push((start.max(i0), end.min(i1)));
            }
        }

        let mut merged: Vec<Interval> = Vec::new();
        for (s, e) in overlaps {
            let mut absorbed = false;
            for piece in merged.iter_mut() {
                if piece.0 < e && piece.1 > s {
                    piece.0 = piece.0.min(s);
                    piece.1 = piece.1.max(e);
                    absorbed = true;
                }
            }
            if !absorbed {
                merged.push((s, e));
            }
        }
        if merged == [(start, end)] {
            return (true, Vec::new());
        }
        (!merged.is_empty(), merged)
    }

    /// Inside some outer polygon and outside its paired inner polygon
    pub fn contains(&self, point: Point) -> bool {
        self.polyin
            .iter()
            .zip(self.polyout.iter())
            .any(|(outer, inner)| point_in_polygon(point, outer) && !point_in_polygon(point, inner))
    }

    pub fn contains_fixation(&self, fixation: &Fixation) -> bool {
        self.contains(fixation.position())
    }

    /// Mouse clicks only
    pub fn contains_event(&self, event: &Event) -> bool {
        event.is_mouse_click() && self.contains((event.x, event.y))
    }
}

/// Scalar features of one AOI over one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AoiFeatures {
    pub numfixations: usize,
    pub longestfixation: f64,
    pub meanfixationduration: f64,
    pub stddevfixationduration: f64,
    /// ms from the window start, -1 when absent
    pub timetofirstfixation: i64,
    pub timetolastfixation: i64,
    pub proportionnum: f64,
    pub proportiontime: f64,
    pub fixationrate: f64,
    pub totaltimespent: f64,
    pub numevents: usize,
    pub numleftclic: usize,
    pub numrightclic: usize,
    pub numdoubleclic: usize,
    pub leftclicrate: f64,
    pub rightclicrate: f64,
    pub doubleclicrate: f64,
    pub timetofirstleftclic: i64,
    pub timetofirstrightclic: i64,
    pub timetofirstdoubleclic: i64,
    pub timetolastleftclic: i64,
    pub timetolastrightclic: i64,
    pub timetolastdoubleclic: i64,
    #[serde(flatten)]
    pub pupil: PupilFeatures,
    #[serde(flatten)]
    pub distance: DistanceFeatures,
}

impl Default for AoiFeatures {
    fn default() -> Self {
        Self {
            numfixations: 0,
            longestfixation: NA,
            meanfixationduration: NA,
            stddevfixationduration: NA,
            timetofirstfixation: -1,
            timetolastfixation: -1,
            proportionnum: 0.0,
            proportiontime: 0.0,
            fixationrate: 0.0,
            totaltimespent: 0.0,
            numevents: 0,
            numleftclic: 0,
            numrightclic: 0,
            numdoubleclic: 0,
            leftclicrate: 0.0,
            rightclicrate: 0.0,
            doubleclicrate: 0.0,
            timetofirstleftclic: -1,
            timetofirstrightclic: -1,
            timetofirstdoubleclic: -1,
            timetolastleftclic: -1,
            timetolastrightclic: -1,
            timetolastdoubleclic: -1,
            pupil: PupilFeatures::default(),
            distance: DistanceFeatures::default(),
        }
    }
}

/// Transitions into one AOI from the fixation before
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub count: usize,
    pub proportion: f64,
}

/// Records of one window as seen by the AOI engine
#[derive(Debug, Clone, Copy)]
pub struct AoiWindow<'a> {
    pub samples: &'a [Sample],
    pub fixations: &'a [Fixation],
    pub events: Option<&'a [Event]>,
    pub start: i64,
    pub end: i64,
    /// Invalid time removed from the window length
    pub sum_discarded: i64,
}

/// Features of one AOI over one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AoiStat {
    pub aid: String,
    pub is_active: bool,
    pub starttime: i64,
    pub endtime: i64,
    pub features: AoiFeatures,
    /// Keyed by source AOI id
    pub transitions: BTreeMap<String, Transition>,
    pub total_trans_from: usize,
    pub support: SupportCounts,
}

impl AoiStat {
    /// Inactive statistics with every feature at its initial value
    pub fn empty(aid: &str, start: i64, end: i64, sources: &[Aoi]) -> Self {
        Self {
            aid: aid.to_string(),
            is_active: false,
            starttime: start,
            endtime: end,
            features: AoiFeatures::default(),
            transitions: sources
                .iter()
                .map(|a| (a.aid.clone(), Transition::default()))
                .collect(),
            total_trans_from: 0,
            support: SupportCounts::default(),
        }
    }

    pub fn length(&self) -> i64 {
        self.endtime - self.starttime
    }

    /// Compute the statistics of `aoi` over `window`. Transitions are counted
    /// from each AOI in `sources`.
    pub fn compute(
        aoi: &Aoi,
        window: &AoiWindow<'_>,
        sources: &[Aoi],
        rest_pupil_size: f64,
        config: &AnalysisConfig,
    ) -> Self {
        let mut stat = Self::empty(&aoi.aid, window.start, window.end, sources);
        let (active, partition) = aoi.active_partition(window.start, window.end);
        stat.is_active = active;
        if !active {
            return stat;
        }

        let (samples, fixations, events) = if partition.is_empty() {
            (
                window.samples.to_vec(),
                window.fixations.to_vec(),
                window.events.map(<[Event]>::to_vec),
            )
        } else {
            restrict_to_partition(window, &partition, config)
        };

        let inside: Vec<Sample> = samples
            .into_iter()
            .filter(|s| s.gaze().is_some_and(|p| aoi.contains(p)))
            .collect();
        let (pupil, numpupilsizes, numpupilvelocity) =
            pupil_features(&inside, rest_pupil_size, config.pupil_adjustment);
        let (distance, numdistancedata) = distance_features(&inside);
        stat.features.pupil = pupil;
        stat.features.distance = distance;
        stat.support = SupportCounts {
            numpupilsizes,
            numpupilvelocity,
            numdistancedata,
            ..Default::default()
        };

        let effective = stat.length() - window.sum_discarded;
        let indices: Vec<usize> = (0..fixations.len())
            .filter(|&i| aoi.contains_fixation(&fixations[i]))
            .collect();
        stat.compute_fixation_features(&fixations, &indices, effective);
        if let Some(events) = events.as_deref() {
            stat.compute_event_features(aoi, events, effective, config);
        }
        stat.compute_transitions(&fixations, &indices, sources);
        stat
    }

    /// Counts, durations and timing of the in-AOI fixations
    fn compute_fixation_features(&mut self, fixations: &[Fixation], indices: &[usize], effective: i64) {
        let durations: Vec<f64> = indices.iter().map(|&i| fixations[i].duration as f64).collect();
        let total: f64 = durations.iter().sum();
        let features = &mut self.features;
        features.numfixations = indices.len();
        features.totaltimespent = total;
        features.proportiontime = if effective > 0 {
            total / effective as f64
        } else {
            0.0
        };

        let (Some(&first), Some(&last)) = (indices.first(), indices.last()) else {
            return;
        };
        features.longestfixation = durations.iter().copied().fold(f64::MIN, f64::max);
        features.meanfixationduration = mean(&durations);
        features.stddevfixationduration = stddev(&durations);
        features.timetofirstfixation = fixations[first].timestamp - self.starttime;
        features.timetolastfixation = fixations[last].timestamp - self.starttime;
        features.proportionnum = indices.len() as f64 / fixations.len() as f64;
        features.fixationrate = if total > 0.0 {
            indices.len() as f64 / total
        } else {
            NA
        };
    }

    /// Click counts and timing inside the AOI
    fn compute_event_features(
        &mut self,
        aoi: &Aoi,
        events: &[Event],
        effective: i64,
        config: &AnalysisConfig,
    ) {
        let clicks: Vec<&Event> = events.iter().filter(|e| aoi.contains_event(e)).collect();
        let lists = EventLists::classify(clicks.iter().copied(), config);
        let rate = |n: usize| {
            if effective > 0 {
                n as f64 / effective as f64
            } else {
                0.0
            }
        };
        let start = self.starttime;
        let first = |list: &[&Event]| list.first().map_or(-1, |e| e.timestamp - start);
        let last = |list: &[&Event]| list.last().map_or(-1, |e| e.timestamp - start);

        let features = &mut self.features;
        features.numevents = clicks.len();
        features.numleftclic = lists.left.len();
        features.numrightclic = lists.right.len();
        features.numdoubleclic = lists.double.len();
        features.leftclicrate = rate(lists.left.len());
        features.rightclicrate = rate(lists.right.len());
        features.doubleclicrate = rate(lists.double.len());
        features.timetofirstleftclic = first(&lists.left);
        features.timetofirstrightclic = first(&lists.right);
        features.timetofirstdoubleclic = first(&lists.double);
        features.timetolastleftclic = last(&lists.left);
        features.timetolastrightclic = last(&lists.right);
        features.timetolastdoubleclic = last(&lists.double);
    }

    /// For each in-AOI fixation, credit every source AOI that holds the
    /// fixation right before it
    fn compute_transitions(&mut self, fixations: &[Fixation], indices: &[usize], sources: &[Aoi]) {
        let mut total = 0;
        for &i in indices.iter().filter(|&&i| i > 0) {
            for source in sources {
                if source.contains_fixation(&fixations[i - 1]) {
                    if let Some(t) = self.transitions.get_mut(&source.aid) {
                        t.count += 1;
                        total += 1;
                    }
                }
            }
        }
        self.total_trans_from = total;
        self.normalize_transitions();
    }

    /// Recompute every transition proportion from the counts
    pub fn normalize_transitions(&mut self) {
        let total = self.total_trans_from;
        for t in self.transitions.values_mut() {
            t.proportion = if total > 0 {
                t.count as f64 / total as f64
            } else {
                0.0
            };
        }
    }

    /// All exported features, sorted by name, transitions included
    pub fn feature_values(&self) -> Result<BTreeMap<String, FeatureValue>, ComputeError> {
        let mut values = feature_map(&self.features)?;
        for (aid, t) in &self.transitions {
            values.insert(format!("numtransfrom_{}", aid), FeatureValue::Int(t.count as i64));
            values.insert(format!("proptransfrom_{}", aid), FeatureValue::Float(t.proportion));
        }
        Ok(values)
    }
}

/// Gather the records of each partition piece, in piece order
fn restrict_to_partition(
    window: &AoiWindow<'_>,
    partition: &[Interval],
    config: &AnalysisConfig,
) -> (Vec<Sample>, Vec<Fixation>, Option<Vec<Event>>) {
    let mut samples = Vec::new();
    let mut fixations = Vec::new();
    let mut events = window.events.map(|_| Vec::new());
    for &(s, e) in partition {
        if !(window.start <= e && window.end >= s) {
            continue;
        }
        samples.extend_from_slice(locate_points(window.samples, 0, s, e).slice(window.samples));
        fixations.extend_from_slice(
            locate_fixations(window.fixations, 0, s, e, config.include_half_fixations)
                .slice(window.fixations),
        );
        if let (Some(all), Some(kept)) = (window.events, events.as_mut()) {
            kept.extend_from_slice(locate_points(all, 0, s, e).slice(all));
        }
    }
    (samples, fixations, events)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon {
        vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1)]
    }

    fn fixation(index: u32, timestamp: i64, x: f64, y: f64) -> Fixation {
        Fixation {
            fixation_index: index,
            timestamp,
            duration: 100,
            x,
            y,
        }
    }

    fn window<'a>(fixations: &'a [Fixation], samples: &'a [Sample]) -> AoiWindow<'a> {
        AoiWindow {
            samples,
            fixations,
            events: None,
            start: 0,
            end: 1000,
            sum_discarded: 0,
        }
    }

    #[test]
    fn test_containment_with_hole() {
        let mut aoi = Aoi::global("frame", rect(0.0, 0.0, 100.0, 100.0));
        aoi.polyout[0] = rect(25.0, 25.0, 75.0, 75.0);
        assert!(aoi.contains((10.0, 10.0)));
        assert!(!aoi.contains((50.0, 50.0)));
        assert!(!aoi.contains((1000.0, 1000.0)));
    }

    #[test]
    fn test_mismatched_shapes_rejected() {
        let result = Aoi::new("x", vec![rect(0.0, 0.0, 1.0, 1.0)], vec![], vec![vec![]]);
        assert!(matches!(result, Err(ComputeError::InvalidAoi(_))));
    }

    #[test]
    fn test_is_active() {
        let aoi = Aoi::windowed("w", rect(0.0, 0.0, 1.0, 1.0), vec![(100, 200), (500, 600)]);
        assert!(aoi.is_active(150, 300));
        assert!(aoi.is_active(50, 150));
        assert!(!aoi.is_active(200, 400));
        assert!(!aoi.is_active(-1, 150));
        // enclosed interval only warns
        assert!(!aoi.is_active(400, 700));
        assert!(Aoi::global("g", vec![]).is_active(0, 0));
    }

    #[test]
    fn test_active_partition() {
        let aoi = Aoi::windowed("w", rect(0.0, 0.0, 1.0, 1.0), vec![(100, 200), (500, 600)]);
        assert_eq!(aoi.active_partition(120, 180), (true, vec![]));
        assert_eq!(
            aoi.active_partition(150, 550),
            (true, vec![(150, 200), (500, 550)])
        );
        assert_eq!(aoi.active_partition(300, 400), (false, vec![]));
        assert_eq!(
            Aoi::global("g", vec![]).active_partition(0, 10),
            (true, vec![])
        );
    }

    #[test]
    fn test_overlapping_pieces_are_merged() {
        let mut aoi = Aoi::windowed("w", rect(0.0, 0.0, 1.0, 1.0), vec![(100, 300)]);
        aoi.push_shape(rect(0.0, 0.0, 2.0, 2.0), vec![], vec![(250, 400)]);
        assert_eq!(aoi.active_partition(0, 1000), (true, vec![(100, 400)]));
        // two pieces jointly covering the window leave it whole
        assert_eq!(aoi.active_partition(150, 350), (true, vec![]));
    }

    #[test]
    fn test_alternating_transitions() {
        let a = Aoi::global("A", rect(0.0, 0.0, 100.0, 100.0));
        let b = Aoi::global("B", rect(200.0, 0.0, 300.0, 100.0));
        let aois = vec![a.clone(), b.clone()];
        let fixations = vec![
            fixation(0, 0, 50.0, 50.0),
            fixation(1, 200, 250.0, 50.0),
            fixation(2, 400, 50.0, 50.0),
            fixation(3, 600, 250.0, 50.0),
        ];
        let config = AnalysisConfig::default();
        let w = window(&fixations, &[]);

        let stat_b = AoiStat::compute(&b, &w, &aois, 0.0, &config);
        assert_eq!(stat_b.transitions["A"].count, 2);
        assert_eq!(stat_b.total_trans_from, 2);
        assert!((stat_b.transitions["A"].proportion - 1.0).abs() < 1e-12);
        assert_eq!(stat_b.transitions["B"].count, 0);

        let stat_a = AoiStat::compute(&a, &w, &aois, 0.0, &config);
        assert_eq!(stat_a.transitions["B"].count, 1);
        assert_eq!(stat_a.features.numfixations, 2);
        assert_eq!(stat_a.features.timetofirstfixation, 0);
        assert_eq!(stat_a.features.timetolastfixation, 400);
        assert!((stat_a.features.proportionnum - 0.5).abs() < 1e-12);
        assert!((stat_a.features.proportiontime - 0.2).abs() < 1e-12);
        assert!((stat_a.features.fixationrate - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_transitions_only_from_sources() {
        let a = Aoi::global("A", rect(0.0, 0.0, 100.0, 100.0));
        let b = Aoi::windowed("B", rect(200.0, 0.0, 300.0, 100.0), vec![(5000, 6000)]);
        let fixations = vec![fixation(0, 0, 250.0, 50.0), fixation(1, 200, 50.0, 50.0)];
        let config = AnalysisConfig::default();
        let stat = AoiStat::compute(&a, &window(&fixations, &[]), &[a.clone()], 0.0, &config);
        assert_eq!(stat.features.numfixations, 1);
        assert_eq!(stat.total_trans_from, 0);
        assert!(!stat.transitions.contains_key(&b.aid));
        let values = stat.feature_values().unwrap();
        assert!(!values.contains_key("numtransfrom_B"));
        assert_eq!(values["proptransfrom_A"], FeatureValue::Float(0.0));
    }

    #[test]
    fn test_inactive_stat_keeps_sentinels() {
        let aoi = Aoi::windowed("late", rect(0.0, 0.0, 100.0, 100.0), vec![(5000, 6000)]);
        let fixations = vec![fixation(0, 0, 50.0, 50.0)];
        let config = AnalysisConfig::default();
        let stat = AoiStat::compute(&aoi, &window(&fixations, &[]), &[aoi.clone()], 0.0, &config);
        assert!(!stat.is_active);
        assert_eq!(stat.features.numfixations, 0);
        assert_eq!(stat.features.longestfixation, -1.0);
        assert_eq!(stat.transitions["late"].count, 0);
        let values = stat.feature_values().unwrap();
        assert_eq!(values["numtransfrom_late"], FeatureValue::Int(0));
        assert_eq!(values["meanpupilsize"].as_f64(), Some(-1.0));
    }

    #[test]
    fn test_partition_restricts_fixations() {
        let aoi = Aoi::windowed("w", rect(0.0, 0.0, 100.0, 100.0), vec![(0, 350)]);
        let fixations = vec![
            fixation(0, 0, 50.0, 50.0),
            fixation(1, 200, 50.0, 50.0),
            fixation(2, 400, 50.0, 50.0),
        ];
        let config = AnalysisConfig::default();
        let stat = AoiStat::compute(&aoi, &window(&fixations, &[]), &[aoi.clone()], 0.0, &config);
        assert!(stat.is_active);
        assert_eq!(stat.features.numfixations, 2);
        assert_eq!(stat.transitions["w"].count, 1);
    }

    #[test]
    fn test_clicks_inside_aoi() {
        let aoi = Aoi::global("btn", rect(0.0, 0.0, 100.0, 100.0));
        let events = vec![
            Event {
                timestamp: 100,
                kind: crate::types::EventKind::LeftMouseClick,
                x: 10.0,
                y: 10.0,
                key_code: None,
                key_name: None,
                description: None,
            },
            Event {
                timestamp: 300,
                kind: crate::types::EventKind::KeyPress,
                x: 10.0,
                y: 10.0,
                key_code: Some(13),
                key_name: None,
                description: None,
            },
        ];
        let fixations = vec![fixation(0, 0, 50.0, 50.0)];
        let mut w = window(&fixations, &[]);
        w.events = Some(&events);
        let config = AnalysisConfig::default();
        let stat = AoiStat::compute(&aoi, &w, &[aoi.clone()], 0.0, &config);
        assert_eq!(stat.features.numevents, 1);
        assert_eq!(stat.features.numleftclic, 1);
        assert_eq!(stat.features.timetofirstleftclic, 100);
        assert!((stat.features.leftclicrate - 0.001).abs() < 1e-12);
    }
}
