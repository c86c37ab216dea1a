//! Validity exploration
//!
//! Re-evaluates segment and participant validity over a range of thresholds
//! to help pick `valid_prop_thresh` and `valid_time_thresh` for a study.
//! Every function needs participants built without segment filtering, so
//! that invalid segments are still around to be counted.

use serde::Serialize;
use tracing::debug;

use crate::config::ValidityMethod;
use crate::error::ComputeError;
use crate::participant::Participant;

/// Proportion thresholds explored, in percent
const PROPORTION_STEPS: std::ops::RangeInclusive<u32> = 1..=101;

/// Results of one participant over every threshold
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepRow<T> {
    pub pid: String,
    pub num_segments: usize,
    /// One entry per threshold, in threshold order
    pub results: Vec<T>,
}

/// Threshold sweep over a list of participants
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sweep<T> {
    pub thresholds: Vec<f64>,
    pub rows: Vec<SweepRow<T>>,
}

/// Invalid segment counts per participant and threshold
pub type SegmentSweep = Sweep<usize>;

/// Whole-recording invalidity per participant and threshold
pub type ParticipantSweep = Sweep<bool>;

/// Totals of a segment sweep at one threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SweepSummary {
    pub threshold: f64,
    pub invalid_segments: usize,
    pub total_segments: usize,
    /// Participants with at least one invalid segment
    pub invalid_participants: usize,
}

impl SegmentSweep {
    pub fn summary(&self) -> Vec<SweepSummary> {
        let total_segments = self.rows.iter().map(|r| r.num_segments).sum();
        self.thresholds
            .iter()
            .enumerate()
            .map(|(i, &threshold)| {
                let counts = self.rows.iter().filter_map(|r| r.results.get(i).copied());
                let (invalid_segments, invalid_participants) = counts
                    .fold((0, 0), |(segs, users), c| (segs + c, users + usize::from(c > 0)));
                SweepSummary {
                    threshold,
                    invalid_segments,
                    total_segments,
                    invalid_participants,
                }
            })
            .collect()
    }
}

/// Share of segment time kept by validity filtering
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscardedRow {
    pub pid: String,
    pub is_valid: bool,
    pub valid_duration: i64,
    pub total_duration: i64,
    pub valid_portion: f64,
}

fn proportion_thresholds() -> Vec<f64> {
    PROPORTION_STEPS.map(|t| f64::from(t) / 100.0).collect()
}

fn proportion_method(include_restored: bool) -> ValidityMethod {
    if include_restored {
        ValidityMethod::ProportionRestored
    } else {
        ValidityMethod::ProportionValid
    }
}

fn require_unfiltered(participants: &[Participant]) -> Result<(), ComputeError> {
    if participants
        .iter()
        .any(|p| p.options.require_valid_segments)
    {
        return Err(ComputeError::FilteredParticipants);
    }
    Ok(())
}

fn sweep_segments(
    participants: &[Participant],
    thresholds: Vec<f64>,
    method: ValidityMethod,
) -> Result<SegmentSweep, ComputeError> {
    require_unfiltered(participants)?;
    let rows = participants
        .iter()
        .map(|p| {
            let measures: Vec<_> = p.segments.iter().map(|s| s.measures()).collect();
            let results = thresholds
                .iter()
                .map(|&t| measures.iter().filter(|m| !m.passes(method, t)).count())
                .collect();
            debug!(participant = %p.pid, segments = measures.len(), "segments swept");
            SweepRow {
                pid: p.pid.clone(),
                num_segments: measures.len(),
                results,
            }
        })
        .collect();
    Ok(Sweep { thresholds, rows })
}

/// Invalid segments per participant for proportion thresholds 0.01 to 1.01
pub fn sweep_proportion_segments(
    participants: &[Participant],
    include_restored: bool,
) -> Result<SegmentSweep, ComputeError> {
    sweep_segments(
        participants,
        proportion_thresholds(),
        proportion_method(include_restored),
    )
}

/// Invalid segments per participant for each largest-gap threshold (ms)
pub fn sweep_time_gap_segments(
    participants: &[Participant],
    gaps: &[i64],
) -> Result<SegmentSweep, ComputeError> {
    let thresholds = gaps.iter().map(|&g| g as f64).collect();
    sweep_segments(participants, thresholds, ValidityMethod::MaxGap)
}

/// Whether each participant's whole recording fails at proportion thresholds
/// 0.01 to 1.01
pub fn sweep_proportion_participants(
    participants: &[Participant],
    include_restored: bool,
) -> Result<ParticipantSweep, ComputeError> {
    require_unfiltered(participants)?;
    let method = proportion_method(include_restored);
    let thresholds = proportion_thresholds();
    let rows = participants
        .iter()
        .map(|p| SweepRow {
            pid: p.pid.clone(),
            num_segments: p.segments.len(),
            results: thresholds
                .iter()
                .map(|&t| !p.is_valid(Some(method), Some(t)))
                .collect(),
        })
        .collect();
    Ok(Sweep { thresholds, rows })
}

/// Valid against total segment time per participant
pub fn percent_discarded(participants: &[Participant]) -> Result<Vec<DiscardedRow>, ComputeError> {
    require_unfiltered(participants)?;
    Ok(participants
        .iter()
        .map(|p| {
            let total_duration: i64 = p.segments.iter().map(|s| s.length()).sum();
            let valid_duration: i64 = p
                .segments
                .iter()
                .filter(|s| s.is_valid)
                .map(|s| s.length())
                .sum();
            DiscardedRow {
                pid: p.pid.clone(),
                is_valid: p.is_valid(None, None),
                valid_duration,
                total_duration,
                valid_portion: if total_duration > 0 {
                    valid_duration as f64 / total_duration as f64
                } else {
                    0.0
                },
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::scene::BuildOptions;
    use crate::test_support::{recording, regular_fixations};
    use crate::types::{SceneTable, SegmentSpec};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn participant(options: BuildOptions) -> Participant {
        let mut table = SceneTable::new();
        table.push("intro", SegmentSpec::new("i1", 0, 900));
        table.push("task", SegmentSpec::new("t1", 1000, 1900));
        table.push("task", SegmentSpec::new("t2", 2000, 3000));
        Participant::build(
            "p1",
            recording(3000, &[(2100, 2900)], regular_fixations(3000, 200)),
            &table,
            &[],
            None,
            options,
            Arc::new(AnalysisConfig::default()),
        )
        .unwrap()
    }

    fn unfiltered() -> Participant {
        participant(BuildOptions {
            require_valid_segments: false,
            ..BuildOptions::default()
        })
    }

    #[test]
    fn test_proportion_sweep_segments() {
        let sweep = sweep_proportion_segments(&[unfiltered()], false).unwrap();
        assert_eq!(sweep.thresholds.len(), 101);
        assert!((sweep.thresholds[0] - 0.01).abs() < 1e-9);
        let row = &sweep.rows[0];
        assert_eq!(row.num_segments, 3);
        // t2 keeps 21 of 101 samples
        assert_eq!(row.results[19], 0);
        assert_eq!(row.results[20], 1);
        assert_eq!(row.results[98], 1);
        assert_eq!(row.results[99], 3);
        assert_eq!(row.results[100], 3);
    }

    #[test]
    fn test_time_gap_sweep() {
        let sweep = sweep_time_gap_segments(&[unfiltered()], &[100, 800, 1000]).unwrap();
        assert_eq!(sweep.rows[0].results, vec![1, 0, 0]);
        let summary = sweep.summary();
        assert_eq!(summary[0].invalid_segments, 1);
        assert_eq!(summary[0].total_segments, 3);
        assert_eq!(summary[0].invalid_participants, 1);
        assert_eq!(summary[1].invalid_participants, 0);
    }

    #[test]
    fn test_participant_sweep() {
        let sweep = sweep_proportion_participants(&[unfiltered()], true).unwrap();
        // whole recording keeps 203 of 283 samples
        let results = &sweep.rows[0].results;
        assert!(!results[70]);
        assert!(results[71]);
        assert!(results[100]);
    }

    #[test]
    fn test_percent_discarded() {
        let rows = percent_discarded(&[unfiltered()]).unwrap();
        assert_eq!(rows[0].valid_duration, 1800);
        assert_eq!(rows[0].total_duration, 2800);
        assert!((rows[0].valid_portion - 1800.0 / 2800.0).abs() < 1e-9);
        assert!(!rows[0].is_valid);
    }

    #[test]
    fn test_filtered_participants_are_rejected() {
        let filtered = participant(BuildOptions::default());
        let err = sweep_proportion_segments(&[filtered.clone()], true).unwrap_err();
        assert!(matches!(err, ComputeError::FilteredParticipants));
        assert!(percent_discarded(&[filtered]).is_err());
    }
}
