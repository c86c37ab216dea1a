//! Validity analysis
//!
//! A single walk over a sample window finds the contiguous runs of invalid
//! samples. From those runs and the valid proportions three independent
//! verdicts are derived:
//! 1. proportion of valid samples above `valid_prop_thresh`
//! 2. largest invalid gap at most `valid_time_thresh`
//! 3. proportion of valid or fixation-restored samples above `valid_prop_thresh`

use serde::{Deserialize, Serialize};

use crate::config::{AnalysisConfig, ValidityMethod};
use crate::types::Sample;

/// `(start, end)` of a run of flagged samples, in ms
pub type Gap = (i64, i64);

/// Runs of consecutive samples matching `in_gap`.
///
/// A run starts at its first flagged sample and ends at the first unflagged
/// sample after it, or at the last sample of the window.
pub fn flagged_runs(samples: &[Sample], in_gap: impl Fn(&Sample) -> bool) -> Vec<Gap> {
    let mut runs = Vec::new();
    let n = samples.len();
    let mut i = 0;
    while i < n {
        while i < n - 1 && !in_gap(&samples[i]) {
            i += 1;
        }
        if in_gap(&samples[i]) {
            let gap_start = samples[i].timestamp;
            while i < n - 1 && in_gap(&samples[i]) {
                i += 1;
            }
            runs.push((gap_start, samples[i].timestamp));
        }
        i += 1;
    }
    runs
}

/// Runs of invalid blink samples, regardless of duration
pub fn blink_gaps(samples: &[Sample]) -> Vec<Gap> {
    flagged_runs(samples, |s| !s.is_valid_blink)
}

/// Share of labelled samples that are valid
pub fn proportion_valid(samples: &[Sample]) -> f64 {
    proportion(samples, |s| s.is_valid)
}

/// Share of labelled samples that are valid or covered by a fixation.
/// A window without fixations scores 0.
pub fn proportion_valid_fix(samples: &[Sample], has_fixations: bool) -> f64 {
    if !has_fixations {
        return 0.0;
    }
    proportion(samples, |s| s.is_valid || s.fixation_index.is_some())
}

fn proportion(samples: &[Sample], keep: impl Fn(&Sample) -> bool) -> f64 {
    let labelled = samples.iter().filter(|s| !s.stimuli_name.is_empty());
    let (num, num_kept) = labelled.fold((0usize, 0usize), |(num, kept), s| {
        (num + 1, kept + usize::from(keep(s)))
    });
    if num == 0 {
        0.0
    } else {
        num_kept as f64 / num as f64
    }
}

/// Number of labelled samples
pub fn count_labelled(samples: &[Sample]) -> usize {
    samples.iter().filter(|s| !s.stimuli_name.is_empty()).count()
}

/// Gap and proportion measurements of one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidityReport {
    /// Longest invalid run (ms)
    pub largest_gap: i64,
    /// Invalid runs longer than `max_seg_timegap`
    pub time_gaps: Vec<Gap>,
    /// Summed length of `time_gaps`
    pub length_invalid: i64,
    pub proportion_valid: f64,
    pub proportion_valid_fix: f64,
}

impl ValidityReport {
    /// Analyze the samples of the window `[start, end]`.
    ///
    /// Without fixations (or samples) the whole window counts as one gap.
    pub fn analyze(
        samples: &[Sample],
        start: i64,
        end: i64,
        has_fixations: bool,
        config: &AnalysisConfig,
    ) -> Self {
        let (largest_gap, time_gaps) = match (samples.first(), samples.last()) {
            (Some(first), Some(last)) if !has_fixations => {
                (last.timestamp - first.timestamp, Vec::new())
            }
            (Some(_), Some(_)) => {
                let runs = flagged_runs(samples, |s| !s.is_valid);
                let largest = runs.iter().map(|(s, e)| e - s).max().unwrap_or(0);
                let long: Vec<Gap> = runs
                    .into_iter()
                    .filter(|(s, e)| e - s > config.max_seg_timegap)
                    .collect();
                (largest, long)
            }
            _ => (end - start, Vec::new()),
        };
        let length_invalid = time_gaps.iter().map(|(s, e)| e - s).sum();

        Self {
            largest_gap,
            time_gaps,
            length_invalid,
            proportion_valid: proportion_valid(samples),
            proportion_valid_fix: proportion_valid_fix(samples, has_fixations),
        }
    }

    pub fn verdicts(&self, config: &AnalysisConfig) -> ValidityVerdicts {
        ValidityVerdicts::evaluate(
            self.proportion_valid,
            self.proportion_valid_fix,
            self.largest_gap,
            config,
        )
    }
}

/// The three validity verdicts of one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityVerdicts {
    pub validity1: bool,
    pub validity2: bool,
    pub validity3: bool,
}

impl ValidityVerdicts {
    pub fn evaluate(
        proportion_valid: f64,
        proportion_valid_fix: f64,
        largest_gap: i64,
        config: &AnalysisConfig,
    ) -> Self {
        Self {
            validity1: proportion_valid > config.valid_prop_thresh,
            validity2: largest_gap <= config.valid_time_thresh,
            validity3: proportion_valid_fix > config.valid_prop_thresh,
        }
    }

    /// Verdict of the authoritative method
    pub fn select(&self, method: ValidityMethod) -> bool {
        match method {
            ValidityMethod::ProportionValid => self.validity1,
            ValidityMethod::MaxGap => self.validity2,
            ValidityMethod::ProportionRestored => self.validity3,
        }
    }
}

/// Raw measurements a unit keeps so its verdicts can be re-evaluated at
/// other thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidityMeasures {
    pub largest_gap: i64,
    pub proportion_valid: f64,
    pub proportion_valid_fix: f64,
}

impl ValidityMeasures {
    /// Verdict of `method` at an explicit threshold (a proportion for
    /// methods 1 and 3, a gap in ms for method 2)
    pub fn passes(&self, method: ValidityMethod, threshold: f64) -> bool {
        match method {
            ValidityMethod::ProportionValid => self.proportion_valid > threshold,
            ValidityMethod::MaxGap => (self.largest_gap as f64) <= threshold,
            ValidityMethod::ProportionRestored => self.proportion_valid_fix > threshold,
        }
    }

    pub fn verdicts(&self, config: &AnalysisConfig) -> ValidityVerdicts {
        ValidityVerdicts::evaluate(
            self.proportion_valid,
            self.proportion_valid_fix,
            self.largest_gap,
            config,
        )
    }
}

impl From<&ValidityReport> for ValidityMeasures {
    fn from(report: &ValidityReport) -> Self {
        Self {
            largest_gap: report.largest_gap,
            proportion_valid: report.proportion_valid,
            proportion_valid_fix: report.proportion_valid_fix,
        }
    }
}
