//! Analysis configuration
//!
//! All thresholds are carried in an explicit [`AnalysisConfig`] value that is
//! passed down to every stage. The struct loads from TOML, where every key is
//! optional and falls back to its documented default.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::ComputeError;

/// Which validity verdict is authoritative for pass/fail decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ValidityMethod {
    /// Proportion of valid samples
    ProportionValid,
    /// Largest invalid gap
    MaxGap,
    /// Proportion of valid or fixation-restored samples
    ProportionRestored,
}

impl TryFrom<u8> for ValidityMethod {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ValidityMethod::ProportionValid),
            2 => Ok(ValidityMethod::MaxGap),
            3 => Ok(ValidityMethod::ProportionRestored),
            other => Err(format!("validity method must be 1, 2 or 3, got {}", other)),
        }
    }
}

impl From<ValidityMethod> for u8 {
    fn from(method: ValidityMethod) -> Self {
        match method {
            ValidityMethod::ProportionValid => 1,
            ValidityMethod::MaxGap => 2,
            ValidityMethod::ProportionRestored => 3,
        }
    }
}

impl fmt::Display for ValidityMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

/// Rest pupil size adjustment applied to pupil features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PupilAdjustment {
    #[default]
    None,
    /// `size - rest`
    Rpscenter,
    /// `(size - rest) / rest`
    #[serde(alias = "PCPS")]
    Pcps,
}

/// Thresholds and policies for segmentation and validity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Minimum proportion of valid samples (exclusive)
    #[serde(default = "default_valid_prop_thresh", alias = "VALID_PROP_THRESH")]
    pub valid_prop_thresh: f64,

    /// Maximum acceptable invalid gap (ms, inclusive)
    #[serde(default = "default_valid_time_thresh", alias = "VALID_TIME_THRESH")]
    pub valid_time_thresh: i64,

    #[serde(default = "default_validity_method", alias = "VALIDITY_METHOD")]
    pub validity_method: ValidityMethod,

    /// Gaps longer than this (ms) are recorded and trigger auto-partitioning
    #[serde(default = "default_max_seg_timegap", alias = "MAX_SEG_TIMEGAP")]
    pub max_seg_timegap: i64,

    /// Sub-segments must be longer than this (ms) to survive partitioning
    #[serde(default = "default_min_seg_size", alias = "MINSEGSIZE")]
    pub min_seg_size: i64,

    /// Accept fixations that are at least half inside a window
    #[serde(default, alias = "INCLUDE_HALF_FIXATIONS")]
    pub include_half_fixations: bool,

    #[serde(default, alias = "PUPIL_ADJUSTMENT")]
    pub pupil_adjustment: PupilAdjustment,

    /// Invalid-blink runs with a duration in `[min, max]` ms count as blinks
    #[serde(default = "default_blink_threshold")]
    pub blink_threshold: (i64, i64),

    /// Max delay between two left clicks of a double click (ms)
    #[serde(default = "default_double_click_ms")]
    pub double_click_ms: i64,

    /// Max per-axis distance between two left clicks of a double click (px)
    #[serde(default = "default_double_click_px")]
    pub double_click_px: f64,
}

fn default_valid_prop_thresh() -> f64 {
    0.85
}

fn default_valid_time_thresh() -> i64 {
    3000
}

fn default_validity_method() -> ValidityMethod {
    ValidityMethod::ProportionRestored
}

fn default_max_seg_timegap() -> i64 {
    300
}

fn default_min_seg_size() -> i64 {
    300
}

fn default_blink_threshold() -> (i64, i64) {
    (100, 300)
}

fn default_double_click_ms() -> i64 {
    700
}

fn default_double_click_px() -> f64 {
    10.0
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            valid_prop_thresh: default_valid_prop_thresh(),
            valid_time_thresh: default_valid_time_thresh(),
            validity_method: default_validity_method(),
            max_seg_timegap: default_max_seg_timegap(),
            min_seg_size: default_min_seg_size(),
            include_half_fixations: false,
            pupil_adjustment: PupilAdjustment::None,
            blink_threshold: default_blink_threshold(),
            double_click_ms: default_double_click_ms(),
            double_click_px: default_double_click_px(),
        }
    }
}

impl AnalysisConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ComputeError> {
        Ok(toml::from_str(text)?)
    }

    /// Load a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ComputeError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> Result<String, ComputeError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Same configuration with another authoritative verdict
    pub fn with_validity_method(&self, method: ValidityMethod) -> Self {
        Self {
            validity_method: method,
            ..self.clone()
        }
    }
}
