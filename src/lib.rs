//! Synheart Gaze - Segmentation, validity and feature aggregation for eye-tracking recordings
//!
//! Gaze turns ordered eye-tracking streams (samples, fixations, saccades and
//! UI events) into a hierarchy of analysis units: segments from a
//! segmentation table, scenes grouping them, and one whole-recording scene
//! per participant. Each unit carries a validity verdict and a typed feature
//! set; scene features are merged from their segments with weighted means and
//! pooled standard deviations rather than recomputed from raw records.
//!
//! ## Modules
//!
//! - **Windows and validity**: `locator`, `validity`
//! - **Units**: `segment`, `scene`, `participant`, with AOI statistics in `aoi`
//! - **Aggregation**: `aggregate`
//! - **Inputs and outputs**: `recording`, `export`, `validity_sweep`
//! - **Batches**: `dispatch`

pub mod aggregate;
pub mod aoi;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod export;
pub mod features;
pub mod geometry;
pub mod locator;
pub mod participant;
pub mod recording;
pub mod scene;
pub mod segment;
pub mod stats;
pub mod types;
pub mod validity;
pub mod validity_sweep;

#[cfg(test)]
mod test_support;

pub use aoi::{Aoi, AoiStat};
pub use config::{AnalysisConfig, PupilAdjustment, ValidityMethod};
pub use dispatch::{chunks, BatchReport, Job, ParallelDispatcher};
pub use error::{ComputeError, FailureScope};
pub use export::{export_features_all, write_features_tsv, FeatureSelection, FeatureTable};
pub use features::{FeatureValue, UnitFeatures};
pub use participant::Participant;
pub use recording::{JsonRecording, Recording, RecordingData};
pub use scene::{BuildOptions, Scene};
pub use segment::Segment;
pub use types::{Event, EventKind, Fixation, Sample, Saccade, SceneTable, SegmentSpec};

/// Gaze version embedded in exported documents
pub const GAZE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for exported documents
pub const PRODUCER_NAME: &str = "synheart-gaze";
