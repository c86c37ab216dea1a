//! Error types for Synheart Gaze

use thiserror::Error;

/// Level of the hierarchy at which a failure stops computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureScope {
    /// The segment is skipped, siblings proceed.
    Segment,
    /// The scene is dropped from its participant.
    Scene,
    /// The participant build aborts.
    Participant,
    /// Surfaced to the caller of a batch.
    Batch,
}

/// Errors that can occur during computation
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    ConfigError(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    ConfigSerializeError(#[from] toml::ser::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Empty window in segment {0}")]
    EmptyWindow(String),

    #[error("No fixations in segment {0}")]
    NoFixations(String),

    #[error("Zero length segment {0}")]
    ZeroLength(String),

    #[error("Segment {0} has no valid duration left after removing gaps")]
    NoValidDuration(String),

    #[error("No segments in scene {0}")]
    NoSegmentsInScene(String),

    #[error("Zero length scene {0}")]
    ZeroLengthScene(String),

    #[error("No segments for participant {0}")]
    NoSegments(String),

    #[error("Empty {0} stream")]
    EmptyStream(&'static str),

    #[error("Unsorted {stream} stream at index {index}")]
    UnsortedStream { stream: &'static str, index: usize },

    #[error("Invalid AOI definition: {0}")]
    InvalidAoi(String),

    #[error("Unknown feature: {0}")]
    UnknownFeature(String),

    #[error("Validity exploration requires participants built without segment filtering")]
    FilteredParticipants,

    #[error("Empty participant list")]
    EmptyParticipantList,

    #[error("No valid result: {0}")]
    NoValidResult(String),
}

impl ComputeError {
    /// Where in the Segment/Scene/Participant hierarchy this error is absorbed.
    pub fn scope(&self) -> FailureScope {
        match self {
            ComputeError::EmptyWindow(_)
            | ComputeError::NoFixations(_)
            | ComputeError::ZeroLength(_)
            | ComputeError::NoValidDuration(_) => FailureScope::Segment,
            ComputeError::NoSegmentsInScene(_) | ComputeError::ZeroLengthScene(_) => {
                FailureScope::Scene
            }
            ComputeError::NoValidResult(_)
            | ComputeError::EmptyParticipantList
            | ComputeError::FilteredParticipants => FailureScope::Batch,
            _ => FailureScope::Participant,
        }
    }

    /// True when the owning builder should log and continue.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.scope(), FailureScope::Segment | FailureScope::Scene)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_errors_are_recoverable() {
        let err = ComputeError::ZeroLength("s1".to_string());
        assert_eq!(err.scope(), FailureScope::Segment);
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("Zero length"));
    }

    #[test]
    fn test_scene_and_participant_scopes() {
        assert_eq!(
            ComputeError::NoSegmentsInScene("a".to_string()).scope(),
            FailureScope::Scene
        );
        let fatal = ComputeError::NoSegments("p1".to_string());
        assert_eq!(fatal.scope(), FailureScope::Participant);
        assert!(!fatal.is_recoverable());
        assert_eq!(
            ComputeError::NoValidResult("all failed".to_string()).scope(),
            FailureScope::Batch
        );
    }
}
