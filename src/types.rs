//! Core record types for Synheart Gaze
//!
//! These are the normalized, vendor-agnostic streams every recording format is
//! mapped to before analysis: gaze samples, fixations, saccades and UI events.
//! All timestamps are milliseconds and every stream is sorted by timestamp.

use serde::{Deserialize, Serialize};

/// Screen coordinate `(x, y)`
pub type Point = (f64, f64);

/// Closed polygon given by its vertices
pub type Polygon = Vec<Point>;

fn missing() -> f64 {
    -1.0
}

/// One raw gaze reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: i64,
    /// Pupil diameter, -1 when missing
    #[serde(default = "missing")]
    pub pupil_size: f64,
    /// Pupil velocity, -1 when missing
    #[serde(default = "missing")]
    pub pupil_velocity: f64,
    /// Distance from the screen, <= 0 when missing
    #[serde(default = "missing")]
    pub distance: f64,
    pub is_valid: bool,
    /// Validity flag used for blink detection
    #[serde(default = "default_true")]
    pub is_valid_blink: bool,
    /// Stimulus label; samples with an empty label are not counted
    #[serde(default)]
    pub stimuli_name: String,
    /// Index of the fixation this sample belongs to
    #[serde(default)]
    pub fixation_index: Option<u32>,
    #[serde(default = "missing")]
    pub gaze_x: f64,
    #[serde(default = "missing")]
    pub gaze_y: f64,
}

fn default_true() -> bool {
    true
}

impl Sample {
    /// Gaze position, `None` when either coordinate is missing
    pub fn gaze(&self) -> Option<Point> {
        if self.gaze_x == -1.0 || self.gaze_y == -1.0 {
            None
        } else {
            Some((self.gaze_x, self.gaze_y))
        }
    }
}

/// A detected fixation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fixation {
    pub fixation_index: u32,
    pub timestamp: i64,
    /// Duration (ms), never negative
    pub duration: i64,
    pub x: f64,
    pub y: f64,
}

impl Fixation {
    pub fn position(&self) -> Point {
        (self.x, self.y)
    }

    /// Timestamp at which the fixation ends
    pub fn end(&self) -> i64 {
        self.timestamp + self.duration
    }
}

/// A detected saccade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Saccade {
    pub saccade_index: u32,
    pub timestamp: i64,
    pub duration: i64,
    pub distance: f64,
    pub speed: f64,
    #[serde(default)]
    pub acceleration: f64,
    #[serde(default)]
    pub start: Option<Point>,
    #[serde(default)]
    pub end: Option<Point>,
    /// Share of valid samples along the saccade (0-1)
    #[serde(default)]
    pub quality: Option<f64>,
}

/// UI event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    LeftMouseClick,
    RightMouseClick,
    KeyPress,
    #[serde(other)]
    Other,
}

/// A timestamped UI event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: i64,
    pub kind: EventKind,
    /// Click position (x), 0 for keyboard events
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub key_code: Option<u32>,
    #[serde(default)]
    pub key_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Event {
    pub fn is_mouse_click(&self) -> bool {
        matches!(
            self.kind,
            EventKind::LeftMouseClick | EventKind::RightMouseClick
        )
    }
}

/// One row of a segmentation table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentSpec {
    pub id: String,
    pub start: i64,
    pub end: i64,
}

impl SegmentSpec {
    pub fn new(id: impl Into<String>, start: i64, end: i64) -> Self {
        Self {
            id: id.into(),
            start,
            end,
        }
    }
}

/// Segmentation table: scenes in order of first appearance, each with its
/// segments in file order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneTable {
    pub scenes: Vec<(String, Vec<SegmentSpec>)>,
}

impl SceneTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a segment to a scene, creating the scene if needed
    pub fn push(&mut self, scene_id: &str, segment: SegmentSpec) {
        match self.scenes.iter_mut().find(|(id, _)| id == scene_id) {
            Some((_, segments)) => segments.push(segment),
            None => self.scenes.push((scene_id.to_string(), vec![segment])),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.iter().all(|(_, segments)| segments.is_empty())
    }

    pub fn num_segments(&self) -> usize {
        self.scenes.iter().map(|(_, segments)| segments.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_defaults_from_json() {
        let sample: Sample =
            serde_json::from_str(r#"{"timestamp": 10, "is_valid": true}"#).unwrap();
        assert_eq!(sample.pupil_size, -1.0);
        assert!(sample.is_valid_blink);
        assert!(sample.stimuli_name.is_empty());
        assert_eq!(sample.gaze(), None);
    }

    #[test]
    fn test_unknown_event_kind() {
        let event: Event =
            serde_json::from_str(r#"{"timestamp": 5, "kind": "MouseWheel"}"#).unwrap();
        assert_eq!(event.kind, EventKind::Other);
        assert!(!event.is_mouse_click());
    }

    #[test]
    fn test_scene_table_keeps_first_appearance_order() {
        let mut table = SceneTable::new();
        table.push("b", SegmentSpec::new("b1", 0, 10));
        table.push("a", SegmentSpec::new("a1", 20, 30));
        table.push("b", SegmentSpec::new("b2", 40, 50));
        assert_eq!(table.scenes[0].0, "b");
        assert_eq!(table.scenes[0].1.len(), 2);
        assert_eq!(table.num_segments(), 3);
    }
}
