//! Synthetic recordings shared by the unit tests

use crate::recording::RecordingData;
use crate::types::{Fixation, Sample};

/// A labelled sample gazing at (50, 50)
pub fn sample(timestamp: i64, is_valid: bool) -> Sample {
    Sample {
        timestamp,
        pupil_size: 3.0,
        pupil_velocity: -1.0,
        distance: 600.0,
        is_valid,
        is_valid_blink: true,
        stimuli_name: "screen".to_string(),
        fixation_index: None,
        gaze_x: 50.0,
        gaze_y: 50.0,
    }
}

pub fn fixation(index: u32, timestamp: i64, duration: i64, x: f64, y: f64) -> Fixation {
    Fixation {
        fixation_index: index,
        timestamp,
        duration,
        x,
        y,
    }
}

/// Samples every 10 ms over `[0, end]`, invalid inside the `invalid` ranges
/// (end excluded)
pub fn recording(end: i64, invalid: &[(i64, i64)], fixations: Vec<Fixation>) -> RecordingData {
    let samples = (0..=end / 10)
        .map(|i| {
            let ts = i * 10;
            sample(ts, !invalid.iter().any(|&(s, e)| ts >= s && ts < e))
        })
        .collect();
    RecordingData {
        samples,
        fixations,
        saccades: None,
        events: None,
    }
}

/// One 100 ms fixation every `step` ms over `[0, end)`, alternating between
/// two screen positions
pub fn regular_fixations(end: i64, step: i64) -> Vec<Fixation> {
    (0..end / step)
        .map(|i| {
            let x = if i % 2 == 0 { 10.0 } else { 70.0 };
            fixation(i as u32, i * step, 100, x, 10.0)
        })
        .collect()
}
