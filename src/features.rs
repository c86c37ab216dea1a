//! Feature schema and per-window feature derivation
//!
//! Features are grouped by family into typed structs that flatten, via serde,
//! into the exported feature names. `-1` marks a feature that does not apply
//! to a unit (no saccades recorded, no pupil data, ...). Counters start at 0.
//!
//! The derivation functions here work on one contiguous window of records and
//! are shared by segments and AOI statistics.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

use crate::config::{AnalysisConfig, PupilAdjustment};
use crate::error::ComputeError;
use crate::geometry::{absolute_angles, path_distances, relative_angles};
use crate::stats::{mean, stddev, Summary};
use crate::types::{Event, EventKind, Fixation, Point, Saccade, Sample};

/// "Not applicable" marker
pub const NA: f64 = -1.0;

/// Fixation duration statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixationFeatures {
    pub meanfixationduration: f64,
    pub stddevfixationduration: f64,
    pub sumfixationduration: f64,
}

impl Default for FixationFeatures {
    fn default() -> Self {
        Self {
            meanfixationduration: NA,
            stddevfixationduration: NA,
            sumfixationduration: NA,
        }
    }
}

/// Scan path distance and angle statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathFeatures {
    pub meanpathdistance: f64,
    pub sumpathdistance: f64,
    pub stddevpathdistance: f64,
    pub eyemovementvelocity: f64,
    pub sumabspathangles: f64,
    pub abspathanglesrate: f64,
    pub meanabspathangles: f64,
    pub stddevabspathangles: f64,
    pub sumrelpathangles: f64,
    pub relpathanglesrate: f64,
    pub meanrelpathangles: f64,
    pub stddevrelpathangles: f64,
}

impl Default for PathFeatures {
    fn default() -> Self {
        Self {
            meanpathdistance: NA,
            sumpathdistance: NA,
            stddevpathdistance: NA,
            eyemovementvelocity: NA,
            sumabspathangles: NA,
            abspathanglesrate: NA,
            meanabspathangles: NA,
            stddevabspathangles: NA,
            sumrelpathangles: NA,
            relpathanglesrate: NA,
            meanrelpathangles: NA,
            stddevrelpathangles: NA,
        }
    }
}

/// Blink counts, durations and inter-blink intervals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlinkFeatures {
    pub blinknum: usize,
    pub blinkdurationtotal: f64,
    pub blinkdurationmean: f64,
    pub blinkdurationstd: f64,
    pub blinkdurationmin: f64,
    pub blinkdurationmax: f64,
    pub blinkrate: f64,
    pub blinktimedistancemean: f64,
    pub blinktimedistancestd: f64,
    pub blinktimedistancemin: f64,
    pub blinktimedistancemax: f64,
}

impl Default for BlinkFeatures {
    fn default() -> Self {
        Self {
            blinknum: 0,
            blinkdurationtotal: 0.0,
            blinkdurationmean: 0.0,
            blinkdurationstd: 0.0,
            blinkdurationmin: NA,
            blinkdurationmax: NA,
            blinkrate: NA,
            blinktimedistancemean: NA,
            blinktimedistancestd: NA,
            blinktimedistancemin: NA,
            blinktimedistancemax: NA,
        }
    }
}

/// Pupil size and velocity statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PupilFeatures {
    pub meanpupilsize: f64,
    pub stddevpupilsize: f64,
    pub maxpupilsize: f64,
    pub minpupilsize: f64,
    pub startpupilsize: f64,
    pub endpupilsize: f64,
    pub meanpupilvelocity: f64,
    pub stddevpupilvelocity: f64,
    pub maxpupilvelocity: f64,
    pub minpupilvelocity: f64,
}

impl Default for PupilFeatures {
    fn default() -> Self {
        Self {
            meanpupilsize: NA,
            stddevpupilsize: NA,
            maxpupilsize: NA,
            minpupilsize: NA,
            startpupilsize: NA,
            endpupilsize: NA,
            meanpupilvelocity: NA,
            stddevpupilvelocity: NA,
            maxpupilvelocity: NA,
            minpupilvelocity: NA,
        }
    }
}

/// Head distance from the screen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceFeatures {
    pub meandistance: f64,
    pub stddevdistance: f64,
    pub maxdistance: f64,
    pub mindistance: f64,
    pub startdistance: f64,
    pub enddistance: f64,
}

impl Default for DistanceFeatures {
    fn default() -> Self {
        Self {
            meandistance: NA,
            stddevdistance: NA,
            maxdistance: NA,
            mindistance: NA,
            startdistance: NA,
            enddistance: NA,
        }
    }
}

/// Saccade statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaccadeFeatures {
    pub numsaccades: usize,
    pub sumsaccadedistance: f64,
    pub meansaccadedistance: f64,
    pub stddevsaccadedistance: f64,
    pub longestsaccadedistance: f64,
    pub sumsaccadeduration: f64,
    pub meansaccadeduration: f64,
    pub stddevsaccadeduration: f64,
    pub longestsaccadeduration: f64,
    pub meansaccadespeed: f64,
    pub stddevsaccadespeed: f64,
    pub maxsaccadespeed: f64,
    pub minsaccadespeed: f64,
    pub fixationsaccadetimeratio: f64,
}

impl Default for SaccadeFeatures {
    fn default() -> Self {
        Self {
            numsaccades: 0,
            sumsaccadedistance: NA,
            meansaccadedistance: NA,
            stddevsaccadedistance: NA,
            longestsaccadedistance: NA,
            sumsaccadeduration: NA,
            meansaccadeduration: NA,
            stddevsaccadeduration: NA,
            longestsaccadeduration: NA,
            meansaccadespeed: NA,
            stddevsaccadespeed: NA,
            maxsaccadespeed: NA,
            minsaccadespeed: NA,
            fixationsaccadetimeratio: NA,
        }
    }
}

/// Click and key press counts, rates and first occurrences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFeatures {
    pub numevents: usize,
    pub numleftclic: usize,
    pub numrightclic: usize,
    pub numdoubleclic: usize,
    pub numkeypressed: usize,
    pub leftclicrate: f64,
    pub rightclicrate: f64,
    pub doubleclicrate: f64,
    pub keypressedrate: f64,
    /// ms from the unit start, -1 when absent
    pub timetofirstleftclic: i64,
    pub timetofirstrightclic: i64,
    pub timetofirstdoubleclic: i64,
    pub timetofirstkeypressed: i64,
}

impl Default for EventFeatures {
    fn default() -> Self {
        Self {
            numevents: 0,
            numleftclic: 0,
            numrightclic: 0,
            numdoubleclic: 0,
            numkeypressed: 0,
            leftclicrate: NA,
            rightclicrate: NA,
            doubleclicrate: NA,
            keypressedrate: NA,
            timetofirstleftclic: -1,
            timetofirstrightclic: -1,
            timetofirstdoubleclic: -1,
            timetofirstkeypressed: -1,
        }
    }
}

/// Sizes of the value lists behind the means and deviations of a unit.
/// Used as merge weights, never exported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportCounts {
    pub numpupilsizes: usize,
    pub numpupilvelocity: usize,
    pub numdistancedata: usize,
    pub numfixdistances: usize,
    pub numabsangles: usize,
    pub numrelangles: usize,
    /// A saccade stream was recorded for the unit
    pub saccade_stream: bool,
    pub event_stream: bool,
}

/// Full feature set of a segment or scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitFeatures {
    /// Segments only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<i64>,
    pub length: i64,
    pub length_invalid: i64,
    pub numsamples: usize,
    /// Scenes only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numsegments: Option<usize>,
    pub numfixations: usize,
    pub fixationrate: f64,
    #[serde(flatten)]
    pub fixations: FixationFeatures,
    #[serde(flatten)]
    pub path: PathFeatures,
    #[serde(flatten)]
    pub blinks: BlinkFeatures,
    #[serde(flatten)]
    pub pupil: PupilFeatures,
    #[serde(flatten)]
    pub distance: DistanceFeatures,
    #[serde(flatten)]
    pub saccades: SaccadeFeatures,
    #[serde(flatten)]
    pub events: EventFeatures,
    /// AOI hit by each fixation, present when AOIs were given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aoisequence: Option<Vec<String>>,
}

/// One exported feature value
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    Int(i64),
    Float(f64),
    Sequence(Vec<String>),
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureValue::Int(v) => write!(f, "{}", v),
            FeatureValue::Float(v) if v.is_nan() => write!(f, "nan"),
            FeatureValue::Float(v) => write!(f, "{}", v),
            FeatureValue::Sequence(items) => write!(f, "{}", items.join(",")),
        }
    }
}

impl FeatureValue {
    /// Numeric view, `None` for sequences
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FeatureValue::Int(v) => Some(*v as f64),
            FeatureValue::Float(v) => Some(*v),
            FeatureValue::Sequence(_) => None,
        }
    }

    fn from_json(value: serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Some(FeatureValue::Int(i)),
                None => n.as_f64().map(FeatureValue::Float),
            },
            // serde_json writes non-finite floats as null
            serde_json::Value::Null => Some(FeatureValue::Float(f64::NAN)),
            serde_json::Value::Array(items) => Some(FeatureValue::Sequence(
                items
                    .into_iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            )),
            _ => None,
        }
    }
}

/// Flatten a feature struct into `name -> value`, sorted by name
pub fn feature_map<T: Serialize>(features: &T) -> Result<BTreeMap<String, FeatureValue>, ComputeError> {
    match serde_json::to_value(features)? {
        serde_json::Value::Object(fields) => Ok(fields
            .into_iter()
            .filter_map(|(name, value)| FeatureValue::from_json(value).map(|v| (name, v)))
            .collect()),
        other => Err(ComputeError::ParseError(format!(
            "feature set is not a map: {}",
            other
        ))),
    }
}

/// Clicks and key presses split by kind.
///
/// A left click following a single left click within the double click delay
/// and distance replaces it as one double click.
#[derive(Debug, Default)]
pub struct EventLists<'a> {
    pub left: Vec<&'a Event>,
    pub right: Vec<&'a Event>,
    pub double: Vec<&'a Event>,
    pub keys: Vec<&'a Event>,
}

impl<'a> EventLists<'a> {
    pub fn classify(
        events: impl IntoIterator<Item = &'a Event>,
        config: &AnalysisConfig,
    ) -> Self {
        let mut lists = EventLists::default();
        let mut pending: Option<&Event> = None;
        for event in events {
            match event.kind {
                EventKind::KeyPress => lists.keys.push(event),
                EventKind::RightMouseClick => lists.right.push(event),
                EventKind::LeftMouseClick => match pending {
                    Some(prev)
                        if event.timestamp - prev.timestamp <= config.double_click_ms
                            && (event.x - prev.x).abs() <= config.double_click_px
                            && (event.y - prev.y).abs() <= config.double_click_px =>
                    {
                        lists.left.pop();
                        lists.double.push(event);
                        pending = None;
                    }
                    _ => {
                        lists.left.push(event);
                        pending = Some(event);
                    }
                },
                EventKind::Other => {}
            }
        }
        lists
    }
}

/// `count / duration`, `-1` for a non-positive duration
pub(crate) fn rate(count: f64, duration: i64) -> f64 {
    if duration > 0 {
        count / duration as f64
    } else {
        NA
    }
}

/// Apply the configured rest pupil adjustment
fn adjust_pupil(size: f64, rest: f64, adjustment: PupilAdjustment) -> f64 {
    match adjustment {
        PupilAdjustment::None => size,
        PupilAdjustment::Rpscenter => size - rest,
        PupilAdjustment::Pcps if rest != 0.0 => (size - rest) / rest,
        PupilAdjustment::Pcps => size,
    }
}

/// Pupil features over samples with a known pupil size.
///
/// Returns the features with the number of pupil sizes and velocities used.
pub fn pupil_features(
    samples: &[Sample],
    rest_pupil_size: f64,
    adjustment: PupilAdjustment,
) -> (PupilFeatures, usize, usize) {
    if adjustment == PupilAdjustment::Pcps && rest_pupil_size == 0.0 {
        warn!("rest pupil size is 0, PCPS adjustment skipped");
    }
    let sizes: Vec<f64> = samples
        .iter()
        .filter(|s| s.pupil_size > 0.0)
        .map(|s| adjust_pupil(s.pupil_size, rest_pupil_size, adjustment))
        .collect();
    let velocities: Vec<f64> = samples
        .iter()
        .filter(|s| s.pupil_velocity != -1.0)
        .map(|s| s.pupil_velocity)
        .collect();

    let mut features = PupilFeatures::default();
    if let Some(summary) = Summary::of(&sizes) {
        features.meanpupilsize = summary.mean;
        features.stddevpupilsize = summary.stddev;
        features.maxpupilsize = summary.max;
        features.minpupilsize = summary.min;
        features.startpupilsize = summary.first;
        features.endpupilsize = summary.last;

        if let Some(velocity) = Summary::of(&velocities) {
            features.meanpupilvelocity = velocity.mean;
            features.stddevpupilvelocity = velocity.stddev;
            features.maxpupilvelocity = velocity.max;
            features.minpupilvelocity = velocity.min;
        }
    }
    // velocities only count alongside pupil sizes
    let numvelocities = if sizes.is_empty() { 0 } else { velocities.len() };
    (features, sizes.len(), numvelocities)
}

/// Distance features over samples with a known head distance
pub fn distance_features(samples: &[Sample]) -> (DistanceFeatures, usize) {
    let distances: Vec<f64> = samples
        .iter()
        .filter(|s| s.distance > 0.0)
        .map(|s| s.distance)
        .collect();
    let mut features = DistanceFeatures::default();
    if let Some(summary) = Summary::of(&distances) {
        features.meandistance = summary.mean;
        features.stddevdistance = summary.stddev;
        features.maxdistance = summary.max;
        features.mindistance = summary.min;
        features.startdistance = summary.first;
        features.enddistance = summary.last;
    }
    (features, distances.len())
}

/// Blink features from invalid-blink runs whose duration is within
/// `config.blink_threshold`
pub fn blink_features(
    blink_runs: &[(i64, i64)],
    effective_duration: i64,
    config: &AnalysisConfig,
) -> BlinkFeatures {
    let (lower, upper) = config.blink_threshold;
    let blinks: Vec<&(i64, i64)> = blink_runs
        .iter()
        .filter(|(s, e)| (lower..=upper).contains(&(e - s)))
        .collect();
    let durations: Vec<f64> = blinks.iter().map(|(s, e)| (e - s) as f64).collect();
    let intervals: Vec<f64> = blinks
        .windows(2)
        .map(|pair| (pair[1].0 - pair[0].1) as f64)
        .collect();

    let mut features = BlinkFeatures::default();
    if let Some(summary) = Summary::of(&durations) {
        features.blinknum = summary.count;
        features.blinkdurationtotal = summary.sum;
        features.blinkdurationmean = summary.mean;
        features.blinkdurationstd = summary.stddev;
        features.blinkdurationmin = summary.min;
        features.blinkdurationmax = summary.max;
        features.blinkrate = rate(summary.count as f64, effective_duration);
    }
    if let Some(summary) = Summary::of(&intervals) {
        features.blinktimedistancemean = summary.mean;
        features.blinktimedistancestd = summary.stddev;
        features.blinktimedistancemin = summary.min;
        features.blinktimedistancemax = summary.max;
    }
    features
}

/// Fixation duration statistics; all `-1` without fixations
pub fn fixation_features(fixations: &[Fixation]) -> FixationFeatures {
    let durations: Vec<f64> = fixations.iter().map(|f| f.duration as f64).collect();
    match Summary::of(&durations) {
        Some(summary) => FixationFeatures {
            meanfixationduration: summary.mean,
            stddevfixationduration: summary.stddev,
            sumfixationduration: summary.sum,
        },
        None => FixationFeatures::default(),
    }
}

/// Path distances and angles between consecutive fixations.
///
/// Returns the features with the support counts of the three value lists.
pub fn path_features(fixations: &[Fixation], effective_duration: i64) -> (PathFeatures, SupportCounts) {
    let points: Vec<Point> = fixations.iter().map(Fixation::position).collect();
    let distances = path_distances(&points);
    let abs_angles = absolute_angles(&points);
    let rel_angles = relative_angles(&points);
    let counts = SupportCounts {
        numfixdistances: distances.len(),
        numabsangles: abs_angles.len(),
        numrelangles: rel_angles.len(),
        ..Default::default()
    };
    if distances.is_empty() {
        return (PathFeatures::default(), counts);
    }

    let sum_distance: f64 = distances.iter().sum();
    let sum_abs: f64 = abs_angles.iter().sum();
    let sum_rel: f64 = rel_angles.iter().sum();
    let features = PathFeatures {
        meanpathdistance: mean(&distances),
        sumpathdistance: sum_distance,
        stddevpathdistance: stddev(&distances),
        eyemovementvelocity: rate(sum_distance, effective_duration),
        sumabspathangles: sum_abs,
        abspathanglesrate: rate(sum_abs, effective_duration),
        meanabspathangles: mean(&abs_angles),
        stddevabspathangles: stddev(&abs_angles),
        sumrelpathangles: sum_rel,
        relpathanglesrate: rate(sum_rel, effective_duration),
        meanrelpathangles: mean(&rel_angles),
        stddevrelpathangles: stddev(&rel_angles),
    };
    (features, counts)
}

/// Saccade statistics; `None` or an empty list gives the missing sentinels
pub fn saccade_features(saccades: Option<&[Saccade]>, sum_fixation_duration: f64) -> SaccadeFeatures {
    let saccades = match saccades {
        Some(s) if !s.is_empty() => s,
        _ => return SaccadeFeatures::default(),
    };
    let distances: Vec<f64> = saccades.iter().map(|s| s.distance).collect();
    let durations: Vec<f64> = saccades.iter().map(|s| s.duration as f64).collect();
    let speeds: Vec<f64> = saccades.iter().map(|s| s.speed).collect();
    let (Some(distance), Some(duration), Some(speed)) = (
        Summary::of(&distances),
        Summary::of(&durations),
        Summary::of(&speeds),
    ) else {
        return SaccadeFeatures::default();
    };

    SaccadeFeatures {
        numsaccades: saccades.len(),
        sumsaccadedistance: distance.sum,
        meansaccadedistance: distance.mean,
        stddevsaccadedistance: distance.stddev,
        longestsaccadedistance: distance.max,
        sumsaccadeduration: duration.sum,
        meansaccadeduration: duration.mean,
        stddevsaccadeduration: duration.stddev,
        longestsaccadeduration: duration.max,
        meansaccadespeed: speed.mean,
        stddevsaccadespeed: speed.stddev,
        maxsaccadespeed: speed.max,
        minsaccadespeed: speed.min,
        fixationsaccadetimeratio: ratio_or_na(sum_fixation_duration, duration.sum),
    }
}

pub(crate) fn ratio_or_na(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 && numerator >= 0.0 {
        numerator / denominator
    } else {
        NA
    }
}

/// Event features of a unit starting at `start`.
///
/// Without an event stream the counts are 0 and the rates and times `-1`.
pub fn event_features(
    events: Option<&[Event]>,
    start: i64,
    effective_duration: i64,
    config: &AnalysisConfig,
) -> EventFeatures {
    let Some(events) = events else {
        return EventFeatures::default();
    };
    let lists = EventLists::classify(events, config);
    let first = |list: &[&Event]| list.first().map_or(-1, |e| e.timestamp - start);

    EventFeatures {
        numevents: lists.left.len() + lists.right.len() + lists.double.len() + lists.keys.len(),
        numleftclic: lists.left.len(),
        numrightclic: lists.right.len(),
        numdoubleclic: lists.double.len(),
        numkeypressed: lists.keys.len(),
        leftclicrate: rate(lists.left.len() as f64, effective_duration),
        rightclicrate: rate(lists.right.len() as f64, effective_duration),
        doubleclicrate: rate(lists.double.len() as f64, effective_duration),
        keypressedrate: rate(lists.keys.len() as f64, effective_duration),
        timetofirstleftclic: first(&lists.left),
        timetofirstrightclic: first(&lists.right),
        timetofirstdoubleclic: first(&lists.double),
        timetofirstkeypressed: first(&lists.keys),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn click(timestamp: i64, kind: EventKind, x: f64, y: f64) -> Event {
        Event {
            timestamp,
            kind,
            x,
            y,
            key_code: None,
            key_name: None,
            description: None,
        }
    }

    fn fixation(timestamp: i64, duration: i64, x: f64, y: f64) -> Fixation {
        Fixation {
            fixation_index: 0,
            timestamp,
            duration,
            x,
            y,
        }
    }

    fn pupil_sample(timestamp: i64, pupil_size: f64) -> Sample {
        Sample {
            timestamp,
            pupil_size,
            pupil_velocity: -1.0,
            distance: 0.0,
            is_valid: true,
            is_valid_blink: true,
            stimuli_name: "s".to_string(),
            fixation_index: None,
            gaze_x: 1.0,
            gaze_y: 1.0,
        }
    }

    #[test]
    fn test_double_click_replaces_single() {
        let config = AnalysisConfig::default();
        let events = vec![
            click(0, EventKind::LeftMouseClick, 100.0, 100.0),
            click(300, EventKind::LeftMouseClick, 105.0, 95.0),
            click(2000, EventKind::LeftMouseClick, 100.0, 100.0),
            click(2900, EventKind::LeftMouseClick, 100.0, 100.0),
            click(3000, EventKind::RightMouseClick, 0.0, 0.0),
            click(3100, EventKind::KeyPress, 0.0, 0.0),
        ];
        let lists = EventLists::classify(&events, &config);
        assert_eq!(lists.double.len(), 1);
        assert_eq!(lists.left.len(), 2);
        assert_eq!(lists.right.len(), 1);
        assert_eq!(lists.keys.len(), 1);
    }

    #[test]
    fn test_event_features_relative_to_start() {
        let config = AnalysisConfig::default();
        let events = vec![
            click(1200, EventKind::RightMouseClick, 0.0, 0.0),
            click(1500, EventKind::KeyPress, 0.0, 0.0),
        ];
        let features = event_features(Some(&events), 1000, 2000, &config);
        assert_eq!(features.numevents, 2);
        assert_eq!(features.timetofirstrightclic, 200);
        assert_eq!(features.timetofirstleftclic, -1);
        assert!((features.keypressedrate - 0.0005).abs() < 1e-12);

        let missing = event_features(None, 1000, 2000, &config);
        assert_eq!(missing.numevents, 0);
        assert_eq!(missing.leftclicrate, -1.0);
    }

    #[test]
    fn test_pupil_adjustment() {
        let samples = vec![pupil_sample(0, 4.0), pupil_sample(10, -1.0), pupil_sample(20, 6.0)];
        let (plain, sizes, velocities) = pupil_features(&samples, 2.0, PupilAdjustment::None);
        assert_eq!(sizes, 2);
        assert_eq!(velocities, 0);
        assert!((plain.meanpupilsize - 5.0).abs() < 1e-12);
        assert_eq!(plain.startpupilsize, 4.0);
        assert_eq!(plain.meanpupilvelocity, -1.0);

        let (centered, _, _) = pupil_features(&samples, 2.0, PupilAdjustment::Rpscenter);
        assert!((centered.meanpupilsize - 3.0).abs() < 1e-12);

        let (pcps, _, _) = pupil_features(&samples, 2.0, PupilAdjustment::Pcps);
        assert!((pcps.maxpupilsize - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_blink_threshold_filters_runs() {
        let config = AnalysisConfig::default();
        let runs = vec![(0, 50), (1000, 1150), (2000, 2250), (5000, 5600)];
        let blinks = blink_features(&runs, 10_000, &config);
        assert_eq!(blinks.blinknum, 2);
        assert!((blinks.blinkdurationtotal - 400.0).abs() < 1e-12);
        assert_eq!(blinks.blinktimedistancemin, 850.0);
        assert!((blinks.blinkrate - 0.0002).abs() < 1e-12);
    }

    #[test]
    fn test_single_fixation_has_no_path() {
        let fixations = vec![fixation(0, 200, 1.0, 1.0)];
        let (path, counts) = path_features(&fixations, 1000);
        assert_eq!(counts.numfixdistances, 0);
        assert_eq!(path.sumpathdistance, -1.0);
        let durations = fixation_features(&fixations);
        assert_eq!(durations.sumfixationduration, 200.0);
        assert!(durations.stddevfixationduration.is_nan());
    }

    #[test]
    fn test_path_features() {
        let fixations = vec![
            fixation(0, 100, 0.0, 0.0),
            fixation(200, 100, 30.0, 40.0),
            fixation(400, 100, 30.0, 0.0),
        ];
        let (path, counts) = path_features(&fixations, 1000);
        assert_eq!(counts.numfixdistances, 2);
        assert_eq!(counts.numrelangles, 1);
        assert!((path.sumpathdistance - 90.0).abs() < 1e-12);
        assert!((path.eyemovementvelocity - 0.09).abs() < 1e-12);
    }

    #[test]
    fn test_saccade_ratio() {
        let saccades = vec![Saccade {
            saccade_index: 0,
            timestamp: 0,
            duration: 50,
            distance: 120.0,
            speed: 2.4,
            acceleration: 0.0,
            start: None,
            end: None,
            quality: None,
        }];
        let features = saccade_features(Some(&saccades), 400.0);
        assert_eq!(features.numsaccades, 1);
        assert!((features.fixationsaccadetimeratio - 8.0).abs() < 1e-12);
        assert_eq!(saccade_features(None, 400.0).sumsaccadedistance, -1.0);
    }

    #[test]
    fn test_feature_map_flattens_groups() {
        let features = UnitFeatures {
            completion_time: None,
            length: 1000,
            length_invalid: 0,
            numsamples: 10,
            numsegments: Some(2),
            numfixations: 3,
            fixationrate: 0.003,
            fixations: FixationFeatures::default(),
            path: PathFeatures::default(),
            blinks: BlinkFeatures::default(),
            pupil: PupilFeatures {
                stddevpupilsize: f64::NAN,
                ..Default::default()
            },
            distance: DistanceFeatures::default(),
            saccades: SaccadeFeatures::default(),
            events: EventFeatures::default(),
            aoisequence: Some(vec!["a".to_string(), "b".to_string()]),
        };
        let map = feature_map(&features).unwrap();
        assert!(!map.contains_key("completion_time"));
        assert_eq!(map["numsegments"], FeatureValue::Int(2));
        assert_eq!(map["meandistance"].as_f64(), Some(-1.0));
        assert_eq!(map["stddevpupilsize"].to_string(), "nan");
        assert_eq!(map["aoisequence"].to_string(), "a,b");
    }
}
