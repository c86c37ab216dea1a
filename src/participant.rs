//! Participants
//!
//! A [`Participant`] owns the record streams of one recording, every segment
//! built from its segmentation table and the scenes grouping them. The first
//! scene is always the synthetic whole-recording scene `"{pid}_allsc"`.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::aoi::Aoi;
use crate::config::{AnalysisConfig, ValidityMethod};
use crate::error::ComputeError;
use crate::recording::{Recording, RecordingData};
use crate::scene::{BuildOptions, Scene};
use crate::segment::Segment;
use crate::types::SceneTable;

/// Suffix of the whole-recording scene id
pub const WHOLE_SCENE_SUFFIX: &str = "_allsc";

/// One recording with its segments and scenes
#[derive(Debug, Clone)]
pub struct Participant {
    pub pid: String,
    pub data: RecordingData,
    /// Segments of every surviving scene, in table order
    pub segments: Vec<Arc<Segment>>,
    /// Whole-recording scene first, then table scenes in order
    pub scenes: Vec<Scene>,
    /// Ids of the AOIs the participant was built with, sorted
    pub aoi_ids: Vec<String>,
    pub options: BuildOptions,
    pub config: Arc<AnalysisConfig>,
}

impl Participant {
    /// Load a recording and build the participant
    #[allow(clippy::too_many_arguments)]
    pub fn load(
        pid: impl Into<String>,
        recording: &dyn Recording,
        table: &SceneTable,
        aois: &[Aoi],
        rest_pupil_sizes: Option<&BTreeMap<String, f64>>,
        options: BuildOptions,
        config: Arc<AnalysisConfig>,
    ) -> Result<Self, ComputeError> {
        let data = RecordingData::load(recording)?;
        Self::build(pid, data, table, aois, rest_pupil_sizes, options, config)
    }

    /// Build every segment and scene of a participant.
    ///
    /// Failing segments and scenes are skipped with a warning. An empty table
    /// or a failing whole-recording scene fails the participant.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        pid: impl Into<String>,
        data: RecordingData,
        table: &SceneTable,
        aois: &[Aoi],
        rest_pupil_sizes: Option<&BTreeMap<String, f64>>,
        options: BuildOptions,
        config: Arc<AnalysisConfig>,
    ) -> Result<Self, ComputeError> {
        let pid = pid.into();
        if table.is_empty() {
            return Err(ComputeError::NoSegments(pid));
        }
        data.validate()?;
        let streams = data.streams();

        let mut scenes = Vec::with_capacity(table.scenes.len() + 1);
        let mut segments = Vec::new();
        for (scene_id, specs) in &table.scenes {
            let rest = rest_pupil_size(&pid, scene_id, rest_pupil_sizes);
            let built =
                Scene::segments_from_table(specs, &streams, aois, rest, &options, &config);
            match Scene::build(
                scene_id.as_str(),
                built.clone(),
                options.require_valid_segments,
                &config,
            ) {
                Ok(scene) => {
                    segments.extend(built);
                    scenes.push(scene);
                }
                Err(e) if e.is_recoverable() => {
                    warn!(participant = %pid, scene = %scene_id, error = %e, "scene dropped");
                }
                Err(e) => return Err(e),
            }
        }

        let mut all = segments.clone();
        all.sort_by_key(|s| s.start);
        let whole_id = format!("{}{}", pid, WHOLE_SCENE_SUFFIX);
        let whole = Scene::build(whole_id, all, options.require_valid_segments, &config)
            .map_err(|e| {
                warn!(participant = %pid, error = %e, "whole recording scene failed");
                ComputeError::NoSegments(pid.clone())
            })?;
        scenes.insert(0, whole);

        let mut aoi_ids: Vec<String> = aois.iter().map(|a| a.aid.clone()).collect();
        aoi_ids.sort();
        aoi_ids.dedup();

        info!(
            participant = %pid,
            scenes = scenes.len(),
            segments = segments.len(),
            "participant built"
        );
        Ok(Self {
            pid,
            data,
            segments,
            scenes,
            aoi_ids,
            options,
            config,
        })
    }

    /// The whole-recording scene
    pub fn whole_scene(&self) -> Option<&Scene> {
        self.scenes.first()
    }

    pub fn scene(&self, id: &str) -> Option<&Scene> {
        self.scenes.iter().find(|s| s.id == id)
    }

    /// Validity of the whole recording, optionally re-evaluated with another
    /// method or threshold
    pub fn is_valid(&self, method: Option<ValidityMethod>, threshold: Option<f64>) -> bool {
        let Some(whole) = self.whole_scene() else {
            return false;
        };
        match (method, threshold) {
            (None, None) => whole.is_valid,
            (Some(method), None) => whole.verdicts.select(method),
            (method, Some(threshold)) => whole
                .measures
                .passes(method.unwrap_or(self.config.validity_method), threshold),
        }
    }

    pub fn valid_segments(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter(|s| s.is_valid)
            .map(|s| s.id.as_str())
            .collect()
    }

    pub fn invalid_segments(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter(|s| !s.is_valid)
            .map(|s| s.id.as_str())
            .collect()
    }
}

fn rest_pupil_size(pid: &str, scene_id: &str, sizes: Option<&BTreeMap<String, f64>>) -> f64 {
    let Some(sizes) = sizes else {
        return 0.0;
    };
    match sizes.get(scene_id) {
        Some(size) => *size,
        None => {
            warn!(participant = %pid, scene = %scene_id, "no rest pupil size, using 0");
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PupilAdjustment;
    use crate::test_support::{recording, regular_fixations};
    use crate::types::SegmentSpec;

    fn table() -> SceneTable {
        let mut table = SceneTable::new();
        table.push("intro", SegmentSpec::new("i1", 0, 900));
        table.push("task", SegmentSpec::new("t1", 1000, 1900));
        table.push("task", SegmentSpec::new("t2", 2000, 3000));
        table
    }

    fn build(invalid: &[(i64, i64)], options: BuildOptions) -> Result<Participant, ComputeError> {
        Participant::build(
            "p1",
            recording(3000, invalid, regular_fixations(3000, 200)),
            &table(),
            &[],
            None,
            options,
            Arc::new(AnalysisConfig::default()),
        )
    }

    #[test]
    fn test_whole_scene_comes_first() {
        let p = build(&[], BuildOptions::default()).unwrap();
        let ids: Vec<&str> = p.scenes.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["p1_allsc", "intro", "task"]);
        assert_eq!(p.segments.len(), 3);
        let whole = p.whole_scene().unwrap();
        assert_eq!(whole.features.numsegments, Some(3));
        assert_eq!(whole.length(), 900 + 900 + 1000);
        assert!(p.is_valid(None, None));
        assert_eq!(p.valid_segments(), vec!["i1", "t1", "t2"]);
        assert!(p.invalid_segments().is_empty());
    }

    #[test]
    fn test_segments_are_shared_with_the_whole_scene() {
        let p = build(&[], BuildOptions::default()).unwrap();
        let task = p.scene("task").unwrap();
        assert!(Arc::ptr_eq(&task.segments[0], &p.segments[1]));
    }

    #[test]
    fn test_validity_override() {
        let options = BuildOptions {
            require_valid_segments: false,
            ..BuildOptions::default()
        };
        let p = build(&[(2100, 2900)], options).unwrap();
        assert_eq!(p.invalid_segments(), vec!["t2"]);
        let whole = p.whole_scene().unwrap();
        assert_eq!(whole.measures.largest_gap, 800);
        assert!(p.is_valid(Some(ValidityMethod::MaxGap), None));
        assert!(!p.is_valid(Some(ValidityMethod::MaxGap), Some(500.0)));
        assert!(p.is_valid(Some(ValidityMethod::ProportionValid), Some(0.5)));
    }

    #[test]
    fn test_dropped_scene_keeps_participant() {
        let p = build(&[(0, 900)], BuildOptions::default()).unwrap();
        let ids: Vec<&str> = p.scenes.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["p1_allsc", "task"]);
        assert_eq!(p.segments.len(), 2);
    }

    #[test]
    fn test_empty_table_is_fatal() {
        let err = Participant::build(
            "p1",
            recording(1000, &[], regular_fixations(1000, 200)),
            &SceneTable::new(),
            &[],
            None,
            BuildOptions::default(),
            Arc::new(AnalysisConfig::default()),
        )
        .unwrap_err();
        assert!(matches!(err, ComputeError::NoSegments(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_rest_pupil_size_per_scene() {
        let mut sizes = BTreeMap::new();
        sizes.insert("intro".to_string(), 2.0);
        let config = AnalysisConfig {
            pupil_adjustment: PupilAdjustment::Rpscenter,
            ..AnalysisConfig::default()
        };
        let p = Participant::build(
            "p1",
            recording(3000, &[], regular_fixations(3000, 200)),
            &table(),
            &[],
            Some(&sizes),
            BuildOptions::default(),
            Arc::new(config),
        )
        .unwrap();
        let intro = p.scene("intro").unwrap();
        assert!((intro.features.pupil.meanpupilsize - 1.0).abs() < 1e-9);
        // missing scene falls back to 0
        let task = p.scene("task").unwrap();
        assert!((task.features.pupil.meanpupilsize - 3.0).abs() < 1e-9);
    }
}
