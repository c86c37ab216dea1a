//! Scenes
//!
//! A [`Scene`] groups segments and carries a feature set merged from them.
//! Validity is judged over every segment of the scene, while features only
//! use the segments kept after optional validity filtering.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::aggregate::{merge_child_aoi_stats, merge_features, weighted_mean, Moments, Unit};
use crate::aoi::{Aoi, AoiStat};
use crate::config::AnalysisConfig;
use crate::error::ComputeError;
use crate::features::{SupportCounts, UnitFeatures};
use crate::segment::{Segment, StreamCursor, Streams};
use crate::types::SegmentSpec;
use crate::validity::{ValidityMeasures, ValidityVerdicts};

/// How segments are built from a segmentation table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOptions {
    /// Merge features of valid segments only
    pub require_valid_segments: bool,
    /// Split segments whose largest gap exceeds `max_seg_timegap`
    pub auto_partition: bool,
    /// Keep only the first `prune_length` ms of each segment
    pub prune_length: Option<i64>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            require_valid_segments: true,
            auto_partition: false,
            prune_length: None,
        }
    }
}

/// A named group of segments with merged features
#[derive(Debug, Clone)]
pub struct Scene {
    pub id: String,
    /// Every built segment, valid or not
    pub segments: Vec<Arc<Segment>>,
    pub start: i64,
    pub end: i64,
    pub measures: ValidityMeasures,
    pub verdicts: ValidityVerdicts,
    pub is_valid: bool,
    pub features: UnitFeatures,
    pub support: SupportCounts,
    pub aoi_stats: BTreeMap<String, AoiStat>,
    pub has_aois: bool,
    /// Features were merged from valid segments only
    pub require_valid: bool,
}

impl Scene {
    /// Build the segments of one scene from its table rows
    pub fn segments_from_table(
        specs: &[SegmentSpec],
        streams: &Streams<'_>,
        aois: &[Aoi],
        rest_pupil_size: f64,
        options: &BuildOptions,
        config: &AnalysisConfig,
    ) -> Vec<Arc<Segment>> {
        let mut segments = Vec::new();
        for spec in specs {
            let end = options
                .prune_length
                .map_or(spec.end, |prune| spec.end.min(spec.start + prune));
            let ranges = StreamCursor::new().locate(
                streams,
                spec.start,
                end,
                config.include_half_fixations,
            );
            if ranges.fixations.is_empty() {
                debug!(segment = %spec.id, "no fixations, segment skipped");
                continue;
            }
            let segment =
                match Segment::build(&spec.id, streams, ranges, aois, rest_pupil_size, config) {
                    Ok(segment) => segment,
                    Err(e) => {
                        warn!(segment = %spec.id, error = %e, "segment skipped");
                        continue;
                    }
                };
            if options.auto_partition && segment.needs_partition(config) {
                let parts =
                    segment.split_around_gaps(streams, spec.start, end, aois, rest_pupil_size, config);
                debug!(segment = %spec.id, parts = parts.len(), "segment partitioned");
                segments.extend(parts.into_iter().map(Arc::new));
            } else {
                segments.push(Arc::new(segment));
            }
        }
        segments
    }

    /// Build the segments of a table and group them into a scene
    #[allow(clippy::too_many_arguments)]
    pub fn from_table(
        id: impl Into<String>,
        specs: &[SegmentSpec],
        streams: &Streams<'_>,
        aois: &[Aoi],
        rest_pupil_size: f64,
        options: &BuildOptions,
        config: &AnalysisConfig,
    ) -> Result<Self, ComputeError> {
        let segments =
            Self::segments_from_table(specs, streams, aois, rest_pupil_size, options, config);
        Self::build(id, segments, options.require_valid_segments, config)
    }

    /// Group built segments into a scene
    pub fn build(
        id: impl Into<String>,
        segments: Vec<Arc<Segment>>,
        require_valid: bool,
        config: &AnalysisConfig,
    ) -> Result<Self, ComputeError> {
        let id = id.into();

        // validity over every segment
        let samples: Vec<usize> = segments.iter().map(|s| s.features.numsamples).collect();
        let weighted = |value: fn(&Segment) -> f64| {
            let parts: Vec<Moments> = segments
                .iter()
                .zip(&samples)
                .map(|(s, n)| Moments::new(*n, value(s), 0.0))
                .collect();
            weighted_mean(&parts)
        };
        let measures = ValidityMeasures {
            largest_gap: segments
                .iter()
                .map(|s| s.validity.largest_gap)
                .max()
                .unwrap_or(0),
            proportion_valid: weighted(|s| s.validity.proportion_valid),
            proportion_valid_fix: weighted(|s| s.validity.proportion_valid_fix),
        };
        let verdicts = measures.verdicts(config);

        let mut kept: Vec<&Segment> = segments
            .iter()
            .map(Arc::as_ref)
            .filter(|s| !require_valid || s.is_valid)
            .collect();
        if kept.is_empty() {
            return Err(ComputeError::NoSegmentsInScene(id));
        }
        kept.sort_by_key(|s| s.start);

        let (features, support) = merge_features(&kept);
        if features.length == 0 {
            return Err(ComputeError::ZeroLengthScene(id));
        }
        let start = kept.iter().map(|s| s.start).min().unwrap_or(0);
        let end = kept.iter().map(|s| s.end).max().unwrap_or(0);
        let aoi_stats =
            merge_child_aoi_stats(&kept, start, end, features.length, features.numfixations);

        debug!(
            scene = %id,
            segments = segments.len(),
            kept = kept.len(),
            "scene built"
        );
        Ok(Self {
            is_valid: verdicts.select(config.validity_method),
            has_aois: !aoi_stats.is_empty(),
            id,
            segments,
            start,
            end,
            measures,
            verdicts,
            features,
            support,
            aoi_stats,
            require_valid,
        })
    }

    pub fn length(&self) -> i64 {
        self.features.length
    }

    /// Ids of the segments passing the configured validity method
    pub fn valid_segments(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter(|s| s.is_valid)
            .map(|s| s.id.as_str())
            .collect()
    }
}

impl Unit for Scene {
    fn start(&self) -> i64 {
        self.start
    }

    fn features(&self) -> &UnitFeatures {
        &self.features
    }

    fn support(&self) -> &SupportCounts {
        &self.support
    }

    fn aoi_stats(&self) -> &BTreeMap<String, AoiStat> {
        &self.aoi_stats
    }
}
