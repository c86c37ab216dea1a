//! Feature export
//!
//! Flattens scenes or segments into a [`FeatureTable`]: one row per unit,
//! identifier columns first, then scalar features sorted by name, then one
//! `<aid>_<feature>` column per AOI feature. Tables are written as TSV or as
//! a JSON document carrying producer metadata.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use tracing::warn;
use uuid::Uuid;

use crate::aoi::{AoiStat, Transition};
use crate::error::ComputeError;
use crate::features::{
    feature_map, BlinkFeatures, DistanceFeatures, EventFeatures, FeatureValue, FixationFeatures,
    PathFeatures, PupilFeatures, SaccadeFeatures, UnitFeatures,
};
use crate::participant::Participant;
use crate::{GAZE_VERSION, PRODUCER_NAME};

/// Version of the JSON export document
pub const EXPORT_FORMAT_VERSION: &str = "1.0.0";

const TRANSITION_FEATURES: [&str; 2] = ["numtransfrom", "proptransfrom"];

/// Which features end up in a table. `None` selects everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSelection {
    /// Scalar feature names
    pub features: Option<Vec<String>>,
    /// AOI feature names exported for every AOI. `numtransfrom` and
    /// `proptransfrom` expand to one column per source AOI.
    pub aoi_features: Option<Vec<String>>,
    /// Exact `<aid>_<feature>` labels, replacing `aoi_features`
    pub aoi_labels: Option<Vec<String>>,
}

impl FeatureSelection {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_features<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.features = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_aoi_features<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.aoi_features = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_aoi_labels<S: Into<String>>(mut self, labels: impl IntoIterator<Item = S>) -> Self {
        self.aoi_labels = Some(labels.into_iter().map(Into::into).collect());
        self
    }
}

/// Exported rows with their header
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Producer metadata of an export document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportProducer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

/// JSON export document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDocument {
    pub format_version: String,
    pub producer: ExportProducer,
    pub computed_at_utc: String,
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl FeatureTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Wrap the table in an export document with fresh run metadata
    pub fn to_document(&self) -> ExportDocument {
        ExportDocument {
            format_version: EXPORT_FORMAT_VERSION.to_string(),
            producer: ExportProducer {
                name: PRODUCER_NAME.to_string(),
                version: GAZE_VERSION.to_string(),
                instance_id: Uuid::new_v4().to_string(),
            },
            computed_at_utc: Utc::now().to_rfc3339(),
            header: self.header.clone(),
            rows: self.rows.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String, ComputeError> {
        serde_json::to_string_pretty(&self.to_document()).map_err(ComputeError::JsonError)
    }
}

/// Write `table` as tab-separated text with a header row
pub fn write_features_tsv<W: Write>(mut writer: W, table: &FeatureTable) -> Result<(), ComputeError> {
    writeln!(writer, "{}", table.header.join("\t"))?;
    for row in &table.rows {
        writeln!(writer, "{}", row.join("\t"))?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitKind {
    Scene,
    Segment,
}

/// Feature set holding every name exported for `kind`
fn template(kind: UnitKind, with_aois: bool) -> UnitFeatures {
    UnitFeatures {
        completion_time: (kind == UnitKind::Segment).then_some(0),
        length: 0,
        length_invalid: 0,
        numsamples: 0,
        numsegments: (kind == UnitKind::Scene).then_some(0),
        numfixations: 0,
        fixationrate: 0.0,
        fixations: FixationFeatures::default(),
        path: PathFeatures::default(),
        blinks: BlinkFeatures::default(),
        pupil: PupilFeatures::default(),
        distance: DistanceFeatures::default(),
        saccades: SaccadeFeatures::default(),
        events: EventFeatures::default(),
        aoisequence: with_aois.then(Vec::new),
    }
}

/// Inactive statistics of `aid` with one transition entry per AOI
fn empty_stat(aid: &str, aoi_ids: &[String]) -> AoiStat {
    let mut stat = AoiStat::empty(aid, -1, -1, &[]);
    stat.transitions = aoi_ids
        .iter()
        .map(|id| (id.clone(), Transition::default()))
        .collect();
    stat
}

/// Resolved feature columns of one table
#[derive(Debug, Clone)]
struct Columns {
    scalars: Vec<String>,
    /// `(aid, feature)` pairs
    aoi: Vec<(String, String)>,
}

impl Columns {
    fn resolve(
        selection: &FeatureSelection,
        kind: UnitKind,
        aoi_ids: &[String],
    ) -> Result<Self, ComputeError> {
        let available: BTreeSet<String> =
            feature_map(&template(kind, !aoi_ids.is_empty()))?.into_keys().collect();
        let scalars = match &selection.features {
            None => available.into_iter().collect(),
            Some(names) => {
                let mut chosen = BTreeSet::new();
                for name in names {
                    if !available.contains(name) {
                        return Err(ComputeError::UnknownFeature(name.clone()));
                    }
                    chosen.insert(name.clone());
                }
                chosen.into_iter().collect()
            }
        };

        let aoi_names: Vec<String> = match aoi_ids.first() {
            Some(aid) => empty_stat(aid, aoi_ids).feature_values()?.into_keys().collect(),
            None => Vec::new(),
        };
        let selected: BTreeSet<String> = match &selection.aoi_features {
            None => aoi_names.iter().cloned().collect(),
            Some(names) => {
                let mut chosen = BTreeSet::new();
                for name in names {
                    if TRANSITION_FEATURES.contains(&name.as_str()) {
                        chosen.extend(aoi_ids.iter().map(|id| format!("{}_{}", name, id)));
                    } else if aoi_names.contains(name) {
                        chosen.insert(name.clone());
                    } else {
                        return Err(ComputeError::UnknownFeature(name.clone()));
                    }
                }
                chosen
            }
        };

        let mut aoi = Vec::new();
        for aid in aoi_ids {
            for name in &aoi_names {
                aoi.push((aid.clone(), name.clone()));
            }
        }
        match &selection.aoi_labels {
            Some(labels) => {
                for label in labels {
                    if !aoi.iter().any(|(aid, name)| &format!("{}_{}", aid, name) == label) {
                        return Err(ComputeError::UnknownFeature(label.clone()));
                    }
                }
                aoi.retain(|(aid, name)| labels.contains(&format!("{}_{}", aid, name)));
            }
            None => aoi.retain(|(_, name)| selected.contains(name)),
        }
        Ok(Self { scalars, aoi })
    }

    fn header(&self, ids: &[&str]) -> Vec<String> {
        ids.iter()
            .map(|id| id.to_string())
            .chain(self.scalars.iter().cloned())
            .chain(self.aoi.iter().map(|(aid, name)| format!("{}_{}", aid, name)))
            .collect()
    }

    fn row(
        &self,
        mut ids: Vec<String>,
        features: &UnitFeatures,
        stats: &BTreeMap<String, AoiStat>,
        aoi_ids: &[String],
    ) -> Result<Vec<String>, ComputeError> {
        let values = feature_map(features)?;
        let cell = |v: Option<&FeatureValue>| v.map(ToString::to_string).unwrap_or_default();
        ids.extend(self.scalars.iter().map(|name| cell(values.get(name))));

        let mut aoi_values: BTreeMap<&str, BTreeMap<String, FeatureValue>> = BTreeMap::new();
        for (aid, name) in &self.aoi {
            if !aoi_values.contains_key(aid.as_str()) {
                let computed = match stats.get(aid) {
                    Some(stat) => stat.feature_values()?,
                    None => empty_stat(aid, aoi_ids).feature_values()?,
                };
                aoi_values.insert(aid.as_str(), computed);
            }
            ids.push(cell(aoi_values.get(aid.as_str()).and_then(|v| v.get(name))));
        }
        Ok(ids)
    }
}

impl Participant {
    /// One row per scene, whole recording first.
    ///
    /// With `require_valid`, invalid scenes are skipped.
    pub fn export_features(
        &self,
        selection: &FeatureSelection,
        id_prefix: bool,
        require_valid: bool,
    ) -> Result<FeatureTable, ComputeError> {
        let columns = Columns::resolve(selection, UnitKind::Scene, &self.aoi_ids)?;
        let ids: &[&str] = if id_prefix {
            &["Part_id", "Sc_id"]
        } else {
            &["Sc_id"]
        };
        let mut table = FeatureTable {
            header: columns.header(ids),
            rows: Vec::new(),
        };
        self.push_scene_rows(&columns, id_prefix, require_valid, &mut table)?;
        Ok(table)
    }

    fn push_scene_rows(
        &self,
        columns: &Columns,
        id_prefix: bool,
        require_valid: bool,
        table: &mut FeatureTable,
    ) -> Result<(), ComputeError> {
        for scene in &self.scenes {
            if require_valid && !scene.is_valid {
                warn!(participant = %self.pid, scene = %scene.id, "invalid scene not exported");
                continue;
            }
            let mut ids = Vec::with_capacity(2);
            if id_prefix {
                ids.push(self.pid.clone());
            }
            ids.push(scene.id.clone());
            table.rows.push(columns.row(
                ids,
                &scene.features,
                &scene.aoi_stats,
                &self.aoi_ids,
            )?);
        }
        Ok(())
    }

    /// One row per segment
    pub fn export_segment_features(
        &self,
        selection: &FeatureSelection,
    ) -> Result<FeatureTable, ComputeError> {
        let columns = Columns::resolve(selection, UnitKind::Segment, &self.aoi_ids)?;
        let mut table = FeatureTable {
            header: columns.header(&["Part_id", "Seg_id"]),
            rows: Vec::new(),
        };
        for segment in &self.segments {
            table.rows.push(columns.row(
                vec![self.pid.clone(), segment.id.clone()],
                &segment.features,
                &segment.aoi_stats,
                &self.aoi_ids,
            )?);
        }
        Ok(table)
    }
}

/// Scene rows of every participant, prefixed by the participant id.
///
/// Invalid participants are skipped unless `include_invalid` is set.
pub fn export_features_all(
    participants: &[Participant],
    selection: &FeatureSelection,
    require_valid: bool,
    include_invalid: bool,
) -> Result<FeatureTable, ComputeError> {
    let first = participants.first().ok_or(ComputeError::EmptyParticipantList)?;
    let columns = Columns::resolve(selection, UnitKind::Scene, &first.aoi_ids)?;
    let mut table = FeatureTable {
        header: columns.header(&["Part_id", "Sc_id"]),
        rows: Vec::new(),
    };
    for participant in participants {
        if !include_invalid && !participant.is_valid(None, None) {
            warn!(participant = %participant.pid, "invalid participant not exported");
            continue;
        }
        participant.push_scene_rows(&columns, true, require_valid, &mut table)?;
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aoi::Aoi;
    use crate::config::AnalysisConfig;
    use crate::scene::BuildOptions;
    use crate::test_support::{recording, regular_fixations};
    use crate::types::{SceneTable, SegmentSpec};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn aois() -> Vec<Aoi> {
        vec![
            Aoi::global("A", vec![(0.0, 0.0), (30.0, 0.0), (30.0, 30.0), (0.0, 30.0)]),
            Aoi::global("B", vec![(60.0, 0.0), (90.0, 0.0), (90.0, 30.0), (60.0, 30.0)]),
        ]
    }

    fn participant(pid: &str, invalid: &[(i64, i64)], aois: &[Aoi]) -> Participant {
        let mut table = SceneTable::new();
        table.push("intro", SegmentSpec::new("i1", 0, 900));
        table.push("task", SegmentSpec::new("t1", 1000, 2000));
        let options = BuildOptions {
            require_valid_segments: false,
            ..BuildOptions::default()
        };
        Participant::build(
            pid,
            recording(2000, invalid, regular_fixations(2000, 200)),
            &table,
            aois,
            None,
            options,
            Arc::new(AnalysisConfig::default()),
        )
        .unwrap()
    }

    #[test]
    fn test_scene_table_layout() {
        let p = participant("p1", &[], &[]);
        let table = p.export_features(&FeatureSelection::all(), true, false).unwrap();
        assert_eq!(table.header[..2], ["Part_id".to_string(), "Sc_id".to_string()]);
        let mut sorted = table.header[2..].to_vec();
        sorted.sort();
        assert_eq!(table.header[2..].to_vec(), sorted);
        assert!(table.header.contains(&"numsegments".to_string()));
        assert!(!table.header.contains(&"completion_time".to_string()));
        assert!(!table.header.contains(&"aoisequence".to_string()));
        let scenes: Vec<&str> = table.rows.iter().map(|r| r[1].as_str()).collect();
        assert_eq!(scenes, vec!["p1_allsc", "intro", "task"]);
        assert!(table.rows.iter().all(|r| r.len() == table.header.len()));
    }

    #[test]
    fn test_explicit_features() {
        let p = participant("p1", &[], &[]);
        let selection = FeatureSelection::all().with_features(["numfixations", "length"]);
        let table = p.export_features(&selection, false, false).unwrap();
        assert_eq!(table.header, vec!["Sc_id", "length", "numfixations"]);
        assert_eq!(table.rows[1], vec!["intro", "900", "5"]);

        let unknown = FeatureSelection::all().with_features(["pupilsize"]);
        let err = p.export_features(&unknown, false, false).unwrap_err();
        assert!(matches!(err, ComputeError::UnknownFeature(name) if name == "pupilsize"));
    }

    #[test]
    fn test_transition_features_expand_per_aoi() {
        let p = participant("p1", &[], &aois());
        let selection = FeatureSelection::all()
            .with_features(["numfixations"])
            .with_aoi_features(["numfixations", "numtransfrom"]);
        let table = p.export_features(&selection, false, false).unwrap();
        assert_eq!(
            table.header,
            vec![
                "Sc_id",
                "numfixations",
                "A_numfixations",
                "A_numtransfrom_A",
                "A_numtransfrom_B",
                "B_numfixations",
                "B_numtransfrom_A",
                "B_numtransfrom_B",
            ]
        );
        // intro holds fixations at 0, 200, 400, 600, 800 alternating A and B
        assert_eq!(table.rows[1], vec!["intro", "5", "3", "0", "2", "2", "2", "0"]);
    }

    #[test]
    fn test_exact_aoi_labels() {
        let p = participant("p1", &[], &aois());
        let selection = FeatureSelection::all()
            .with_features(["length"])
            .with_aoi_labels(["B_numfixations"]);
        let table = p.export_features(&selection, false, false).unwrap();
        assert_eq!(table.header, vec!["Sc_id", "length", "B_numfixations"]);

        let bad = FeatureSelection::all().with_aoi_labels(["C_numfixations"]);
        assert!(p.export_features(&bad, false, false).is_err());
    }

    #[test]
    fn test_segment_rows() {
        let p = participant("p1", &[], &aois());
        let selection = FeatureSelection::all()
            .with_features(["completion_time", "aoisequence"])
            .with_aoi_features(Vec::<String>::new());
        let table = p.export_segment_features(&selection).unwrap();
        assert_eq!(table.header, vec!["Part_id", "Seg_id", "aoisequence", "completion_time"]);
        assert_eq!(table.rows[0], vec!["p1", "i1", "A,B,A,B,A", "900"]);
    }

    #[test]
    fn test_require_valid_skips_invalid_scenes() {
        let p = participant("p1", &[(1100, 1900)], &[]);
        let all = p.export_features(&FeatureSelection::all(), false, false).unwrap();
        assert_eq!(all.rows.len(), 3);
        let valid = p.export_features(&FeatureSelection::all(), false, true).unwrap();
        let scenes: Vec<&str> = valid.rows.iter().map(|r| r[0].as_str()).collect();
        assert_eq!(scenes, vec!["intro"]);
    }

    #[test]
    fn test_export_all() {
        let good = participant("p1", &[], &[]);
        let bad = participant("p2", &[(100, 1900)], &[]);
        let selection = FeatureSelection::all().with_features(["length"]);
        let table = export_features_all(&[good.clone(), bad.clone()], &selection, false, false).unwrap();
        assert!(table.rows.iter().all(|r| r[0] == "p1"));
        assert_eq!(table.rows.len(), 3);

        let table = export_features_all(&[good, bad], &selection, false, true).unwrap();
        assert_eq!(table.rows.len(), 6);

        let err = export_features_all(&[], &selection, false, false).unwrap_err();
        assert!(matches!(err, ComputeError::EmptyParticipantList));
    }

    #[test]
    fn test_tsv_and_json_output() {
        let table = FeatureTable {
            header: vec!["Sc_id".to_string(), "length".to_string()],
            rows: vec![vec!["intro".to_string(), "900".to_string()]],
        };
        let mut out = Vec::new();
        write_features_tsv(&mut out, &table).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Sc_id\tlength\nintro\t900\n");

        let json = table.to_json().unwrap();
        let doc: ExportDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(doc.producer.name, PRODUCER_NAME);
        assert_eq!(doc.producer.version, GAZE_VERSION);
        assert!(Uuid::parse_str(&doc.producer.instance_id).is_ok());
        assert!(chrono::DateTime::parse_from_rfc3339(&doc.computed_at_utc).is_ok());
        assert_eq!(doc.rows, table.rows);
    }

    #[test]
    fn test_tsv_to_file() {
        let p = participant("p1", &[], &[]);
        let table = p.export_features(&FeatureSelection::all(), true, false).unwrap();
        let file = tempfile::NamedTempFile::new().unwrap();
        write_features_tsv(file.reopen().unwrap(), &table).unwrap();
        let written = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(written.lines().count(), 1 + table.rows.len());
        assert!(written.starts_with("Part_id\tSc_id\t"));
    }
}
