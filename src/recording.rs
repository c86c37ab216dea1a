//! Recording inputs
//!
//! A [`Recording`] hands over the normalized record streams of one
//! participant. [`RecordingData::load`] checks them once so the rest of the
//! crate can rely on non-empty, sorted streams.
//!
//! The plain-text readers cover the segmentation table (`.seg`), AOI
//! definitions (`.aoi`) and the rest pupil size table.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::warn;

use crate::aoi::{Aoi, Interval};
use crate::error::ComputeError;
use crate::locator::Timed;
use crate::segment::Streams;
use crate::types::{Event, Fixation, Point, Polygon, Saccade, Sample, SceneTable, SegmentSpec};

/// Source of the record streams of one participant
pub trait Recording {
    fn read_samples(&self) -> Result<Vec<Sample>, ComputeError>;

    fn read_fixations(&self) -> Result<Vec<Fixation>, ComputeError>;

    /// `None` when the recording has no saccade stream
    fn read_saccades(&self) -> Result<Option<Vec<Saccade>>, ComputeError> {
        Ok(None)
    }

    /// `None` when the recording has no event stream
    fn read_events(&self) -> Result<Option<Vec<Event>>, ComputeError> {
        Ok(None)
    }
}

/// Normalized JSON recording document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordingDocument {
    pub samples: Vec<Sample>,
    pub fixations: Vec<Fixation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saccades: Option<Vec<Saccade>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<Event>>,
}

/// Recording read from a normalized JSON document
#[derive(Debug, Clone)]
pub struct JsonRecording {
    document: RecordingDocument,
}

impl JsonRecording {
    pub fn from_json(raw_json: &str) -> Result<Self, ComputeError> {
        Ok(Self {
            document: serde_json::from_str(raw_json)?,
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ComputeError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(Self {
            document: serde_json::from_reader(reader)?,
        })
    }
}

impl Recording for JsonRecording {
    fn read_samples(&self) -> Result<Vec<Sample>, ComputeError> {
        Ok(self.document.samples.clone())
    }

    fn read_fixations(&self) -> Result<Vec<Fixation>, ComputeError> {
        Ok(self.document.fixations.clone())
    }

    fn read_saccades(&self) -> Result<Option<Vec<Saccade>>, ComputeError> {
        Ok(self.document.saccades.clone())
    }

    fn read_events(&self) -> Result<Option<Vec<Event>>, ComputeError> {
        Ok(self.document.events.clone())
    }
}

/// Validated record streams owned by a participant
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingData {
    pub samples: Vec<Sample>,
    pub fixations: Vec<Fixation>,
    pub saccades: Option<Vec<Saccade>>,
    pub events: Option<Vec<Event>>,
}

impl RecordingData {
    /// Read and validate every stream of `recording`
    pub fn load(recording: &dyn Recording) -> Result<Self, ComputeError> {
        let data = Self {
            samples: recording.read_samples()?,
            fixations: recording.read_fixations()?,
            saccades: recording.read_saccades()?,
            events: recording.read_events()?,
        };
        data.validate()?;
        Ok(data)
    }

    /// Samples and fixations must be non-empty, optional streams non-empty
    /// when present, and every stream sorted by timestamp
    pub fn validate(&self) -> Result<(), ComputeError> {
        check_stream("samples", &self.samples)?;
        check_stream("fixations", &self.fixations)?;
        if let Some(saccades) = &self.saccades {
            check_stream("saccades", saccades)?;
        }
        if let Some(events) = &self.events {
            check_stream("events", events)?;
        }
        Ok(())
    }

    pub fn streams(&self) -> Streams<'_> {
        Streams {
            samples: &self.samples,
            fixations: &self.fixations,
            saccades: self.saccades.as_deref(),
            events: self.events.as_deref(),
        }
    }
}

fn check_stream<T: Timed>(name: &'static str, records: &[T]) -> Result<(), ComputeError> {
    if records.is_empty() {
        return Err(ComputeError::EmptyStream(name));
    }
    match records
        .windows(2)
        .position(|pair| pair[1].timestamp() < pair[0].timestamp())
    {
        Some(i) => Err(ComputeError::UnsortedStream {
            stream: name,
            index: i + 1,
        }),
        None => Ok(()),
    }
}

fn parse_field<T: std::str::FromStr>(raw: &str, what: &str, line: usize) -> Result<T, ComputeError> {
    raw.trim()
        .parse()
        .map_err(|_| ComputeError::ParseError(format!("line {}: invalid {} '{}'", line, what, raw)))
}

/// Parse `a,b` into a pair
fn parse_pair<T: std::str::FromStr>(raw: &str, what: &str, line: usize) -> Result<(T, T), ComputeError> {
    let (a, b) = raw.split_once(',').ok_or_else(|| {
        ComputeError::ParseError(format!("line {}: expected '{}' as a,b, got '{}'", line, what, raw))
    })?;
    Ok((parse_field(a, what, line)?, parse_field(b, what, line)?))
}

/// Read a segmentation table: `scene<TAB>segment<TAB>start<TAB>end` per line
pub fn read_segments(reader: impl BufRead) -> Result<SceneTable, ComputeError> {
    let mut table = SceneTable::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let number = i + 1;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.trim_end().split('\t').collect();
        let [scene, segment, start, end] = fields.as_slice() else {
            return Err(ComputeError::ParseError(format!(
                "line {}: expected 4 tab-separated fields, got {}",
                number,
                fields.len()
            )));
        };
        let spec = SegmentSpec::new(
            segment.trim(),
            parse_field(start, "start", number)?,
            parse_field(end, "end", number)?,
        );
        table.push(scene.trim(), spec);
    }
    Ok(table)
}

pub fn read_segments_file(path: impl AsRef<Path>) -> Result<SceneTable, ComputeError> {
    read_segments(BufReader::new(File::open(path)?))
}

/// Read AOI definitions.
///
/// Each `name<TAB>x,y<TAB>x,y...` line defines a polygon, optionally followed
/// by a `#<TAB>start,end...` line with its activation intervals. A name seen
/// again adds a shape to the same AOI.
pub fn read_aois(reader: impl BufRead) -> Result<Vec<Aoi>, ComputeError> {
    let mut aois: Vec<Aoi> = Vec::new();
    let mut pending: Option<(String, Polygon)> = None;

    fn flush(aois: &mut Vec<Aoi>, name: String, polygon: Polygon, intervals: Vec<Interval>) {
        match aois.iter_mut().find(|a| a.aid == name) {
            Some(aoi) => aoi.push_shape(polygon, Vec::new(), intervals),
            None => aois.push(Aoi::windowed(name, polygon, intervals)),
        }
    }

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let number = i + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut chunks = trimmed.split('\t');
        let head = chunks.next().unwrap_or_default();
        if head.starts_with('#') {
            let (name, polygon) = pending.take().ok_or_else(|| {
                ComputeError::InvalidAoi(format!("line {}: intervals without a polygon", number))
            })?;
            let intervals = chunks
                .map(|c| parse_pair::<i64>(c, "interval", number))
                .collect::<Result<Vec<Interval>, _>>()?;
            flush(&mut aois, name, polygon, intervals);
        } else {
            if let Some((name, polygon)) = pending.take() {
                flush(&mut aois, name, polygon, Vec::new());
            }
            let polygon = chunks
                .map(|c| parse_pair::<f64>(c, "vertex", number))
                .collect::<Result<Vec<Point>, _>>()?;
            pending = Some((head.to_string(), polygon));
        }
    }
    if let Some((name, polygon)) = pending {
        flush(&mut aois, name, polygon, Vec::new());
    }
    Ok(aois)
}

pub fn read_aois_file(path: impl AsRef<Path>) -> Result<Vec<Aoi>, ComputeError> {
    read_aois(BufReader::new(File::open(path)?))
}

/// Rest pupil size per participant, then per scene
pub type RestPupilTable = BTreeMap<String, BTreeMap<String, f64>>;

/// Read the rest pupil size table: a `pid<TAB>scene...` header, then one row
/// per participant
pub fn read_rest_pupil_sizes(reader: impl BufRead) -> Result<RestPupilTable, ComputeError> {
    let mut lines = reader.lines();
    let header = match lines.next() {
        Some(line) => line?,
        None => return Ok(RestPupilTable::new()),
    };
    let scenes: Vec<String> = header
        .trim_end()
        .split('\t')
        .skip(1)
        .map(|s| s.trim().to_string())
        .collect();

    let mut table = RestPupilTable::new();
    for (i, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.trim_end().split('\t');
        let pid = fields.next().unwrap_or_default().trim().to_string();
        let row = table.entry(pid.clone()).or_default();
        for (scene, raw) in scenes.iter().zip(fields) {
            match raw.trim().parse::<f64>() {
                Ok(size) => {
                    row.insert(scene.clone(), size);
                }
                Err(_) => warn!(
                    line = i + 2,
                    participant = %pid,
                    scene = %scene,
                    value = raw,
                    "unparseable rest pupil size skipped"
                ),
            }
        }
    }
    Ok(table)
}

pub fn read_rest_pupil_sizes_file(path: impl AsRef<Path>) -> Result<RestPupilTable, ComputeError> {
    read_rest_pupil_sizes(BufReader::new(File::open(path)?))
}
