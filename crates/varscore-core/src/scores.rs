//! Line-oriented score file format shared by shard workers, the
//! completion check, and the reconciler.
//!
//! The first line is a header object naming the target and statistic
//! columns; every following line is one variant record. A file is
//! structurally valid when the header parses, every record parses, and
//! every record carries exactly the header's statistics with one value
//! per target. A header-only file is a valid, empty result.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use thiserror::Error;

pub const SCORES_SCHEMA_VERSION: &str = "scores_v1";

/// Why a score file failed to load. Callers decide whether invalidity is
/// fatal (reconciliation) or just "not complete" (the completion check).
#[derive(Debug, Error)]
pub enum ScoresError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreHeader {
    pub schema_version: String,
    pub targets: Vec<String>,
    pub stats: Vec<String>,
}

impl ScoreHeader {
    pub fn new(targets: Vec<String>, stats: Vec<String>) -> Self {
        Self {
            schema_version: SCORES_SCHEMA_VERSION.to_string(),
            targets,
            stats,
        }
    }
}

/// One scored variant: per-statistic score vectors indexed like the
/// header's target list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub snp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chrom: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos: Option<u64>,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub ref_allele: Option<String>,
    #[serde(rename = "alt", default, skip_serializing_if = "Option::is_none")]
    pub alt_allele: Option<String>,
    pub scores: BTreeMap<String, Vec<f64>>,
}

#[derive(Debug)]
pub struct ScoresFile {
    pub header: ScoreHeader,
    pub records: Vec<ScoreRecord>,
}

fn validate_record(header: &ScoreHeader, record: &ScoreRecord) -> Result<(), String> {
    if record.snp.is_empty() {
        return Err("record missing snp id".to_string());
    }
    for stat in &header.stats {
        match record.scores.get(stat) {
            None => return Err(format!("snp {} missing stat '{}'", record.snp, stat)),
            Some(values) if values.len() != header.targets.len() => {
                return Err(format!(
                    "snp {} stat '{}' has {} values, expected {}",
                    record.snp,
                    stat,
                    values.len(),
                    header.targets.len()
                ));
            }
            Some(_) => {}
        }
    }
    for stat in record.scores.keys() {
        if !header.stats.contains(stat) {
            return Err(format!("snp {} has unknown stat '{}'", record.snp, stat));
        }
    }
    Ok(())
}

/// Read and fully validate a score file.
pub fn read_scores(path: &Path) -> Result<ScoresFile, ScoresError> {
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines();

    let header_line = match lines.next() {
        Some(line) => line?,
        None => return Err(ScoresError::Invalid("empty file; missing header".to_string())),
    };
    let header: ScoreHeader = serde_json::from_str(header_line.trim())
        .map_err(|e| ScoresError::Invalid(format!("header does not parse: {}", e)))?;
    if header.schema_version != SCORES_SCHEMA_VERSION {
        return Err(ScoresError::Invalid(format!(
            "unsupported schema_version '{}'",
            header.schema_version
        )));
    }

    let mut records = Vec::new();
    for (idx, line) in lines.enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let record: ScoreRecord = serde_json::from_str(trimmed)
            .map_err(|e| ScoresError::Invalid(format!("record on line {}: {}", idx + 2, e)))?;
        validate_record(&header, &record)
            .map_err(|reason| ScoresError::Invalid(format!("record on line {}: {}", idx + 2, reason)))?;
        records.push(record);
    }
    Ok(ScoresFile { header, records })
}

/// Streaming writer that enforces the header contract on every record.
pub struct ScoresWriter<W: Write> {
    inner: W,
    header: ScoreHeader,
    records: usize,
}

impl<W: Write> ScoresWriter<W> {
    pub fn new(mut inner: W, header: &ScoreHeader) -> Result<Self, ScoresError> {
        let line = serde_json::to_string(header)
            .map_err(|e| ScoresError::Invalid(format!("header does not serialize: {}", e)))?;
        inner.write_all(line.as_bytes())?;
        inner.write_all(b"\n")?;
        Ok(Self {
            inner,
            header: header.clone(),
            records: 0,
        })
    }

    pub fn write_record(&mut self, record: &ScoreRecord) -> Result<(), ScoresError> {
        validate_record(&self.header, record).map_err(ScoresError::Invalid)?;
        let line = serde_json::to_string(record)
            .map_err(|e| ScoresError::Invalid(format!("record does not serialize: {}", e)))?;
        self.inner.write_all(line.as_bytes())?;
        self.inner.write_all(b"\n")?;
        self.records += 1;
        Ok(())
    }

    pub fn records_written(&self) -> usize {
        self.records
    }

    pub fn finish(mut self) -> Result<W, ScoresError> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl ScoresWriter<std::io::BufWriter<fs::File>> {
    pub fn create(path: &Path, header: &ScoreHeader) -> Result<Self, ScoresError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::File::create(path)?;
        Self::new(std::io::BufWriter::new(file), header)
    }
}
