use crate::config::RunConfiguration;
use crate::error::Result;
use crate::scores::{read_scores, ScoresError};

/// Answers "has this shard already produced its result?". The submitter
/// consults it in restart mode and the run controller gates
/// reconciliation on it.
pub trait CompletionOracle {
    fn is_complete(&self, shard: u32) -> Result<bool>;
}

/// The filesystem oracle: a shard is complete iff its result file exists
/// and passes structural validation. A present-but-invalid file counts
/// as incomplete, so a restarted run recomputes it instead of merging
/// corrupt output.
pub struct FsCompletionOracle {
    config: RunConfiguration,
}

impl FsCompletionOracle {
    pub fn new(config: &RunConfiguration) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

impl CompletionOracle for FsCompletionOracle {
    fn is_complete(&self, shard: u32) -> Result<bool> {
        let path = self.config.shard_result_path(shard);
        match read_scores(&path) {
            Ok(_) => Ok(true),
            Err(ScoresError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(ScoresError::Invalid(reason)) => {
                tracing::debug!(
                    shard,
                    path = %path.display(),
                    reason = %reason,
                    "result file present but not valid"
                );
                Ok(false)
            }
            Err(ScoresError::Io(e)) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ResourceRequest, SchedulerKind, SNAPSHOT_SCHEMA_VERSION};
    use crate::scores::{ScoreHeader, ScoresWriter};
    use chrono::Utc;
    use std::fs;
    use std::path::{Path, PathBuf};

    fn temp_out_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "varscore_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ))
    }

    fn sample_config(out_dir: &Path) -> RunConfiguration {
        RunConfiguration {
            schema_version: SNAPSHOT_SCHEMA_VERSION.to_string(),
            model: PathBuf::from("model"),
            dataset: PathBuf::from("data"),
            out_dir: out_dir.to_path_buf(),
            total_shards: 4,
            max_concurrent: None,
            scheduler: SchedulerKind::Local,
            queue: "standard".to_string(),
            resources: ResourceRequest::default(),
            name: "varscore".to_string(),
            worker: "varscore-worker".to_string(),
            env_setup: None,
            result_filename: "scores.jsonl".to_string(),
            poll_interval_secs: 1,
            launch_interval_secs: 0,
            restart: false,
            strict: false,
        }
    }

    fn header() -> ScoreHeader {
        ScoreHeader::new(vec!["t0".to_string()], vec!["SAD".to_string()])
    }

    #[test]
    fn missing_file_is_incomplete() {
        let out_dir = temp_out_dir("oracle_missing");
        let oracle = FsCompletionOracle::new(&sample_config(&out_dir));
        assert!(!oracle.is_complete(0).expect("check"));
    }

    #[test]
    fn valid_file_is_complete() {
        let out_dir = temp_out_dir("oracle_valid");
        let config = sample_config(&out_dir);
        let mut writer =
            ScoresWriter::create(&config.shard_result_path(1), &header()).expect("create");
        let mut scores = std::collections::BTreeMap::new();
        scores.insert("SAD".to_string(), vec![0.25]);
        writer
            .write_record(&crate::scores::ScoreRecord {
                snp: "rs1".to_string(),
                chrom: None,
                pos: None,
                ref_allele: None,
                alt_allele: None,
                scores,
            })
            .expect("record");
        writer.finish().expect("finish");

        let oracle = FsCompletionOracle::new(&config);
        assert!(oracle.is_complete(1).expect("check"));
        let _ = fs::remove_dir_all(out_dir);
    }

    #[test]
    fn header_only_file_counts_as_complete() {
        let out_dir = temp_out_dir("oracle_header_only");
        let config = sample_config(&out_dir);
        let writer =
            ScoresWriter::create(&config.shard_result_path(2), &header()).expect("create");
        writer.finish().expect("finish");

        let oracle = FsCompletionOracle::new(&config);
        assert!(oracle.is_complete(2).expect("check"));
        let _ = fs::remove_dir_all(out_dir);
    }

    #[test]
    fn zero_byte_file_is_incomplete() {
        let out_dir = temp_out_dir("oracle_zero_byte");
        let config = sample_config(&out_dir);
        let path = config.shard_result_path(0);
        fs::create_dir_all(path.parent().expect("parent")).expect("dir");
        fs::write(&path, b"").expect("write");

        let oracle = FsCompletionOracle::new(&config);
        assert!(!oracle.is_complete(0).expect("check"));
        let _ = fs::remove_dir_all(out_dir);
    }

    #[test]
    fn truncated_file_is_incomplete() {
        let out_dir = temp_out_dir("oracle_truncated");
        let config = sample_config(&out_dir);
        let path = config.shard_result_path(3);
        fs::create_dir_all(path.parent().expect("parent")).expect("dir");
        let header_line = serde_json::to_string(&header()).expect("header");
        fs::write(&path, format!("{}\n{{\"snp\":\"rs1\",\"sco", header_line)).expect("write");

        let oracle = FsCompletionOracle::new(&config);
        assert!(!oracle.is_complete(3).expect("check"));
        let _ = fs::remove_dir_all(out_dir);
    }
}
