use crate::error::{Error, Result};
use crate::fsutil::{atomic_write_bytes, sha256_hex};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SNAPSHOT_SCHEMA_VERSION: &str = "options_snapshot_v1";
pub const SNAPSHOT_FILENAME: &str = "options.snapshot";
pub const SNAPSHOT_DIGEST_FILENAME: &str = "options.snapshot.digest";

/// Which backend executes shard jobs. Selected once per run; the rest of
/// the pipeline only sees the trait object built from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    Slurm,
    Local,
}

impl SchedulerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerKind::Slurm => "slurm",
            SchedulerKind::Local => "local",
        }
    }
}

/// Per-job resource request passed through to the scheduler backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub gpus: u32,
    pub mem_mb: u64,
    pub time_limit: String,
}

impl Default for ResourceRequest {
    fn default() -> Self {
        Self {
            gpus: 1,
            mem_mb: 22000,
            time_limit: "14-0:0:0".to_string(),
        }
    }
}

/// Immutable parameters of one sharded scoring run.
///
/// Persisted as a pretty-JSON snapshot in the output directory so every
/// shard worker and every restarted invocation observes identical
/// parameters. The `restart` and `strict` flags describe the current
/// invocation rather than the run and are not part of the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfiguration {
    #[serde(default = "default_snapshot_schema_version")]
    pub schema_version: String,
    pub model: PathBuf,
    pub dataset: PathBuf,
    pub out_dir: PathBuf,
    pub total_shards: u32,
    #[serde(default)]
    pub max_concurrent: Option<usize>,
    pub scheduler: SchedulerKind,
    pub queue: String,
    #[serde(default)]
    pub resources: ResourceRequest,
    pub name: String,
    pub worker: String,
    #[serde(default)]
    pub env_setup: Option<String>,
    pub result_filename: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_launch_interval_secs")]
    pub launch_interval_secs: u64,
    #[serde(skip)]
    pub restart: bool,
    #[serde(skip)]
    pub strict: bool,
}

fn default_snapshot_schema_version() -> String {
    SNAPSHOT_SCHEMA_VERSION.to_string()
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_launch_interval_secs() -> u64 {
    10
}

impl RunConfiguration {
    pub fn validate(&self) -> Result<()> {
        if self.total_shards == 0 {
            return Err(Error::InvalidConfig(
                "total_shards must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent == Some(0) {
            return Err(Error::InvalidConfig(
                "max_concurrent must be at least 1 when set".to_string(),
            ));
        }
        if self.name.is_empty() {
            return Err(Error::InvalidConfig("job name must not be empty".to_string()));
        }
        if self.worker.is_empty() {
            return Err(Error::InvalidConfig(
                "worker executable must not be empty".to_string(),
            ));
        }
        if self.result_filename.is_empty() || self.result_filename.contains('/') {
            return Err(Error::InvalidConfig(format!(
                "result filename must be a bare file name, got '{}'",
                self.result_filename
            )));
        }
        Ok(())
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.out_dir.join(SNAPSHOT_FILENAME)
    }

    pub fn snapshot_digest_path(&self) -> PathBuf {
        self.out_dir.join(SNAPSHOT_DIGEST_FILENAME)
    }

    /// Directory a shard worker owns. Only the reconciler reads across
    /// these; nothing else writes into another shard's directory.
    pub fn shard_dir(&self, shard: u32) -> PathBuf {
        self.out_dir.join(format!("job{}", shard))
    }

    pub fn shard_result_path(&self, shard: u32) -> PathBuf {
        self.shard_dir(shard).join(&self.result_filename)
    }

    pub fn shard_stdout_path(&self, shard: u32) -> PathBuf {
        self.out_dir.join(format!("job{}.out", shard))
    }

    pub fn shard_stderr_path(&self, shard: u32) -> PathBuf {
        self.out_dir.join(format!("job{}.err", shard))
    }

    pub fn merged_path(&self) -> PathBuf {
        self.out_dir.join(&self.result_filename)
    }

    pub fn run_state_path(&self) -> PathBuf {
        self.out_dir.join("run_state.json")
    }

    pub fn stop_request_path(&self) -> PathBuf {
        self.out_dir.join("stop.request")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn launch_interval(&self) -> Duration {
        Duration::from_secs(self.launch_interval_secs)
    }

    /// Digest of the snapshot serialization. Invocation-only flags are
    /// skipped by serde, so two invocations agree iff their run
    /// parameters agree.
    pub fn digest(&self) -> Result<String> {
        let bytes = serde_json::to_vec_pretty(self)?;
        Ok(sha256_hex(&bytes))
    }

    /// Write the snapshot and its digest sidecar into the output
    /// directory. Called once per run, before any shard is submitted.
    pub fn persist_snapshot(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        atomic_write_bytes(&self.snapshot_path(), &bytes)?;
        let digest = sha256_hex(&bytes);
        atomic_write_bytes(
            &self.snapshot_digest_path(),
            format!("{}\n", digest).as_bytes(),
        )?;
        Ok(())
    }

    /// Load the snapshot persisted in `out_dir`. The digest sidecar is
    /// checked when present; a mismatch is reported but not fatal, since
    /// the snapshot itself still parses.
    pub fn load_snapshot(out_dir: &Path) -> Result<RunConfiguration> {
        let path = out_dir.join(SNAPSHOT_FILENAME);
        if !path.exists() {
            return Err(Error::MissingSnapshot { path });
        }
        let bytes = fs::read(&path)?;
        let config: RunConfiguration = serde_json::from_slice(&bytes)?;
        if config.schema_version != SNAPSHOT_SCHEMA_VERSION {
            return Err(Error::InvalidConfig(format!(
                "unsupported snapshot schema_version '{}'",
                config.schema_version
            )));
        }
        let digest_path = out_dir.join(SNAPSHOT_DIGEST_FILENAME);
        if digest_path.exists() {
            let stored = fs::read_to_string(&digest_path)?;
            let actual = sha256_hex(&bytes);
            if stored.trim() != actual {
                tracing::warn!(
                    path = %path.display(),
                    "snapshot digest mismatch; file changed after it was written"
                );
            }
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsutil::ensure_dir;
    use chrono::Utc;

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
            model: PathBuf::from("model/params.json"),
            dataset: PathBuf::from("data/variants.vcf"),
            out_dir: out_dir.to_path_buf(),
            total_shards: 4,
            max_concurrent: Some(2),
            scheduler: SchedulerKind::Slurm,
            queue: "standard".to_string(),
            resources: ResourceRequest::default(),
            name: "varscore".to_string(),
            worker: "varscore-worker".to_string(),
            env_setup: None,
            result_filename: "scores.jsonl".to_string(),
            poll_interval_secs: 60,
            launch_interval_secs: 10,
            restart: false,
            strict: false,
        }
    }

    #[test]
    fn validate_rejects_zero_shards_and_zero_cap() {
        let out_dir = temp_out_dir("config_validate");
        let mut config = sample_config(&out_dir);
        config.total_shards = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = sample_config(&out_dir);
        config.max_concurrent = Some(0);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = sample_config(&out_dir);
        config.result_filename = "a/b".to_string();
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn shard_paths_follow_job_layout() {
        let out_dir = temp_out_dir("config_paths");
        let config = sample_config(&out_dir);
        assert_eq!(config.shard_dir(3), out_dir.join("job3"));
        assert_eq!(
            config.shard_result_path(3),
            out_dir.join("job3").join("scores.jsonl")
        );
        assert_eq!(config.shard_stdout_path(3), out_dir.join("job3.out"));
        assert_eq!(config.shard_stderr_path(3), out_dir.join("job3.err"));
        assert_eq!(config.merged_path(), out_dir.join("scores.jsonl"));
    }

    #[test]
    fn snapshot_round_trips_and_skips_invocation_flags() {
        let out_dir = temp_out_dir("config_snapshot");
        ensure_dir(&out_dir).expect("out dir");
        let mut config = sample_config(&out_dir);
        config.restart = true;
        config.strict = true;
        config.persist_snapshot().expect("persist");

        let loaded = RunConfiguration::load_snapshot(&out_dir).expect("load");
        assert!(!loaded.restart, "restart must not be persisted");
        assert!(!loaded.strict, "strict must not be persisted");
        assert_eq!(loaded.total_shards, 4);
        assert_eq!(loaded.queue, "standard");
        assert_eq!(loaded.scheduler, SchedulerKind::Slurm);

        let stored = fs::read_to_string(config.snapshot_digest_path()).expect("digest file");
        assert_eq!(stored.trim(), loaded.digest().expect("digest").as_str());
        let _ = fs::remove_dir_all(out_dir);
    }

    #[test]
    fn load_snapshot_reports_missing_directory_state() {
        let out_dir = temp_out_dir("config_missing");
        ensure_dir(&out_dir).expect("out dir");
        match RunConfiguration::load_snapshot(&out_dir) {
            Err(Error::MissingSnapshot { path }) => {
                assert_eq!(path, out_dir.join(SNAPSHOT_FILENAME));
            }
            other => panic!("expected MissingSnapshot, got {:?}", other.map(|_| ())),
        }
        let _ = fs::remove_dir_all(out_dir);
    }

    #[test]
    fn invocation_flags_do_not_change_digest() {
        let out_dir = temp_out_dir("config_digest");
        let mut a = sample_config(&out_dir);
        let mut b = sample_config(&out_dir);
        a.restart = false;
        b.restart = true;
        b.strict = true;
        assert_eq!(a.digest().expect("a"), b.digest().expect("b"));
    }
}
