use crate::config::{ResourceRequest, RunConfiguration};
use crate::error::{Error, Result};
use std::path::PathBuf;

/// Everything a scheduler backend needs to run one shard. Built fresh
/// from the configuration on every invocation and never persisted; the
/// shard's result file on disk is the only state that survives.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardDescriptor {
    pub shard_index: u32,
    pub job_name: String,
    pub command: Vec<String>,
    pub env_setup: Option<String>,
    pub queue: String,
    pub resources: ResourceRequest,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    pub result_path: PathBuf,
}

impl ShardDescriptor {
    /// Pure function of the configuration and the shard index; no
    /// filesystem or scheduler side effects.
    pub fn build(config: &RunConfiguration, shard_index: u32) -> Result<ShardDescriptor> {
        if shard_index >= config.total_shards {
            return Err(Error::InvalidShardIndex {
                shard: shard_index,
                total: config.total_shards,
            });
        }
        let command = vec![
            config.worker.clone(),
            config.snapshot_path().to_string_lossy().into_owned(),
            config.model.to_string_lossy().into_owned(),
            config.dataset.to_string_lossy().into_owned(),
            shard_index.to_string(),
        ];
        Ok(ShardDescriptor {
            shard_index,
            job_name: format!("{}_p{}", config.name, shard_index),
            command,
            env_setup: config.env_setup.clone(),
            queue: config.queue.clone(),
            resources: config.resources.clone(),
            stdout_path: config.shard_stdout_path(shard_index),
            stderr_path: config.shard_stderr_path(shard_index),
            result_path: config.shard_result_path(shard_index),
        })
    }

    pub fn build_all(config: &RunConfiguration) -> Result<Vec<ShardDescriptor>> {
        (0..config.total_shards)
            .map(|shard| Self::build(config, shard))
            .collect()
    }
}
