use std::path::PathBuf;
use thiserror::Error;

/// Canonical result type for varscore crates.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("shard index {shard} out of range for {total} shards")]
    InvalidShardIndex { shard: u32, total: u32 },

    #[error("output directory already exists (pass --restart to resume): {dir}")]
    OutputAlreadyExists { dir: PathBuf },

    #[error("no run snapshot at {path}; this directory was not prepared by a run")]
    MissingSnapshot { path: PathBuf },

    #[error("scheduler error: {0}")]
    Scheduler(String),

    #[error("{} shard(s) failed: {}", .failures.len(), format_shard_failures(.failures))]
    ShardsFailed { failures: Vec<(u32, String)> },

    #[error("shard {shard} has no result file at {}", path.display())]
    MissingShardResult { shard: u32, path: PathBuf },

    #[error("shard {shard} result at {} is invalid: {reason}", path.display())]
    CorruptShardResult {
        shard: u32,
        path: PathBuf,
        reason: String,
    },

    #[error("stop requested; unfinished shards: {shards:?}")]
    Interrupted { shards: Vec<u32> },

    #[error("internal invariant failed: {0}")]
    Invariant(String),
}

fn format_shard_failures(failures: &[(u32, String)]) -> String {
    failures
        .iter()
        .map(|(shard, reason)| format!("shard {} ({})", shard, reason))
        .collect::<Vec<_>>()
        .join(", ")
}
