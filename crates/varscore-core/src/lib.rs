//! Core types for sharded variant scoring runs: configuration snapshots,
//! shard descriptors, the score file format, and completion checks.

pub mod config;
pub mod error;
pub mod fsutil;
pub mod oracle;
pub mod scores;
pub mod shard;

pub use config::{ResourceRequest, RunConfiguration, SchedulerKind};
pub use error::{Error, Result};
pub use oracle::{CompletionOracle, FsCompletionOracle};
pub use scores::{read_scores, ScoreHeader, ScoreRecord, ScoresError, ScoresFile, ScoresWriter};
pub use shard::ShardDescriptor;
