//! Orchestration for sharded variant scoring runs: scheduler backends,
//! the bounded submitter, the run controller, and result reconciliation.

pub mod collect;
pub mod control;
pub mod controller;
pub mod local;
pub mod scheduler;
pub mod slurm;
pub mod state;
pub mod submit;

pub use collect::{collect_scores, merge, MergeReport};
pub use control::request_stop;
pub use controller::{build_scheduler, execute, prepare, status, RunReport, StatusReport};
pub use local::LocalScheduler;
pub use scheduler::{JobHandle, JobState, Scheduler};
pub use slurm::SlurmScheduler;
pub use state::{read_run_state, RunState, RunStateRecord};
pub use submit::{run_shards, JobOutcome, ShardStatus, SubmitOptions};
