use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use varscore_core::fsutil::atomic_write_json_pretty;
use varscore_core::Result;

pub const RUN_STATE_SCHEMA_VERSION: &str = "run_state_v1";

/// Lifecycle phase of a run, recorded in `run_state.json` at every
/// transition so an operator can see where a run stands from the
/// directory alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Preparing,
    Submitting,
    Awaiting,
    Reconciling,
    Done,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Preparing => "preparing",
            RunState::Submitting => "submitting",
            RunState::Awaiting => "awaiting",
            RunState::Reconciling => "reconciling",
            RunState::Done => "done",
            RunState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStateRecord {
    pub schema_version: String,
    pub state: String,
    pub detail: String,
    pub updated_at: String,
}

pub fn write_run_state(path: &Path, state: RunState, detail: &str) -> Result<()> {
    let record = RunStateRecord {
        schema_version: RUN_STATE_SCHEMA_VERSION.to_string(),
        state: state.as_str().to_string(),
        detail: detail.to_string(),
        updated_at: Utc::now().to_rfc3339(),
    };
    atomic_write_json_pretty(path, &record)
}

pub fn read_run_state(path: &Path) -> Result<Option<RunStateRecord>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path)?;
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Writes `failed` on drop unless the run was explicitly completed, so
/// a panic or early return never leaves a stale in-progress state.
pub struct RunStateGuard {
    path: PathBuf,
    done: bool,
}

impl RunStateGuard {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            done: false,
        }
    }

    pub fn set(&self, state: RunState, detail: &str) -> Result<()> {
        write_run_state(&self.path, state, detail)
    }

    pub fn complete(&mut self, state: RunState, detail: &str) -> Result<()> {
        write_run_state(&self.path, state, detail)?;
        self.done = true;
        Ok(())
    }
}

impl Drop for RunStateGuard {
    fn drop(&mut self) {
        if !self.done {
            let _ = write_run_state(&self.path, RunState::Failed, "aborted");
        }
    }
}
