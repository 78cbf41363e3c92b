use crate::scheduler::{shard_script, JobHandle, JobState, Scheduler};
use std::collections::HashMap;
use std::fs;
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, MutexGuard};
use varscore_core::{Error, Result, ShardDescriptor};

/// Runs shard jobs as local child processes. Stands in for the cluster
/// on a single machine; stdout and stderr land in the same capture
/// files the cluster backend would use.
pub struct LocalScheduler {
    state: Mutex<LocalState>,
}

#[derive(Default)]
struct LocalState {
    next_id: u64,
    children: HashMap<u64, Child>,
}

impl LocalScheduler {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LocalState::default()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, LocalState>> {
        self.state
            .lock()
            .map_err(|_| Error::Scheduler("local scheduler state poisoned".to_string()))
    }
}

impl Default for LocalScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for LocalScheduler {
    fn submit(&self, shard: &ShardDescriptor) -> Result<JobHandle> {
        if let Some(parent) = shard.stdout_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let stdout = fs::File::create(&shard.stdout_path)?;
        let stderr = fs::File::create(&shard.stderr_path)?;
        let script = shard_script(shard);
        let child = Command::new("sh")
            .arg("-lc")
            .arg(&script)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|e| Error::Scheduler(format!("spawn '{}': {}", script, e)))?;
        let mut state = self.lock()?;
        state.next_id += 1;
        let id = state.next_id;
        tracing::debug!(job = shard.job_name.as_str(), pid = child.id(), "spawned local job");
        state.children.insert(id, child);
        Ok(JobHandle::new(id))
    }

    fn poll(&self, handle: &JobHandle) -> Result<JobState> {
        let mut state = self.lock()?;
        let child = match state.children.get_mut(&handle.id()) {
            Some(child) => child,
            None => {
                return Err(Error::Scheduler(format!(
                    "unknown local job {}",
                    handle.id()
                )))
            }
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                state.children.remove(&handle.id());
                if status.success() {
                    Ok(JobState::Succeeded)
                } else {
                    Ok(JobState::Failed)
                }
            }
            Ok(None) => Ok(JobState::Pending),
            Err(e) => Err(Error::Scheduler(format!(
                "wait on local job {}: {}",
                handle.id(),
                e
            ))),
        }
    }

    fn cancel(&self, handle: &JobHandle) -> Result<()> {
        let mut state = self.lock()?;
        if let Some(mut child) = state.children.remove(&handle.id()) {
            if let Err(e) = child.kill() {
                tracing::warn!(job = handle.id(), "kill failed: {}", e);
            }
            let _ = child.wait();
        }
        Ok(())
    }
}
