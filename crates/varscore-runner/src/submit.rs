use crate::control::StopSignal;
use crate::scheduler::{JobHandle, JobState, Scheduler};
use crate::state::{write_run_state, RunState};
use std::collections::BTreeMap;
use std::path::Path;
use std::thread;
use std::time::Duration;
use varscore_core::{CompletionOracle, Error, Result, ShardDescriptor};

/// Where one shard ended up after a submission pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardStatus {
    /// A valid result already existed; nothing was submitted.
    Skipped,
    Succeeded,
    Failed(String),
    /// The scheduler rejected the submission; sibling shards proceed.
    SubmissionError(String),
}

#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub shard_index: u32,
    pub status: ShardStatus,
}

#[derive(Debug, Clone)]
pub struct SubmitOptions {
    /// In-flight window size; `None` submits everything at once.
    pub max_concurrent: Option<usize>,
    pub poll_interval: Duration,
    pub launch_interval: Duration,
}

fn below_cap(active: usize, cap: Option<usize>) -> bool {
    match cap {
        Some(cap) => active < cap,
        None => true,
    }
}

/// Drive every shard to a terminal state, at most `max_concurrent` in
/// flight at a time.
///
/// With an oracle attached (restart mode), shards whose results already
/// validate are skipped. Submission failures are recorded per shard and
/// do not abort siblings. A stop request is honored within one cycle:
/// nothing further is submitted, in-flight jobs get a best-effort
/// cancel, and the unfinished shard indices come back in the error.
///
/// Completion order is unrelated to submission order; outcomes are
/// returned sorted by shard index.
pub fn run_shards(
    scheduler: &dyn Scheduler,
    shards: &[ShardDescriptor],
    oracle: Option<&dyn CompletionOracle>,
    stop: &StopSignal,
    opts: &SubmitOptions,
    state_path: Option<&Path>,
) -> Result<Vec<JobOutcome>> {
    let mut outcomes: BTreeMap<u32, ShardStatus> = BTreeMap::new();
    let mut pending: Vec<&ShardDescriptor> = Vec::new();
    for shard in shards {
        let done = match oracle {
            Some(oracle) => oracle.is_complete(shard.shard_index)?,
            None => false,
        };
        if done {
            tracing::info!(shard = shard.shard_index, "result already present; skipping");
            outcomes.insert(shard.shard_index, ShardStatus::Skipped);
        } else {
            pending.push(shard);
        }
    }
    // pop() takes from the back; reverse so submission runs in index order
    pending.reverse();

    let mut active: Vec<(JobHandle, &ShardDescriptor)> = Vec::new();
    let mut awaiting_announced = false;

    loop {
        if stop.is_requested() {
            tracing::warn!(active = active.len(), "stop requested; cancelling in-flight jobs");
            let mut unfinished: Vec<u32> = Vec::new();
            for (handle, shard) in &active {
                if let Err(e) = scheduler.cancel(handle) {
                    tracing::warn!(shard = shard.shard_index, "cancel failed: {}", e);
                }
                unfinished.push(shard.shard_index);
            }
            for shard in &pending {
                unfinished.push(shard.shard_index);
            }
            unfinished.sort_unstable();
            return Err(Error::Interrupted { shards: unfinished });
        }

        while !pending.is_empty() && below_cap(active.len(), opts.max_concurrent) {
            let shard = match pending.pop() {
                Some(shard) => shard,
                None => break,
            };
            match scheduler.submit(shard) {
                Ok(handle) => {
                    tracing::info!(
                        shard = shard.shard_index,
                        job = shard.job_name.as_str(),
                        "submitted"
                    );
                    active.push((handle, shard));
                    if !pending.is_empty() && !opts.launch_interval.is_zero() {
                        thread::sleep(opts.launch_interval);
                    }
                }
                Err(e) => {
                    tracing::warn!(shard = shard.shard_index, "submission failed: {}", e);
                    outcomes.insert(
                        shard.shard_index,
                        ShardStatus::SubmissionError(e.to_string()),
                    );
                }
            }
        }

        if active.is_empty() && pending.is_empty() {
            break;
        }

        if pending.is_empty() && !awaiting_announced {
            if let Some(path) = state_path {
                write_run_state(
                    path,
                    RunState::Awaiting,
                    &format!("{} job(s) in flight", active.len()),
                )?;
            }
            awaiting_announced = true;
        }

        thread::sleep(opts.poll_interval);

        let mut still_active = Vec::with_capacity(active.len());
        for (handle, shard) in active {
            match scheduler.poll(&handle) {
                Ok(JobState::Pending) => still_active.push((handle, shard)),
                Ok(JobState::Succeeded) => {
                    tracing::info!(shard = shard.shard_index, "job finished");
                    outcomes.insert(shard.shard_index, ShardStatus::Succeeded);
                }
                Ok(JobState::Failed) => {
                    tracing::warn!(
                        shard = shard.shard_index,
                        stderr = %shard.stderr_path.display(),
                        "job failed"
                    );
                    outcomes.insert(
                        shard.shard_index,
                        ShardStatus::Failed(format!(
                            "scheduler reported failure (see {})",
                            shard.stderr_path.display()
                        )),
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        shard = shard.shard_index,
                        "poll failed; keeping job in flight: {}",
                        e
                    );
                    still_active.push((handle, shard));
                }
            }
        }
        active = still_active;
    }

    Ok(outcomes
        .into_iter()
        .map(|(shard_index, status)| JobOutcome { shard_index, status })
        .collect())
}
