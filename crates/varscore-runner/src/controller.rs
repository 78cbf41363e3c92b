use crate::collect::{collect_scores, load_shard};
use crate::control::StopSignal;
use crate::local::LocalScheduler;
use crate::scheduler::Scheduler;
use crate::slurm::SlurmScheduler;
use crate::state::{read_run_state, RunState, RunStateGuard, RunStateRecord};
use crate::submit::{run_shards, JobOutcome, ShardStatus, SubmitOptions};
use std::path::{Path, PathBuf};
use varscore_core::fsutil::ensure_dir;
use varscore_core::{
    CompletionOracle, Error, FsCompletionOracle, Result, RunConfiguration, SchedulerKind,
    ShardDescriptor,
};

/// Totals of one completed run.
#[derive(Debug)]
pub struct RunReport {
    pub out_dir: PathBuf,
    pub merged_path: PathBuf,
    pub total_shards: u32,
    pub skipped: u32,
    pub submitted: u32,
    pub recovered: u32,
    pub records: usize,
}

#[derive(Debug)]
pub struct ShardProgress {
    pub shard_index: u32,
    pub complete: bool,
}

#[derive(Debug)]
pub struct StatusReport {
    pub out_dir: PathBuf,
    pub state: Option<RunStateRecord>,
    pub total_shards: u32,
    pub complete_shards: u32,
    pub shards: Vec<ShardProgress>,
    pub merged: bool,
}

/// The backend is chosen once per run; everything downstream sees only
/// the trait object.
pub fn build_scheduler(kind: SchedulerKind) -> Box<dyn Scheduler> {
    match kind {
        SchedulerKind::Slurm => Box::new(SlurmScheduler::new()),
        SchedulerKind::Local => Box::new(LocalScheduler::new()),
    }
}

/// Ready the output directory and settle which configuration governs
/// the run.
///
/// Fresh runs refuse an existing directory and persist the snapshot.
/// Restarts load the persisted snapshot; the snapshot wins over the
/// current invocation's options (with a warning when they drifted), so
/// already-written shard results stay consistent with what gets
/// submitted. A restart against a directory with no snapshot falls back
/// to a fresh run.
pub fn prepare(config: &mut RunConfiguration) -> Result<()> {
    config.validate()?;
    let out_dir = config.out_dir.clone();
    if config.restart {
        match RunConfiguration::load_snapshot(&out_dir) {
            Ok(mut saved) => {
                saved.out_dir = out_dir;
                saved.restart = true;
                saved.strict = config.strict;
                if saved.digest()? != config.digest()? {
                    tracing::warn!(
                        "options differ from the saved snapshot; the snapshot wins"
                    );
                }
                *config = saved;
            }
            Err(Error::MissingSnapshot { .. }) => {
                tracing::warn!(
                    dir = %out_dir.display(),
                    "restart requested but no snapshot exists; starting fresh"
                );
                ensure_dir(&out_dir)?;
                config.persist_snapshot()?;
            }
            Err(e) => return Err(e),
        }
    } else {
        if out_dir.exists() {
            return Err(Error::OutputAlreadyExists { dir: out_dir });
        }
        ensure_dir(&out_dir)?;
        config.persist_snapshot()?;
    }
    Ok(())
}

/// Run a sharded scoring computation end to end: prepare the directory,
/// submit every shard, await completion, then reconcile the shard
/// results into the merged output. Every phase transition lands in
/// `run_state.json`; an early unwind is recorded as `failed`.
pub fn execute(mut config: RunConfiguration) -> Result<RunReport> {
    prepare(&mut config)?;
    let stop = StopSignal::new(config.stop_request_path());
    stop.clear()?;

    let state_path = config.run_state_path();
    let mut guard = RunStateGuard::new(&state_path);
    guard.set(RunState::Preparing, "building shard plan")?;

    match drive(&config, &stop, &guard) {
        Ok(report) => {
            guard.complete(
                RunState::Done,
                &format!(
                    "merged {} record(s) from {} shard(s)",
                    report.records, report.total_shards
                ),
            )?;
            tracing::info!(
                merged = %report.merged_path.display(),
                records = report.records,
                skipped = report.skipped,
                recovered = report.recovered,
                "run complete"
            );
            Ok(report)
        }
        Err(e) => {
            if let Err(write_err) = guard.complete(RunState::Failed, &e.to_string()) {
                tracing::warn!("could not record failure state: {}", write_err);
            }
            Err(e)
        }
    }
}

fn drive(
    config: &RunConfiguration,
    stop: &StopSignal,
    guard: &RunStateGuard,
) -> Result<RunReport> {
    let shards = ShardDescriptor::build_all(config)?;
    let oracle = FsCompletionOracle::new(config);
    let scheduler = build_scheduler(config.scheduler);

    guard.set(
        RunState::Submitting,
        &format!("{} shard(s) on {}", shards.len(), config.scheduler.as_str()),
    )?;
    let opts = SubmitOptions {
        max_concurrent: config.max_concurrent,
        poll_interval: config.poll_interval(),
        launch_interval: config.launch_interval(),
    };
    let oracle_ref: Option<&dyn CompletionOracle> = if config.restart {
        Some(&oracle)
    } else {
        None
    };
    let state_path = config.run_state_path();
    let outcomes = run_shards(
        scheduler.as_ref(),
        &shards,
        oracle_ref,
        stop,
        &opts,
        Some(&state_path),
    )?;

    let tally = evaluate_outcomes(config, &outcomes, &oracle)?;
    verify_all_results(config)?;

    guard.set(RunState::Reconciling, "merging shard results")?;
    let merged = collect_scores(config)?;

    Ok(RunReport {
        out_dir: config.out_dir.clone(),
        merged_path: merged.merged_path,
        total_shards: config.total_shards,
        skipped: tally.skipped,
        submitted: tally.submitted,
        recovered: tally.recovered.len() as u32,
        records: merged.records,
    })
}

struct OutcomeTally {
    skipped: u32,
    submitted: u32,
    recovered: Vec<u32>,
}

/// A shard whose job failed but whose result file validates is kept;
/// the result file, not the scheduler's exit report, is the record of
/// completion. Strict mode turns such shards back into failures.
fn evaluate_outcomes(
    config: &RunConfiguration,
    outcomes: &[JobOutcome],
    oracle: &FsCompletionOracle,
) -> Result<OutcomeTally> {
    let mut tally = OutcomeTally {
        skipped: 0,
        submitted: 0,
        recovered: Vec::new(),
    };
    let mut failures: Vec<(u32, String)> = Vec::new();
    for outcome in outcomes {
        match &outcome.status {
            ShardStatus::Skipped => tally.skipped += 1,
            ShardStatus::Succeeded => tally.submitted += 1,
            ShardStatus::Failed(reason) | ShardStatus::SubmissionError(reason) => {
                tally.submitted += 1;
                if !config.strict && oracle.is_complete(outcome.shard_index)? {
                    tracing::warn!(
                        shard = outcome.shard_index,
                        "job reported failure but its result validates; keeping the result"
                    );
                    tally.recovered.push(outcome.shard_index);
                } else {
                    failures.push((outcome.shard_index, reason.clone()));
                }
            }
        }
    }
    if !failures.is_empty() {
        return Err(Error::ShardsFailed { failures });
    }
    Ok(tally)
}

/// Every shard must hold a structurally valid result before the merge
/// starts. Catches jobs that exited zero without writing their output.
fn verify_all_results(config: &RunConfiguration) -> Result<()> {
    for shard in 0..config.total_shards {
        load_shard(config, shard)?;
    }
    Ok(())
}

/// Inspect a run directory without touching it: persisted run state,
/// per-shard completion as the oracle sees it, and whether the merged
/// output exists.
pub fn status(out_dir: &Path) -> Result<StatusReport> {
    let mut config = RunConfiguration::load_snapshot(out_dir)?;
    config.out_dir = out_dir.to_path_buf();
    let state = read_run_state(&config.run_state_path())?;
    let oracle = FsCompletionOracle::new(&config);

    let mut shards = Vec::with_capacity(config.total_shards as usize);
    let mut complete_shards = 0;
    for shard_index in 0..config.total_shards {
        let complete = oracle.is_complete(shard_index)?;
        if complete {
            complete_shards += 1;
        }
        shards.push(ShardProgress {
            shard_index,
            complete,
        });
    }

    Ok(StatusReport {
        out_dir: config.out_dir.clone(),
        state,
        total_shards: config.total_shards,
        complete_shards,
        shards,
        merged: config.merged_path().exists(),
    })
}
