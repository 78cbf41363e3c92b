use crate::scheduler::{shard_script, JobHandle, JobState, Scheduler};
use std::collections::HashMap;
use std::process::Command;
use std::sync::{Mutex, MutexGuard};
use varscore_core::fsutil::atomic_write_bytes;
use varscore_core::{Error, Result, ShardDescriptor};

/// Submits shard jobs to SLURM through its command line tools. One
/// batch script per shard (`job<i>.sb`) is written next to the job's
/// stdio capture files, so a failed shard can be resubmitted by hand.
pub struct SlurmScheduler {
    state: Mutex<SlurmState>,
}

#[derive(Default)]
struct SlurmState {
    next_handle: u64,
    jobs: HashMap<u64, u64>,
}

impl SlurmScheduler {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlurmState::default()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, SlurmState>> {
        self.state
            .lock()
            .map_err(|_| Error::Scheduler("slurm scheduler state poisoned".to_string()))
    }
}

impl Default for SlurmScheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn batch_script(shard: &ShardDescriptor) -> String {
    let mut lines = Vec::new();
    lines.push("#!/bin/bash".to_string());
    lines.push(format!("#SBATCH -J {}", shard.job_name));
    lines.push(format!("#SBATCH -o {}", shard.stdout_path.display()));
    lines.push(format!("#SBATCH -e {}", shard.stderr_path.display()));
    lines.push(format!("#SBATCH -p {}", shard.queue));
    if shard.resources.gpus > 0 {
        lines.push(format!("#SBATCH --gres=gpu:{}", shard.resources.gpus));
    }
    lines.push(format!("#SBATCH --mem {}", shard.resources.mem_mb));
    lines.push(format!("#SBATCH -t {}", shard.resources.time_limit));
    lines.push(String::new());
    lines.push(shard_script(shard));
    lines.push(String::new());
    lines.join("\n")
}

fn parse_sbatch_job_id(stdout: &str) -> Option<u64> {
    for line in stdout.lines() {
        if let Some(rest) = line.trim().strip_prefix("Submitted batch job ") {
            if let Some(token) = rest.split_whitespace().next() {
                return token.parse().ok();
            }
        }
    }
    None
}

/// Map one sacct `State` value onto the narrow job-state view. sacct
/// may not know a job yet right after submission; that reads as
/// pending, not as an error.
fn classify_sacct_state(stdout: &str) -> JobState {
    let state = stdout.lines().next().unwrap_or("").trim();
    if state.is_empty() {
        return JobState::Pending;
    }
    // CANCELLED may be decorated, e.g. "CANCELLED by 1000".
    let head = state.split_whitespace().next().unwrap_or("");
    match head {
        "COMPLETED" => JobState::Succeeded,
        "PENDING" | "RUNNING" | "REQUEUED" | "RESIZING" | "SUSPENDED" | "COMPLETING" => {
            JobState::Pending
        }
        "FAILED" | "BOOT_FAIL" | "DEADLINE" | "NODE_FAIL" | "OUT_OF_MEMORY" | "PREEMPTED"
        | "TIMEOUT" => JobState::Failed,
        other if other.starts_with("CANCELLED") => JobState::Failed,
        _ => JobState::Pending,
    }
}

impl Scheduler for SlurmScheduler {
    fn submit(&self, shard: &ShardDescriptor) -> Result<JobHandle> {
        let script_path = shard.stdout_path.with_extension("sb");
        atomic_write_bytes(&script_path, batch_script(shard).as_bytes())?;

        let output = Command::new("sbatch")
            .arg(&script_path)
            .output()
            .map_err(|e| Error::Scheduler(format!("sbatch: {}", e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Scheduler(format!(
                "sbatch {}: {}",
                shard.job_name,
                stderr.trim()
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let job_id = parse_sbatch_job_id(&stdout).ok_or_else(|| {
            Error::Scheduler(format!("sbatch output not understood: '{}'", stdout.trim()))
        })?;

        let mut state = self.lock()?;
        state.next_handle += 1;
        let handle = JobHandle::new(state.next_handle);
        state.jobs.insert(handle.id(), job_id);
        tracing::info!(job = shard.job_name.as_str(), slurm_job = job_id, "sbatch accepted");
        Ok(handle)
    }

    fn poll(&self, handle: &JobHandle) -> Result<JobState> {
        let job_id = match self.lock()?.jobs.get(&handle.id()).copied() {
            Some(id) => id,
            None => {
                return Err(Error::Scheduler(format!(
                    "unknown slurm job handle {}",
                    handle.id()
                )))
            }
        };
        let output = Command::new("sacct")
            .args(["-j", &job_id.to_string(), "-n", "-X", "-P", "-o", "State"])
            .output()
            .map_err(|e| Error::Scheduler(format!("sacct: {}", e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Scheduler(format!(
                "sacct for job {}: {}",
                job_id,
                stderr.trim()
            )));
        }
        let state = classify_sacct_state(&String::from_utf8_lossy(&output.stdout));
        tracing::debug!(slurm_job = job_id, state = ?state, "sacct polled");
        if state != JobState::Pending {
            self.lock()?.jobs.remove(&handle.id());
        }
        Ok(state)
    }

    fn cancel(&self, handle: &JobHandle) -> Result<()> {
        let job_id = match self.lock()?.jobs.remove(&handle.id()) {
            Some(id) => id,
            None => return Ok(()),
        };
        let output = Command::new("scancel")
            .arg(job_id.to_string())
            .output()
            .map_err(|e| Error::Scheduler(format!("scancel: {}", e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(slurm_job = job_id, "scancel failed: {}", stderr.trim());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use varscore_core::ResourceRequest;

    fn sample_shard() -> ShardDescriptor {
        ShardDescriptor {
            shard_index: 3,
            job_name: "sadref_p3".to_string(),
            command: vec![
                "varscore-worker".to_string(),
                "/out/options.snapshot".to_string(),
                "/models/params.json".to_string(),
                "/data/variants.vcf".to_string(),
                "3".to_string(),
            ],
            env_setup: Some("source activate scoring".to_string()),
            queue: "gpu_long".to_string(),
            resources: ResourceRequest {
                gpus: 1,
                mem_mb: 22000,
                time_limit: "14-0:0:0".to_string(),
            },
            stdout_path: PathBuf::from("/out/job3.out"),
            stderr_path: PathBuf::from("/out/job3.err"),
            result_path: PathBuf::from("/out/job3/scores.jsonl"),
        }
    }

    #[test]
    fn batch_script_carries_resources_and_command() {
        let script = batch_script(&sample_shard());
        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("#SBATCH -J sadref_p3"));
        assert!(script.contains("#SBATCH -o /out/job3.out"));
        assert!(script.contains("#SBATCH -e /out/job3.err"));
        assert!(script.contains("#SBATCH -p gpu_long"));
        assert!(script.contains("#SBATCH --gres=gpu:1"));
        assert!(script.contains("#SBATCH --mem 22000"));
        assert!(script.contains("#SBATCH -t 14-0:0:0"));
        assert!(script.contains(
            "source activate scoring && varscore-worker /out/options.snapshot /models/params.json /data/variants.vcf 3"
        ));
        assert!(script.ends_with("\n"));
    }

    #[test]
    fn batch_script_omits_gres_when_no_gpus_requested() {
        let mut shard = sample_shard();
        shard.resources.gpus = 0;
        let script = batch_script(&shard);
        assert!(!script.contains("--gres"));
    }

    #[test]
    fn sbatch_job_id_parses_from_canonical_output() {
        assert_eq!(
            parse_sbatch_job_id("Submitted batch job 123456\n"),
            Some(123456)
        );
    }

    #[test]
    fn sbatch_job_id_parses_past_warning_lines() {
        let noisy = "sbatch: Warning: partition is busy\nSubmitted batch job 42\n";
        assert_eq!(parse_sbatch_job_id(noisy), Some(42));
        assert_eq!(parse_sbatch_job_id("error: invalid partition\n"), None);
    }

    #[test]
    fn sacct_states_map_to_job_states() {
        assert_eq!(classify_sacct_state("COMPLETED\n"), JobState::Succeeded);
        assert_eq!(classify_sacct_state("PENDING\n"), JobState::Pending);
        assert_eq!(classify_sacct_state("RUNNING\n"), JobState::Pending);
        assert_eq!(classify_sacct_state("FAILED\n"), JobState::Failed);
        assert_eq!(classify_sacct_state("TIMEOUT\n"), JobState::Failed);
        assert_eq!(classify_sacct_state("OUT_OF_MEMORY\n"), JobState::Failed);
        assert_eq!(classify_sacct_state("CANCELLED by 1000\n"), JobState::Failed);
        assert_eq!(classify_sacct_state("CANCELLED+\n"), JobState::Failed);
    }

    #[test]
    fn empty_sacct_output_reads_as_pending() {
        assert_eq!(classify_sacct_state(""), JobState::Pending);
        assert_eq!(classify_sacct_state("\n"), JobState::Pending);
    }
}
