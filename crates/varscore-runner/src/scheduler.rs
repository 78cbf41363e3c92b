use varscore_core::{Result, ShardDescriptor};

/// Scheduler-side view of one submitted job. `Pending` covers both
/// queued and running; the submitter only cares whether the job is
/// still worth polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Succeeded,
    Failed,
}

/// Opaque token a backend hands out at submission. Only meaningful to
/// the backend that issued it, and only until the job reaches a
/// terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobHandle(u64);

impl JobHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Narrow interface to the external cluster scheduler. The orchestrator
/// never sees queue positions, nodes, or scheduler-native ids.
pub trait Scheduler {
    fn submit(&self, shard: &ShardDescriptor) -> Result<JobHandle>;

    fn poll(&self, handle: &JobHandle) -> Result<JobState>;

    /// Best effort; cancelling a job that already finished is not an
    /// error.
    fn cancel(&self, handle: &JobHandle) -> Result<()>;
}

/// Shell line that runs one shard: the optional environment setup
/// command, then the worker invocation.
pub(crate) fn shard_script(shard: &ShardDescriptor) -> String {
    let mut parts = Vec::new();
    if let Some(setup) = &shard.env_setup {
        parts.push(setup.clone());
    }
    parts.push(shell_join(&shard.command));
    parts.join(" && ")
}

pub(crate) fn shell_join(parts: &[String]) -> String {
    parts
        .iter()
        .map(|p| shell_quote(p))
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_quote_passes_plain_tokens_through() {
        assert_eq!(shell_quote("varscore-worker"), "varscore-worker");
        assert_eq!(shell_quote("/data/variants.vcf"), "/data/variants.vcf");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn shell_quote_wraps_tokens_with_metacharacters() {
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), "'it'\"'\"'s'");
    }

    #[test]
    fn shard_script_prefixes_env_setup() {
        let shard = ShardDescriptor {
            shard_index: 0,
            job_name: "varscore_p0".to_string(),
            command: vec!["worker".to_string(), "arg one".to_string()],
            env_setup: Some("source activate scoring".to_string()),
            queue: "standard".to_string(),
            resources: varscore_core::ResourceRequest::default(),
            stdout_path: "/tmp/out/job0.out".into(),
            stderr_path: "/tmp/out/job0.err".into(),
            result_path: "/tmp/out/job0/scores.jsonl".into(),
        };
        assert_eq!(
            shard_script(&shard),
            "source activate scoring && worker 'arg one'"
        );
    }
}
