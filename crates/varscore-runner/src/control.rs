use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use varscore_core::fsutil::atomic_write_bytes;
use varscore_core::{Result, RunConfiguration};

/// Operator-facing abort flag: a file in the run directory whose
/// presence asks the submitter to stop launching shards and cancel the
/// ones in flight. Observed within one poll cycle.
pub struct StopSignal {
    path: PathBuf,
}

impl StopSignal {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The file content records who asked and when, for anyone reading
    /// the run directory later.
    pub fn request(&self) -> Result<()> {
        let payload = format!(
            "{{\"requested_at\":\"{}\",\"pid\":{}}}\n",
            Utc::now().to_rfc3339(),
            std::process::id()
        );
        atomic_write_bytes(&self.path, payload.as_bytes())
    }

    pub fn is_requested(&self) -> bool {
        self.path.exists()
    }

    /// Remove a stale request left behind by a previous invocation.
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

/// Ask a running invocation targeting `out_dir` to wind down. Loading
/// the snapshot first confirms the directory actually belongs to a run.
pub fn request_stop(out_dir: &Path) -> Result<PathBuf> {
    let mut config = RunConfiguration::load_snapshot(out_dir)?;
    config.out_dir = out_dir.to_path_buf();
    let signal = StopSignal::new(config.stop_request_path());
    signal.request()?;
    tracing::info!(path = %signal.path().display(), "stop requested");
    Ok(signal.path().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_signal(tag: &str) -> StopSignal {
        let path = std::env::temp_dir()
            .join(format!(
                "varscore_{}_{}_{}",
                tag,
                std::process::id(),
                Utc::now().timestamp_micros()
            ))
            .join("stop.request");
        StopSignal::new(path)
    }

    #[test]
    fn request_then_clear_cycles_the_flag() {
        let signal = temp_signal("control_cycle");
        assert!(!signal.is_requested());
        signal.request().expect("request");
        assert!(signal.is_requested());
        signal.clear().expect("clear");
        assert!(!signal.is_requested());
        let _ = fs::remove_dir_all(signal.path().parent().expect("parent"));
    }

    #[test]
    fn clearing_an_absent_flag_is_fine() {
        let signal = temp_signal("control_absent");
        signal.clear().expect("clear");
    }
}
