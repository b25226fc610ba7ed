//! Per-run append-only log file.
//!
//! Every agent session and stage transition of a run is appended to
//! `logs/run-<run_id>.txt` so a paused or crashed run can be audited after
//! the fact. This is the human-readable trail; structured tracing goes to
//! stderr separately.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct RunLogger {
    path: PathBuf,
}

impl RunLogger {
    /// Logger writing `logs/run-<run_id>.txt` under `state_dir`.
    pub fn new(state_dir: &Path, run_id: &str) -> std::io::Result<Self> {
        let logs_dir = state_dir.join("logs");
        fs::create_dir_all(&logs_dir)?;
        Ok(Self {
            path: logs_dir.join(format!("run-{run_id}.txt")),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped entry. Failures are swallowed after a warn:
    /// the run log must never take the run down with it.
    pub fn log(&self, entry: &str) {
        let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let line = format!("[{timestamp}] {entry}\n");
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(e) = result {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to append run log");
        }
    }

    /// Append a titled multi-line section.
    pub fn log_section(&self, title: &str, body: &str) {
        self.log(&format!("=== {title} ==="));
        if !body.trim().is_empty() {
            self.log(body.trim_end());
        }
    }
}
