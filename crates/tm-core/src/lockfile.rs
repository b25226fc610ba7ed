//! Session lock for single-writer state directories.
//!
//! Only one orchestrator process may mutate a given state directory at a
//! time. The lock is a lease file (`session.lock`) holding the owner pid and
//! a heartbeat timestamp, created with `O_CREAT | O_EXCL` so two racing
//! processes have exactly one winner.
//!
//! ## Stale lock recovery
//!
//! Liveness is checked via `kill(pid, 0)`, not just file presence, so a
//! crashed process's stale lock does not block forever. A lease whose
//! heartbeat is older than [`SessionLock::lease_ttl`] is also treated as
//! stale even when the pid has been recycled.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const LOCK_FILE_NAME: &str = "session.lock";

/// Lease written by the process that owns the state directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLock {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
}

/// Result of trying to acquire the session lock.
#[derive(Debug)]
pub enum AcquireResult {
    /// We created the lock file -- we own it.
    Acquired,
    /// Another live session holds the lock.
    AlreadyActive(SessionLock),
    /// Stale lock was cleaned up -- retry.
    StaleRemoved,
}

impl SessionLock {
    /// A lease whose heartbeat is older than this is considered abandoned.
    pub fn lease_ttl() -> Duration {
        Duration::hours(6)
    }

    pub fn path(state_dir: &Path) -> PathBuf {
        state_dir.join(LOCK_FILE_NAME)
    }

    fn current() -> Self {
        let now = Utc::now();
        Self {
            pid: std::process::id(),
            started_at: now,
            heartbeat_at: now,
        }
    }

    /// Try to exclusively create the lock file for this process.
    pub fn acquire(state_dir: &Path) -> std::io::Result<AcquireResult> {
        std::fs::create_dir_all(state_dir)?;
        let path = Self::path(state_dir);

        match OpenOptions::new()
            .write(true)
            .create_new(true) // O_CREAT | O_EXCL -- fails if file exists
            .open(&path)
        {
            Ok(mut file) => {
                let lease = Self::current();
                let json = serde_json::to_string_pretty(&lease)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                file.write_all(json.as_bytes())?;
                file.sync_all()?;
                Ok(AcquireResult::Acquired)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                match Self::read(state_dir) {
                    Some(existing) if existing.is_live() => {
                        Ok(AcquireResult::AlreadyActive(existing))
                    }
                    _ => {
                        tracing::info!("removing stale session lock");
                        Self::remove(state_dir);
                        Ok(AcquireResult::StaleRemoved)
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Acquire with one automatic retry after stale-lock cleanup.
    pub fn acquire_or_fail(state_dir: &Path) -> Result<(), String> {
        for attempt in 0..2 {
            match Self::acquire(state_dir) {
                Ok(AcquireResult::Acquired) => return Ok(()),
                Ok(AcquireResult::AlreadyActive(existing)) => {
                    return Err(format!(
                        "another session is active (pid={}, started {})",
                        existing.pid, existing.started_at
                    ));
                }
                Ok(AcquireResult::StaleRemoved) if attempt == 0 => continue,
                Ok(AcquireResult::StaleRemoved) => {
                    return Err("failed to acquire session lock after stale cleanup".into());
                }
                Err(e) => return Err(format!("session lock I/O error: {e}")),
            }
        }
        Err("session lock acquire failed".into())
    }

    /// Read the lock file. Returns `None` if missing or unparseable.
    pub fn read(state_dir: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(Self::path(state_dir)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Refresh the heartbeat timestamp. Only meaningful for the owner.
    pub fn heartbeat(state_dir: &Path) -> std::io::Result<()> {
        if let Some(mut lease) = Self::read(state_dir) {
            if lease.pid == std::process::id() {
                lease.heartbeat_at = Utc::now();
                let json = serde_json::to_string_pretty(&lease)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                std::fs::write(Self::path(state_dir), json)?;
            }
        }
        Ok(())
    }

    /// Remove the lock file. Idempotent.
    pub fn remove(state_dir: &Path) {
        let _ = std::fs::remove_file(Self::path(state_dir));
    }

    /// Whether the lease holder is still running and the lease is fresh.
    pub fn is_live(&self) -> bool {
        pid_alive(self.pid) && Utc::now() - self.heartbeat_at < Self::lease_ttl()
    }

    /// Liveness check for the directory: file present AND holder alive.
    pub fn is_session_active(state_dir: &Path) -> bool {
        match Self::read(state_dir) {
            Some(lease) => {
                if lease.is_live() {
                    true
                } else {
                    tracing::info!(pid = lease.pid, "removing dead session lock");
                    Self::remove(state_dir);
                    false
                }
            }
            None => false,
        }
    }
}

/// Check if a process with the given PID is alive.
#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    // SAFETY: kill with signal 0 checks existence without sending a signal.
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    // Assume alive off-Unix so we never clobber a healthy session.
    true
}
