//! Durable run state and free-form artifacts.
//!
//! Everything lives under one state directory (default `.taskmaster/` in the
//! working directory):
//!
//! ```text
//! state.json                      TaskState
//! goal.txt                        the high-level goal
//! plan.md                         agent-authored plan
//! criteria.txt                    success criteria from planning
//! context.md                      running context notes
//! progress.md                     progress summary
//! mailbox.json                    MailboxState
//! session.lock                    single-writer lease
//! logs/run-<run_id>.txt           per-run session log
//! debugging/pr/<n>/ci/<job>/<k>.log
//! debugging/pr/<n>/comments/<id>.txt
//! debugging/pr/<n>/comments_summary.txt
//! debugging/pr/<n>/addressed_threads.json
//! debugging/pr/<n>/resolve-comments.json
//! ```
//!
//! Writes of `state.json` are atomic (write temp, fsync, rename) so a crash
//! mid-save never leaves a half-written state behind.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::lockfile::SessionLock;
use crate::types::{ModelTier, TaskOptions, TaskState};

pub const STATE_DIR_NAME: &str = ".taskmaster";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// No state exists where one was expected. Never a null return.
    #[error("no saved state found in {0} -- run `tm start` first")]
    NotFound(PathBuf),

    /// The persisted JSON is invalid or structurally incomplete. Distinct
    /// from `NotFound` so resume reports the corruption instead of silently
    /// reinitializing.
    #[error("state file is corrupted: {reason}")]
    Corrupted { reason: String },

    /// An un-cleaned state already exists.
    #[error("a previous run already exists -- use `tm resume` or `tm clean`")]
    AlreadyExists,

    #[error("permission denied accessing state dir: {0}")]
    Permission(String),

    #[error("session lock error: {0}")]
    Lock(String),

    #[error("state I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StateError>;

// ---------------------------------------------------------------------------
// StateStore
// ---------------------------------------------------------------------------

pub struct StateStore {
    state_dir: PathBuf,
}

impl StateStore {
    /// Store rooted at `<working_dir>/.taskmaster`.
    pub fn for_working_dir(working_dir: &Path) -> Self {
        Self {
            state_dir: working_dir.join(STATE_DIR_NAME),
        }
    }

    /// Store backed by an explicit directory (useful for testing).
    pub fn new(state_dir: PathBuf) -> Self {
        Self { state_dir }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn exists(&self) -> bool {
        self.state_path().exists()
    }

    fn state_path(&self) -> PathBuf {
        self.state_dir.join("state.json")
    }

    fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.state_dir).map_err(|e| self.classify_io(e))
    }

    fn classify_io(&self, e: std::io::Error) -> StateError {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            StateError::Permission(self.state_dir.display().to_string())
        } else {
            StateError::Io(e)
        }
    }

    // -----------------------------------------------------------------------
    // TaskState
    // -----------------------------------------------------------------------

    /// Create a fresh run. Fails if an un-cleaned state already exists.
    ///
    /// Acquires the session lock as a side effect; `clean` releases it.
    pub fn initialize(
        &self,
        goal: &str,
        model: ModelTier,
        options: TaskOptions,
    ) -> Result<TaskState> {
        if self.exists() {
            return Err(StateError::AlreadyExists);
        }
        self.ensure_dir()?;
        SessionLock::acquire_or_fail(&self.state_dir).map_err(StateError::Lock)?;

        let state = TaskState::new(model, options);
        self.save_state(&state)?;
        self.save_goal(goal)?;
        tracing::info!(run_id = %state.run_id, "initialized state");
        Ok(state)
    }

    /// Load the persisted state, distinguishing "missing" from "corrupted".
    pub fn load_state(&self) -> Result<TaskState> {
        let path = self.state_path();
        let data = match std::fs::read_to_string(&path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StateError::NotFound(self.state_dir.clone()));
            }
            Err(e) => return Err(self.classify_io(e)),
        };

        if data.trim().is_empty() {
            return Err(StateError::Corrupted {
                reason: "state file is empty".into(),
            });
        }

        serde_json::from_str(&data).map_err(|e| StateError::Corrupted {
            reason: e.to_string(),
        })
    }

    /// Persist the state atomically (write temp, fsync, rename).
    pub fn save_state(&self, state: &TaskState) -> Result<()> {
        self.ensure_dir()?;
        let json = serde_json::to_string_pretty(state).map_err(|e| StateError::Corrupted {
            reason: e.to_string(),
        })?;
        atomic_write(&self.state_path(), json.as_bytes()).map_err(|e| self.classify_io(e))
    }

    /// Release the lock and remove the whole state directory.
    pub fn clean(&self) -> Result<()> {
        SessionLock::remove(&self.state_dir);
        if self.state_dir.exists() {
            std::fs::remove_dir_all(&self.state_dir).map_err(|e| self.classify_io(e))?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Session lock
    // -----------------------------------------------------------------------

    pub fn acquire_session_lock(&self) -> Result<()> {
        self.ensure_dir()?;
        SessionLock::acquire_or_fail(&self.state_dir).map_err(StateError::Lock)
    }

    pub fn release_session_lock(&self) {
        SessionLock::remove(&self.state_dir);
    }

    pub fn is_session_active(&self) -> bool {
        SessionLock::is_session_active(&self.state_dir)
    }

    // -----------------------------------------------------------------------
    // Free-form artifacts
    // -----------------------------------------------------------------------

    pub fn save_goal(&self, goal: &str) -> Result<()> {
        self.write_artifact("goal.txt", goal)
    }

    pub fn load_goal(&self) -> Result<String> {
        self.read_artifact("goal.txt")
    }

    pub fn save_plan(&self, plan_markdown: &str) -> Result<()> {
        self.write_artifact("plan.md", plan_markdown)
    }

    pub fn load_plan(&self) -> Result<String> {
        self.read_artifact("plan.md")
    }

    pub fn save_criteria(&self, criteria: &str) -> Result<()> {
        self.write_artifact("criteria.txt", criteria)
    }

    pub fn load_criteria(&self) -> Result<String> {
        self.read_artifact("criteria.txt")
    }

    pub fn save_context(&self, context: &str) -> Result<()> {
        self.write_artifact("context.md", context)
    }

    pub fn load_context(&self) -> String {
        self.read_artifact("context.md").unwrap_or_default()
    }

    pub fn save_progress(&self, progress: &str) -> Result<()> {
        self.write_artifact("progress.md", progress)
    }

    pub fn load_progress(&self) -> String {
        self.read_artifact("progress.md").unwrap_or_default()
    }

    fn write_artifact(&self, name: &str, content: &str) -> Result<()> {
        self.ensure_dir()?;
        atomic_write(&self.state_dir.join(name), content.as_bytes())
            .map_err(|e| self.classify_io(e))
    }

    fn read_artifact(&self, name: &str) -> Result<String> {
        let path = self.state_dir.join(name);
        std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StateError::NotFound(path)
            } else {
                self.classify_io(e)
            }
        })
    }

    // -----------------------------------------------------------------------
    // Per-PR debugging sub-trees
    // -----------------------------------------------------------------------

    /// `debugging/pr/<n>/` -- created on demand.
    pub fn pr_dir(&self, pr_number: u64) -> PathBuf {
        self.state_dir
            .join("debugging")
            .join("pr")
            .join(pr_number.to_string())
    }

    pub fn pr_ci_dir(&self, pr_number: u64) -> PathBuf {
        self.pr_dir(pr_number).join("ci")
    }

    pub fn pr_comments_dir(&self, pr_number: u64) -> PathBuf {
        self.pr_dir(pr_number).join("comments")
    }

    pub fn resolve_comments_path(&self, pr_number: u64) -> PathBuf {
        self.pr_dir(pr_number).join("resolve-comments.json")
    }

    fn addressed_threads_path(&self, pr_number: u64) -> PathBuf {
        self.pr_dir(pr_number).join("addressed_threads.json")
    }

    /// Thread ids already replied to for this PR. Persisted separately from
    /// the comment files so re-polls never produce duplicate replies.
    pub fn load_addressed_threads(&self, pr_number: u64) -> BTreeSet<String> {
        let path = self.addressed_threads_path(pr_number);
        std::fs::read_to_string(&path)
            .ok()
            .and_then(|data| serde_json::from_str(&data).ok())
            .unwrap_or_default()
    }

    pub fn save_addressed_threads(
        &self,
        pr_number: u64,
        threads: &BTreeSet<String>,
    ) -> Result<()> {
        let dir = self.pr_dir(pr_number);
        std::fs::create_dir_all(&dir).map_err(|e| self.classify_io(e))?;
        let json = serde_json::to_string_pretty(threads).map_err(|e| StateError::Corrupted {
            reason: e.to_string(),
        })?;
        atomic_write(&self.addressed_threads_path(pr_number), json.as_bytes())
            .map_err(|e| self.classify_io(e))
    }

    // -----------------------------------------------------------------------
    // Logs
    // -----------------------------------------------------------------------

    pub fn run_log_path(&self, run_id: &str) -> PathBuf {
        self.state_dir.join("logs").join(format!("run-{run_id}.txt"))
    }

    pub fn mailbox_path(&self) -> PathBuf {
        self.state_dir.join("mailbox.json")
    }
}

/// Write `content` to `path` atomically via a sibling temp file + rename.
pub fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(content)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TaskStatus, WorkflowStage};

    fn temp_store() -> (StateStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = StateStore::new(dir.path().join(STATE_DIR_NAME));
        (store, dir)
    }

    #[test]
    fn initialize_creates_planning_state() {
        let (store, _dir) = temp_store();
        let state = store
            .initialize("Ship feature X", ModelTier::Smart, TaskOptions::default())
            .unwrap();

        assert_eq!(state.status, TaskStatus::Planning);
        assert_eq!(state.session_count, 0);
        assert_eq!(store.load_goal().unwrap(), "Ship feature X");
        assert!(store.is_session_active());
    }

    #[test]
    fn initialize_refuses_existing_state() {
        let (store, _dir) = temp_store();
        store
            .initialize("goal", ModelTier::Smart, TaskOptions::default())
            .unwrap();
        let err = store
            .initialize("goal", ModelTier::Smart, TaskOptions::default())
            .unwrap_err();
        assert!(matches!(err, StateError::AlreadyExists));
    }

    #[test]
    fn save_load_roundtrip() {
        let (store, _dir) = temp_store();
        let mut state = store
            .initialize("goal", ModelTier::Balanced, TaskOptions::default())
            .unwrap();

        state.status = TaskStatus::Working;
        state.workflow_stage = WorkflowStage::WaitingCi;
        state.current_pr = Some(42);
        state.current_task_index = 3;
        store.save_state(&state).unwrap();

        let loaded = store.load_state().unwrap();
        assert_eq!(loaded.status, TaskStatus::Working);
        assert_eq!(loaded.workflow_stage, WorkflowStage::WaitingCi);
        assert_eq!(loaded.current_pr, Some(42));
        assert_eq!(loaded.current_task_index, 3);
    }

    #[test]
    fn missing_state_is_not_found() {
        let (store, _dir) = temp_store();
        assert!(matches!(store.load_state(), Err(StateError::NotFound(_))));
    }

    #[test]
    fn empty_state_file_is_corrupted() {
        let (store, _dir) = temp_store();
        std::fs::create_dir_all(store.state_dir()).unwrap();
        std::fs::write(store.state_dir().join("state.json"), "").unwrap();
        assert!(matches!(
            store.load_state(),
            Err(StateError::Corrupted { .. })
        ));
    }

    #[test]
    fn invalid_json_is_corrupted_not_not_found() {
        let (store, _dir) = temp_store();
        std::fs::create_dir_all(store.state_dir()).unwrap();
        std::fs::write(store.state_dir().join("state.json"), "{ nope").unwrap();
        assert!(matches!(
            store.load_state(),
            Err(StateError::Corrupted { .. })
        ));
    }

    #[test]
    fn structurally_incomplete_state_is_corrupted() {
        let (store, _dir) = temp_store();
        std::fs::create_dir_all(store.state_dir()).unwrap();
        // Valid JSON but missing required fields.
        std::fs::write(store.state_dir().join("state.json"), r#"{"status":"working"}"#).unwrap();
        assert!(matches!(
            store.load_state(),
            Err(StateError::Corrupted { .. })
        ));
    }

    #[test]
    fn clean_removes_everything() {
        let (store, _dir) = temp_store();
        store
            .initialize("goal", ModelTier::Smart, TaskOptions::default())
            .unwrap();
        store.save_plan("- [ ] task\n").unwrap();
        store.clean().unwrap();

        assert!(!store.exists());
        assert!(!store.is_session_active());
        assert!(matches!(store.load_state(), Err(StateError::NotFound(_))));
    }

    #[test]
    fn artifacts_roundtrip() {
        let (store, _dir) = temp_store();
        store.save_plan("- [ ] a\n").unwrap();
        store.save_criteria("tests pass").unwrap();
        store.save_context("notes").unwrap();
        store.save_progress("1/2 done").unwrap();

        assert_eq!(store.load_plan().unwrap(), "- [ ] a\n");
        assert_eq!(store.load_criteria().unwrap(), "tests pass");
        assert_eq!(store.load_context(), "notes");
        assert_eq!(store.load_progress(), "1/2 done");
    }

    #[test]
    fn missing_context_and_progress_default_to_empty() {
        let (store, _dir) = temp_store();
        assert_eq!(store.load_context(), "");
        assert_eq!(store.load_progress(), "");
    }

    #[test]
    fn pr_paths() {
        let (store, _dir) = temp_store();
        let ci = store.pr_ci_dir(7);
        assert!(ci.ends_with("debugging/pr/7/ci"));
        let comments = store.pr_comments_dir(7);
        assert!(comments.ends_with("debugging/pr/7/comments"));
        assert!(store
            .resolve_comments_path(7)
            .ends_with("debugging/pr/7/resolve-comments.json"));
    }

    #[test]
    fn addressed_threads_persist_and_grow() {
        let (store, _dir) = temp_store();
        assert!(store.load_addressed_threads(5).is_empty());

        let mut set = BTreeSet::new();
        set.insert("RT_abc".to_string());
        store.save_addressed_threads(5, &set).unwrap();

        set.insert("RT_def".to_string());
        store.save_addressed_threads(5, &set).unwrap();

        let loaded = store.load_addressed_threads(5);
        assert_eq!(loaded.len(), 2);
        assert!(loaded.contains("RT_abc"));
    }

    #[test]
    fn run_log_path_uses_run_id() {
        let (store, _dir) = temp_store();
        assert!(store
            .run_log_path("abc123")
            .ends_with("logs/run-abc123.txt"));
    }
}
