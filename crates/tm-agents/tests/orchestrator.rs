//! End-to-end work-loop scenarios against scripted collaborators.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use tm_agents::{Orchestrator, RunOutcome};
use tm_core::config::LoopConfig;
use tm_core::mailbox::{merge_messages, MailboxMessage, Priority};
use tm_core::plan::parse_plan;
use tm_core::state_store::StateStore;
use tm_core::types::{ModelTier, TaskOptions, TaskStatus, WorkflowStage};
use tm_harness::agent::StubAgent;
use tm_harness::cancel::CancelToken;
use tm_integrations::github::{GitHubOps, Result as GhResult};
use tm_integrations::types::{
    CheckDetail, CiJob, CiState, Mergeable, MergeStateStatus, PrSnapshot, PrState, ReviewThread,
    ThreadComment,
};

// ---------------------------------------------------------------------------
// Scripted GitHub double
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockGitHub {
    /// Status responses consumed in order; the last one repeats.
    statuses: Mutex<VecDeque<PrSnapshot>>,
    threads: Mutex<Vec<ReviewThread>>,
    failed_jobs: Vec<CiJob>,
    job_logs: String,
    merged: AtomicBool,
    resolved_threads: Mutex<Vec<String>>,
}

impl MockGitHub {
    fn push_status(&self, snapshot: PrSnapshot) {
        self.statuses.lock().unwrap().push_back(snapshot);
    }
}

#[async_trait]
impl GitHubOps for MockGitHub {
    async fn get_pr_status(&self, _pr: u64) -> GhResult<PrSnapshot> {
        let mut queue = self.statuses.lock().unwrap();
        let snapshot = if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().expect("no scripted PR status")
        };
        Ok(snapshot)
    }

    async fn get_required_status_checks(&self, _branch: &str) -> GhResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn get_unresolved_threads(&self, _pr: u64) -> GhResult<Vec<ReviewThread>> {
        Ok(self.threads.lock().unwrap().clone())
    }

    async fn merge_pr(&self, _pr: u64) -> GhResult<()> {
        self.merged.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn get_pr_for_branch(&self, _branch: &str) -> GhResult<Option<u64>> {
        Ok(None)
    }

    async fn latest_run_id(&self, _branch: &str) -> GhResult<Option<u64>> {
        Ok((!self.failed_jobs.is_empty()).then_some(1))
    }

    async fn get_failed_jobs(&self, _run_id: u64) -> GhResult<Vec<CiJob>> {
        Ok(self.failed_jobs.clone())
    }

    async fn download_job_logs(&self, _job_id: u64) -> GhResult<String> {
        Ok(self.job_logs.clone())
    }

    async fn resolve_thread(&self, thread_id: &str, _message: &str) -> GhResult<()> {
        self.resolved_threads.lock().unwrap().push(thread_id.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn fast_config() -> LoopConfig {
    LoopConfig {
        ci_poll_interval_secs: 0,
        ci_start_wait_secs: 0,
        max_ci_polls: 5,
        max_planning_attempts: 3,
    }
}

fn snapshot(ci_state: CiState, threads: u64, mergeable: Mergeable) -> PrSnapshot {
    PrSnapshot {
        number: 7,
        state: PrState::Open,
        ci_state,
        check_details: vec![CheckDetail {
            name: "tests".into(),
            status: "COMPLETED".into(),
            conclusion: Some(
                if ci_state.is_failure() { "FAILURE" } else { "SUCCESS" }.into(),
            ),
        }],
        unresolved_threads: threads,
        resolved_threads: 0,
        mergeable,
        merge_state_status: if mergeable == Mergeable::Mergeable {
            MergeStateStatus::Clean
        } else {
            MergeStateStatus::Unknown
        },
        base_branch: "main".into(),
        head_branch: "feature".into(),
    }
}

fn review_thread(id: &str, author: &str) -> ReviewThread {
    ReviewThread {
        id: id.into(),
        is_resolved: false,
        comments: vec![ThreadComment {
            author: author.into(),
            body: "Please fix this".into(),
            path: Some("src/lib.rs".into()),
            line: Some(10),
        }],
    }
}

fn new_store(dir: &TempDir) -> StateStore {
    let store = StateStore::for_working_dir(dir.path());
    store
        .initialize("ship it", ModelTier::Smart, TaskOptions::default())
        .unwrap();
    store
}

// ---------------------------------------------------------------------------
// Scenario A: plan with two tasks runs to success
// ---------------------------------------------------------------------------

#[tokio::test]
async fn two_task_plan_runs_to_success() {
    let dir = TempDir::new().unwrap();
    let store = new_store(&dir);

    let agent = Arc::new(StubAgent::new());
    agent.push_plan("- [ ] Task 1\n- [ ] Task 2", "everything works");
    agent.push_session("did task 1");
    agent.push_session("did task 2");
    agent.push_verification("All criteria met.\nverification_result: pass");

    let github = Arc::new(MockGitHub::default());
    let orchestrator = Orchestrator::new(
        StateStore::new(store.state_dir().to_path_buf()),
        agent.clone(),
        github,
        fast_config(),
        CancelToken::new(),
    );

    let outcome = orchestrator.run().await.unwrap();
    assert_eq!(outcome, RunOutcome::Success);

    let state = store.load_state().unwrap();
    assert_eq!(state.status, TaskStatus::Success);
    assert_eq!(state.current_task_index, 2);
    // planning + 2 work sessions + verification
    assert_eq!(state.session_count, 4);

    let plan = parse_plan(&store.load_plan().unwrap());
    assert_eq!(plan.completed_tasks(), 2);
}

// ---------------------------------------------------------------------------
// Scenario B: CI failure plus review comments produce ONE combined session
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ci_failure_and_comments_trigger_single_combined_session() {
    let dir = TempDir::new().unwrap();
    let store = new_store(&dir);
    store.save_plan("- [x] Task 1").unwrap();
    store.save_criteria("done").unwrap();

    let mut state = store.load_state().unwrap();
    state.status = TaskStatus::Working;
    state.workflow_stage = WorkflowStage::CiFailed;
    state.current_pr = Some(7);
    store.save_state(&state).unwrap();

    let github = Arc::new(MockGitHub {
        failed_jobs: vec![CiJob {
            id: 11,
            name: "tests".into(),
            status: "completed".into(),
            conclusion: Some("failure".into()),
            run_id: 1,
        }],
        job_logs: "error: assertion failed in widget_test".into(),
        ..Default::default()
    });
    *github.threads.lock().unwrap() = vec![
        review_thread("RT_1", "reviewer1"),
        review_thread("RT_2", "reviewer2"),
    ];
    // Fix session sees failure + 2 threads; afterwards CI is green, threads
    // resolved, PR mergeable.
    github.push_status(snapshot(CiState::Failure, 2, Mergeable::Unknown));
    github.push_status(snapshot(CiState::Success, 0, Mergeable::Mergeable));

    let agent = Arc::new(StubAgent::new());
    agent.push_session("fixed everything\nTASK COMPLETE");
    agent.push_verification("verification_result: pass");

    let orchestrator = Orchestrator::new(
        StateStore::new(store.state_dir().to_path_buf()),
        agent.clone(),
        github.clone(),
        fast_config(),
        CancelToken::new(),
    );

    let outcome = orchestrator.run().await.unwrap();
    assert_eq!(outcome, RunOutcome::Success);

    // Exactly one work session, covering both kinds of feedback.
    assert_eq!(agent.session_count(), 1);
    let requests = agent.recorded_requests.lock().unwrap();
    let task = &requests[0].task_description;
    assert!(task.contains("CI Failures"), "missing CI marker: {task}");
    assert!(task.contains("Review Comments"), "missing comment marker: {task}");
    assert!(task.contains("ci/"));
    assert!(task.contains("comments/"));
    assert_eq!(requests[0].required_branch.as_deref(), Some("feature"));

    // Feedback landed on disk where the session was told to look, comment
    // files keyed by thread id.
    assert!(store.pr_ci_dir(7).join("tests").join("1.log").exists());
    assert!(store.pr_ci_dir(7).join("error_summary.txt").exists());
    assert!(store.pr_comments_dir(7).join("RT_1.txt").exists());
    assert!(store.pr_comments_dir(7).join("RT_2.txt").exists());

    assert!(github.merged.load(Ordering::SeqCst));
}

// ---------------------------------------------------------------------------
// Scenario C: urgent mailbox content precedes low-priority content
// ---------------------------------------------------------------------------

#[test]
fn urgent_message_merges_before_low() {
    let urgent = MailboxMessage::new("Fix auth").with_priority(Priority::Urgent);
    let low = MailboxMessage::new("Add tests").with_priority(Priority::Low);

    // Merger receives the batch already priority-sorted, as get_messages
    // returns it.
    let merged = merge_messages(&[urgent, low]).unwrap();
    let fix_pos = merged.find("Fix auth").unwrap();
    let tests_pos = merged.find("Add tests").unwrap();
    assert!(fix_pos < tests_pos);
    assert!(merged.contains("Consolidated Change Requests (2 messages)"));
}

// ---------------------------------------------------------------------------
// Blocked paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bot_only_threads_block_for_manual_review() {
    let dir = TempDir::new().unwrap();
    let store = new_store(&dir);
    store.save_plan("- [x] Task 1").unwrap();

    let mut state = store.load_state().unwrap();
    state.status = TaskStatus::Working;
    state.workflow_stage = WorkflowStage::AddressingReviews;
    state.current_pr = Some(7);
    store.save_state(&state).unwrap();

    let github = Arc::new(MockGitHub::default());
    *github.threads.lock().unwrap() = vec![review_thread("RT_bot", "codecov[bot]")];
    github.push_status(snapshot(CiState::Success, 1, Mergeable::Unknown));

    let agent = Arc::new(StubAgent::new());
    let orchestrator = Orchestrator::new(
        StateStore::new(store.state_dir().to_path_buf()),
        agent.clone(),
        github,
        fast_config(),
        CancelToken::new(),
    );

    let outcome = orchestrator.run().await.unwrap();
    assert_eq!(outcome, RunOutcome::Blocked);
    // No session was burned on unactionable noise.
    assert_eq!(agent.session_count(), 0);
    assert_eq!(store.load_state().unwrap().status, TaskStatus::Blocked);
}

#[tokio::test]
async fn planning_failures_exhaust_into_failed() {
    let dir = TempDir::new().unwrap();
    let store = new_store(&dir);

    let agent = Arc::new(StubAgent::new());
    // Empty checklists never satisfy planning.
    agent.push_plan("", "");
    agent.push_plan("no checklist here", "");
    agent.push_plan("", "");

    let orchestrator = Orchestrator::new(
        StateStore::new(store.state_dir().to_path_buf()),
        agent,
        Arc::new(MockGitHub::default()),
        fast_config(),
        CancelToken::new(),
    );

    let outcome = orchestrator.run().await.unwrap();
    assert_eq!(outcome, RunOutcome::Failed);
    assert_eq!(store.load_state().unwrap().status, TaskStatus::Failed);
}

#[tokio::test]
async fn ci_failure_without_logs_blocks_with_ci_remediation() {
    let dir = TempDir::new().unwrap();
    let store = new_store(&dir);
    store.save_plan("- [x] Task 1").unwrap();

    let mut state = store.load_state().unwrap();
    state.status = TaskStatus::Working;
    state.workflow_stage = WorkflowStage::CiFailed;
    state.current_pr = Some(7);
    store.save_state(&state).unwrap();

    // Failed CI but no workflow run (and no review threads): nothing a fix
    // session could read.
    let github = Arc::new(MockGitHub::default());
    github.push_status(snapshot(CiState::Failure, 0, Mergeable::Unknown));

    let agent = Arc::new(StubAgent::new());
    let orchestrator = Orchestrator::new(
        StateStore::new(store.state_dir().to_path_buf()),
        agent.clone(),
        github,
        fast_config(),
        CancelToken::new(),
    );

    let outcome = orchestrator.run().await.unwrap();
    assert_eq!(outcome, RunOutcome::Blocked);
    assert_eq!(agent.session_count(), 0);
    // The remediation names the CI problem, not review threads.
    let progress = store.load_progress();
    assert!(progress.contains("no logs could be retrieved"), "progress: {progress}");
    assert!(!progress.contains("unresolved threads"), "progress: {progress}");
}

#[tokio::test]
async fn cancellation_parks_run_as_paused() {
    let dir = TempDir::new().unwrap();
    let store = new_store(&dir);

    let cancel = CancelToken::new();
    cancel.cancel();

    let orchestrator = Orchestrator::new(
        StateStore::new(store.state_dir().to_path_buf()),
        Arc::new(StubAgent::new()),
        Arc::new(MockGitHub::default()),
        fast_config(),
        cancel,
    );

    let outcome = orchestrator.run().await.unwrap();
    assert_eq!(outcome, RunOutcome::Interrupted);
    assert_eq!(store.load_state().unwrap().status, TaskStatus::Paused);
}

#[tokio::test]
async fn cancellation_leaves_blocked_state_untouched() {
    let dir = TempDir::new().unwrap();
    let store = new_store(&dir);

    let mut state = store.load_state().unwrap();
    state.status = TaskStatus::Blocked;
    store.save_state(&state).unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();

    let orchestrator = Orchestrator::new(
        StateStore::new(store.state_dir().to_path_buf()),
        Arc::new(StubAgent::new()),
        Arc::new(MockGitHub::default()),
        fast_config(),
        cancel,
    );

    let outcome = orchestrator.run().await.unwrap();
    assert_eq!(outcome, RunOutcome::Interrupted);
    // Still needs `resume --force`; the interrupt must not soften it.
    assert_eq!(store.load_state().unwrap().status, TaskStatus::Blocked);
}
