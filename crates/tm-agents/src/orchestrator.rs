//! The work loop.
//!
//! A sequential step machine over `(status, workflow_stage)`: planning
//! produces the checklist, working burns through it one session per task,
//! CI waits poll GitHub, and review/CI feedback funnels into single
//! combined fix sessions. State is persisted after every stage decision
//! and before the next blocking call, so a crash or interrupt resumes from
//! the last committed stage.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};

use tm_core::config::LoopConfig;
use tm_core::lockfile::SessionLock;
use tm_core::plan::{mark_task_complete, parse_plan, ParsedPlan};
use tm_core::state_store::{StateError, StateStore};
use tm_core::types::{TaskState, TaskStatus, WorkflowStage};
use tm_harness::agent::{WorkAgent, WorkRequest};
use tm_harness::cancel::CancelToken;
use tm_harness::circuit_breaker::CircuitBreaker;
use tm_harness::error::AgentError;
use tm_harness::retry::{run_with_retry, RetryPolicy};
use tm_integrations::github::ops::current_branch;
use tm_integrations::github::{GitHubError, GitHubOps};
use tm_integrations::types::{Mergeable, PrSnapshot, PrState};
use tm_telemetry::RunLogger;

use crate::feedback::{self, FeedbackError};
use crate::plan_update::{self, DrainOutcome, PlanUpdateError};

/// Re-polls of an UNKNOWN mergeability verdict before giving up.
const MAX_MERGE_ATTEMPTS: u32 = 10;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    GitHub(#[from] GitHubError),

    #[error(transparent)]
    Feedback(#[from] FeedbackError),

    #[error(transparent)]
    PlanUpdate(#[from] PlanUpdateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// How a `run` call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Goal verified complete.
    Success,
    Failed,
    /// Needs `resume --force` or other manual intervention.
    Blocked,
    /// Paused by policy (`pause_on_pr`) or external request.
    Paused,
    /// Cancellation token fired mid-run; state was parked as paused.
    Interrupted,
}

pub struct Orchestrator {
    store: StateStore,
    agent: Arc<dyn WorkAgent>,
    github: Arc<dyn GitHubOps>,
    breaker: CircuitBreaker,
    policy: RetryPolicy,
    cancel: CancelToken,
    config: LoopConfig,
}

impl Orchestrator {
    pub fn new(
        store: StateStore,
        agent: Arc<dyn WorkAgent>,
        github: Arc<dyn GitHubOps>,
        config: LoopConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            store,
            agent,
            github,
            breaker: CircuitBreaker::default(),
            policy: RetryPolicy::default(),
            cancel,
            config,
        }
    }

    /// Drive the loop until a terminal status, a pause, or cancellation.
    pub async fn run(&self) -> Result<RunOutcome> {
        let state = self.store.load_state()?;
        let run_log = RunLogger::new(self.store.state_dir(), &state.run_id)?;

        loop {
            if self.cancel.is_cancelled() {
                return self.park_interrupted(&run_log);
            }

            let mut state = self.store.load_state()?;
            // Keep the lease fresh so a parallel invocation sees us alive.
            SessionLock::heartbeat(self.store.state_dir()).ok();

            match state.status {
                TaskStatus::Planning => self.step_planning(&mut state, &run_log).await?,
                TaskStatus::Working => match state.workflow_stage {
                    WorkflowStage::Working => self.step_working(&mut state, &run_log).await?,
                    WorkflowStage::WaitingCi => self.step_waiting_ci(&mut state, &run_log).await?,
                    WorkflowStage::CiFailed | WorkflowStage::AddressingReviews => {
                        self.step_fix(&mut state, &run_log).await?
                    }
                    WorkflowStage::ReadyToMerge => self.step_merge(&mut state, &run_log).await?,
                },
                TaskStatus::Paused => return Ok(RunOutcome::Paused),
                TaskStatus::Blocked => return Ok(RunOutcome::Blocked),
                TaskStatus::Success => return Ok(RunOutcome::Success),
                TaskStatus::Failed => return Ok(RunOutcome::Failed),
            }

            state.updated_at = chrono::Utc::now();
            self.store.save_state(&state)?;
        }
    }

    fn park_interrupted(&self, run_log: &RunLogger) -> Result<RunOutcome> {
        let mut state = self.store.load_state()?;
        // Blocked stays blocked, so a plain `resume` cannot slip past the
        // manual-intervention gate after a ctrl-c.
        if matches!(state.status, TaskStatus::Planning | TaskStatus::Working) {
            state.status = TaskStatus::Paused;
            self.store.save_state(&state)?;
        }
        run_log.log("interrupted, run parked");
        Ok(RunOutcome::Interrupted)
    }

    fn block(&self, state: &mut TaskState, run_log: &RunLogger, reason: &str) {
        warn!(reason, "run blocked");
        run_log.log(&format!("BLOCKED: {reason}"));
        let mut progress = self.store.load_progress();
        progress.push_str(&format!("\nBLOCKED: {reason}\nRun `tm resume --force` to continue.\n"));
        self.store.save_progress(&progress).ok();
        state.status = TaskStatus::Blocked;
    }

    // -----------------------------------------------------------------------
    // Planning
    // -----------------------------------------------------------------------

    async fn step_planning(&self, state: &mut TaskState, run_log: &RunLogger) -> Result<()> {
        let goal = self.store.load_goal()?;
        let context = self.store.load_context();

        for attempt in 1..=self.config.max_planning_attempts {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            info!(attempt, "running planning phase");
            state.record_session();
            self.store.save_state(state)?;

            let agent = self.agent.clone();
            let result = run_with_retry(&self.policy, &self.breaker, &self.cancel, "planning", || {
                let agent = agent.clone();
                let goal = goal.clone();
                let context = context.clone();
                async move { agent.run_planning_phase(&goal, &context).await }
            })
            .await;

            match result {
                Ok(outcome) => {
                    let parsed = parse_plan(&outcome.plan);
                    if parsed.total_tasks() == 0 {
                        warn!(attempt, "planning produced an empty checklist");
                        continue;
                    }
                    self.store.save_plan(&outcome.plan)?;
                    self.store.save_criteria(&outcome.criteria)?;
                    run_log.log_section("plan", &outcome.plan);
                    info!(tasks = parsed.total_tasks(), "plan ready");
                    state.status = TaskStatus::Working;
                    state.workflow_stage = WorkflowStage::Working;
                    return Ok(());
                }
                Err(e) if !e.is_retryable() => {
                    error!(error = %e, "planning hit a fatal error");
                    state.status = TaskStatus::Failed;
                    run_log.log(&format!("planning failed: {e}"));
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "planning attempt failed");
                }
            }
        }

        run_log.log("planning attempts exhausted");
        state.status = TaskStatus::Failed;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Working
    // -----------------------------------------------------------------------

    async fn step_working(&self, state: &mut TaskState, run_log: &RunLogger) -> Result<()> {
        let plan_md = self.store.load_plan()?;
        let plan = parse_plan(&plan_md);

        let Some(task) = plan.incomplete_tasks().into_iter().next() else {
            return self.step_verification(state, run_log, &plan).await;
        };
        let task = task.clone();

        if state.sessions_exhausted() {
            self.block(
                state,
                run_log,
                &format!("session budget exhausted ({} sessions)", state.session_count),
            );
            return Ok(());
        }

        state.current_task_index = task.index;
        state.record_session();
        self.store.save_state(state)?;

        let description = task.cleaned_description();
        info!(index = task.index, task = %description, "starting work session");
        run_log.log(&format!("session {}: task {} ({description})", state.session_count, task.index));

        let mut context = self.store.load_context();
        if !task.context_lines.is_empty() {
            context.push_str("\n## Task hints\n");
            for line in &task.context_lines {
                context.push_str(&format!("- {line}\n"));
            }
        }

        let request = WorkRequest {
            task_description: description.clone(),
            context,
            model_override: Some(task.complexity().model_tier()),
            required_branch: None,
        };
        let agent = self.agent.clone();
        let outcome = run_with_retry(&self.policy, &self.breaker, &self.cancel, "work_session", || {
            let agent = agent.clone();
            let request = request.clone();
            async move { agent.run_work_session(request).await }
        })
        .await;

        match outcome {
            Ok(session) => {
                run_log.log_section(&format!("task {} output", task.index), &session.transcript);
                if let Some(updated) = mark_task_complete(&plan_md, task.index) {
                    self.store.save_plan(&updated)?;
                }
                state.current_task_index = task.index + 1;
            }
            Err(e) if !e.is_retryable() => {
                self.block(state, run_log, &format!("work session failed fatally: {e}"));
                return Ok(());
            }
            Err(e) => {
                self.block(state, run_log, &format!("work session failed after retries: {e}"));
                return Ok(());
            }
        }

        // Out-of-band change requests fold in between tasks, never mid-task.
        match plan_update::drain_mailbox(self.agent.as_ref(), &self.store).await {
            Ok(DrainOutcome::Updated { messages }) => {
                run_log.log(&format!("plan updated from {messages} mailbox message(s)"));
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "mailbox drain failed, continuing"),
        }

        // A pushed branch with an open PR moves this group into CI-watch.
        if let Some(branch) = current_branch().await {
            if let Some(pr) = self.github.get_pr_for_branch(&branch).await? {
                info!(pr, "open PR detected for current branch");
                run_log.log(&format!("PR #{pr} detected, waiting for CI"));
                state.current_pr = Some(pr);
                state.workflow_stage = WorkflowStage::WaitingCi;
                if state.options.pause_on_pr {
                    state.status = TaskStatus::Paused;
                }
            }
        }
        Ok(())
    }

    async fn step_verification(
        &self,
        state: &mut TaskState,
        run_log: &RunLogger,
        plan: &ParsedPlan,
    ) -> Result<()> {
        info!("all tasks complete, running verification");
        state.record_session();
        self.store.save_state(state)?;

        let criteria = self.store.load_criteria()?;
        let context = self.store.load_context();
        let agent = self.agent.clone();
        let outcome = run_with_retry(&self.policy, &self.breaker, &self.cancel, "verification", || {
            let agent = agent.clone();
            let criteria = criteria.clone();
            let context = context.clone();
            async move { agent.verify(&criteria, &context).await }
        })
        .await?;

        run_log.log_section("verification", &outcome.details);
        if outcome.success {
            info!("verification passed");
            state.current_task_index = plan.total_tasks();
            state.status = TaskStatus::Success;
        } else {
            warn!("verification failed, queueing a follow-up task");
            // Surface the findings to the next session and give the loop a
            // concrete task to land on.
            let mut context = self.store.load_context();
            context.push_str("\n## Verification findings\n");
            context.push_str(&outcome.details);
            self.store.save_context(&context)?;

            let plan_md = self.store.load_plan()?;
            let amended = format!(
                "{}\n- [ ] Address verification findings recorded in context.md\n",
                plan_md.trim_end()
            );
            self.store.save_plan(&amended)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // CI wait
    // -----------------------------------------------------------------------

    async fn step_waiting_ci(&self, state: &mut TaskState, run_log: &RunLogger) -> Result<()> {
        let Some(pr) = state.current_pr else {
            warn!("waiting_ci with no current PR, returning to working");
            state.workflow_stage = WorkflowStage::Working;
            return Ok(());
        };

        info!(pr, "waiting for CI checks");
        // Checks often take a moment to appear on a fresh push.
        if self
            .cancel
            .sleep(Duration::from_secs(self.config.ci_start_wait_secs))
            .await
            .is_err()
        {
            return Ok(());
        }

        // Branch protection is consulted once per wait, not per poll.
        let first = self.github.get_pr_status(pr).await?;
        let required: std::collections::BTreeSet<String> = self
            .github
            .get_required_status_checks(&first.base_branch)
            .await?
            .into_iter()
            .collect();

        let mut polls = 0u32;
        let snapshot: PrSnapshot = loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            let snapshot = self.github.get_pr_status(pr).await?;

            let reported: std::collections::BTreeSet<String> = snapshot
                .check_details
                .iter()
                .map(|c| c.name.clone())
                .collect();
            let missing = required.difference(&reported).count();
            let pending = snapshot.pending_check_names().len();

            if missing == 0 && pending == 0 {
                break snapshot;
            }

            polls += 1;
            if polls >= self.config.max_ci_polls {
                self.block(state, run_log, &format!("CI did not settle after {polls} polls"));
                return Ok(());
            }
            info!(
                pr,
                waiting = missing + pending,
                passed = snapshot.checks_passed(),
                failed = snapshot.checks_failed(),
                "CI still running"
            );
            if self
                .cancel
                .sleep(Duration::from_secs(self.config.ci_poll_interval_secs))
                .await
                .is_err()
            {
                return Ok(());
            }
        };

        if snapshot.ci_state.is_failure() {
            run_log.log(&format!(
                "PR #{pr} CI failed ({} failing checks)",
                snapshot.checks_failed()
            ));
            state.workflow_stage = WorkflowStage::CiFailed;
        } else if snapshot.unresolved_threads > 0 {
            run_log.log(&format!(
                "PR #{pr} CI green, {} unresolved review thread(s) ({} resolved)",
                snapshot.unresolved_threads, snapshot.resolved_threads
            ));
            state.workflow_stage = WorkflowStage::AddressingReviews;
        } else {
            run_log.log(&format!("PR #{pr} CI green, no review threads"));
            state.workflow_stage = WorkflowStage::ReadyToMerge;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Combined fix sessions
    // -----------------------------------------------------------------------

    async fn step_fix(&self, state: &mut TaskState, run_log: &RunLogger) -> Result<()> {
        let Some(pr) = state.current_pr else {
            state.workflow_stage = WorkflowStage::Working;
            return Ok(());
        };

        let snapshot = self.github.get_pr_status(pr).await?;
        let captured = feedback::capture_feedback(self.github.as_ref(), &self.store, &snapshot).await?;
        let has_conflicts = snapshot.mergeable == Mergeable::Conflicting;

        let Some(task_description) = feedback::build_fix_task(pr, &captured, has_conflicts) else {
            // Nothing a fix session could read. Name the right remediation:
            // a CI failure with no retrievable logs is a different problem
            // than bot-noise review threads.
            let reason = if captured.ci_failed_without_logs {
                format!("PR #{pr} CI failed but no logs could be retrieved; inspect the workflow run on GitHub")
            } else {
                format!("PR #{pr} has unresolved threads but nothing actionable; review manually")
            };
            self.block(state, run_log, &reason);
            return Ok(());
        };

        if state.sessions_exhausted() {
            self.block(state, run_log, "session budget exhausted during PR fixes");
            return Ok(());
        }
        state.record_session();
        self.store.save_state(state)?;

        info!(
            pr,
            ci = captured.has_ci_failures,
            comments = captured.saved_comment_count,
            conflicts = has_conflicts,
            "running combined fix session"
        );
        run_log.log(&format!(
            "fix session for PR #{pr} (ci={}, comments={}, conflicts={has_conflicts})",
            captured.has_ci_failures, captured.saved_comment_count
        ));

        let request = WorkRequest {
            task_description,
            context: String::new(),
            // Fix sessions always get the strongest tier.
            model_override: Some(tm_core::types::ModelTier::Smart),
            required_branch: Some(snapshot.head_branch.clone()),
        };
        let agent = self.agent.clone();
        let result = run_with_retry(&self.policy, &self.breaker, &self.cancel, "fix_session", || {
            let agent = agent.clone();
            let request = request.clone();
            async move { agent.run_work_session(request).await }
        })
        .await;

        match result {
            Ok(session) => {
                run_log.log_section(&format!("PR #{pr} fix output"), &session.transcript);
                if captured.has_comments {
                    feedback::post_comment_replies(self.github.as_ref(), &self.store, pr).await?;
                }
                state.workflow_stage = WorkflowStage::WaitingCi;
            }
            Err(e) if !e.is_retryable() => {
                self.block(state, run_log, &format!("fix session failed fatally: {e}"));
            }
            Err(e) => {
                self.block(state, run_log, &format!("fix session failed after retries: {e}"));
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Merge
    // -----------------------------------------------------------------------

    async fn step_merge(&self, state: &mut TaskState, run_log: &RunLogger) -> Result<()> {
        let Some(pr) = state.current_pr else {
            state.workflow_stage = WorkflowStage::Working;
            return Ok(());
        };

        if !state.options.auto_merge {
            info!(pr, "auto-merge disabled, leaving PR open");
            run_log.log(&format!("PR #{pr} ready to merge (auto-merge disabled)"));
            self.finish_pr_group(state, pr)?;
            return Ok(());
        }

        // GitHub computes mergeability lazily; give it a bounded number of
        // chances before declaring the PR stuck.
        let mut attempts = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            let snapshot = self.github.get_pr_status(pr).await?;

            if snapshot.state == PrState::Merged {
                run_log.log(&format!("PR #{pr} already merged"));
                self.finish_pr_group(state, pr)?;
                return Ok(());
            }

            match snapshot.mergeable {
                Mergeable::Mergeable => {
                    self.github.merge_pr(pr).await?;
                    info!(pr, merge_state = %snapshot.merge_state_status, "merged");
                    run_log.log(&format!(
                        "PR #{pr} merged (state {}, {} checks skipped, {} threads resolved)",
                        snapshot.merge_state_status,
                        snapshot.checks_skipped(),
                        snapshot.resolved_threads
                    ));
                    self.finish_pr_group(state, pr)?;
                    return Ok(());
                }
                Mergeable::Conflicting => {
                    self.block(
                        state,
                        run_log,
                        &format!(
                            "PR #{pr} has merge conflicts (merge state {})",
                            snapshot.merge_state_status
                        ),
                    );
                    return Ok(());
                }
                Mergeable::Unknown => {
                    attempts += 1;
                    if attempts >= MAX_MERGE_ATTEMPTS {
                        self.block(
                            state,
                            run_log,
                            &format!("PR #{pr} mergeability still unknown after {attempts} polls"),
                        );
                        return Ok(());
                    }
                    info!(pr, attempts, merge_state = %snapshot.merge_state_status, "waiting for mergeability verdict");
                    if self
                        .cancel
                        .sleep(Duration::from_secs(self.config.ci_poll_interval_secs))
                        .await
                        .is_err()
                    {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Close out the PR's group: check off any stragglers in the merged
    /// group so the picker never revisits it, then return to plain working.
    fn finish_pr_group(&self, state: &mut TaskState, pr: u64) -> Result<()> {
        let mut plan_md = self.store.load_plan()?;
        let plan = parse_plan(&plan_md);
        let last_index = state.current_task_index.saturating_sub(1);
        if let Some(group) = plan.group_for_task(last_index) {
            tracing::debug!(pr, group = %group.id, "closing out merged group");
            for index in group.task_indices.clone() {
                if let Some(updated) = mark_task_complete(&plan_md, index) {
                    plan_md = updated;
                }
            }
            self.store.save_plan(&plan_md)?;
        }
        state.current_pr = None;
        state.workflow_stage = WorkflowStage::Working;
        Ok(())
    }
}
