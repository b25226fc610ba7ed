//! The agent boundary.
//!
//! [`WorkAgent`] is the seam between the work loop and whatever actually
//! runs the coding agent. The orchestrator only ever talks to this trait,
//! which keeps it testable with [`StubAgent`] and keeps provider plumbing
//! out of the loop logic.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::verification::VerifyOutcome;
use tm_core::types::ModelTier;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Everything an agent session can emit, as one tagged type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Assistant text as it streams.
    Text { content: String },
    /// The agent invoked a tool.
    ToolUse {
        name: String,
        input: serde_json::Value,
    },
    /// A tool finished.
    ToolResult {
        name: String,
        output: String,
        is_error: bool,
    },
    /// End of session with the full result text.
    Final { text: String },
}

impl AgentEvent {
    /// One-line rendering for the run log.
    pub fn summary(&self) -> String {
        match self {
            AgentEvent::Text { content } => {
                let first = content.lines().next().unwrap_or_default();
                format!("text: {first}")
            }
            AgentEvent::ToolUse { name, .. } => format!("tool_use: {name}"),
            AgentEvent::ToolResult {
                name, is_error, ..
            } => {
                if *is_error {
                    format!("tool_result: {name} (error)")
                } else {
                    format!("tool_result: {name}")
                }
            }
            AgentEvent::Final { .. } => "final".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Requests and outcomes
// ---------------------------------------------------------------------------

/// Result of the planning phase: the plan checklist plus the success
/// criteria the final verification will check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanOutcome {
    pub plan: String,
    pub criteria: String,
    pub transcript: String,
}

/// One work session against a single task.
#[derive(Debug, Clone, Default)]
pub struct WorkRequest {
    pub task_description: String,
    /// Accumulated context: progress notes, feedback files, prior attempts.
    pub context: String,
    /// Override the tier chosen from the task's complexity tag.
    pub model_override: Option<ModelTier>,
    /// Branch the session must work on, when fixing an existing PR.
    pub required_branch: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionOutcome {
    /// Final result text from the agent.
    pub transcript: String,
    pub events: Vec<AgentEvent>,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait WorkAgent: Send + Sync {
    /// Turn a goal into a plan and success criteria. Always runs on the
    /// smart tier regardless of task tags.
    async fn run_planning_phase(
        &self,
        goal: &str,
        context: &str,
    ) -> Result<PlanOutcome, AgentError>;

    /// Execute one coding session for a single task.
    async fn run_work_session(&self, request: WorkRequest)
        -> Result<SessionOutcome, AgentError>;

    /// Check the success criteria against the current state of the work.
    async fn verify(&self, criteria: &str, context: &str) -> Result<VerifyOutcome, AgentError>;
}

// ---------------------------------------------------------------------------
// Stub agent for tests
// ---------------------------------------------------------------------------

/// Scripted [`WorkAgent`] double. Responses are consumed in order; every
/// request is recorded so tests can assert on what the loop asked for.
#[derive(Debug, Default)]
pub struct StubAgent {
    plans: std::sync::Mutex<Vec<Result<PlanOutcome, AgentError>>>,
    sessions: std::sync::Mutex<Vec<Result<SessionOutcome, AgentError>>>,
    verifications: std::sync::Mutex<Vec<Result<VerifyOutcome, AgentError>>>,
    pub recorded_requests: std::sync::Mutex<Vec<WorkRequest>>,
}

impl StubAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_plan(&self, plan: &str, criteria: &str) {
        self.plans.lock().unwrap().push(Ok(PlanOutcome {
            plan: plan.to_string(),
            criteria: criteria.to_string(),
            transcript: String::new(),
        }));
    }

    pub fn push_plan_error(&self, error: AgentError) {
        self.plans.lock().unwrap().push(Err(error));
    }

    pub fn push_session(&self, transcript: &str) {
        self.sessions.lock().unwrap().push(Ok(SessionOutcome {
            transcript: transcript.to_string(),
            events: vec![AgentEvent::Final {
                text: transcript.to_string(),
            }],
        }));
    }

    pub fn push_session_error(&self, error: AgentError) {
        self.sessions.lock().unwrap().push(Err(error));
    }

    pub fn push_verification(&self, transcript: &str) {
        self.verifications
            .lock()
            .unwrap()
            .push(Ok(crate::verification::parse_verification_output(
                transcript,
            )));
    }

    pub fn session_count(&self) -> usize {
        self.recorded_requests.lock().unwrap().len()
    }

    fn take<T>(queue: &std::sync::Mutex<Vec<T>>, what: &str) -> Result<T, AgentError> {
        let mut guard = queue.lock().unwrap();
        if guard.is_empty() {
            return Err(AgentError::Other(format!("stub has no scripted {what}")));
        }
        Ok(guard.remove(0))
    }
}

#[async_trait]
impl WorkAgent for StubAgent {
    async fn run_planning_phase(
        &self,
        _goal: &str,
        _context: &str,
    ) -> Result<PlanOutcome, AgentError> {
        Self::take(&self.plans, "plan")?
    }

    async fn run_work_session(
        &self,
        request: WorkRequest,
    ) -> Result<SessionOutcome, AgentError> {
        self.recorded_requests.lock().unwrap().push(request);
        Self::take(&self.sessions, "session")?
    }

    async fn verify(&self, _criteria: &str, _context: &str) -> Result<VerifyOutcome, AgentError> {
        Self::take(&self.verifications, "verification")?
    }
}
