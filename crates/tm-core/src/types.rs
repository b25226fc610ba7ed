use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

/// Top-level status of a goal-execution run.
///
/// `Success` and `Failed` are terminal. `Paused` is an externally-requested
/// suspension reachable from `Working`/`Blocked`; resuming re-enters the
/// workflow stage recorded at pause time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Planning,
    Working,
    Paused,
    Blocked,
    Success,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed)
    }

    /// Returns `true` when a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: &TaskStatus) -> bool {
        matches!(
            (self, target),
            (TaskStatus::Planning, TaskStatus::Working)
                | (TaskStatus::Planning, TaskStatus::Failed)
                | (TaskStatus::Working, TaskStatus::Working)
                | (TaskStatus::Working, TaskStatus::Blocked)
                | (TaskStatus::Working, TaskStatus::Paused)
                | (TaskStatus::Working, TaskStatus::Success)
                | (TaskStatus::Working, TaskStatus::Failed)
                | (TaskStatus::Blocked, TaskStatus::Working)
                | (TaskStatus::Blocked, TaskStatus::Paused)
                | (TaskStatus::Blocked, TaskStatus::Failed)
                | (TaskStatus::Paused, TaskStatus::Working)
                | (TaskStatus::Paused, TaskStatus::Blocked)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TaskStatus::Planning => "planning",
            TaskStatus::Working => "working",
            TaskStatus::Paused => "paused",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// WorkflowStage
// ---------------------------------------------------------------------------

/// Sub-state within `Working`/`Blocked`, recorded so a killed process can
/// resume exactly where it left off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    #[default]
    Working,
    WaitingCi,
    CiFailed,
    AddressingReviews,
    ReadyToMerge,
}

impl std::fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            WorkflowStage::Working => "working",
            WorkflowStage::WaitingCi => "waiting_ci",
            WorkflowStage::CiFailed => "ci_failed",
            WorkflowStage::AddressingReviews => "addressing_reviews",
            WorkflowStage::ReadyToMerge => "ready_to_merge",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// ModelTier
// ---------------------------------------------------------------------------

/// Model capability tier selected per task; the agent adapter maps tiers to
/// concrete model identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// Most capable model -- complex implementation and planning.
    #[default]
    Smart,
    /// Cheapest/fastest model -- trivial fixes, config changes.
    Fast,
    /// Mid-tier model -- moderate complexity work.
    Balanced,
    /// Largest-context model -- debugging sessions over big logs.
    LongContext,
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ModelTier::Smart => "smart",
            ModelTier::Fast => "fast",
            ModelTier::Balanced => "balanced",
            ModelTier::LongContext => "long_context",
        };
        write!(f, "{}", label)
    }
}

impl std::str::FromStr for ModelTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "smart" => Ok(ModelTier::Smart),
            "fast" => Ok(ModelTier::Fast),
            "balanced" => Ok(ModelTier::Balanced),
            "long_context" | "long-context" => Ok(ModelTier::LongContext),
            other => Err(format!("unknown model tier: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// TaskComplexity
// ---------------------------------------------------------------------------

/// Complexity classification parsed from a leading `` `[tag]` `` marker on a
/// task line. Determines which model tier executes the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskComplexity {
    Coding,
    Quick,
    General,
    DebuggingQa,
}

impl TaskComplexity {
    /// Map complexity to the model tier that should execute it.
    pub fn model_tier(&self) -> ModelTier {
        match self {
            TaskComplexity::Coding => ModelTier::Smart,
            TaskComplexity::Quick => ModelTier::Fast,
            TaskComplexity::General => ModelTier::Balanced,
            TaskComplexity::DebuggingQa => ModelTier::LongContext,
        }
    }
}

// ---------------------------------------------------------------------------
// TaskOptions
// ---------------------------------------------------------------------------

/// Run options fixed at `start` time. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOptions {
    /// Merge PRs automatically once CI is green and reviews are resolved.
    #[serde(default = "default_true")]
    pub auto_merge: bool,
    /// Hard cap on agent invocations for the whole run.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: u64,
    /// Pause the loop instead of merging when a PR becomes ready.
    #[serde(default)]
    pub pause_on_pr: bool,
    /// Optional webhook notified on stage transitions.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_max_sessions() -> u64 {
    50
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            auto_merge: true,
            max_sessions: default_max_sessions(),
            pause_on_pr: false,
            webhook_url: None,
        }
    }
}

// ---------------------------------------------------------------------------
// TaskState
// ---------------------------------------------------------------------------

/// The single source of truth for one goal-execution run.
///
/// Mutated exclusively by the orchestrator between steps and persisted
/// atomically after every stage decision, so a crash at any point resumes
/// from the last committed stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    pub status: TaskStatus,
    #[serde(default)]
    pub workflow_stage: WorkflowStage,
    /// Cursor into the parsed plan; always within `[0, total_tasks]`.
    #[serde(default)]
    pub current_task_index: usize,
    /// Monotonic counter of agent invocations; never decreases.
    #[serde(default)]
    pub session_count: u64,
    #[serde(default)]
    pub current_pr: Option<u64>,
    /// Opaque run identifier, used for log file naming.
    pub run_id: String,
    pub model: ModelTier,
    pub options: TaskOptions,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskState {
    pub fn new(model: ModelTier, options: TaskOptions) -> Self {
        let now = Utc::now();
        Self {
            status: TaskStatus::Planning,
            workflow_stage: WorkflowStage::Working,
            current_task_index: 0,
            session_count: 0,
            current_pr: None,
            run_id: uuid::Uuid::new_v4().to_string(),
            model,
            options,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record one agent invocation.
    pub fn record_session(&mut self) {
        self.session_count += 1;
        self.updated_at = Utc::now();
    }

    /// True once the run has consumed its session budget.
    pub fn sessions_exhausted(&self) -> bool {
        self.session_count >= self.options.max_sessions
    }
}

// ---------------------------------------------------------------------------
// ParsedTask / TaskGroup
// ---------------------------------------------------------------------------

/// One checklist line from the plan markdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedTask {
    /// 0-based index, stable across re-parses while line order is unchanged.
    pub index: usize,
    /// Raw description text, including any complexity tag.
    pub description: String,
    pub group_id: String,
    pub group_name: String,
    pub is_complete: bool,
    /// Indented bullet sub-items directly beneath the task line, used as
    /// extra file/location hints for the work session.
    pub context_lines: Vec<String>,
}

impl ParsedTask {
    /// Complexity parsed from the leading backtick-quoted tag, defaulting to
    /// `Coding` when absent.
    pub fn complexity(&self) -> TaskComplexity {
        crate::plan::parse_task_complexity(&self.description).0
    }

    /// Description with the complexity tag stripped.
    pub fn cleaned_description(&self) -> String {
        crate::plan::parse_task_complexity(&self.description).1
    }
}

impl std::fmt::Display for ParsedTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mark = if self.is_complete { "x" } else { " " };
        write!(f, "[{}] #{} {}", mark, self.index, self.cleaned_description())
    }
}

/// A named partition of tasks representing one pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskGroup {
    /// `"pr_<n>"` for numbered groups, `"default"` for ungrouped tasks.
    pub id: String,
    pub name: String,
    pub task_indices: Vec<usize>,
}

impl TaskGroup {
    /// PR sequence number for `pr_<n>` groups, `None` for the default group.
    pub fn pr_number(&self) -> Option<u64> {
        self.id.strip_prefix("pr_").and_then(|n| n.parse().ok())
    }
}
