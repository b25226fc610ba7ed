//! Structured GitHub data as the work loop sees it.

use serde::{Deserialize, Serialize};

/// Combined CI state for a PR's head commit, from the status check rollup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CiState {
    Success,
    Failure,
    Error,
    Pending,
    Expected,
    /// No rollup reported (no checks configured, or GitHub has not
    /// computed one yet).
    #[default]
    Unknown,
}

impl CiState {
    pub fn is_failure(&self) -> bool {
        matches!(self, CiState::Failure | CiState::Error)
    }

    pub fn from_rollup(state: &str) -> Self {
        match state.to_uppercase().as_str() {
            "SUCCESS" => CiState::Success,
            "FAILURE" => CiState::Failure,
            "ERROR" => CiState::Error,
            "PENDING" => CiState::Pending,
            "EXPECTED" => CiState::Expected,
            _ => CiState::Unknown,
        }
    }
}

/// GitHub's mergeability verdict. UNKNOWN means GitHub has not finished
/// computing it and the caller should re-poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mergeable {
    Mergeable,
    Conflicting,
    #[default]
    Unknown,
}

/// GitHub's `mergeStateStatus`: why a mergeable PR may still be unable to
/// land (branch protection, staleness, failing hooks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergeStateStatus {
    Clean,
    Blocked,
    Behind,
    Dirty,
    HasHooks,
    Unstable,
    #[default]
    Unknown,
}

impl MergeStateStatus {
    pub fn from_api(value: &str) -> Self {
        match value.to_uppercase().as_str() {
            "CLEAN" => MergeStateStatus::Clean,
            "BLOCKED" => MergeStateStatus::Blocked,
            "BEHIND" => MergeStateStatus::Behind,
            "DIRTY" => MergeStateStatus::Dirty,
            "HAS_HOOKS" => MergeStateStatus::HasHooks,
            "UNSTABLE" => MergeStateStatus::Unstable,
            _ => MergeStateStatus::Unknown,
        }
    }
}

impl std::fmt::Display for MergeStateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            MergeStateStatus::Clean => "CLEAN",
            MergeStateStatus::Blocked => "BLOCKED",
            MergeStateStatus::Behind => "BEHIND",
            MergeStateStatus::Dirty => "DIRTY",
            MergeStateStatus::HasHooks => "HAS_HOOKS",
            MergeStateStatus::Unstable => "UNSTABLE",
            MergeStateStatus::Unknown => "UNKNOWN",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrState {
    Open,
    Closed,
    Merged,
}

/// One check, normalized across CheckRun (Actions) and StatusContext
/// (external services). CheckRuns carry `status` QUEUED/IN_PROGRESS/
/// COMPLETED with a conclusion only once completed; StatusContexts map
/// their single state into both fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckDetail {
    pub name: String,
    pub status: String,
    pub conclusion: Option<String>,
}

impl CheckDetail {
    /// Whether this check has yet to produce a final verdict.
    pub fn is_pending(&self) -> bool {
        let status = self.status.to_uppercase();
        // StatusContext still waiting
        if status == "PENDING" || status == "EXPECTED" {
            return true;
        }
        // CheckRun not finished
        status != "COMPLETED" && self.conclusion.is_none()
    }

    pub fn passed(&self) -> bool {
        self.conclusion
            .as_deref()
            .is_some_and(|c| c.eq_ignore_ascii_case("success"))
    }

    pub fn failed(&self) -> bool {
        self.conclusion
            .as_deref()
            .is_some_and(|c| c.eq_ignore_ascii_case("failure") || c.eq_ignore_ascii_case("error"))
    }
}

/// Point-in-time view of a PR, everything the loop needs to decide its
/// next move.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrSnapshot {
    pub number: u64,
    pub state: PrState,
    pub ci_state: CiState,
    pub check_details: Vec<CheckDetail>,
    pub unresolved_threads: u64,
    pub resolved_threads: u64,
    pub mergeable: Mergeable,
    pub merge_state_status: MergeStateStatus,
    pub base_branch: String,
    pub head_branch: String,
}

impl PrSnapshot {
    pub fn checks_passed(&self) -> usize {
        self.check_details.iter().filter(|c| c.passed()).count()
    }

    pub fn checks_failed(&self) -> usize {
        self.check_details.iter().filter(|c| c.failed()).count()
    }

    pub fn checks_skipped(&self) -> usize {
        self.check_details
            .iter()
            .filter(|c| {
                c.conclusion
                    .as_deref()
                    .is_some_and(|v| v.eq_ignore_ascii_case("skipped"))
            })
            .count()
    }

    pub fn pending_check_names(&self) -> Vec<String> {
        self.check_details
            .iter()
            .filter(|c| c.is_pending())
            .map(|c| c.name.clone())
            .collect()
    }
}

/// An unresolved review thread with its comments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewThread {
    pub id: String,
    pub is_resolved: bool,
    pub comments: Vec<ThreadComment>,
}

impl ReviewThread {
    /// Bot status updates (codecov, coderabbit summaries and the like) are
    /// not actionable review feedback.
    pub fn is_actionable(&self) -> bool {
        self.comments
            .first()
            .is_some_and(|c| !c.author.ends_with("[bot]"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadComment {
    pub author: String,
    pub body: String,
    pub path: Option<String>,
    pub line: Option<u64>,
}

/// A GitHub Actions job within a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiJob {
    pub id: u64,
    pub name: String,
    pub status: String,
    pub conclusion: Option<String>,
    pub run_id: u64,
}

impl CiJob {
    /// Real failures only. Cancelled jobs were stopped on purpose and
    /// carry no fixable signal.
    pub fn is_failed(&self) -> bool {
        matches!(
            self.conclusion.as_deref(),
            Some("failure") | Some("timed_out") | Some("action_required")
        )
    }
}
