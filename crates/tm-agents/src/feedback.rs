//! PR feedback aggregation.
//!
//! One poll, one capture: [`capture_feedback`] always fetches both CI
//! failure logs and unresolved review comments for a PR, so the loop runs
//! at most one fix session per poll cycle that addresses everything at
//! once. Captured feedback lands under the PR's debugging directory where
//! the fix session reads it back.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use tm_core::state_store::{StateError, StateStore};
use tm_integrations::github::ci_logs::save_failed_run_logs;
use tm_integrations::github::{GitHubError, GitHubOps};
use tm_integrations::types::PrSnapshot;

#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error(transparent)]
    GitHub(#[from] GitHubError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("invalid resolution file: {0}")]
    InvalidResolutions(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FeedbackError>;

/// What a capture run found, and where it put it.
#[derive(Debug, Clone)]
pub struct CombinedFeedback {
    pub has_ci_failures: bool,
    /// CI reported a failure but no workflow run or logs could be found,
    /// so there is nothing for a fix session to read.
    pub ci_failed_without_logs: bool,
    /// Actionable comments were saved. False when every unresolved thread
    /// was bot noise or already addressed.
    pub has_comments: bool,
    pub saved_comment_count: usize,
    pub dir: PathBuf,
}

/// Fetch CI failure logs and unresolved review comments for `snapshot`'s
/// PR in one pass.
///
/// A failure fetching one kind is logged and tolerated as long as the
/// other kind still produces something actionable; the fix session runs
/// with whatever was retrieved.
pub async fn capture_feedback(
    github: &dyn GitHubOps,
    store: &StateStore,
    snapshot: &PrSnapshot,
) -> Result<CombinedFeedback> {
    let pr = snapshot.number;
    let ci_failed = snapshot.ci_state.is_failure();
    let mut has_ci_failures = false;
    let mut first_error: Option<FeedbackError> = None;

    if ci_failed {
        match save_ci_failures(github, store, snapshot).await {
            Ok(saved) => has_ci_failures = !saved.is_empty(),
            Err(e) => {
                warn!(pr, error = %e, "failed to capture CI logs");
                first_error = Some(e);
            }
        }
    }

    let mut saved_comment_count = 0;
    if snapshot.unresolved_threads > 0 {
        match save_pr_comments(github, store, pr).await {
            Ok(count) => saved_comment_count = count,
            Err(e) => {
                warn!(pr, error = %e, "failed to capture review comments");
                first_error = Some(e);
            }
        }
    }

    // Only a total wipeout aborts; partial capture still feeds a session.
    if !has_ci_failures && saved_comment_count == 0 {
        if let Some(e) = first_error {
            return Err(e);
        }
    }

    Ok(CombinedFeedback {
        has_ci_failures,
        ci_failed_without_logs: ci_failed && !has_ci_failures,
        has_comments: saved_comment_count > 0,
        saved_comment_count,
        dir: store.pr_dir(pr),
    })
}

async fn save_ci_failures(
    github: &dyn GitHubOps,
    store: &StateStore,
    snapshot: &PrSnapshot,
) -> Result<Vec<String>> {
    let Some(run_id) = github.latest_run_id(&snapshot.head_branch).await? else {
        debug!(pr = snapshot.number, "no workflow run found for head branch");
        return Ok(Vec::new());
    };
    let saved = save_failed_run_logs(github, &store.pr_ci_dir(snapshot.number), run_id).await?;
    info!(pr = snapshot.number, jobs = saved.len(), "saved CI failure logs");
    Ok(saved)
}

/// Directory-safe thread id. GraphQL node ids are base64-flavored but not
/// guaranteed path-safe.
fn sanitize_thread_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Write one `comments/<thread-id>.txt` file per actionable unresolved
/// thread, plus a summary. Threads already in the addressed set are
/// skipped so a re-poll never queues the same feedback twice. Returns the
/// number of comment files written.
async fn save_pr_comments(github: &dyn GitHubOps, store: &StateStore, pr: u64) -> Result<usize> {
    let threads = github.get_unresolved_threads(pr).await?;
    let addressed = store.load_addressed_threads(pr);

    let comments_dir = store.pr_comments_dir(pr);
    if comments_dir.exists() {
        fs::remove_dir_all(&comments_dir)?;
    }
    fs::create_dir_all(&comments_dir)?;

    let mut saved = 0usize;
    let mut summary = String::new();
    for thread in &threads {
        if !thread.is_actionable() || addressed.contains(&thread.id) {
            continue;
        }
        let mut body = format!("Thread ID: {}\n\n", thread.id);
        for comment in &thread.comments {
            let location = match (&comment.path, comment.line) {
                (Some(path), Some(line)) => format!("{path}:{line}"),
                (Some(path), None) => path.clone(),
                _ => "general".to_string(),
            };
            body.push_str(&format!(
                "From {} ({location}):\n{}\n\n",
                comment.author, comment.body
            ));
        }
        saved += 1;
        let file_name = format!("{}.txt", sanitize_thread_id(&thread.id));
        fs::write(comments_dir.join(file_name), &body)?;
        if let Some(first) = thread.comments.first() {
            let line = first.body.lines().next().unwrap_or_default();
            summary.push_str(&format!("{saved}. [{}] {line}\n", first.author));
        }
    }

    if saved > 0 {
        fs::write(store.pr_dir(pr).join("comments_summary.txt"), &summary)?;
    }
    info!(pr, threads = threads.len(), saved, "saved review comments");
    Ok(saved)
}

/// Build the combined fix-session task description. `None` when nothing
/// actionable was captured.
pub fn build_fix_task(
    pr: u64,
    feedback: &CombinedFeedback,
    has_conflicts: bool,
) -> Option<String> {
    let mut sections = Vec::new();

    if has_conflicts {
        sections.push(
            "## Merge Conflicts\n\n\
             This PR has merge conflicts that need to be resolved.\n\n\
             1. Run `git fetch origin` to get latest changes\n\
             2. Run `git merge origin/main` (or the base branch)\n\
             3. Resolve any conflicts in the affected files\n\
             4. Run tests to verify the merge didn't break anything\n\
             5. Commit the merge resolution"
                .to_string(),
        );
    }

    if feedback.has_ci_failures {
        let ci_path = feedback.dir.join("ci").display().to_string();
        sections.push(format!(
            "## CI Failures\n\n\
             **Read the CI failure logs from:** `{ci_path}/`\n\n\
             Start with `error_summary.txt` there: it lists the extracted error blocks per job.\n\
             Then use Glob to find all .log files and Read each one to understand the errors.\n\n\
             **IMPORTANT:** Fix ALL CI failures, even if they seem unrelated to your current work.\n\
             Your job is to keep CI green. Pre-existing issues, flaky tests, lint errors - fix them all.\n\n\
             - Read ALL files in the ci/ directory\n\
             - Understand ALL error messages (lint, tests, types, etc.)\n\
             - Fix everything that's failing - don't skip anything"
        ));
    }

    if feedback.has_comments {
        let comments_path = feedback.dir.join("comments").display().to_string();
        let resolve_path = feedback.dir.join("resolve-comments.json").display().to_string();
        sections.push(format!(
            "## Review Comments\n\n\
             **Read the review comments from:** `{comments_path}/`\n\n\
             Use Glob to find all .txt files, then Read each one to understand the feedback.\n\n\
             For each comment:\n\
             - Make the requested change, OR\n\
             - Explain why it's not needed\n\n\
             After addressing comments, create a resolution summary file at: `{resolve_path}`\n\n\
             **Resolution file format:**\n\
             ```json\n\
             {{\n\
               \"pr\": {pr},\n\
               \"resolutions\": [\n\
                 {{\n\
                   \"thread_id\": \"THREAD_ID_FROM_COMMENT_FILE\",\n\
                   \"action\": \"fixed|explained|skipped\",\n\
                   \"message\": \"Brief explanation of what was done\"\n\
                 }}\n\
               ]\n\
             }}\n\
             ```\n\n\
             Copy the Thread ID from each comment file into the resolution JSON.\n\n\
             **IMPORTANT: DO NOT resolve threads directly using GitHub GraphQL mutations.**\n\
             The orchestrator will handle thread resolution automatically after you create the resolution file."
        ));
    }

    if sections.is_empty() {
        return None;
    }

    Some(format!(
        "PR #{pr} needs fixes.\n\n{}\n\n\
         ## Instructions\n\n\
         1. Read ALL relevant files (CI logs and/or comments)\n\
         2. Fix ALL issues found\n\
         3. Run tests/lint locally to verify everything passes\n\
         4. Commit and push the fixes\n\n\
         After fixing everything, end with: TASK COMPLETE",
        sections.join("\n\n")
    ))
}

// ---------------------------------------------------------------------------
// Resolution replies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Serialize)]
pub struct ResolutionFile {
    pub pr: u64,
    pub resolutions: Vec<Resolution>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Resolution {
    pub thread_id: String,
    pub action: String,
    pub message: String,
}

/// Read the agent-authored `resolve-comments.json` and resolve each
/// thread exactly once. Already-addressed thread ids are skipped even if
/// GitHub re-reports them; the addressed set is persisted after every
/// successful resolve so a crash cannot double-reply.
pub async fn post_comment_replies(
    github: &dyn GitHubOps,
    store: &StateStore,
    pr: u64,
) -> Result<usize> {
    let path = store.resolve_comments_path(pr);
    if !path.exists() {
        debug!(pr, "no resolution file written by the fix session");
        return Ok(0);
    }

    let file: ResolutionFile = serde_json::from_str(&fs::read_to_string(&path)?)?;
    let mut addressed: BTreeSet<String> = store.load_addressed_threads(pr);

    let mut resolved = 0usize;
    for resolution in &file.resolutions {
        if addressed.contains(&resolution.thread_id) {
            debug!(thread = %resolution.thread_id, "thread already addressed, skipping");
            continue;
        }
        let message = format!("[{}] {}", resolution.action, resolution.message);
        match github.resolve_thread(&resolution.thread_id, &message).await {
            Ok(()) => {
                addressed.insert(resolution.thread_id.clone());
                store.save_addressed_threads(pr, &addressed)?;
                resolved += 1;
            }
            Err(e) => {
                warn!(thread = %resolution.thread_id, error = %e, "failed to resolve thread");
            }
        }
    }

    // Consumed; a later fix session writes a fresh one.
    fs::remove_file(&path)?;
    info!(pr, resolved, "posted comment replies");
    Ok(resolved)
}
