//! GitHub operations the work loop depends on.
//!
//! The trait exists so the orchestrator and feedback layers can run against
//! a scripted double in tests. The real implementation talks GraphQL for
//! PR status and review threads (the REST view of check rollups is lossy)
//! and REST for everything else.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::client::{GitHubClient, GitHubError, Result};
use crate::types::{
    CheckDetail, CiJob, CiState, Mergeable, MergeStateStatus, PrSnapshot, PrState, ReviewThread,
    ThreadComment,
};

#[async_trait]
pub trait GitHubOps: Send + Sync {
    /// Snapshot of a PR: CI rollup, check details, thread counts,
    /// mergeability.
    async fn get_pr_status(&self, pr: u64) -> Result<PrSnapshot>;

    /// Names of checks required by branch protection on `branch`. Empty
    /// when the branch is unprotected.
    async fn get_required_status_checks(&self, branch: &str) -> Result<Vec<String>>;

    /// Unresolved review threads with their comments.
    async fn get_unresolved_threads(&self, pr: u64) -> Result<Vec<ReviewThread>>;

    /// Squash-merge the PR.
    async fn merge_pr(&self, pr: u64) -> Result<()>;

    /// Open PR whose head is `branch`, if any.
    async fn get_pr_for_branch(&self, branch: &str) -> Result<Option<u64>>;

    /// Most recent workflow run on `branch`.
    async fn latest_run_id(&self, branch: &str) -> Result<Option<u64>>;

    /// Jobs that genuinely failed in a run. Cancelled and queued jobs are
    /// excluded.
    async fn get_failed_jobs(&self, run_id: u64) -> Result<Vec<CiJob>>;

    /// Full untruncated log text for one job.
    async fn download_job_logs(&self, job_id: u64) -> Result<String>;

    /// Reply to a review thread and mark it resolved.
    async fn resolve_thread(&self, thread_id: &str, message: &str) -> Result<()>;
}

/// Current git branch of the working directory, if inside a repo.
pub async fn current_branch() -> Option<String> {
    let output = tokio::process::Command::new("git")
        .args(["branch", "--show-current"])
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!branch.is_empty()).then_some(branch)
}

const PR_STATUS_QUERY: &str = r#"
query($owner: String!, $repo: String!, $number: Int!) {
  repository(owner: $owner, name: $repo) {
    pullRequest(number: $number) {
      state
      mergeable
      mergeStateStatus
      baseRefName
      headRefName
      commits(last: 1) {
        nodes {
          commit {
            statusCheckRollup {
              state
              contexts(first: 100) {
                nodes {
                  __typename
                  ... on CheckRun { name status conclusion }
                  ... on StatusContext { context state }
                }
              }
            }
          }
        }
      }
      reviewThreads(first: 100) {
        nodes {
          id
          isResolved
          comments(first: 10) {
            nodes {
              author { login }
              body
              path
              line
            }
          }
        }
      }
    }
  }
}
"#;

#[async_trait]
impl GitHubOps for GitHubClient {
    async fn get_pr_status(&self, pr: u64) -> Result<PrSnapshot> {
        let response: Value = self
            .octocrab
            .graphql(&json!({
                "query": PR_STATUS_QUERY,
                "variables": { "owner": self.owner, "repo": self.repo, "number": pr },
            }))
            .await?;

        let pr_node = response
            .pointer("/data/repository/pullRequest")
            .filter(|v| !v.is_null())
            .ok_or_else(|| GitHubError::Malformed(format!("PR #{pr} not found in response")))?;

        let state = match pr_node["state"].as_str().unwrap_or("OPEN") {
            "MERGED" => PrState::Merged,
            "CLOSED" => PrState::Closed,
            _ => PrState::Open,
        };
        let mergeable = match pr_node["mergeable"].as_str().unwrap_or("UNKNOWN") {
            "MERGEABLE" => Mergeable::Mergeable,
            "CONFLICTING" => Mergeable::Conflicting,
            _ => Mergeable::Unknown,
        };
        let merge_state_status =
            MergeStateStatus::from_api(pr_node["mergeStateStatus"].as_str().unwrap_or("UNKNOWN"));

        let rollup = pr_node.pointer("/commits/nodes/0/commit/statusCheckRollup");
        let (ci_state, check_details) = match rollup.filter(|v| !v.is_null()) {
            Some(rollup) => {
                let ci_state =
                    CiState::from_rollup(rollup["state"].as_str().unwrap_or_default());
                let checks = rollup
                    .pointer("/contexts/nodes")
                    .and_then(Value::as_array)
                    .map(|nodes| nodes.iter().map(parse_check_node).collect())
                    .unwrap_or_default();
                (ci_state, checks)
            }
            None => (CiState::Unknown, Vec::new()),
        };

        let (unresolved_threads, resolved_threads) = pr_node
            .pointer("/reviewThreads/nodes")
            .and_then(Value::as_array)
            .map(|nodes| {
                let unresolved = nodes
                    .iter()
                    .filter(|t| !t["isResolved"].as_bool().unwrap_or(true))
                    .count() as u64;
                let resolved = nodes
                    .iter()
                    .filter(|t| t["isResolved"].as_bool().unwrap_or(false))
                    .count() as u64;
                (unresolved, resolved)
            })
            .unwrap_or((0, 0));

        Ok(PrSnapshot {
            number: pr,
            state,
            ci_state,
            check_details,
            unresolved_threads,
            resolved_threads,
            mergeable,
            merge_state_status,
            base_branch: pr_node["baseRefName"].as_str().unwrap_or("main").to_string(),
            head_branch: pr_node["headRefName"].as_str().unwrap_or_default().to_string(),
        })
    }

    async fn get_required_status_checks(&self, branch: &str) -> Result<Vec<String>> {
        let route = format!(
            "/repos/{}/{}/branches/{}/protection/required_status_checks",
            self.owner, self.repo, branch
        );
        match self.octocrab.get::<Value, _, ()>(route, None).await {
            Ok(body) => Ok(body["contexts"]
                .as_array()
                .map(|contexts| {
                    contexts
                        .iter()
                        .filter_map(Value::as_str)
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default()),
            // Unprotected branches 404 here; that just means no checks are
            // required.
            Err(octocrab::Error::GitHub { source, .. }) if source.status_code == 404 => {
                debug!(branch, "branch has no protection rules");
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_unresolved_threads(&self, pr: u64) -> Result<Vec<ReviewThread>> {
        let response: Value = self
            .octocrab
            .graphql(&json!({
                "query": PR_STATUS_QUERY,
                "variables": { "owner": self.owner, "repo": self.repo, "number": pr },
            }))
            .await?;

        let threads = response
            .pointer("/data/repository/pullRequest/reviewThreads/nodes")
            .and_then(Value::as_array)
            .map(|nodes| {
                nodes
                    .iter()
                    .filter(|t| !t["isResolved"].as_bool().unwrap_or(true))
                    .map(parse_thread_node)
                    .collect()
            })
            .unwrap_or_default();

        Ok(threads)
    }

    async fn merge_pr(&self, pr: u64) -> Result<()> {
        let route = format!("/repos/{}/{}/pulls/{}/merge", self.owner, self.repo, pr);
        let body = json!({ "merge_method": "squash" });
        self.octocrab
            .put::<Value, _, _>(route, Some(&body))
            .await?;
        Ok(())
    }

    async fn get_pr_for_branch(&self, branch: &str) -> Result<Option<u64>> {
        let page = self
            .octocrab
            .pulls(&self.owner, &self.repo)
            .list()
            .state(octocrab::params::State::Open)
            .head(format!("{}:{}", self.owner, branch))
            .per_page(1)
            .send()
            .await?;
        Ok(page.items.first().map(|pr| pr.number))
    }

    async fn latest_run_id(&self, branch: &str) -> Result<Option<u64>> {
        let route = format!(
            "/repos/{}/{}/actions/runs?branch={}&per_page=1",
            self.owner, self.repo, branch
        );
        let body: Value = self.octocrab.get(route, None::<&()>).await?;
        Ok(body
            .pointer("/workflow_runs/0/id")
            .and_then(Value::as_u64))
    }

    async fn get_failed_jobs(&self, run_id: u64) -> Result<Vec<CiJob>> {
        let route = format!(
            "/repos/{}/{}/actions/runs/{}/jobs?per_page=100",
            self.owner, self.repo, run_id
        );
        let body: Value = self.octocrab.get(route, None::<&()>).await?;

        let jobs = body["jobs"]
            .as_array()
            .map(|jobs| {
                jobs.iter()
                    .map(|j| CiJob {
                        id: j["id"].as_u64().unwrap_or(0),
                        name: j["name"].as_str().unwrap_or("unknown").to_string(),
                        status: j["status"].as_str().unwrap_or("completed").to_string(),
                        conclusion: j["conclusion"].as_str().map(String::from),
                        run_id,
                    })
                    .filter(CiJob::is_failed)
                    .collect()
            })
            .unwrap_or_default();

        Ok(jobs)
    }

    async fn download_job_logs(&self, job_id: u64) -> Result<String> {
        let url = format!(
            "https://api.github.com/repos/{}/{}/actions/jobs/{}/logs",
            self.owner, self.repo, job_id
        );
        // octocrab's typed client wants JSON; this endpoint redirects to a
        // plain-text blob, so it goes through reqwest directly.
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .header("User-Agent", "taskmaster")
            .send()
            .await?
            .error_for_status()?;
        let logs = response.text().await?;
        if logs.trim().is_empty() {
            return Err(GitHubError::EmptyLogs(job_id));
        }
        Ok(logs)
    }

    async fn resolve_thread(&self, thread_id: &str, message: &str) -> Result<()> {
        let reply: Value = self
            .octocrab
            .graphql(&json!({
                "query": "mutation($threadId: ID!, $body: String!) { \
                    addPullRequestReviewThreadReply(input: {pullRequestReviewThreadId: $threadId, body: $body}) { \
                        comment { id } } }",
                "variables": { "threadId": thread_id, "body": message },
            }))
            .await?;
        if reply.pointer("/data/addPullRequestReviewThreadReply").is_none() {
            warn!(thread_id, "reply mutation returned no data");
        }

        let _: Value = self
            .octocrab
            .graphql(&json!({
                "query": "mutation($threadId: ID!) { \
                    resolveReviewThread(input: {threadId: $threadId}) { \
                        thread { isResolved } } }",
                "variables": { "threadId": thread_id },
            }))
            .await?;
        Ok(())
    }
}

fn parse_check_node(node: &Value) -> CheckDetail {
    match node["__typename"].as_str() {
        // StatusContext has a single state; mirror it into both fields so
        // pending detection works uniformly.
        Some("StatusContext") => {
            let state = node["state"].as_str().unwrap_or("PENDING").to_string();
            CheckDetail {
                name: node["context"].as_str().unwrap_or("unknown").to_string(),
                status: state.clone(),
                conclusion: Some(state),
            }
        }
        _ => CheckDetail {
            name: node["name"].as_str().unwrap_or("unknown").to_string(),
            status: node["status"].as_str().unwrap_or("QUEUED").to_string(),
            conclusion: node["conclusion"].as_str().map(String::from),
        },
    }
}

fn parse_thread_node(node: &Value) -> ReviewThread {
    let comments = node
        .pointer("/comments/nodes")
        .and_then(Value::as_array)
        .map(|nodes| {
            nodes
                .iter()
                .map(|c| ThreadComment {
                    author: c
                        .pointer("/author/login")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string(),
                    body: c["body"].as_str().unwrap_or_default().to_string(),
                    path: c["path"].as_str().map(String::from),
                    line: c["line"].as_u64(),
                })
                .collect()
        })
        .unwrap_or_default();

    ReviewThread {
        id: node["id"].as_str().unwrap_or_default().to_string(),
        is_resolved: node["isResolved"].as_bool().unwrap_or(false),
        comments,
    }
}
