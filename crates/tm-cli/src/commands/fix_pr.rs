use std::collections::BTreeSet;
use std::time::Duration;

use tm_agents::feedback;
use tm_core::config::Config;
use tm_core::types::ModelTier;
use tm_harness::agent::{WorkAgent, WorkRequest};
use tm_integrations::github::ops::current_branch;
use tm_integrations::github::GitHubOps;
use tm_integrations::types::{Mergeable, PrSnapshot, PrState};

use super::{cancel_token, collaborators, parse_pr_input, store, EXIT_FAILED, EXIT_INTERRUPTED, EXIT_OK};

pub async fn run(pr: Option<String>, max_iterations: u32, no_merge: bool) -> anyhow::Result<i32> {
    let config = Config::load();
    let store = store()?;
    let (agent, github) = collaborators(&config)?;
    let cancel = cancel_token();

    let pr_number = match pr {
        Some(input) => parse_pr_input(&input)
            .ok_or_else(|| anyhow::anyhow!("invalid PR input: {input:?} (expected a number, #n, or a PR URL)"))?,
        None => {
            let branch = current_branch()
                .await
                .ok_or_else(|| anyhow::anyhow!("not on a git branch and no PR given"))?;
            github
                .get_pr_for_branch(&branch)
                .await?
                .ok_or_else(|| anyhow::anyhow!("no open PR found for branch {branch}"))?
        }
    };

    println!("Fixing PR #{pr_number} (up to {max_iterations} iteration(s))...");

    for iteration in 1..=max_iterations {
        if cancel.is_cancelled() {
            return Ok(EXIT_INTERRUPTED);
        }
        let snapshot = wait_for_ci(github.as_ref(), &cancel, &config, pr_number).await?;
        let Some(snapshot) = snapshot else {
            return Ok(EXIT_INTERRUPTED);
        };

        let ci_failed = snapshot.ci_state.is_failure();
        let has_comments = snapshot.unresolved_threads > 0;
        let has_conflicts = snapshot.mergeable == Mergeable::Conflicting;

        if !ci_failed && !has_comments && !has_conflicts {
            println!("CI passed and all comments resolved.");
            if no_merge {
                return Ok(EXIT_OK);
            }
            return merge(github.as_ref(), &cancel, &config, pr_number).await;
        }

        println!(
            "Iteration {iteration}: ci_failed={ci_failed}, comments={}, conflicts={has_conflicts}",
            snapshot.unresolved_threads
        );

        let captured = feedback::capture_feedback(github.as_ref(), &store, &snapshot).await?;
        let Some(task_description) = feedback::build_fix_task(pr_number, &captured, has_conflicts)
        else {
            if captured.ci_failed_without_logs {
                println!("CI failed but no logs could be retrieved; inspect the workflow run on GitHub.");
            } else {
                println!("Nothing actionable; unresolved threads may need manual review on GitHub.");
            }
            return Ok(if ci_failed { EXIT_FAILED } else { EXIT_OK });
        };

        let session = agent
            .run_work_session(WorkRequest {
                task_description,
                context: String::new(),
                model_override: Some(ModelTier::Smart),
                required_branch: Some(snapshot.head_branch.clone()),
            })
            .await?;
        tracing::debug!(chars = session.transcript.len(), "fix session finished");

        if captured.has_comments {
            feedback::post_comment_replies(github.as_ref(), &store, pr_number).await?;
        }
    }

    println!("Reached max iterations without a green PR.");
    Ok(EXIT_FAILED)
}

/// Poll until every required check has a terminal status.
async fn wait_for_ci(
    github: &dyn GitHubOps,
    cancel: &tm_harness::cancel::CancelToken,
    config: &Config,
    pr: u64,
) -> anyhow::Result<Option<PrSnapshot>> {
    let first = github.get_pr_status(pr).await?;
    let required: BTreeSet<String> = github
        .get_required_status_checks(&first.base_branch)
        .await?
        .into_iter()
        .collect();

    let mut polls = 0u32;
    loop {
        let snapshot = github.get_pr_status(pr).await?;
        let reported: BTreeSet<String> =
            snapshot.check_details.iter().map(|c| c.name.clone()).collect();
        let missing = required.difference(&reported).count();
        let pending = snapshot.pending_check_names();

        if missing == 0 && pending.is_empty() {
            return Ok(Some(snapshot));
        }

        polls += 1;
        if polls >= config.work_loop.max_ci_polls {
            anyhow::bail!("CI did not settle after {polls} polls");
        }
        println!(
            "Waiting for {} check(s)... ({} passed, {} failed, {} skipped)",
            missing + pending.len(),
            snapshot.checks_passed(),
            snapshot.checks_failed(),
            snapshot.checks_skipped()
        );
        if cancel
            .sleep(Duration::from_secs(config.work_loop.ci_poll_interval_secs))
            .await
            .is_err()
        {
            return Ok(None);
        }
    }
}

/// Merge once GitHub reports a verdict; UNKNOWN is re-polled a bounded
/// number of times.
async fn merge(
    github: &dyn GitHubOps,
    cancel: &tm_harness::cancel::CancelToken,
    config: &Config,
    pr: u64,
) -> anyhow::Result<i32> {
    const MAX_MERGE_ATTEMPTS: u32 = 10;

    for attempt in 1..=MAX_MERGE_ATTEMPTS {
        let snapshot = github.get_pr_status(pr).await?;
        if snapshot.state == PrState::Merged {
            println!("PR #{pr} already merged.");
            return Ok(EXIT_OK);
        }
        match snapshot.mergeable {
            Mergeable::Mergeable => {
                github.merge_pr(pr).await?;
                println!("Merged PR #{pr}.");
                return Ok(EXIT_OK);
            }
            Mergeable::Conflicting => {
                println!(
                    "PR #{pr} has merge conflicts (merge state {}); manual resolution required.",
                    snapshot.merge_state_status
                );
                return Ok(EXIT_FAILED);
            }
            Mergeable::Unknown => {
                println!("Waiting for mergeable status... ({attempt}/{MAX_MERGE_ATTEMPTS})");
                if cancel
                    .sleep(Duration::from_secs(config.work_loop.ci_poll_interval_secs))
                    .await
                    .is_err()
                {
                    return Ok(EXIT_INTERRUPTED);
                }
            }
        }
    }
    println!("Mergeable status still unknown after {MAX_MERGE_ATTEMPTS} attempts.");
    Ok(EXIT_FAILED)
}
