use tm_core::config::Config;
use tm_integrations::github::ops::current_branch;
use tm_integrations::github::GitHubOps;
use tm_integrations::types::ReviewThread;

use super::{collaborators, parse_pr_input, store, EXIT_OK};

/// Read-only: never takes the session lock.
pub async fn run(pr: Option<String>) -> anyhow::Result<i32> {
    let config = Config::load();
    let (_, github) = collaborators(&config)?;

    let pr_number = match pr {
        Some(input) => parse_pr_input(&input)
            .ok_or_else(|| anyhow::anyhow!("invalid PR input: {input:?} (expected a number, #n, or a PR URL)"))?,
        None => match resolve_current_pr() {
            Some(pr) => pr,
            None => {
                let branch = current_branch()
                    .await
                    .ok_or_else(|| anyhow::anyhow!("not on a git branch and no PR given"))?;
                github
                    .get_pr_for_branch(&branch)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("no open PR found for branch {branch}"))?
            }
        },
    };

    let threads = github.get_unresolved_threads(pr_number).await?;
    print!("{}", render_threads(pr_number, &threads));
    Ok(EXIT_OK)
}

/// PR recorded in the run state, if a run exists. State load failures are
/// treated as "no PR"; this command must work without a run.
fn resolve_current_pr() -> Option<u64> {
    let store = store().ok()?;
    store.load_state().ok()?.current_pr
}

fn render_threads(pr: u64, threads: &[ReviewThread]) -> String {
    let mut out = format!("PR #{pr} review comments\n");
    if threads.is_empty() {
        out.push_str("No unresolved review threads.\n");
        return out;
    }
    out.push_str(&format!("{} unresolved thread(s):\n", threads.len()));
    for thread in threads {
        out.push('\n');
        for comment in &thread.comments {
            let location = match (&comment.path, comment.line) {
                (Some(path), Some(line)) => format!("{path}:{line}"),
                (Some(path), None) => path.clone(),
                _ => "general".to_string(),
            };
            out.push_str(&format!("  {} ({location}):\n", comment.author));
            for line in comment.body.lines() {
                out.push_str(&format!("    {line}\n"));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tm_integrations::types::ThreadComment;

    #[test]
    fn empty_thread_list_renders_placeholder() {
        let out = render_threads(7, &[]);
        assert!(out.contains("PR #7"));
        assert!(out.contains("No unresolved review threads."));
    }

    #[test]
    fn threads_render_with_location_and_body() {
        let threads = vec![ReviewThread {
            id: "RT_1".into(),
            is_resolved: false,
            comments: vec![ThreadComment {
                author: "reviewer1".into(),
                body: "Rename this\nplease".into(),
                path: Some("src/lib.rs".into()),
                line: Some(12),
            }],
        }];
        let out = render_threads(7, &threads);
        assert!(out.contains("1 unresolved thread(s)"));
        assert!(out.contains("reviewer1 (src/lib.rs:12):"));
        assert!(out.contains("    Rename this\n    please\n"));
    }
}
