pub mod clean;
pub mod comments;
pub mod fix_pr;
pub mod mailbox;
pub mod resume;
pub mod start;
pub mod status;

use std::sync::Arc;

use regex::Regex;

use crate::agent_adapter::ProcessAgent;
use tm_core::config::Config;
use tm_core::state_store::StateStore;
use tm_core::types::ModelTier;
use tm_harness::cancel::CancelToken;
use tm_integrations::github::GitHubClient;

// Exit codes: 0 success, 1 failed/blocked/error, 2 paused, 130 interrupt.
pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_PAUSED: i32 = 2;
pub const EXIT_INTERRUPTED: i32 = 130;

/// State store rooted at the current working directory.
pub fn store() -> anyhow::Result<StateStore> {
    let cwd = std::env::current_dir()?;
    Ok(StateStore::for_working_dir(&cwd))
}

/// Agent and GitHub collaborators built from config plus environment.
pub fn collaborators(config: &Config) -> anyhow::Result<(Arc<ProcessAgent>, Arc<GitHubClient>)> {
    let default_tier: ModelTier = config
        .agent
        .default_tier
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    let agent = Arc::new(ProcessAgent::new(config.agent.command.clone(), default_tier));
    let github = Arc::new(GitHubClient::from_env_or_config(&config.github)?);
    Ok((agent, github))
}

/// Token wired to Ctrl-C for interruptible waits.
pub fn cancel_token() -> CancelToken {
    let token = CancelToken::new();
    token.listen_for_ctrl_c();
    token
}

/// Accepts a plain number, `#n`, or a GitHub PR URL.
pub fn parse_pr_input(input: &str) -> Option<u64> {
    if let Ok(n) = input.parse::<u64>() {
        return Some(n);
    }
    let url_re = Regex::new(r"/pull/(\d+)").ok()?;
    if let Some(caps) = url_re.captures(input) {
        return caps[1].parse().ok();
    }
    if let Some(rest) = input.strip_prefix('#') {
        return rest.parse().ok();
    }
    None
}
