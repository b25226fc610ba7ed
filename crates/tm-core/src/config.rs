//! Top-level configuration loaded from `~/.taskmaster/config.toml`.
//!
//! Never stores API keys or tokens; credentials are read from environment
//! variables at runtime (`GITHUB_TOKEN`, `GITHUB_OWNER`, `GITHUB_REPO`).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default, rename = "loop")]
    pub work_loop: LoopConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GithubConfig {
    /// Repository owner; `GITHUB_OWNER` overrides.
    #[serde(default)]
    pub owner: Option<String>,
    /// Repository name; `GITHUB_REPO` overrides.
    #[serde(default)]
    pub repo: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Executable invoked for agent sessions; receives the prompt on stdin.
    #[serde(default = "default_command")]
    pub command: String,
    /// Default model tier when a task carries no complexity tag.
    #[serde(default = "default_tier")]
    pub default_tier: String,
    /// Retries for transient agent-call failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_command() -> String {
    "claude".to_string()
}

fn default_tier() -> String {
    "smart".to_string()
}

fn default_max_retries() -> u32 {
    3
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            default_tier: default_tier(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Seconds between CI status polls.
    #[serde(default = "default_ci_poll")]
    pub ci_poll_interval_secs: u64,
    /// Seconds to wait for CI to start after a push.
    #[serde(default = "default_ci_start_wait")]
    pub ci_start_wait_secs: u64,
    /// Cap on CI polls within one waiting stage.
    #[serde(default = "default_max_ci_polls")]
    pub max_ci_polls: u32,
    /// Bounded attempts at producing a parseable plan.
    #[serde(default = "default_planning_attempts")]
    pub max_planning_attempts: u32,
}

fn default_ci_poll() -> u64 {
    10
}

fn default_ci_start_wait() -> u64 {
    30
}

fn default_max_ci_polls() -> u32 {
    180
}

fn default_planning_attempts() -> u32 {
    3
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            ci_poll_interval_secs: default_ci_poll(),
            ci_start_wait_secs: default_ci_start_wait(),
            max_ci_polls: default_max_ci_polls(),
            max_planning_attempts: default_planning_attempts(),
        }
    }
}

impl Config {
    /// Canonical config path: `~/.taskmaster/config.toml`.
    pub fn path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".taskmaster")
            .join("config.toml")
    }

    /// Load from the canonical path; a missing file yields defaults.
    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    pub fn load_from(path: &std::path::Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(data) => match toml::from_str(&data) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(error = %e, "invalid config.toml, falling back to defaults");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.work_loop.ci_poll_interval_secs, 10);
        assert_eq!(config.work_loop.ci_start_wait_secs, 30);
        assert_eq!(config.work_loop.max_planning_attempts, 3);
        assert_eq!(config.agent.max_retries, 3);
        assert_eq!(config.agent.default_tier, "smart");
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
[github]
owner = "acme"
repo = "widgets"

[loop]
ci_poll_interval_secs = 5
"#,
        )
        .unwrap();
        assert_eq!(config.github.owner.as_deref(), Some("acme"));
        assert_eq!(config.work_loop.ci_poll_interval_secs, 5);
        assert_eq!(config.work_loop.max_ci_polls, 180);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load_from(std::path::Path::new("/nonexistent/config.toml"));
        assert_eq!(config.agent.default_tier, "smart");
    }
}
