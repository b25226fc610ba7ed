use octocrab::Octocrab;
use thiserror::Error;

use tm_core::config::GithubConfig;

#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("GitHub API error: {0}")]
    Api(#[from] octocrab::Error),

    #[error("missing GitHub token -- set GITHUB_TOKEN or put it in the config file")]
    MissingToken,

    #[error("missing repository coordinates -- set GITHUB_OWNER/GITHUB_REPO or [github] in the config file")]
    MissingRepo,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("environment variable error: {0}")]
    Env(#[from] std::env::VarError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("unexpected API response: {0}")]
    Malformed(String),

    #[error("no log content available for job {0}")]
    EmptyLogs(u64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GitHubError>;

#[derive(Debug, Clone)]
pub struct GitHubClient {
    pub(crate) octocrab: Octocrab,
    /// Raw-body endpoints (job logs) go through reqwest since they return
    /// plain text, not JSON.
    pub(crate) http: reqwest::Client,
    pub(crate) token: String,
    pub(crate) owner: String,
    pub(crate) repo: String,
}

impl GitHubClient {
    pub fn new(token: String, owner: String, repo: String) -> Result<Self> {
        if token.is_empty() {
            return Err(GitHubError::MissingToken);
        }
        let octocrab = Octocrab::builder().personal_token(token.clone()).build()?;
        Ok(Self {
            octocrab,
            http: reqwest::Client::new(),
            token,
            owner,
            repo,
        })
    }

    /// Build from `GITHUB_TOKEN` plus owner/repo from the environment,
    /// falling back to the `[github]` section of the config file.
    pub fn from_env_or_config(config: &GithubConfig) -> Result<Self> {
        let token = std::env::var("GITHUB_TOKEN")?;
        let owner = std::env::var("GITHUB_OWNER")
            .ok()
            .or_else(|| config.owner.clone())
            .ok_or(GitHubError::MissingRepo)?;
        let repo = std::env::var("GITHUB_REPO")
            .ok()
            .or_else(|| config.repo.clone())
            .ok_or(GitHubError::MissingRepo)?;
        Self::new(token, owner, repo)
    }

    pub fn inner(&self) -> &Octocrab {
        &self.octocrab
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }
}
