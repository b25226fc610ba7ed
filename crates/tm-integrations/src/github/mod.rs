pub mod ci_logs;
pub mod client;
pub mod ops;

pub use client::{GitHubClient, GitHubError, Result};
pub use ops::GitHubOps;
