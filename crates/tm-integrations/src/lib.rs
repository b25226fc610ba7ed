pub mod github;
pub mod types;
