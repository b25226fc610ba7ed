pub mod config;
pub mod lockfile;
pub mod mailbox;
pub mod plan;
pub mod state_store;
pub mod types;
