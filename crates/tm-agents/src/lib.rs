pub mod feedback;
pub mod orchestrator;
pub mod plan_update;

pub use orchestrator::{Orchestrator, RunOutcome};
