use tm_agents::{Orchestrator, RunOutcome};
use tm_core::config::Config;
use tm_core::types::{ModelTier, TaskOptions};

use super::{
    cancel_token, collaborators, store, EXIT_FAILED, EXIT_INTERRUPTED, EXIT_OK, EXIT_PAUSED,
};

pub async fn run(
    goal: String,
    model: Option<String>,
    no_auto_merge: bool,
    max_sessions: u64,
    pause_on_pr: bool,
) -> anyhow::Result<i32> {
    if goal.trim().is_empty() {
        anyhow::bail!("goal must not be empty");
    }

    let config = Config::load();
    let store = store()?;
    let model: ModelTier = match model {
        Some(m) => m.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        None => config
            .agent
            .default_tier
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?,
    };

    let options = TaskOptions {
        auto_merge: !no_auto_merge,
        max_sessions,
        pause_on_pr,
        webhook_url: None,
    };
    let state = store.initialize(&goal, model, options)?;
    println!("Started run {} for goal: {goal}", state.run_id);

    let (agent, github) = collaborators(&config)?;
    let orchestrator = Orchestrator::new(store, agent, github, config.work_loop, cancel_token());
    outcome_to_exit(orchestrator.run().await?)
}

pub fn outcome_to_exit(outcome: RunOutcome) -> anyhow::Result<i32> {
    Ok(match outcome {
        RunOutcome::Success => {
            println!("Goal complete.");
            EXIT_OK
        }
        RunOutcome::Failed => {
            println!("Run failed. See progress.md and the run log for details.");
            EXIT_FAILED
        }
        RunOutcome::Blocked => {
            println!("Run blocked. Inspect progress.md, then `tm resume --force` to continue.");
            EXIT_FAILED
        }
        RunOutcome::Paused => {
            println!("Run paused. `tm resume` to continue.");
            EXIT_PAUSED
        }
        RunOutcome::Interrupted => {
            println!("Interrupted. State saved; `tm resume` to continue.");
            EXIT_INTERRUPTED
        }
    })
}
