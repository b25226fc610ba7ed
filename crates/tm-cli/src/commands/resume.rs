use tm_agents::Orchestrator;
use tm_core::config::Config;
use tm_core::mailbox::{Mailbox, MailboxMessage};
use tm_core::types::TaskStatus;

use super::{cancel_token, collaborators, store};

pub async fn run(message: Option<String>, force: bool) -> anyhow::Result<i32> {
    let store = store()?;
    let mut state = store.load_state()?;

    if store.is_session_active() {
        anyhow::bail!("another session is already running against this state directory");
    }

    if let Some(content) = message {
        let mailbox = Mailbox::new(store.mailbox_path());
        mailbox.add_message(MailboxMessage::new(content))?;
        println!("Queued change request into the mailbox.");
    }

    match state.status {
        TaskStatus::Paused => {
            // Re-enter the sub-stage recorded at pause time.
            state.status = TaskStatus::Working;
        }
        TaskStatus::Blocked => {
            if !force {
                anyhow::bail!(
                    "run is blocked; inspect progress.md and rerun with --force to continue"
                );
            }
            state.status = TaskStatus::Working;
        }
        TaskStatus::Success | TaskStatus::Failed => {
            anyhow::bail!("run already finished ({}); use `tm clean` to start over", state.status);
        }
        TaskStatus::Planning | TaskStatus::Working => {}
    }

    store.acquire_session_lock()?;
    store.save_state(&state)?;

    let config = Config::load();
    let (agent, github) = collaborators(&config)?;
    let orchestrator = Orchestrator::new(store, agent, github, config.work_loop, cancel_token());
    let outcome = orchestrator.run().await?;
    super::start::outcome_to_exit(outcome)
}
