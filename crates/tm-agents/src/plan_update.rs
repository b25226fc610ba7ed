//! Mailbox-driven plan amendments.
//!
//! Drained once per completed task, before the next task is picked. Pending
//! messages are merged into one change request and handed to a planning
//! call together with the current plan; the updated plan is persisted only
//! when it actually differs, so noise in the mailbox never burns extra
//! sessions.

use thiserror::Error;
use tracing::{debug, info};

use tm_core::mailbox::{merge_messages, Mailbox, MailboxError};
use tm_core::plan::plans_equivalent;
use tm_core::state_store::{StateError, StateStore};
use tm_harness::agent::WorkAgent;
use tm_harness::error::AgentError;

#[derive(Debug, Error)]
pub enum PlanUpdateError {
    #[error(transparent)]
    Mailbox(#[from] MailboxError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Agent(#[from] AgentError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Nothing pending.
    NoMessages,
    /// Messages consumed but the re-planned checklist came back equivalent.
    Unchanged { messages: usize },
    /// The stored plan was replaced.
    Updated { messages: usize },
}

/// Consume pending mailbox messages and fold them into the plan.
pub async fn drain_mailbox(
    agent: &dyn WorkAgent,
    store: &StateStore,
) -> Result<DrainOutcome, PlanUpdateError> {
    let mailbox = Mailbox::new(store.mailbox_path());
    let messages = mailbox.get_and_clear()?;
    if messages.is_empty() {
        return Ok(DrainOutcome::NoMessages);
    }
    info!(count = messages.len(), "draining mailbox into plan update");

    let change_request = merge_messages(&messages)?;
    let current_plan = store.load_plan()?;
    let goal = format!(
        "Update the existing task plan to incorporate the change requests below. \
         Keep completed tasks checked, keep existing task order where possible, \
         and only add or amend what the requests require.\n\n\
         ## Current Plan\n\n{current_plan}\n\n## Change Requests\n\n{change_request}"
    );

    let outcome = agent.run_planning_phase(&goal, &store.load_context()).await?;

    if plans_equivalent(&current_plan, &outcome.plan) {
        debug!("re-planned checklist is equivalent, keeping stored plan");
        return Ok(DrainOutcome::Unchanged {
            messages: messages.len(),
        });
    }

    store.save_plan(&outcome.plan)?;
    info!("plan updated from mailbox messages");
    Ok(DrainOutcome::Updated {
        messages: messages.len(),
    })
}
