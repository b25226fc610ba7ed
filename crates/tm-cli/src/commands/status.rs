use tm_core::mailbox::Mailbox;
use tm_core::plan;

use super::{store, EXIT_OK};

/// Read-only: never takes the session lock.
pub fn run() -> anyhow::Result<i32> {
    let store = store()?;
    let state = store.load_state()?;

    println!("Run {}", state.run_id);
    println!("  status:   {} ({})", state.status, state.workflow_stage);
    println!("  model:    {}", state.model);
    println!(
        "  sessions: {}/{}",
        state.session_count, state.options.max_sessions
    );
    if let Some(pr) = state.current_pr {
        println!("  PR:       #{pr}");
    }

    if let Ok(plan_md) = store.load_plan() {
        let parsed = plan::parse_plan(&plan_md);
        println!(
            "  tasks:    {}/{} complete (cursor at {})",
            parsed.completed_tasks(),
            parsed.total_tasks(),
            state.current_task_index
        );
        for line in parsed.summarize_groups().lines() {
            println!("    {line}");
        }
    }

    let pending = Mailbox::new(store.mailbox_path()).count()?;
    if pending > 0 {
        println!("  mailbox:  {pending} pending message(s)");
    }
    if store.is_session_active() {
        println!("  session:  active");
    }
    Ok(EXIT_OK)
}
