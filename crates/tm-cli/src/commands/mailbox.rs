use tm_core::mailbox::{Mailbox, MailboxMessage, Priority};

use super::{store, EXIT_OK};

pub fn send(content: String, sender: String, priority: i64) -> anyhow::Result<i32> {
    if content.trim().is_empty() {
        anyhow::bail!("message content must not be empty");
    }
    let priority = Priority::from_ordinal(priority)?;

    let store = store()?;
    let mailbox = Mailbox::new(store.mailbox_path());
    let id = mailbox.add_message(
        MailboxMessage::new(content)
            .with_sender(sender)
            .with_priority(priority),
    )?;
    println!("Queued message {id} ({}).", priority.label());
    Ok(EXIT_OK)
}

pub fn list() -> anyhow::Result<i32> {
    let store = store()?;
    let mailbox = Mailbox::new(store.mailbox_path());
    let messages = mailbox.get_messages()?;
    print!("{}", render_list(&messages));
    Ok(EXIT_OK)
}

/// One row per message. `preview` already carries the priority label and
/// sender, so the row is the preview alone.
fn render_list(messages: &[MailboxMessage]) -> String {
    if messages.is_empty() {
        return "Mailbox is empty.\n".to_string();
    }
    let mut out = format!("{} pending message(s):\n", messages.len());
    for message in messages {
        out.push_str(&format!("  {}\n", message.preview(80)));
    }
    out
}

pub fn clear() -> anyhow::Result<i32> {
    let store = store()?;
    let mailbox = Mailbox::new(store.mailbox_path());
    let count = mailbox.clear()?;
    println!("Cleared {count} message(s).");
    Ok(EXIT_OK)
}
