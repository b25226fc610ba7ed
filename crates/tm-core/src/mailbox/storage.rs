//! JSON-file mailbox with atomic updates.
//!
//! The whole queue is a single document rewritten with write-temp-then-rename
//! on every mutation, so a reader never observes a half-written file and
//! `get_and_clear` never loses a message between "read" and "clear".

use std::cmp::Reverse;
use std::path::PathBuf;

use chrono::Utc;

use super::{MailboxMessage, MailboxState, Priority, Result};
use crate::state_store::atomic_write;

pub struct Mailbox {
    path: PathBuf,
}

impl Mailbox {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn load(&self) -> Result<MailboxState> {
        match std::fs::read_to_string(&self.path) {
            Ok(data) if data.trim().is_empty() => Ok(MailboxState::default()),
            Ok(data) => Ok(serde_json::from_str(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(MailboxState::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, state: &MailboxState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(state)?;
        atomic_write(&self.path, json.as_bytes())?;
        Ok(())
    }

    /// Queue a message; returns its id.
    pub fn add_message(&self, message: MailboxMessage) -> Result<String> {
        let mut state = self.load()?;
        let id = message.id.clone();
        tracing::debug!(id = %id, priority = message.priority.label(), "mailbox message queued");
        state.messages.push(message);
        state.total_messages_received += 1;
        self.store(&state)?;
        Ok(id)
    }

    /// All queued messages, priority descending then timestamp ascending.
    /// Non-destructive.
    pub fn get_messages(&self) -> Result<Vec<MailboxMessage>> {
        let state = self.load()?;
        Ok(sorted(state.messages))
    }

    /// Atomically read and empty the queue. After this call `get_messages()`
    /// returns empty and `count()` is 0; `total_messages_received` is kept.
    pub fn get_and_clear(&self) -> Result<Vec<MailboxMessage>> {
        let mut state = self.load()?;
        let drained = std::mem::take(&mut state.messages);
        state.last_checked = Some(Utc::now());
        self.store(&state)?;
        Ok(sorted(drained))
    }

    /// Empty the queue, returning how many messages were dropped.
    pub fn clear(&self) -> Result<usize> {
        let mut state = self.load()?;
        let count = state.messages.len();
        state.messages.clear();
        self.store(&state)?;
        Ok(count)
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.load()?.messages.len())
    }

    pub fn total_received(&self) -> Result<u64> {
        Ok(self.load()?.total_messages_received)
    }

    /// Highest priority among queued messages, if any.
    pub fn peek_priority(&self) -> Result<Option<Priority>> {
        Ok(self.load()?.messages.iter().map(|m| m.priority).max())
    }
}

fn sorted(mut messages: Vec<MailboxMessage>) -> Vec<MailboxMessage> {
    // Stable sort: equal (priority, timestamp) keys keep insertion order.
    messages.sort_by_key(|m| (Reverse(m.priority), m.timestamp));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_mailbox() -> (Mailbox, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (Mailbox::new(dir.path().join("mailbox.json")), dir)
    }

    #[test]
    fn add_and_get_preserves_messages() {
        let (mailbox, _dir) = temp_mailbox();
        let id = mailbox.add_message(MailboxMessage::new("hello")).unwrap();

        let messages = mailbox.get_messages().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, id);
        // Non-destructive.
        assert_eq!(mailbox.count().unwrap(), 1);
    }

    #[test]
    fn ordering_priority_desc_then_insertion() {
        let (mailbox, _dir) = temp_mailbox();
        mailbox
            .add_message(MailboxMessage::new("low").with_priority(Priority::Low))
            .unwrap();
        mailbox
            .add_message(MailboxMessage::new("urgent").with_priority(Priority::Urgent))
            .unwrap();
        mailbox
            .add_message(MailboxMessage::new("normal-1"))
            .unwrap();
        mailbox
            .add_message(MailboxMessage::new("normal-2"))
            .unwrap();

        let contents: Vec<String> = mailbox
            .get_messages()
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["urgent", "normal-1", "normal-2", "low"]);
    }

    #[test]
    fn get_and_clear_is_atomic() {
        let (mailbox, _dir) = temp_mailbox();
        mailbox.add_message(MailboxMessage::new("a")).unwrap();
        mailbox.add_message(MailboxMessage::new("b")).unwrap();

        let drained = mailbox.get_and_clear().unwrap();
        assert_eq!(drained.len(), 2);
        assert!(mailbox.get_messages().unwrap().is_empty());
        assert_eq!(mailbox.count().unwrap(), 0);
    }

    #[test]
    fn total_received_is_monotonic() {
        let (mailbox, _dir) = temp_mailbox();
        mailbox.add_message(MailboxMessage::new("a")).unwrap();
        mailbox.add_message(MailboxMessage::new("b")).unwrap();
        assert_eq!(mailbox.total_received().unwrap(), 2);

        mailbox.get_and_clear().unwrap();
        assert_eq!(mailbox.total_received().unwrap(), 2);

        mailbox.add_message(MailboxMessage::new("c")).unwrap();
        assert_eq!(mailbox.total_received().unwrap(), 3);

        mailbox.clear().unwrap();
        assert_eq!(mailbox.total_received().unwrap(), 3);
    }

    #[test]
    fn clear_reports_count() {
        let (mailbox, _dir) = temp_mailbox();
        assert_eq!(mailbox.clear().unwrap(), 0);
        mailbox.add_message(MailboxMessage::new("a")).unwrap();
        mailbox.add_message(MailboxMessage::new("b")).unwrap();
        assert_eq!(mailbox.clear().unwrap(), 2);
    }

    #[test]
    fn missing_file_is_empty_mailbox() {
        let (mailbox, _dir) = temp_mailbox();
        assert_eq!(mailbox.count().unwrap(), 0);
        assert!(mailbox.get_messages().unwrap().is_empty());
        assert!(mailbox.peek_priority().unwrap().is_none());
    }

    #[test]
    fn peek_priority_returns_highest() {
        let (mailbox, _dir) = temp_mailbox();
        mailbox
            .add_message(MailboxMessage::new("a").with_priority(Priority::Low))
            .unwrap();
        mailbox
            .add_message(MailboxMessage::new("b").with_priority(Priority::High))
            .unwrap();
        assert_eq!(mailbox.peek_priority().unwrap(), Some(Priority::High));
    }
}
