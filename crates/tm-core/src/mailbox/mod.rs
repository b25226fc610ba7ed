//! Out-of-band mailbox for amending a running plan.
//!
//! Messages are queued by `tm mailbox send` (or a webhook) while the
//! orchestrator loops; the orchestrator drains the queue once per completed
//! task and hands the merged batch to a plan-update call.

mod merger;
mod storage;

pub use merger::merge_messages;
pub use storage::Mailbox;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const ANONYMOUS_SENDER: &str = "anonymous";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    /// Merging an empty batch is an error, never a silent no-op.
    #[error("cannot merge an empty message batch")]
    EmptyMerge,

    #[error("priority {0} out of range [0, 3]")]
    InvalidPriority(i64),

    #[error("mailbox I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("mailbox state is corrupted: {0}")]
    Corrupted(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MailboxError>;

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Message priority, ordinal 0-3. Higher drains first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn label(&self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Normal => "NORMAL",
            Priority::High => "HIGH",
            Priority::Urgent => "URGENT",
        }
    }

    pub fn from_ordinal(value: i64) -> Result<Self> {
        match value {
            0 => Ok(Priority::Low),
            1 => Ok(Priority::Normal),
            2 => Ok(Priority::High),
            3 => Ok(Priority::Urgent),
            other => Err(MailboxError::InvalidPriority(other)),
        }
    }
}

// ---------------------------------------------------------------------------
// MailboxMessage
// ---------------------------------------------------------------------------

/// One out-of-band instruction to amend the running plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailboxMessage {
    pub id: String,
    pub sender: String,
    pub content: String,
    pub priority: Priority,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl MailboxMessage {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender: ANONYMOUS_SENDER.to_string(),
            content: content.into(),
            priority: Priority::Normal,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn is_anonymous(&self) -> bool {
        self.sender == ANONYMOUS_SENDER
    }

    /// Short one-line preview for `tm mailbox list`.
    pub fn preview(&self, max_len: usize) -> String {
        let mut content = self.content.replace('\n', " ");
        if content.chars().count() > max_len {
            content = content.chars().take(max_len.saturating_sub(3)).collect();
            content.push_str("...");
        }
        format!("[{}] {} -- {}", self.priority.label(), self.sender, content)
    }
}

// ---------------------------------------------------------------------------
// MailboxState
// ---------------------------------------------------------------------------

/// The persisted mailbox document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MailboxState {
    #[serde(default)]
    pub messages: Vec<MailboxMessage>,
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
    /// Monotonic; survives message consumption.
    #[serde(default)]
    pub total_messages_received: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }

    #[test]
    fn priority_from_ordinal() {
        assert_eq!(Priority::from_ordinal(0).unwrap(), Priority::Low);
        assert_eq!(Priority::from_ordinal(3).unwrap(), Priority::Urgent);
        assert!(matches!(
            Priority::from_ordinal(4),
            Err(MailboxError::InvalidPriority(4))
        ));
        assert!(matches!(
            Priority::from_ordinal(-1),
            Err(MailboxError::InvalidPriority(-1))
        ));
    }

    #[test]
    fn minimal_message_defaults() {
        let msg = MailboxMessage::new("Test message");
        assert_eq!(msg.content, "Test message");
        assert_eq!(msg.sender, ANONYMOUS_SENDER);
        assert!(msg.is_anonymous());
        assert_eq!(msg.priority, Priority::Normal);
        assert_eq!(msg.id.len(), 36); // uuid format
        assert!(msg.metadata.is_empty());
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = MailboxMessage::new("one");
        let b = MailboxMessage::new("two");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn preview_truncates_long_content() {
        let msg = MailboxMessage::new("A".repeat(200)).with_sender("tester");
        let preview = msg.preview(40);
        assert!(preview.contains("tester"));
        assert!(preview.ends_with("..."));
        assert!(preview.len() < 80);
    }
}
