//! Turns a priority-sorted message batch into one change-request prompt.

use super::{MailboxError, MailboxMessage, Result};

/// Merge a batch of messages into a single natural-language change request.
///
/// A lone message is passed through verbatim, with sender attribution unless
/// the sender is the `anonymous` sentinel. Multiple messages become a
/// numbered, priority-labeled digest ending in an instruction to address all
/// requests, urgent first. The batch is expected to already be sorted
/// priority-descending (see [`super::Mailbox::get_messages`]).
pub fn merge_messages(messages: &[MailboxMessage]) -> Result<String> {
    match messages {
        [] => Err(MailboxError::EmptyMerge),
        [only] => {
            if only.is_anonymous() {
                Ok(only.content.clone())
            } else {
                Ok(format!("From {}:\n\n{}", only.sender, only.content))
            }
        }
        many => {
            let mut out = format!(
                "## Consolidated Change Requests ({} messages)\n\n",
                many.len()
            );
            for (i, msg) in many.iter().enumerate() {
                out.push_str(&format!("### Request {} [{}]", i + 1, msg.priority.label()));
                if !msg.is_anonymous() {
                    out.push_str(&format!(" (from {})", msg.sender));
                }
                out.push_str("\n\n");
                out.push_str(&msg.content);
                out.push_str("\n\n");
            }
            out.push_str(&format!(
                "Please address ALL {} change requests above, starting with the most urgent.\n",
                many.len()
            ));
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::Priority;

    #[test]
    fn empty_batch_is_an_error() {
        assert!(matches!(merge_messages(&[]), Err(MailboxError::EmptyMerge)));
    }

    #[test]
    fn single_anonymous_message_passes_through() {
        let msg = MailboxMessage::new("Simple change");
        let merged = merge_messages(&[msg]).unwrap();
        assert_eq!(merged, "Simple change");
        assert!(!merged.contains("anonymous"));
    }

    #[test]
    fn single_message_with_sender_gets_attribution() {
        let msg = MailboxMessage::new("Add unit tests").with_sender("senior-dev@company.com");
        let merged = merge_messages(&[msg]).unwrap();
        assert!(merged.contains("Add unit tests"));
        assert!(merged.contains("senior-dev@company.com"));
    }

    #[test]
    fn multiple_messages_build_digest() {
        let batch = vec![
            MailboxMessage::new("First change request"),
            MailboxMessage::new("Second change request"),
        ];
        let merged = merge_messages(&batch).unwrap();

        assert!(merged.contains("Consolidated Change Requests"));
        assert!(merged.contains("2 messages"));
        assert!(merged.contains("Request 1"));
        assert!(merged.contains("Request 2"));
        assert!(merged.contains("First change request"));
        assert!(merged.contains("Second change request"));
        assert!(merged.contains("Please address ALL 2 change requests"));
    }

    #[test]
    fn priority_labels_present_in_digest() {
        let batch = vec![
            MailboxMessage::new("Fix auth").with_priority(Priority::Urgent),
            MailboxMessage::new("Add tests").with_priority(Priority::Low),
        ];
        let merged = merge_messages(&batch).unwrap();
        assert!(merged.contains("[URGENT]"));
        assert!(merged.contains("[LOW]"));
    }

    #[test]
    fn urgent_content_listed_before_low() {
        // Batch arrives pre-sorted from Mailbox::get_messages.
        let batch = vec![
            MailboxMessage::new("Fix auth").with_priority(Priority::Urgent),
            MailboxMessage::new("Add tests").with_priority(Priority::Low),
        ];
        let merged = merge_messages(&batch).unwrap();
        let urgent_pos = merged.find("Fix auth").unwrap();
        let low_pos = merged.find("Add tests").unwrap();
        assert!(urgent_pos < low_pos);
    }
}
