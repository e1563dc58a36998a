//! History Projector.
//!
//! Turns a stored message log into the context a generation call expects.

use crate::message::Message;
use parley_ai::HistoryEntry;
use parley_core::MessageId;

/// Projects `messages` into history, stopping at the active prompt.
///
/// The entry with id `active` and everything after it are excluded, so a
/// concurrent turn's messages never leak into this turn's context. If
/// `active` is not in the log, every message is projected. Order is
/// preserved and content types pass through unchanged.
#[must_use]
pub fn project(messages: &[Message], active: MessageId) -> Vec<HistoryEntry> {
    messages
        .iter()
        .take_while(|message| message.id != active)
        .map(|message| HistoryEntry::new(message.role, message.kind, message.content.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::NewMessage;
    use chrono::Utc;
    use parley_core::{ConversationId, MessageKind, MessageRole, OwnerId};

    fn log(turns: &[(MessageRole, MessageKind, &str)]) -> Vec<Message> {
        let owner = OwnerId::new("u1").expect("valid owner");
        let conversation_id = ConversationId::new();
        turns
            .iter()
            .map(|(role, kind, content)| {
                NewMessage::new(conversation_id, *role, *kind, *content, &owner)
                    .into_message(MessageId::new(), Utc::now())
            })
            .collect()
    }

    #[test]
    fn first_turn_has_empty_history() {
        let messages = log(&[(MessageRole::User, MessageKind::Text, "Hello")]);
        assert!(project(&messages, messages[0].id).is_empty());
    }

    #[test]
    fn empty_log_projects_to_empty_history() {
        assert!(project(&[], MessageId::new()).is_empty());
    }

    #[test]
    fn nth_message_sees_all_prior_entries() {
        let messages = log(&[
            (MessageRole::User, MessageKind::Text, "Hi"),
            (MessageRole::Assistant, MessageKind::Text, "Hello"),
            (MessageRole::User, MessageKind::Text, "Recipe?"),
            (MessageRole::Assistant, MessageKind::Json, r#"{"title":"Soup"}"#),
            (MessageRole::User, MessageKind::Text, "Thanks"),
        ]);
        let active = messages[4].id;

        let history = project(&messages, active);

        assert_eq!(history.len(), messages.len() - 1);
        assert_eq!(history[0], HistoryEntry::text(MessageRole::User, "Hi"));
        assert_eq!(
            history[3],
            HistoryEntry::new(MessageRole::Assistant, MessageKind::Json, r#"{"title":"Soup"}"#)
        );
    }

    #[test]
    fn messages_after_active_prompt_are_excluded() {
        let messages = log(&[
            (MessageRole::User, MessageKind::Text, "Mine"),
            (MessageRole::User, MessageKind::Text, "Racing turn"),
        ]);

        let history = project(&messages, messages[0].id);
        assert!(history.is_empty());
    }

    #[test]
    fn unknown_active_id_projects_everything() {
        let messages = log(&[
            (MessageRole::System, MessageKind::Text, "Be kind."),
            (MessageRole::User, MessageKind::Audio, "UklGRg=="),
        ]);

        let history = project(&messages, MessageId::new());
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].kind, MessageKind::Audio);
    }
}
