//! Conversation and message records.

use chrono::{DateTime, Utc};
use parley_core::{ConversationId, MessageId, MessageKind, MessageRole, OwnerId};
use serde::{Deserialize, Serialize};

/// Creation and update metadata carried by every record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Audit {
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}

impl Audit {
    /// Audit fields for a record created by `actor` at `at`.
    #[must_use]
    pub fn new(actor: &OwnerId, at: DateTime<Utc>) -> Self {
        Self {
            created_at: at,
            created_by: actor.to_string(),
            updated_at: at,
            updated_by: actor.to_string(),
        }
    }
}

/// A thread of messages owned by one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub owner: OwnerId,
    #[serde(flatten)]
    pub audit: Audit,
}

impl Conversation {
    /// When the conversation was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.audit.created_at
    }

    /// Returns true if `owner` owns this conversation.
    #[must_use]
    pub fn is_owned_by(&self, owner: &OwnerId) -> bool {
        &self.owner == owner
    }
}

/// One persisted turn.
///
/// Messages are append-only. Within a conversation they are totally ordered
/// by `created_at`, ties broken by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub role: MessageRole,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Text, serialized JSON, or base64 audio depending on `kind`.
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub audit: Option<Audit>,
}

/// A message not yet written to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub role: MessageRole,
    pub kind: MessageKind,
    pub content: String,
    /// Recorded in the audit fields.
    pub author: OwnerId,
}

impl NewMessage {
    /// Creates a message draft.
    #[must_use]
    pub fn new(
        conversation_id: ConversationId,
        role: MessageRole,
        kind: MessageKind,
        content: impl Into<String>,
        author: &OwnerId,
    ) -> Self {
        Self {
            conversation_id,
            role,
            kind,
            content: content.into(),
            author: author.clone(),
        }
    }

    /// A `user`/`text` draft.
    #[must_use]
    pub fn user_text(
        conversation_id: ConversationId,
        content: impl Into<String>,
        author: &OwnerId,
    ) -> Self {
        Self::new(conversation_id, MessageRole::User, MessageKind::Text, content, author)
    }

    /// Stamps the draft into a stored message.
    #[must_use]
    pub fn into_message(self, id: MessageId, at: DateTime<Utc>) -> Message {
        Message {
            id,
            conversation_id: self.conversation_id,
            role: self.role,
            kind: self.kind,
            content: self.content,
            created_at: at,
            audit: Some(Audit::new(&self.author, at)),
        }
    }
}
