//! PostgreSQL store adapter for conversations and messages.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_conversation::{Audit, Conversation, ConversationStore, Message, NewMessage, StoreError};
use parley_core::{ConversationId, MessageId, OwnerId};
use rootcause::Report;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use tracing::instrument;

/// Row type for conversation queries.
#[derive(FromRow)]
struct ConversationRow {
    id: String,
    owner: String,
    created_at: DateTime<Utc>,
    created_by: String,
    updated_at: DateTime<Utc>,
    updated_by: String,
}

impl ConversationRow {
    fn try_into_conversation(self) -> Result<Conversation, StoreError> {
        let id = ConversationId::from_str(&self.id)
            .map_err(|e| invalid("conversation id", &self.id, e))?;
        let owner = OwnerId::new(&self.owner).map_err(|e| invalid("owner", &self.owner, e))?;
        Ok(Conversation {
            id,
            owner,
            audit: Audit {
                created_at: self.created_at,
                created_by: self.created_by,
                updated_at: self.updated_at,
                updated_by: self.updated_by,
            },
        })
    }
}

/// Row type for message queries.
#[derive(FromRow)]
struct MessageRow {
    id: String,
    conversation_id: String,
    role: String,
    kind: String,
    content: String,
    created_at: DateTime<Utc>,
    created_by: String,
    updated_at: DateTime<Utc>,
    updated_by: String,
}

impl MessageRow {
    fn try_into_message(self) -> Result<Message, StoreError> {
        let id = MessageId::from_str(&self.id).map_err(|e| invalid("message id", &self.id, e))?;
        let conversation_id = ConversationId::from_str(&self.conversation_id)
            .map_err(|e| invalid("conversation id", &self.conversation_id, e))?;
        let role = self.role.parse().map_err(|e| invalid("role", &self.role, e))?;
        let kind = self.kind.parse().map_err(|e| invalid("kind", &self.kind, e))?;
        Ok(Message {
            id,
            conversation_id,
            role,
            kind,
            content: self.content,
            created_at: self.created_at,
            audit: Some(Audit {
                created_at: self.created_at,
                created_by: self.created_by,
                updated_at: self.updated_at,
                updated_by: self.updated_by,
            }),
        })
    }
}

fn invalid(field: &str, value: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::InvalidRecord {
        reason: format!("invalid {field} '{value}': {e}"),
    }
}

fn query_failed(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            StoreError::Unavailable {
                reason: e.to_string(),
            }
        }
        other => StoreError::QueryFailed {
            reason: other.to_string(),
        },
    }
}

/// Store adapter over the `conversations` and `messages` tables.
#[derive(Debug, Clone)]
pub struct PgConversationStore {
    pool: PgPool,
}

impl PgConversationStore {
    /// Creates a new store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    #[instrument(skip_all, fields(owner = %owner))]
    async fn insert_conversation(
        &self,
        owner: &OwnerId,
    ) -> Result<Conversation, Report<StoreError>> {
        let conversation = Conversation {
            id: ConversationId::new(),
            owner: owner.clone(),
            audit: Audit::new(owner, Utc::now()),
        };

        sqlx::query(
            r#"
            INSERT INTO conversations (id, owner, created_at, created_by, updated_at, updated_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(conversation.id.to_string())
        .bind(conversation.owner.as_str())
        .bind(conversation.audit.created_at)
        .bind(&conversation.audit.created_by)
        .bind(conversation.audit.updated_at)
        .bind(&conversation.audit.updated_by)
        .execute(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(conversation)
    }

    #[instrument(skip_all, fields(conversation = %id))]
    async fn get_conversation(
        &self,
        id: ConversationId,
    ) -> Result<Option<Conversation>, Report<StoreError>> {
        let row: Option<ConversationRow> = sqlx::query_as(
            r#"
            SELECT id, owner, created_at, created_by, updated_at, updated_by
            FROM conversations
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(query_failed)?;

        match row {
            Some(r) => Ok(Some(r.try_into_conversation()?)),
            None => Ok(None),
        }
    }

    #[instrument(skip_all, fields(owner = %owner))]
    async fn list_conversations(
        &self,
        owner: &OwnerId,
    ) -> Result<Vec<Conversation>, Report<StoreError>> {
        let rows: Vec<ConversationRow> = sqlx::query_as(
            r#"
            SELECT id, owner, created_at, created_by, updated_at, updated_by
            FROM conversations
            WHERE owner = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(owner.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed)?;

        let conversations = rows
            .into_iter()
            .map(ConversationRow::try_into_conversation)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(conversations)
    }

    /// The stamp is clamped to the conversation's latest message within the
    /// single insert statement. Clamped rows tie on `created_at`, so reads
    /// order ties by the database-assigned `seq`, never by the id.
    #[instrument(skip_all, fields(conversation = %message.conversation_id, role = %message.role))]
    async fn insert_message(&self, message: NewMessage) -> Result<Message, Report<StoreError>> {
        let row: MessageRow = sqlx::query_as(
            r#"
            INSERT INTO messages
                (id, conversation_id, role, kind, content, created_at, created_by, updated_at, updated_by)
            SELECT $1, $2, $3, $4, $5, stamp.at, $7, stamp.at, $7
            FROM (
                SELECT GREATEST($6::timestamptz, COALESCE(MAX(created_at), $6::timestamptz)) AS at
                FROM messages
                WHERE conversation_id = $2
            ) AS stamp
            RETURNING id, conversation_id, role, kind, content, created_at, created_by, updated_at, updated_by
            "#,
        )
        .bind(MessageId::new().to_string())
        .bind(message.conversation_id.to_string())
        .bind(message.role.as_str())
        .bind(message.kind.as_str())
        .bind(&message.content)
        .bind(Utc::now())
        .bind(message.author.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(row.try_into_message()?)
    }

    #[instrument(skip_all, fields(conversation = %conversation_id))]
    async fn get_messages(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, Report<StoreError>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT id, conversation_id, role, kind, content, created_at, created_by, updated_at, updated_by
            FROM messages
            WHERE conversation_id = $1
            ORDER BY created_at ASC, seq ASC
            "#,
        )
        .bind(conversation_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed)?;

        let messages = rows
            .into_iter()
            .map(MessageRow::try_into_message)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{MessageKind, MessageRole};

    fn message_row(role: &str, kind: &str) -> MessageRow {
        let now = Utc::now();
        MessageRow {
            id: MessageId::new().to_string(),
            conversation_id: ConversationId::new().to_string(),
            role: role.to_string(),
            kind: kind.to_string(),
            content: "Hello".to_string(),
            created_at: now,
            created_by: "admin".to_string(),
            updated_at: now,
            updated_by: "admin".to_string(),
        }
    }

    #[test]
    fn message_row_maps_enums() {
        let message = message_row("assistant", "json").try_into_message().unwrap();
        assert_eq!(message.role, MessageRole::Assistant);
        assert_eq!(message.kind, MessageKind::Json);
        assert_eq!(message.audit.unwrap().created_by, "admin");
    }

    #[test]
    fn unknown_role_is_invalid_record() {
        let err = message_row("tool", "text").try_into_message().unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord { .. }));
        assert!(err.to_string().contains("tool"));
    }

    #[test]
    fn conversation_row_rejects_bad_id() {
        let now = Utc::now();
        let row = ConversationRow {
            id: "not-a-ulid".to_string(),
            owner: "admin".to_string(),
            created_at: now,
            created_by: "admin".to_string(),
            updated_at: now,
            updated_by: "admin".to_string(),
        };
        let err = row.try_into_conversation().unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord { .. }));
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn clamped_reply_sorts_after_skewed_prompt(pool: PgPool) {
        let store = PgConversationStore::new(pool.clone());
        let owner = OwnerId::new("u1").unwrap();
        let conversation = store.insert_conversation(&owner).await.unwrap();

        // Written by a node whose clock runs a minute ahead: both the stamp
        // and the ULID are later than anything this node produces.
        let ahead = Utc::now() + chrono::Duration::minutes(1);
        let prompt_id = MessageId::from_ulid(ulid::Ulid::from_datetime(ahead.into()));
        sqlx::query(
            r#"
            INSERT INTO messages
                (id, conversation_id, role, kind, content, created_at, created_by, updated_at, updated_by)
            VALUES ($1, $2, 'user', 'text', 'question', $3, 'u1', $3, 'u1')
            "#,
        )
        .bind(prompt_id.to_string())
        .bind(conversation.id.to_string())
        .bind(ahead)
        .execute(&pool)
        .await
        .unwrap();

        let reply = store
            .insert_message(NewMessage::new(
                conversation.id,
                MessageRole::Assistant,
                MessageKind::Text,
                "answer",
                &owner,
            ))
            .await
            .unwrap();
        assert!(reply.id < prompt_id);

        let messages = store.get_messages(conversation.id).await.unwrap();
        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["question", "answer"]);
        assert!(messages[0].created_at <= messages[1].created_at);
    }
}
