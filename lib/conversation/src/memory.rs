//! In-memory store adapter.

use crate::error::StoreError;
use crate::message::{Audit, Conversation, Message, NewMessage};
use crate::store::ConversationStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_core::{ConversationId, MessageId, OwnerId};
use rootcause::Report;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct State {
    /// In creation order.
    conversations: Vec<Conversation>,
    /// In insertion order, which is also creation order.
    messages: Vec<Message>,
    last_stamp: Option<DateTime<Utc>>,
}

impl State {
    /// Wall-clock time, clamped so stamps never go backwards.
    fn stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let at = match self.last_stamp {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_stamp = Some(at);
        at
    }
}

/// A fully functional store adapter held in process memory.
///
/// Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryConversationStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryConversationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of messages across all conversations.
    ///
    /// # Panics
    ///
    /// Panics if the store lock is poisoned.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.state
            .lock()
            .expect("in-memory store lock poisoned")
            .messages
            .len()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, Report<StoreError>> {
        self.state.lock().map_err(|_| {
            StoreError::Unavailable {
                reason: "in-memory store lock poisoned".to_string(),
            }
            .into()
        })
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn insert_conversation(
        &self,
        owner: &OwnerId,
    ) -> Result<Conversation, Report<StoreError>> {
        let mut state = self.lock()?;
        let at = state.stamp();
        let conversation = Conversation {
            id: ConversationId::new(),
            owner: owner.clone(),
            audit: Audit::new(owner, at),
        };
        state.conversations.push(conversation.clone());
        Ok(conversation)
    }

    async fn get_conversation(
        &self,
        id: ConversationId,
    ) -> Result<Option<Conversation>, Report<StoreError>> {
        let state = self.lock()?;
        Ok(state.conversations.iter().find(|c| c.id == id).cloned())
    }

    async fn list_conversations(
        &self,
        owner: &OwnerId,
    ) -> Result<Vec<Conversation>, Report<StoreError>> {
        let state = self.lock()?;
        // Newest first; stamps are monotonic so reversing creation order suffices.
        Ok(state
            .conversations
            .iter()
            .rev()
            .filter(|c| c.is_owned_by(owner))
            .cloned()
            .collect())
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message, Report<StoreError>> {
        let mut state = self.lock()?;
        if !state
            .conversations
            .iter()
            .any(|c| c.id == message.conversation_id)
        {
            return Err(StoreError::QueryFailed {
                reason: format!("unknown conversation {}", message.conversation_id),
            }
            .into());
        }
        let at = state.stamp();
        let message = message.into_message(MessageId::new(), at);
        state.messages.push(message.clone());
        Ok(message)
    }

    async fn get_messages(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, Report<StoreError>> {
        let state = self.lock()?;
        Ok(state
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect())
    }
}
