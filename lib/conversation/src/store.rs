//! Conversation Store Adapter contract.
//!
//! The store is an append-only log of messages per conversation. Each
//! operation is individually atomic; callers never get multi-statement
//! transactions.

use crate::error::StoreError;
use crate::message::{Conversation, Message, NewMessage};
use async_trait::async_trait;
use parley_core::{ConversationId, OwnerId};
use rootcause::Report;

/// Durable storage for conversations and their messages.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Creates a conversation owned by `owner`.
    async fn insert_conversation(
        &self,
        owner: &OwnerId,
    ) -> Result<Conversation, Report<StoreError>>;

    /// Looks up a conversation by id.
    async fn get_conversation(
        &self,
        id: ConversationId,
    ) -> Result<Option<Conversation>, Report<StoreError>>;

    /// Lists `owner`'s conversations, most recently created first.
    async fn list_conversations(
        &self,
        owner: &OwnerId,
    ) -> Result<Vec<Conversation>, Report<StoreError>>;

    /// Appends a message and returns it as stored.
    ///
    /// The stored `created_at` is never earlier than that of any message
    /// already in the conversation.
    async fn insert_message(&self, message: NewMessage) -> Result<Message, Report<StoreError>>;

    /// Returns a conversation's messages in ascending creation order.
    async fn get_messages(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, Report<StoreError>>;
}
