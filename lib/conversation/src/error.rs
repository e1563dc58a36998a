//! Error types for the conversation crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `StoreError`: Errors from the conversation store adapter
//! - `ChatError`: What the orchestrator surfaces to its callers

use parley_core::{ConversationId, MessageKind};
use std::fmt;

/// Errors from store adapter operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached.
    Unavailable { reason: String },
    /// A query or write was rejected.
    QueryFailed { reason: String },
    /// A stored row could not be mapped back into a record.
    InvalidRecord { reason: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { reason } => write!(f, "store unavailable: {reason}"),
            Self::QueryFailed { reason } => write!(f, "store query failed: {reason}"),
            Self::InvalidRecord { reason } => write!(f, "invalid stored record: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// The store operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    InsertConversation,
    GetConversation,
    ListConversations,
    InsertMessage,
    GetMessages,
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InsertConversation => "insert conversation",
            Self::GetConversation => "get conversation",
            Self::ListConversations => "list conversations",
            Self::InsertMessage => "insert message",
            Self::GetMessages => "get messages",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the conversation orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// The conversation does not exist for this owner.
    NotFound { id: ConversationId },
    /// Malformed input, rejected before any store mutation.
    ValidationFailed { reason: String },
    /// The generation backend failed or returned a non-conforming value.
    GenerationFailed { kind: MessageKind },
    /// The store failed on read or write.
    PersistenceFailed { operation: StoreOperation },
    /// The live audio session failed after streaming began.
    StreamFailed,
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { id } => write!(f, "conversation not found: {id}"),
            Self::ValidationFailed { reason } => write!(f, "validation failed: {reason}"),
            Self::GenerationFailed { kind } => write!(f, "{kind} generation failed"),
            Self::PersistenceFailed { operation } => {
                write!(f, "persistence failed: {operation}")
            }
            Self::StreamFailed => write!(f, "audio stream failed"),
        }
    }
}

impl std::error::Error for ChatError {}
