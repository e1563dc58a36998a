//! Conversation service for parley.
//!
//! This crate provides:
//!
//! - **Store Adapter**: The [`ConversationStore`] contract and an in-memory
//!   implementation
//! - **History Projector**: Stored log to generation context
//! - **Orchestrator**: One conversational turn in text, json or audio mode

pub mod error;
pub mod history;
pub mod memory;
pub mod message;
pub mod orchestrator;
pub mod store;

pub use error::{ChatError, StoreError, StoreOperation};
pub use memory::InMemoryConversationStore;
pub use message::{Audit, Conversation, Message, NewMessage};
pub use orchestrator::{
    AudioPersistence, AudioReply, ConversationOrchestrator, Exchange, OrchestratorConfig,
    PendingAudioMessage, Reply, ReplyStream, Transcript,
};
pub use store::ConversationStore;
