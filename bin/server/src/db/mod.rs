//! Database repositories for parley.
//!
//! This module provides data access for:
//! - Conversations and their message logs

pub mod conversation;

pub use conversation::PgConversationStore;
