//! Core domain types and utilities for parley.
//!
//! This crate provides the identifiers, owner identity and message enumerations
//! shared by the conversation core and the server.

pub mod id;
pub mod owner;
pub mod role;

pub use id::{ConversationId, MessageId, ParseIdError};
pub use owner::{InvalidOwnerError, OwnerId};
pub use role::{MessageKind, MessageRole, UnknownVariantError};
