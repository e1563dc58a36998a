//! Generation backend abstraction.
//!
//! The backend is the remote model-serving API. It only ever sees a complete,
//! ordered message list; conversation affinity lives entirely on our side.

use crate::error::LlmError;
use crate::schema::OutputSchema;
use async_trait::async_trait;
use parley_core::MessageRole;
use rootcause::Report;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A single turn handed to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmMessage {
    /// The role of the message sender.
    pub role: MessageRole,
    /// The text of the turn.
    pub content: String,
}

impl LlmMessage {
    /// Creates a message with an explicit role.
    #[must_use]
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Creates a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Creates an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Creates a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }
}

/// Trait for single-shot generation backends.
///
/// Implementations must not retry; a failed call is reported as-is.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Generates free text for the given conversation.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend call fails or yields no text.
    async fn generate_text(&self, messages: &[LlmMessage]) -> Result<String, Report<LlmError>>;

    /// Generates a JSON value constrained by `schema`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend call fails or the output is not JSON.
    async fn generate_structured(
        &self,
        messages: &[LlmMessage],
        schema: &OutputSchema,
    ) -> Result<JsonValue, Report<LlmError>>;

    /// Returns the model name.
    fn model(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_message_constructors() {
        assert_eq!(LlmMessage::user("hi").role, MessageRole::User);
        assert_eq!(LlmMessage::assistant("hello").role, MessageRole::Assistant);
        assert_eq!(LlmMessage::system("be brief").role, MessageRole::System);
    }

    #[test]
    fn llm_message_serializes_role_lowercase() {
        let json = serde_json::to_value(LlmMessage::assistant("ok")).expect("serialize");
        assert_eq!(json, serde_json::json!({"role": "assistant", "content": "ok"}));
    }
}
