//! Maps orchestrator errors onto HTTP responses.
//!
//! The conversation core knows nothing about status codes; this module is the
//! only place they are chosen.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use parley_conversation::ChatError;
use rootcause::Report;
use serde_json::json;

/// A failed request.
#[derive(Debug)]
pub struct ApiError(Report<ChatError>);

impl From<Report<ChatError>> for ApiError {
    fn from(report: Report<ChatError>) -> Self {
        Self(report)
    }
}

impl ApiError {
    /// The error the orchestrator raised.
    #[must_use]
    pub fn chat_error(&self) -> &ChatError {
        self.0.current_context()
    }

    /// Status code for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self.chat_error() {
            ChatError::NotFound { .. } => StatusCode::NOT_FOUND,
            ChatError::ValidationFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ChatError::GenerationFailed { .. } | ChatError::StreamFailed => StatusCode::BAD_GATEWAY,
            ChatError::PersistenceFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// User-safe message for the response body.
    fn public_message(&self) -> String {
        match self.chat_error() {
            ChatError::NotFound { .. } => "Conversation not found".to_string(),
            ChatError::ValidationFailed { reason } => reason.clone(),
            ChatError::GenerationFailed { .. } => "Generation failed".to_string(),
            ChatError::StreamFailed => "Audio stream failed".to_string(),
            ChatError::PersistenceFailed { .. } => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = ?self.0, "request failed");
        } else {
            tracing::debug!(error = %self.chat_error(), "request rejected");
        }
        (status, Json(json!({ "error": self.public_message() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_conversation::StoreOperation;
    use parley_core::{ConversationId, MessageKind};

    fn status_of(error: ChatError) -> StatusCode {
        ApiError::from(Report::from(error)).status()
    }

    #[test]
    fn chat_errors_map_to_statuses() {
        assert_eq!(
            status_of(ChatError::NotFound {
                id: ConversationId::new()
            }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(ChatError::ValidationFailed {
                reason: "prompt must not be empty".to_string()
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(ChatError::GenerationFailed {
                kind: MessageKind::Text
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(ChatError::PersistenceFailed {
                operation: StoreOperation::InsertMessage
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn validation_reason_is_public() {
        let error = ApiError::from(Report::from(ChatError::ValidationFailed {
            reason: "prompt must not be empty".to_string(),
        }));
        assert_eq!(error.public_message(), "prompt must not be empty");
    }
}
