//! Error types for the AI crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `LlmError`: text and structured generation against the backend
//! - `LiveError`: live audio sessions and the audio stream built on them
//! - `GenerationError`: gateway-level wrapper naming the requested mode

use std::fmt;

/// Errors from text and structured generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// The request never produced an HTTP response.
    RequestFailed { reason: String },
    /// The backend answered with a non-success status.
    BackendRejected { status: u16, body: String },
    /// Rate limit or quota exceeded.
    RateLimited { retry_after_secs: Option<u64> },
    /// Response parsing failed.
    ResponseParseFailed { reason: String },
    /// The backend produced no candidate content.
    EmptyResponse,
    /// Structured output did not conform to the requested schema.
    SchemaMismatch { schema: String, reason: String },
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequestFailed { reason } => write!(f, "LLM request failed: {reason}"),
            Self::BackendRejected { status, body } => {
                write!(f, "LLM backend rejected request with status {status}: {body}")
            }
            Self::RateLimited { retry_after_secs } => {
                if let Some(secs) = retry_after_secs {
                    write!(f, "rate limited, retry after {secs}s")
                } else {
                    write!(f, "rate limited")
                }
            }
            Self::ResponseParseFailed { reason } => {
                write!(f, "failed to parse LLM response: {reason}")
            }
            Self::EmptyResponse => write!(f, "LLM returned no content"),
            Self::SchemaMismatch { schema, reason } => {
                write!(f, "output does not match schema '{schema}': {reason}")
            }
        }
    }
}

impl std::error::Error for LlmError {}

/// Errors from live audio sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveError {
    /// The session could not be established.
    ConnectFailed { reason: String },
    /// Writing to the session failed.
    SendFailed { reason: String },
    /// The backend reported an error mid-stream.
    Remote { reason: String },
    /// An inbound frame could not be understood.
    Protocol { reason: String },
    /// An audio fragment was not valid base64.
    InvalidFragment { reason: String },
}

impl fmt::Display for LiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed { reason } => {
                write!(f, "failed to open live session: {reason}")
            }
            Self::SendFailed { reason } => write!(f, "failed to send to live session: {reason}"),
            Self::Remote { reason } => write!(f, "live session error: {reason}"),
            Self::Protocol { reason } => write!(f, "live session protocol error: {reason}"),
            Self::InvalidFragment { reason } => {
                write!(f, "invalid audio fragment: {reason}")
            }
        }
    }
}

impl std::error::Error for LiveError {}

/// Gateway-level errors.
///
/// Use these to add context when wrapping `LlmError` or `LiveError` reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    /// Text generation context.
    Text,
    /// Structured generation context.
    Structured { schema: String },
    /// Audio session context.
    Audio,
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text generation failed"),
            Self::Structured { schema } => {
                write!(f, "structured generation for '{schema}' failed")
            }
            Self::Audio => write!(f, "audio generation failed"),
        }
    }
}

impl std::error::Error for GenerationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_rejected_display() {
        let err = LlmError::BackendRejected {
            status: 503,
            body: "overloaded".to_string(),
        };
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("overloaded"));
    }

    #[test]
    fn rate_limited_display() {
        let err = LlmError::RateLimited {
            retry_after_secs: Some(30),
        };
        assert_eq!(err.to_string(), "rate limited, retry after 30s");
    }

    #[test]
    fn schema_mismatch_display() {
        let err = LlmError::SchemaMismatch {
            schema: "recipe".to_string(),
            reason: "missing required property 'title'".to_string(),
        };
        assert!(err.to_string().contains("recipe"));
        assert!(err.to_string().contains("title"));
    }

    #[test]
    fn generation_error_names_schema() {
        let err = GenerationError::Structured {
            schema: "recipe".to_string(),
        };
        assert_eq!(err.to_string(), "structured generation for 'recipe' failed");
    }

    #[test]
    fn live_error_display() {
        let err = LiveError::Remote {
            reason: "quota exhausted".to_string(),
        };
        assert!(err.to_string().contains("quota exhausted"));
    }
}
