//! Generation primitives for parley.
//!
//! This crate provides everything between a conversation and a model:
//!
//! - **Backends**: [`LlmBackend`] for text and structured output, with a
//!   Gemini REST implementation
//! - **Live sessions**: [`LiveConnector`] / [`LiveSession`] for bidirectional
//!   audio, with a Gemini Live websocket implementation
//! - **Audio bridge**: [`AudioSessionBridge`] turns a live session into a
//!   backpressured [`AudioStream`] of decoded bytes
//! - **Gateway**: [`GenerationGateway`] selects between the three modes

pub mod audio;
pub mod backend;
pub mod error;
pub mod gateway;
pub mod gemini;
pub mod gemini_live;
pub mod live;
pub mod schema;

pub use audio::{AudioChunk, AudioSessionBridge, AudioStream, BridgePhase, DEFAULT_AUDIO_BUFFER};
pub use backend::{LlmBackend, LlmMessage};
pub use error::{GenerationError, LiveError, LlmError};
pub use gateway::{GatewayConfig, Generation, GenerationGateway, GenerationMode, HistoryEntry};
pub use gemini::{GeminiBackend, GeminiConfig};
pub use gemini_live::{GeminiLiveConfig, GeminiLiveConnector};
pub use live::{LiveConnector, LiveEvent, LiveEventSink, LiveSession, LiveSessionConfig};
pub use schema::OutputSchema;
