//! Live session contract.
//!
//! A live session is a bidirectional, push-based connection to the backend:
//! after a handshake the caller sends one turn, signals that the turn is
//! complete, and the backend pushes [`LiveEvent`]s until it closes or fails.
//! Connectors deliver events into a bounded [`LiveEventSink`], so a slow
//! consumer pauses the connector instead of growing a buffer.

use crate::backend::LlmMessage;
use crate::error::LiveError;
use async_trait::async_trait;
use rootcause::Report;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Parameters for opening a live audio session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveSessionConfig {
    /// Model identifier.
    pub model: String,
    /// Prebuilt voice name.
    pub voice: String,
    /// System instruction sent with the handshake.
    pub system_instruction: Option<String>,
}

impl LiveSessionConfig {
    /// Creates a config without a system instruction.
    #[must_use]
    pub fn new(model: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            voice: voice.into(),
            system_instruction: None,
        }
    }

    /// Sets the system instruction.
    #[must_use]
    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }
}

/// An inbound event from a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveEvent {
    /// Zero or more base64-encoded audio fragments, in arrival order.
    Audio { fragments: Vec<String> },
    /// The backend reported an error; no further events follow.
    Error { reason: String },
    /// The backend finished normally; no further events follow.
    Closed,
}

/// Receiving side handed to a connector for pushing inbound events.
#[derive(Debug, Clone)]
pub struct LiveEventSink {
    tx: mpsc::Sender<LiveEvent>,
}

impl LiveEventSink {
    /// Creates a sink and its receiver with the given capacity.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<LiveEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Pushes an event, waiting while the receiver is full.
    ///
    /// Returns `false` once the receiver is gone; connectors should stop
    /// reading from the backend at that point.
    pub async fn push(&self, event: LiveEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    /// Returns true if the receiving side has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Completes once the receiving side has been dropped.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }
}

/// An open live session.
#[async_trait]
pub trait LiveSession: Send {
    /// Sends the conversation turns that make up this exchange.
    async fn send_turn(&mut self, turns: &[LlmMessage]) -> Result<(), Report<LiveError>>;

    /// Tells the backend the caller has finished sending input.
    ///
    /// The backend produces nothing until this is sent.
    async fn signal_turn_complete(&mut self) -> Result<(), Report<LiveError>>;

    /// Releases the session. Calling it more than once is harmless.
    async fn close(&mut self) -> Result<(), Report<LiveError>>;
}

/// Opens live sessions against a backend.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    /// Performs the handshake and returns the session.
    ///
    /// Inbound events are pushed into `events` until the session ends.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or handshake fails.
    async fn connect(
        &self,
        config: &LiveSessionConfig,
        events: LiveEventSink,
    ) -> Result<Box<dyn LiveSession>, Report<LiveError>>;
}
