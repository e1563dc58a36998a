//! Audio Session Bridge.
//!
//! Turns a push-based live session into a pull-based [`AudioStream`]:
//!
//! 1. `Connecting`: handshake, send the full turn, signal turn completion
//! 2. `Streaming`: decode each base64 fragment and forward it in arrival order
//! 3. `Closed` on a normal backend close, `Failed` on a backend error
//!
//! Both channels between backend and consumer are bounded. A consumer that
//! stops reading stalls the pump, which stalls the connector. Dropping the
//! stream closes the live session on the next pump iteration.

use crate::backend::LlmMessage;
use crate::error::LiveError;
use crate::live::{LiveConnector, LiveEvent, LiveEventSink, LiveSession, LiveSessionConfig};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::Stream;
use rootcause::Report;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument, warn};

/// Default capacity of the bridge channels.
pub const DEFAULT_AUDIO_BUFFER: usize = 32;

/// One item of an audio stream: raw bytes, or the terminal error.
pub type AudioChunk = Result<Vec<u8>, Report<LiveError>>;

/// Lifecycle of a bridged live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgePhase {
    /// Handshake and turn submission in progress.
    Connecting,
    /// Fragments are being forwarded.
    Streaming,
    /// The session ended normally or the consumer went away.
    Closed,
    /// The session ended with an error.
    Failed,
}

/// How the pump loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Finished,
    Failed,
    Abandoned,
}

impl Outcome {
    fn phase(self) -> BridgePhase {
        match self {
            Self::Finished | Self::Abandoned => BridgePhase::Closed,
            Self::Failed => BridgePhase::Failed,
        }
    }
}

/// A single-reader stream of audio bytes.
///
/// Yields chunks in backend order. After an `Err` item the stream ends.
pub struct AudioStream {
    rx: mpsc::Receiver<AudioChunk>,
}

impl AudioStream {
    fn new(rx: mpsc::Receiver<AudioChunk>) -> Self {
        Self { rx }
    }

    /// Waits for the next chunk; `None` once the stream has ended.
    pub async fn next_chunk(&mut self) -> Option<AudioChunk> {
        self.rx.recv().await
    }

    /// Reads the stream to the end and concatenates all bytes.
    ///
    /// # Errors
    ///
    /// Returns the terminal error if the session failed.
    pub async fn collect_bytes(mut self) -> Result<Vec<u8>, Report<LiveError>> {
        let mut bytes = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            bytes.extend_from_slice(&chunk?);
        }
        Ok(bytes)
    }

    /// Tees the stream: the returned stream yields the same chunks, and the
    /// receiver resolves to every byte once the stream ends cleanly.
    ///
    /// The receiver resolves to an error if the stream fails or the returned
    /// stream is dropped early.
    #[must_use]
    pub fn record(mut self, buffer: usize) -> (AudioStream, oneshot::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let (done_tx, done_rx) = oneshot::channel();

        tokio::spawn(async move {
            let mut recorded = Vec::new();
            loop {
                let chunk = tokio::select! {
                    () = tx.closed() => return,
                    chunk = self.rx.recv() => chunk,
                };
                match chunk {
                    Some(Ok(bytes)) => {
                        recorded.extend_from_slice(&bytes);
                        if tx.send(Ok(bytes)).await.is_err() {
                            return;
                        }
                    }
                    Some(Err(report)) => {
                        let _ = tx.send(Err(report)).await;
                        return;
                    }
                    None => break,
                }
            }
            let _ = done_tx.send(recorded);
        });

        (AudioStream::new(rx), done_rx)
    }
}

impl Stream for AudioStream {
    type Item = AudioChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl fmt::Debug for AudioStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioStream")
            .field("buffered", &self.rx.len())
            .finish()
    }
}

/// Opens live sessions and exposes them as [`AudioStream`]s.
#[derive(Clone)]
pub struct AudioSessionBridge {
    connector: Arc<dyn LiveConnector>,
    buffer: usize,
}

impl AudioSessionBridge {
    /// Creates a bridge with the default buffer size.
    #[must_use]
    pub fn new(connector: Arc<dyn LiveConnector>) -> Self {
        Self {
            connector,
            buffer: DEFAULT_AUDIO_BUFFER,
        }
    }

    /// Sets the capacity of the bridge channels (minimum 1).
    #[must_use]
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    /// Returns the channel capacity.
    #[must_use]
    pub fn buffer(&self) -> usize {
        self.buffer
    }

    /// Opens a session, submits `turns` and returns the reply as a stream.
    ///
    /// The session is owned by a background pump from here on and is closed
    /// on every exit path: normal close, backend error, or the stream being
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the handshake or turn submission fails; the
    /// session is already released in that case.
    #[instrument(skip_all, fields(model = %config.model, turns = turns.len()))]
    pub async fn open(
        &self,
        config: &LiveSessionConfig,
        turns: &[LlmMessage],
    ) -> Result<AudioStream, Report<LiveError>> {
        debug!(phase = ?BridgePhase::Connecting, "opening live session");
        let (sink, events) = LiveEventSink::channel(self.buffer);
        let mut session = self.connector.connect(config, sink).await?;

        if let Err(report) = submit_turn(&mut session, turns).await {
            debug!(phase = ?BridgePhase::Failed, "turn submission failed");
            release(&mut session).await;
            return Err(report);
        }

        debug!(phase = ?BridgePhase::Streaming, "turn submitted");
        let (tx, rx) = mpsc::channel(self.buffer);
        tokio::spawn(pump(session, events, tx));
        Ok(AudioStream::new(rx))
    }
}

impl fmt::Debug for AudioSessionBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioSessionBridge")
            .field("buffer", &self.buffer)
            .finish_non_exhaustive()
    }
}

async fn submit_turn(
    session: &mut Box<dyn LiveSession>,
    turns: &[LlmMessage],
) -> Result<(), Report<LiveError>> {
    session.send_turn(turns).await?;
    session.signal_turn_complete().await
}

async fn release(session: &mut Box<dyn LiveSession>) {
    if let Err(report) = session.close().await {
        warn!(error = %report.current_context(), "failed to close live session");
    }
}

async fn pump(
    mut session: Box<dyn LiveSession>,
    mut events: mpsc::Receiver<LiveEvent>,
    out: mpsc::Sender<AudioChunk>,
) {
    let outcome = loop {
        let event = tokio::select! {
            () = out.closed() => break Outcome::Abandoned,
            event = events.recv() => event,
        };

        match event {
            Some(LiveEvent::Audio { fragments }) => {
                if let Some(outcome) = forward(fragments, &out).await {
                    break outcome;
                }
            }
            Some(LiveEvent::Error { reason }) => {
                let _ = out.send(Err(LiveError::Remote { reason }.into())).await;
                break Outcome::Failed;
            }
            Some(LiveEvent::Closed) => break Outcome::Finished,
            None => {
                let reason = "live session ended without closing".to_string();
                let _ = out.send(Err(LiveError::Protocol { reason }.into())).await;
                break Outcome::Failed;
            }
        }
    };

    debug!(phase = ?outcome.phase(), ?outcome, "live session finished");
    drop(events);
    release(&mut session).await;
}

/// Decodes and forwards fragments; returns the outcome if the pump must stop.
async fn forward(fragments: Vec<String>, out: &mpsc::Sender<AudioChunk>) -> Option<Outcome> {
    for fragment in fragments {
        let bytes = match BASE64.decode(fragment.as_bytes()) {
            Ok(bytes) => bytes,
            Err(e) => {
                let reason = e.to_string();
                let _ = out.send(Err(LiveError::InvalidFragment { reason }.into())).await;
                return Some(Outcome::Failed);
            }
        };
        if bytes.is_empty() {
            continue;
        }
        if out.send(Ok(bytes)).await.is_err() {
            return Some(Outcome::Abandoned);
        }
    }
    None
}
