//! Gemini Live websocket connector for audio replies.
//!
//! Wire flow: `setup` → `setupComplete`, then `clientContent` turns followed
//! by a separate `clientContent { turnComplete: true }`. Audio arrives as
//! base64 `inlineData` parts inside `serverContent.modelTurn`.

use crate::backend::LlmMessage;
use crate::error::LiveError;
use crate::gemini::{Content, Part, split_system};
use crate::live::{LiveConnector, LiveEvent, LiveEventSink, LiveSession, LiveSessionConfig};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{Sink, SinkExt, StreamExt};
use rootcause::Report;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::fmt::Display;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, instrument, warn};

/// Default live websocket endpoint.
pub const DEFAULT_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default native-audio model.
pub const DEFAULT_AUDIO_MODEL: &str = "gemini-2.5-flash-native-audio-preview-12-2025";

/// Default prebuilt voice.
pub const DEFAULT_VOICE: &str = "Aoede";

/// Upper bound on sending the close frame before the socket is dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection settings for [`GeminiLiveConnector`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiLiveConfig {
    /// API key appended as the `key` query parameter.
    pub api_key: String,
    /// Websocket endpoint.
    pub url: String,
}

impl GeminiLiveConfig {
    /// Creates a config for the default endpoint.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            url: DEFAULT_LIVE_URL.to_string(),
        }
    }

    /// Overrides the endpoint.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    fn connect_url(&self) -> String {
        format!("{}?key={}", self.url, self.api_key)
    }
}

/// Opens Gemini Live sessions.
#[derive(Debug, Clone)]
pub struct GeminiLiveConnector {
    config: GeminiLiveConfig,
}

impl GeminiLiveConnector {
    /// Creates a connector.
    #[must_use]
    pub fn new(config: GeminiLiveConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl LiveConnector for GeminiLiveConnector {
    #[instrument(skip_all, fields(model = %config.model))]
    async fn connect(
        &self,
        config: &LiveSessionConfig,
        events: LiveEventSink,
    ) -> Result<Box<dyn LiveSession>, Report<LiveError>> {
        let (socket, _) = tokio_tungstenite::connect_async(self.config.connect_url())
            .await
            .map_err(|e| LiveError::ConnectFailed {
                reason: e.to_string(),
            })?;
        let (mut writer, mut reader) = socket.split();

        send_json(&mut writer, &setup_message(config)).await?;
        await_setup_complete(&mut reader).await?;
        debug!("live session established");

        let reader = tokio::spawn(read_events(reader, events));
        Ok(Box::new(GeminiLiveSession {
            writer,
            reader,
            closed: false,
        }))
    }
}

struct GeminiLiveSession {
    writer: SplitSink<Socket, Message>,
    reader: JoinHandle<()>,
    closed: bool,
}

#[async_trait]
impl LiveSession for GeminiLiveSession {
    async fn send_turn(&mut self, turns: &[LlmMessage]) -> Result<(), Report<LiveError>> {
        send_json(&mut self.writer, &turns_message(turns)).await
    }

    async fn signal_turn_complete(&mut self) -> Result<(), Report<LiveError>> {
        send_json(
            &mut self.writer,
            &json!({"clientContent": {"turnComplete": true}}),
        )
        .await
    }

    async fn close(&mut self) -> Result<(), Report<LiveError>> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.reader.abort();
        send_close(&mut self.writer, CLOSE_TIMEOUT).await
    }
}

/// Sends a close frame, giving up after `limit`. The socket is released when
/// the session is dropped either way.
async fn send_close<S>(writer: &mut S, limit: Duration) -> Result<(), Report<LiveError>>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    match tokio::time::timeout(limit, writer.send(Message::Close(None))).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(LiveError::SendFailed {
            reason: e.to_string(),
        }
        .into()),
        Err(_) => Err(LiveError::SendFailed {
            reason: format!("close frame not sent within {}ms", limit.as_millis()),
        }
        .into()),
    }
}

impl Drop for GeminiLiveSession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn send_json(
    writer: &mut SplitSink<Socket, Message>,
    value: &JsonValue,
) -> Result<(), Report<LiveError>> {
    writer
        .send(Message::Text(value.to_string()))
        .await
        .map_err(|e| {
            LiveError::SendFailed {
                reason: e.to_string(),
            }
            .into()
        })
}

async fn await_setup_complete(reader: &mut SplitStream<Socket>) -> Result<(), Report<LiveError>> {
    while let Some(frame) = reader.next().await {
        let frame = frame.map_err(|e| LiveError::ConnectFailed {
            reason: e.to_string(),
        })?;
        let Some(text) = frame_text(frame)? else {
            continue;
        };
        if parse_server_message(&text)?.setup_complete {
            return Ok(());
        }
    }
    Err(LiveError::ConnectFailed {
        reason: "connection closed during handshake".to_string(),
    }
    .into())
}

/// Reads frames until the turn completes, the socket closes or the bridge
/// stops listening.
async fn read_events(mut reader: SplitStream<Socket>, events: LiveEventSink) {
    let last = loop {
        let frame = tokio::select! {
            () = events.closed() => return,
            frame = reader.next() => frame,
        };
        let parsed = match frame {
            None => break LiveEvent::Closed,
            Some(Err(e)) => {
                break LiveEvent::Error {
                    reason: e.to_string(),
                };
            }
            Some(Ok(Message::Close(close))) => {
                break close_event(close.map(|c| (c.code, c.reason.to_string())));
            }
            Some(Ok(frame)) => frame_text(frame)
                .and_then(|text| text.map(|t| parse_server_message(&t)).transpose()),
        };
        let message = match parsed {
            Ok(Some(message)) => message,
            Ok(None) => continue,
            Err(report) => {
                break LiveEvent::Error {
                    reason: report.current_context().to_string(),
                };
            }
        };

        if !message.fragments.is_empty() {
            let event = LiveEvent::Audio {
                fragments: message.fragments,
            };
            if !events.push(event).await {
                return;
            }
        }
        if message.turn_complete {
            break LiveEvent::Closed;
        }
    };

    if let LiveEvent::Error { reason } = &last {
        warn!(%reason, "live session failed");
    }
    let _ = events.push(last).await;
}

fn close_event(close: Option<(CloseCode, String)>) -> LiveEvent {
    match close {
        None => LiveEvent::Closed,
        Some((CloseCode::Normal | CloseCode::Away, _)) => LiveEvent::Closed,
        Some((code, reason)) => LiveEvent::Error {
            reason: format!("closed with code {}: {reason}", u16::from(code)),
        },
    }
}

/// Extracts the JSON text of a frame; control frames yield `None`.
fn frame_text(frame: Message) -> Result<Option<String>, Report<LiveError>> {
    match frame {
        Message::Text(text) => Ok(Some(text)),
        Message::Binary(bytes) => String::from_utf8(bytes).map(Some).map_err(|e| {
            LiveError::Protocol {
                reason: e.to_string(),
            }
            .into()
        }),
        _ => Ok(None),
    }
}

fn setup_message(config: &LiveSessionConfig) -> JsonValue {
    let mut setup = json!({
        "model": format!("models/{}", config.model),
        "generationConfig": {
            "responseModalities": ["AUDIO"],
            "speechConfig": {
                "voiceConfig": {"prebuiltVoiceConfig": {"voiceName": config.voice}}
            }
        }
    });
    if let Some(instruction) = &config.system_instruction {
        setup["systemInstruction"] = json!({"parts": [{"text": instruction}]});
    }
    json!({ "setup": setup })
}

fn turns_message(turns: &[LlmMessage]) -> JsonValue {
    // System turns travel in the setup message.
    let (_, contents) = split_system(turns);
    json!({"clientContent": {"turns": contents, "turnComplete": false}})
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<JsonValue>,
    server_content: Option<ServerContent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<Content>,
    #[serde(default)]
    turn_complete: bool,
}

/// What the reader cares about in one server message.
#[derive(Debug, Default, PartialEq, Eq)]
struct Parsed {
    setup_complete: bool,
    fragments: Vec<String>,
    turn_complete: bool,
}

fn parse_server_message(text: &str) -> Result<Parsed, Report<LiveError>> {
    let message: ServerMessage = serde_json::from_str(text).map_err(|e| LiveError::Protocol {
        reason: e.to_string(),
    })?;
    let content = message.server_content.unwrap_or_default();
    let fragments = content
        .model_turn
        .map(|turn| turn.parts)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|part: Part| part.inline_data.map(|d| d.data))
        .collect();

    Ok(Parsed {
        setup_complete: message.setup_complete.is_some(),
        fragments,
        turn_complete: content.turn_complete,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// A sink whose peer never drains, so it is never ready.
    struct StalledSink;

    impl Sink<Message> for StalledSink {
        type Error = tokio_tungstenite::tungstenite::Error;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }

        fn start_send(self: Pin<&mut Self>, _: Message) -> Result<(), Self::Error> {
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }

        fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }
    }

    #[tokio::test]
    async fn close_gives_up_on_stalled_socket() {
        let err = tokio::time::timeout(
            Duration::from_secs(1),
            send_close(&mut StalledSink, Duration::from_millis(20)),
        )
        .await
        .expect("send_close must return on its own")
        .unwrap_err();

        assert!(matches!(
            err.current_context(),
            LiveError::SendFailed { reason } if reason.contains("not sent within")
        ));
    }

    #[tokio::test]
    async fn close_sends_close_frame() {
        let mut sent = Vec::new();
        let mut sink = Box::pin(futures::sink::unfold(
            &mut sent,
            |sent, message: Message| async move {
                sent.push(message);
                Ok::<_, tokio_tungstenite::tungstenite::Error>(sent)
            },
        ));
        send_close(&mut sink, Duration::from_secs(1)).await.unwrap();
        drop(sink);

        assert!(matches!(sent.as_slice(), [Message::Close(None)]));
    }

    #[test]
    fn setup_carries_voice_and_instruction() {
        let config = LiveSessionConfig::new("native-audio", "Aoede")
            .with_system_instruction("Be cheerful.");
        let setup = setup_message(&config);

        assert_eq!(setup["setup"]["model"], "models/native-audio");
        assert_eq!(
            setup["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]
                ["prebuiltVoiceConfig"]["voiceName"],
            "Aoede"
        );
        assert_eq!(
            setup["setup"]["systemInstruction"]["parts"][0]["text"],
            "Be cheerful."
        );
    }

    #[test]
    fn turns_use_model_role_and_leave_completion_for_later() {
        let message = turns_message(&[
            LlmMessage::system("ignored here"),
            LlmMessage::user("Hi"),
            LlmMessage::assistant("Hello"),
        ]);
        assert_eq!(
            message,
            json!({"clientContent": {
                "turns": [
                    {"role": "user", "parts": [{"text": "Hi"}]},
                    {"role": "model", "parts": [{"text": "Hello"}]}
                ],
                "turnComplete": false
            }})
        );
    }

    #[test]
    fn parses_audio_fragments_in_order() {
        let parsed = parse_server_message(
            r#"{"serverContent": {"modelTurn": {"parts": [
                {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "QQ=="}},
                {"text": "not audio"},
                {"inlineData": {"data": "Qg=="}}
            ]}}}"#,
        )
        .expect("parse");

        assert_eq!(parsed.fragments, vec!["QQ==".to_string(), "Qg==".to_string()]);
        assert!(!parsed.turn_complete);
    }

    #[test]
    fn parses_setup_and_turn_complete() {
        let setup = parse_server_message(r#"{"setupComplete": {}}"#).expect("parse");
        assert!(setup.setup_complete);

        let done = parse_server_message(r#"{"serverContent": {"turnComplete": true}}"#)
            .expect("parse");
        assert_eq!(
            done,
            Parsed {
                setup_complete: false,
                fragments: Vec::new(),
                turn_complete: true,
            }
        );
    }

    #[test]
    fn malformed_frame_is_protocol_error() {
        let err = parse_server_message("{not json").expect_err("malformed");
        assert!(matches!(err.current_context(), LiveError::Protocol { .. }));
    }

    #[test]
    fn abnormal_close_is_an_error() {
        assert_eq!(close_event(None), LiveEvent::Closed);
        assert_eq!(
            close_event(Some((CloseCode::Normal, String::new()))),
            LiveEvent::Closed
        );
        assert!(matches!(
            close_event(Some((CloseCode::Policy, "quota".to_string()))),
            LiveEvent::Error { .. }
        ));
    }

    #[test]
    fn connect_url_appends_key() {
        let config = GeminiLiveConfig::new("secret").with_url("ws://localhost:9000/live");
        assert_eq!(config.connect_url(), "ws://localhost:9000/live?key=secret");
    }
}
