//! Generation Gateway.
//!
//! One entry point over the three reply modes. Every call is stateless: the
//! caller supplies the full history, the gateway appends the prompt as the
//! final `user` turn and dispatches to the text backend or the audio bridge.

use crate::audio::{AudioSessionBridge, AudioStream};
use crate::backend::{LlmBackend, LlmMessage};
use crate::error::{GenerationError, LiveError, LlmError};
use crate::gemini_live::{DEFAULT_AUDIO_MODEL, DEFAULT_VOICE};
use crate::live::LiveSessionConfig;
use crate::schema::OutputSchema;
use parley_core::{MessageKind, MessageRole};
use rootcause::Report;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::instrument;

/// A prior turn as fed into a generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Who authored the turn.
    pub role: MessageRole,
    /// The stored content type.
    pub kind: MessageKind,
    /// The stored content, untouched.
    pub content: String,
}

impl HistoryEntry {
    /// Creates an entry.
    #[must_use]
    pub fn new(role: MessageRole, kind: MessageKind, content: impl Into<String>) -> Self {
        Self {
            role,
            kind,
            content: content.into(),
        }
    }

    /// Creates a text entry.
    #[must_use]
    pub fn text(role: MessageRole, content: impl Into<String>) -> Self {
        Self::new(role, MessageKind::Text, content)
    }
}

/// The requested reply shape.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationMode {
    /// Free text.
    Text,
    /// A JSON value conforming to the schema.
    Structured(OutputSchema),
    /// Streamed speech.
    Audio,
}

impl GenerationMode {
    /// The message kind a reply in this mode is stored as.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Text => MessageKind::Text,
            Self::Structured(_) => MessageKind::Json,
            Self::Audio => MessageKind::Audio,
        }
    }
}

/// A generated reply.
#[derive(Debug)]
pub enum Generation {
    /// Free text.
    Text(String),
    /// A schema-conforming value.
    Structured(JsonValue),
    /// A live byte stream.
    Audio(AudioStream),
}

/// Gateway settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Prepended to every call as a `system` turn.
    pub system_prompt: Option<String>,
    /// Model used for live audio sessions.
    pub audio_model: String,
    /// Prebuilt voice for audio replies.
    pub voice: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            audio_model: DEFAULT_AUDIO_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
        }
    }
}

/// Uniform interface to the three generation modes.
#[derive(Clone)]
pub struct GenerationGateway {
    backend: Arc<dyn LlmBackend>,
    audio: AudioSessionBridge,
    config: GatewayConfig,
}

impl GenerationGateway {
    /// Creates a gateway.
    #[must_use]
    pub fn new(backend: Arc<dyn LlmBackend>, audio: AudioSessionBridge, config: GatewayConfig) -> Self {
        Self {
            backend,
            audio,
            config,
        }
    }

    /// Generates a reply in the requested mode.
    ///
    /// # Errors
    ///
    /// Returns an error naming the mode if the backend or live session fails.
    pub async fn generate(
        &self,
        prompt: &str,
        history: &[HistoryEntry],
        mode: &GenerationMode,
    ) -> Result<Generation, Report<GenerationError>> {
        match mode {
            GenerationMode::Text => self
                .generate_text(prompt, history)
                .await
                .map(Generation::Text)
                .map_err(|report| report.context(GenerationError::Text)),
            GenerationMode::Structured(schema) => self
                .generate_structured(prompt, history, schema)
                .await
                .map(Generation::Structured)
                .map_err(|report| {
                    report.context(GenerationError::Structured {
                        schema: schema.name.clone(),
                    })
                }),
            GenerationMode::Audio => self
                .generate_audio(prompt, history)
                .await
                .map(Generation::Audio)
                .map_err(|report| report.context(GenerationError::Audio)),
        }
    }

    /// Generates free text.
    ///
    /// # Errors
    ///
    /// Returns the backend error unchanged.
    #[instrument(skip_all, fields(history = history.len()))]
    pub async fn generate_text(
        &self,
        prompt: &str,
        history: &[HistoryEntry],
    ) -> Result<String, Report<LlmError>> {
        let messages = self.build_messages(prompt, history);
        self.backend.generate_text(&messages).await
    }

    /// Generates a JSON value and checks it against `schema`.
    ///
    /// # Errors
    ///
    /// Returns the backend error, or `SchemaMismatch` if the value is off-shape.
    #[instrument(skip_all, fields(history = history.len(), schema = %schema.name))]
    pub async fn generate_structured(
        &self,
        prompt: &str,
        history: &[HistoryEntry],
        schema: &OutputSchema,
    ) -> Result<JsonValue, Report<LlmError>> {
        let messages = self.build_messages(prompt, history);
        let value = self.backend.generate_structured(&messages, schema).await?;
        schema.check(&value).map_err(|reason| LlmError::SchemaMismatch {
            schema: schema.name.clone(),
            reason,
        })?;
        Ok(value)
    }

    /// Opens a live session and streams the spoken reply.
    ///
    /// System turns are moved into the session's system instruction.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be opened or the turn cannot be
    /// submitted. Errors after that point arrive through the stream.
    #[instrument(skip_all, fields(history = history.len()))]
    pub async fn generate_audio(
        &self,
        prompt: &str,
        history: &[HistoryEntry],
    ) -> Result<AudioStream, Report<LiveError>> {
        let messages = self.build_messages(prompt, history);
        let (system, turns): (Vec<LlmMessage>, Vec<LlmMessage>) = messages
            .into_iter()
            .partition(|m| m.role == MessageRole::System);

        let mut config = LiveSessionConfig::new(&self.config.audio_model, &self.config.voice);
        if !system.is_empty() {
            let instruction: Vec<&str> = system.iter().map(|m| m.content.as_str()).collect();
            config = config.with_system_instruction(instruction.join("\n\n"));
        }
        self.audio.open(&config, &turns).await
    }

    /// Configured system prompt, then history, then the prompt as a user turn.
    ///
    /// Audio entries are dropped: their content is base64 and means nothing
    /// to a language model.
    fn build_messages(&self, prompt: &str, history: &[HistoryEntry]) -> Vec<LlmMessage> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        if let Some(system) = &self.config.system_prompt {
            messages.push(LlmMessage::system(system.clone()));
        }
        messages.extend(
            history
                .iter()
                .filter(|entry| entry.kind != MessageKind::Audio)
                .map(|entry| LlmMessage::new(entry.role, entry.content.clone())),
        );
        messages.push(LlmMessage::user(prompt));
        messages
    }
}

impl std::fmt::Debug for GenerationGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationGateway")
            .field("model", &self.backend.model())
            .field("audio", &self.audio)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::{LiveConnector, LiveEvent, LiveEventSink, LiveSession};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Backend that records the messages it receives and replays a canned reply.
    #[derive(Default)]
    struct RecordingBackend {
        seen: Mutex<Vec<Vec<LlmMessage>>>,
        structured: Option<JsonValue>,
        fail: bool,
    }

    impl RecordingBackend {
        fn last_call(&self) -> Vec<LlmMessage> {
            self.seen.lock().unwrap().last().cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl LlmBackend for RecordingBackend {
        async fn generate_text(&self, messages: &[LlmMessage]) -> Result<String, Report<LlmError>> {
            self.seen.lock().unwrap().push(messages.to_vec());
            if self.fail {
                return Err(LlmError::RequestFailed {
                    reason: "timeout".to_string(),
                }
                .into());
            }
            Ok(format!("echo: {}", messages.last().map_or("", |m| &m.content)))
        }

        async fn generate_structured(
            &self,
            messages: &[LlmMessage],
            _schema: &OutputSchema,
        ) -> Result<JsonValue, Report<LlmError>> {
            self.seen.lock().unwrap().push(messages.to_vec());
            Ok(self.structured.clone().unwrap_or(JsonValue::Null))
        }

        fn model(&self) -> &str {
            "recording"
        }
    }

    /// Live connector that captures the session config and turns.
    #[derive(Default)]
    struct CapturingConnector {
        config: Arc<Mutex<Option<LiveSessionConfig>>>,
        turns: Arc<Mutex<Vec<LlmMessage>>>,
    }

    struct CapturingSession {
        sink: Option<LiveEventSink>,
        turns: Arc<Mutex<Vec<LlmMessage>>>,
    }

    #[async_trait]
    impl LiveConnector for CapturingConnector {
        async fn connect(
            &self,
            config: &LiveSessionConfig,
            events: LiveEventSink,
        ) -> Result<Box<dyn LiveSession>, Report<LiveError>> {
            *self.config.lock().unwrap() = Some(config.clone());
            Ok(Box::new(CapturingSession {
                sink: Some(events),
                turns: Arc::clone(&self.turns),
            }))
        }
    }

    #[async_trait]
    impl LiveSession for CapturingSession {
        async fn send_turn(&mut self, turns: &[LlmMessage]) -> Result<(), Report<LiveError>> {
            self.turns.lock().unwrap().extend_from_slice(turns);
            Ok(())
        }

        async fn signal_turn_complete(&mut self) -> Result<(), Report<LiveError>> {
            if let Some(sink) = self.sink.take() {
                tokio::spawn(async move {
                    sink.push(LiveEvent::Audio {
                        fragments: vec!["aGk=".to_string()],
                    })
                    .await;
                    sink.push(LiveEvent::Closed).await;
                });
            }
            Ok(())
        }

        async fn close(&mut self) -> Result<(), Report<LiveError>> {
            Ok(())
        }
    }

    fn gateway(backend: Arc<RecordingBackend>, config: GatewayConfig) -> GenerationGateway {
        let bridge = AudioSessionBridge::new(Arc::new(CapturingConnector::default()));
        GenerationGateway::new(backend, bridge, config)
    }

    #[tokio::test]
    async fn prompt_is_appended_after_history() {
        let backend = Arc::new(RecordingBackend::default());
        let gateway = gateway(backend.clone(), GatewayConfig::default());
        let history = vec![
            HistoryEntry::text(MessageRole::User, "Hi"),
            HistoryEntry::text(MessageRole::Assistant, "Hello"),
        ];

        let reply = gateway.generate_text("How are you?", &history).await.expect("text");

        assert_eq!(reply, "echo: How are you?");
        assert_eq!(
            backend.last_call(),
            vec![
                LlmMessage::user("Hi"),
                LlmMessage::assistant("Hello"),
                LlmMessage::user("How are you?"),
            ]
        );
    }

    #[tokio::test]
    async fn system_prompt_leads_and_audio_history_is_dropped() {
        let backend = Arc::new(RecordingBackend::default());
        let config = GatewayConfig {
            system_prompt: Some("Be kind.".to_string()),
            ..GatewayConfig::default()
        };
        let gateway = gateway(backend.clone(), config);
        let history = vec![
            HistoryEntry::text(MessageRole::User, "Say it"),
            HistoryEntry::new(MessageRole::Assistant, MessageKind::Audio, "UklGRg=="),
            HistoryEntry::new(MessageRole::Assistant, MessageKind::Json, r#"{"ok":true}"#),
        ];

        gateway.generate_text("Again", &history).await.expect("text");

        assert_eq!(
            backend.last_call(),
            vec![
                LlmMessage::system("Be kind."),
                LlmMessage::user("Say it"),
                LlmMessage::assistant(r#"{"ok":true}"#),
                LlmMessage::user("Again"),
            ]
        );
    }

    #[tokio::test]
    async fn backend_failure_is_wrapped_with_mode() {
        let backend = Arc::new(RecordingBackend {
            fail: true,
            ..RecordingBackend::default()
        });
        let gateway = gateway(backend, GatewayConfig::default());

        let err = gateway
            .generate("Hi", &[], &GenerationMode::Text)
            .await
            .expect_err("backend fails");
        assert_eq!(err.current_context(), &GenerationError::Text);
    }

    #[tokio::test]
    async fn structured_output_is_schema_checked() {
        let backend = Arc::new(RecordingBackend {
            structured: Some(json!({"title": "Soup"})),
            ..RecordingBackend::default()
        });
        let gateway = gateway(backend, GatewayConfig::default());
        let schema = OutputSchema::new(
            "recipe",
            json!({"type": "object", "required": ["title", "servings"]}),
        );

        let err = gateway
            .generate_structured("Recipe please", &[], &schema)
            .await
            .expect_err("servings missing");
        assert!(matches!(
            err.current_context(),
            LlmError::SchemaMismatch { .. }
        ));
    }

    #[tokio::test]
    async fn structured_mode_returns_value() {
        let backend = Arc::new(RecordingBackend {
            structured: Some(json!({"title": "Soup", "servings": 2})),
            ..RecordingBackend::default()
        });
        let gateway = gateway(backend, GatewayConfig::default());
        let schema = OutputSchema::new("recipe", json!({"type": "object"}));

        let generation = gateway
            .generate("Recipe please", &[], &GenerationMode::Structured(schema))
            .await
            .expect("structured");
        match generation {
            Generation::Structured(value) => assert_eq!(value["servings"], 2),
            other => panic!("expected structured generation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn audio_moves_system_turns_into_session_config() {
        let connector = Arc::new(CapturingConnector::default());
        let bridge = AudioSessionBridge::new(connector.clone());
        let config = GatewayConfig {
            system_prompt: Some("Speak softly.".to_string()),
            ..GatewayConfig::default()
        };
        let gateway = GenerationGateway::new(Arc::new(RecordingBackend::default()), bridge, config);
        let history = vec![HistoryEntry::text(MessageRole::User, "Hi")];

        let stream = gateway.generate_audio("Sing", &history).await.expect("audio");
        assert_eq!(stream.collect_bytes().await.expect("bytes"), b"hi".to_vec());

        let session = connector.config.lock().unwrap().clone().expect("connected");
        assert_eq!(session.voice, DEFAULT_VOICE);
        assert_eq!(session.system_instruction.as_deref(), Some("Speak softly."));
        assert_eq!(
            *connector.turns.lock().unwrap(),
            vec![LlmMessage::user("Hi"), LlmMessage::user("Sing")]
        );
    }

    #[test]
    fn mode_maps_to_stored_kind() {
        assert_eq!(GenerationMode::Text.kind(), MessageKind::Text);
        assert_eq!(
            GenerationMode::Structured(OutputSchema::new("x", json!({}))).kind(),
            MessageKind::Json
        );
        assert_eq!(GenerationMode::Audio.kind(), MessageKind::Audio);
    }
}
