//! Conversation Orchestrator.
//!
//! The orchestrator runs one conversational turn:
//! 1. Validate the input and resolve the conversation for the owner
//! 2. Append the user message
//! 3. Project the stored log into history, excluding the new message
//! 4. Generate a reply in the requested mode
//! 5. Append the assistant message (text and json; audio per config)
//!
//! The two writes are independent. If generation fails the user message
//! stays in the log with no answer; that is a valid terminal state.

use crate::error::{ChatError, StoreError, StoreOperation};
use crate::history;
use crate::message::{Conversation, Message, NewMessage};
use crate::store::ConversationStore;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::Stream;
use parley_ai::{AudioStream, DEFAULT_AUDIO_BUFFER, Generation, GenerationGateway, GenerationMode};
use parley_core::{ConversationId, MessageKind, MessageRole, OwnerId};
use rootcause::Report;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;
use tracing::{debug, instrument};

/// What happens to a spoken reply once it has been streamed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioPersistence {
    /// Stream only; the log keeps the unanswered user turn.
    #[default]
    Discard,
    /// Append an `assistant`/`audio` message once the stream ends cleanly.
    Persist,
}

/// Orchestrator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub audio_persistence: AudioPersistence,
    /// Capacity of the recording tee used when persisting audio.
    pub audio_buffer: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            audio_persistence: AudioPersistence::default(),
            audio_buffer: DEFAULT_AUDIO_BUFFER,
        }
    }
}

/// A conversation with its full transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    pub conversation: Conversation,
    /// Ascending creation order.
    pub messages: Vec<Message>,
}

/// The result of one turn.
#[derive(Debug)]
pub struct Exchange {
    pub user_message: Message,
    pub reply: Reply,
}

/// The reply half of an [`Exchange`], shaped by the requested mode.
#[derive(Debug)]
pub enum Reply {
    /// The persisted `assistant`/`text` message.
    Text(Message),
    /// The persisted `assistant`/`json` message.
    Structured(Message),
    /// The live audio stream.
    Audio(AudioReply),
}

impl Reply {
    /// The persisted assistant message, if this mode persists one up front.
    #[must_use]
    pub fn message(&self) -> Option<&Message> {
        match self {
            Self::Text(message) | Self::Structured(message) => Some(message),
            Self::Audio(_) => None,
        }
    }
}

/// A spoken reply.
#[derive(Debug)]
pub struct AudioReply {
    pub stream: ReplyStream,
    /// Present when audio persistence is enabled.
    pub persisted: Option<PendingAudioMessage>,
}

/// Audio bytes with session failures reported as [`ChatError::StreamFailed`].
#[derive(Debug)]
pub struct ReplyStream {
    inner: AudioStream,
}

type ReplyChunk = Result<Vec<u8>, Report<ChatError>>;

impl ReplyStream {
    fn new(inner: AudioStream) -> Self {
        Self { inner }
    }

    /// Waits for the next chunk; `None` once the stream has ended.
    pub async fn next_chunk(&mut self) -> Option<ReplyChunk> {
        self.inner.next_chunk().await.map(map_chunk)
    }

    /// Reads the stream to the end and concatenates all bytes.
    ///
    /// # Errors
    ///
    /// Returns `StreamFailed` if the session failed mid-stream.
    pub async fn collect_bytes(mut self) -> Result<Vec<u8>, Report<ChatError>> {
        let mut bytes = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            bytes.extend_from_slice(&chunk?);
        }
        Ok(bytes)
    }
}

impl Stream for ReplyStream {
    type Item = ReplyChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner)
            .poll_next(cx)
            .map(|chunk| chunk.map(map_chunk))
    }
}

fn map_chunk(chunk: parley_ai::AudioChunk) -> ReplyChunk {
    chunk.map_err(|report| report.context(ChatError::StreamFailed))
}

/// The audio message being written after the stream ends.
#[derive(Debug)]
pub struct PendingAudioMessage {
    handle: JoinHandle<Result<Option<Message>, Report<ChatError>>>,
}

impl PendingAudioMessage {
    /// Waits for the write.
    ///
    /// Resolves to `None` if the stream failed or was abandoned.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceFailed` if the store rejected the message.
    pub async fn wait(self) -> Result<Option<Message>, Report<ChatError>> {
        match self.handle.await {
            Ok(result) => result,
            Err(_) => Err(ChatError::PersistenceFailed {
                operation: StoreOperation::InsertMessage,
            }
            .into()),
        }
    }
}

/// Coordinates the store, history projection and generation for each turn.
pub struct ConversationOrchestrator<S> {
    store: Arc<S>,
    gateway: GenerationGateway,
    config: OrchestratorConfig,
}

impl<S: ConversationStore + 'static> ConversationOrchestrator<S> {
    /// Creates an orchestrator.
    #[must_use]
    pub fn new(store: S, gateway: GenerationGateway, config: OrchestratorConfig) -> Self {
        Self {
            store: Arc::new(store),
            gateway,
            config,
        }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Creates a conversation owned by `owner`.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceFailed` if the store write fails.
    #[instrument(skip_all, fields(owner = %owner))]
    pub async fn create_conversation(
        &self,
        owner: &OwnerId,
    ) -> Result<Conversation, Report<ChatError>> {
        let conversation = self
            .store
            .insert_conversation(owner)
            .await
            .map_err(persistence(StoreOperation::InsertConversation))?;
        debug!(conversation = %conversation.id, "conversation created");
        Ok(conversation)
    }

    /// Runs one turn: records the prompt, generates a reply and records it.
    ///
    /// # Errors
    ///
    /// - `ValidationFailed` if the prompt is blank or the schema is not an
    ///   object; nothing is written
    /// - `NotFound` if `owner` has no such conversation; nothing is written
    /// - `PersistenceFailed` if either write or the log read fails
    /// - `GenerationFailed` if the backend fails; the user message stays
    #[instrument(
        skip_all,
        fields(owner = %owner, conversation = %conversation_id, kind = %mode.kind())
    )]
    pub async fn converse(
        &self,
        owner: &OwnerId,
        conversation_id: ConversationId,
        prompt: &str,
        mode: &GenerationMode,
    ) -> Result<Exchange, Report<ChatError>> {
        validate(prompt, mode)?;
        self.find_owned(owner, conversation_id).await?;

        let user_message = self
            .store
            .insert_message(NewMessage::user_text(conversation_id, prompt, owner))
            .await
            .map_err(persistence(StoreOperation::InsertMessage))?;

        let messages = self
            .store
            .get_messages(conversation_id)
            .await
            .map_err(persistence(StoreOperation::GetMessages))?;
        let history = history::project(&messages, user_message.id);
        debug!(history = history.len(), "history projected");

        let generation = self
            .gateway
            .generate(prompt, &history, mode)
            .await
            .map_err(|report| report.context(ChatError::GenerationFailed { kind: mode.kind() }))?;

        let reply = match generation {
            Generation::Text(text) => Reply::Text(
                self.append_reply(owner, conversation_id, MessageKind::Text, text)
                    .await?,
            ),
            Generation::Structured(value) => Reply::Structured(
                self.append_reply(owner, conversation_id, MessageKind::Json, value.to_string())
                    .await?,
            ),
            Generation::Audio(stream) => Reply::Audio(self.audio_reply(owner, conversation_id, stream)),
        };

        Ok(Exchange {
            user_message,
            reply,
        })
    }

    /// Returns the conversation and its messages in ascending creation order.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `owner` has no such conversation, or
    /// `PersistenceFailed` if the store read fails.
    #[instrument(skip_all, fields(owner = %owner, conversation = %conversation_id))]
    pub async fn get_conversation(
        &self,
        owner: &OwnerId,
        conversation_id: ConversationId,
    ) -> Result<Transcript, Report<ChatError>> {
        let conversation = self.find_owned(owner, conversation_id).await?;
        let messages = self
            .store
            .get_messages(conversation_id)
            .await
            .map_err(persistence(StoreOperation::GetMessages))?;
        Ok(Transcript {
            conversation,
            messages,
        })
    }

    /// Lists `owner`'s conversations, most recent first. Empty if none exist.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceFailed` if the store read fails.
    #[instrument(skip_all, fields(owner = %owner))]
    pub async fn list_conversations(
        &self,
        owner: &OwnerId,
    ) -> Result<Vec<Conversation>, Report<ChatError>> {
        self.store
            .list_conversations(owner)
            .await
            .map_err(persistence(StoreOperation::ListConversations))
    }

    /// Another owner's conversation is indistinguishable from a missing one.
    async fn find_owned(
        &self,
        owner: &OwnerId,
        conversation_id: ConversationId,
    ) -> Result<Conversation, Report<ChatError>> {
        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await
            .map_err(persistence(StoreOperation::GetConversation))?;
        match conversation {
            Some(conversation) if conversation.is_owned_by(owner) => Ok(conversation),
            _ => Err(ChatError::NotFound {
                id: conversation_id,
            }
            .into()),
        }
    }

    async fn append_reply(
        &self,
        owner: &OwnerId,
        conversation_id: ConversationId,
        kind: MessageKind,
        content: String,
    ) -> Result<Message, Report<ChatError>> {
        let draft = NewMessage::new(conversation_id, MessageRole::Assistant, kind, content, owner);
        self.store
            .insert_message(draft)
            .await
            .map_err(persistence(StoreOperation::InsertMessage))
    }

    fn audio_reply(
        &self,
        owner: &OwnerId,
        conversation_id: ConversationId,
        stream: AudioStream,
    ) -> AudioReply {
        if self.config.audio_persistence == AudioPersistence::Discard {
            return AudioReply {
                stream: ReplyStream::new(stream),
                persisted: None,
            };
        }

        let (stream, recording) = stream.record(self.config.audio_buffer);
        let store = Arc::clone(&self.store);
        let owner = owner.clone();
        let handle = tokio::spawn(async move {
            let Ok(bytes) = recording.await else {
                debug!("audio stream did not finish cleanly, nothing persisted");
                return Ok(None);
            };
            let draft = NewMessage::new(
                conversation_id,
                MessageRole::Assistant,
                MessageKind::Audio,
                BASE64.encode(bytes),
                &owner,
            );
            store
                .insert_message(draft)
                .await
                .map(Some)
                .map_err(persistence(StoreOperation::InsertMessage))
        });

        AudioReply {
            stream: ReplyStream::new(stream),
            persisted: Some(PendingAudioMessage { handle }),
        }
    }
}

impl<S> std::fmt::Debug for ConversationOrchestrator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationOrchestrator")
            .field("gateway", &self.gateway)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn validate(prompt: &str, mode: &GenerationMode) -> Result<(), Report<ChatError>> {
    if prompt.trim().is_empty() {
        return Err(ChatError::ValidationFailed {
            reason: "prompt must not be empty".to_string(),
        }
        .into());
    }
    if let GenerationMode::Structured(schema) = mode {
        if !schema.schema.is_object() {
            return Err(ChatError::ValidationFailed {
                reason: format!("schema '{}' must be a JSON object", schema.name),
            }
            .into());
        }
    }
    Ok(())
}

fn persistence(
    operation: StoreOperation,
) -> impl FnOnce(Report<StoreError>) -> Report<ChatError> {
    move |report| report.context(ChatError::PersistenceFailed { operation })
}
