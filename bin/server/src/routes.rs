//! HTTP routes over the conversation orchestrator.
//!
//! Handlers only translate between JSON and orchestrator calls. Every request
//! acts as the configured owner.

use crate::error::ApiError;
use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::{HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::StreamExt;
use parley_ai::{GenerationMode, OutputSchema};
use parley_conversation::{
    AudioReply, Conversation, ConversationOrchestrator, ConversationStore, Exchange, Message,
    Reply, Transcript,
};
use parley_core::{ConversationId, OwnerId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::warn;

/// Raw PCM as produced by the live session.
pub const AUDIO_CONTENT_TYPE: &str = "audio/pcm;rate=24000";

/// Carries the persisted user message id on streamed audio responses.
pub const USER_MESSAGE_HEADER: HeaderName = HeaderName::from_static("x-user-message-id");

/// Shared application state.
pub struct AppState<S> {
    pub orchestrator: ConversationOrchestrator<S>,
    /// Identity every request acts as.
    pub owner: OwnerId,
}

impl<S> AppState<S> {
    /// Creates a new application state.
    pub fn new(orchestrator: ConversationOrchestrator<S>, owner: OwnerId) -> Self {
        Self {
            orchestrator,
            owner,
        }
    }
}

/// Body for text and audio turns.
#[derive(Debug, Deserialize)]
pub struct PromptRequest {
    pub prompt: String,
}

/// Body for structured turns.
#[derive(Debug, Deserialize)]
pub struct StructuredRequest {
    pub prompt: String,
    pub schema: JsonValue,
    #[serde(default = "default_schema_name")]
    pub name: String,
}

fn default_schema_name() -> String {
    "response".to_string()
}

/// Both persisted messages of a turn.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeResponse {
    pub user_message: Message,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_message: Option<Message>,
}

impl From<Exchange> for ExchangeResponse {
    fn from(exchange: Exchange) -> Self {
        let assistant_message = match exchange.reply {
            Reply::Text(message) | Reply::Structured(message) => Some(message),
            Reply::Audio(_) => None,
        };
        Self {
            user_message: exchange.user_message,
            assistant_message,
        }
    }
}

/// Builds the router.
pub fn router<S: ConversationStore + 'static>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        .route(
            "/conversations",
            post(create_conversation::<S>).get(list_conversations::<S>),
        )
        .route("/conversations/{id}", get(get_conversation::<S>))
        .route("/conversations/{id}/text", post(converse_text::<S>))
        .route("/conversations/{id}/json", post(converse_json::<S>))
        .route("/conversations/{id}/audio", post(converse_audio::<S>))
        .with_state(state)
}

async fn create_conversation<S: ConversationStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<(StatusCode, Json<Conversation>), ApiError> {
    let conversation = state.orchestrator.create_conversation(&state.owner).await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

async fn list_conversations<S: ConversationStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    let conversations = state.orchestrator.list_conversations(&state.owner).await?;
    Ok(Json(conversations))
}

async fn get_conversation<S: ConversationStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<ConversationId>,
) -> Result<Json<Transcript>, ApiError> {
    let transcript = state.orchestrator.get_conversation(&state.owner, id).await?;
    Ok(Json(transcript))
}

async fn converse_text<S: ConversationStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<ConversationId>,
    Json(request): Json<PromptRequest>,
) -> Result<Json<ExchangeResponse>, ApiError> {
    let exchange = state
        .orchestrator
        .converse(&state.owner, id, &request.prompt, &GenerationMode::Text)
        .await?;
    Ok(Json(exchange.into()))
}

async fn converse_json<S: ConversationStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<ConversationId>,
    Json(request): Json<StructuredRequest>,
) -> Result<Json<ExchangeResponse>, ApiError> {
    let mode = GenerationMode::Structured(OutputSchema::new(request.name, request.schema));
    let exchange = state
        .orchestrator
        .converse(&state.owner, id, &request.prompt, &mode)
        .await?;
    Ok(Json(exchange.into()))
}

async fn converse_audio<S: ConversationStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<ConversationId>,
    Json(request): Json<PromptRequest>,
) -> Result<Response, ApiError> {
    let exchange = state
        .orchestrator
        .converse(&state.owner, id, &request.prompt, &GenerationMode::Audio)
        .await?;

    let AudioReply { stream, persisted } = match exchange.reply {
        Reply::Audio(audio) => audio,
        reply => {
            let exchange = Exchange {
                user_message: exchange.user_message,
                reply,
            };
            return Ok(Json(ExchangeResponse::from(exchange)).into_response());
        }
    };

    if let Some(pending) = persisted {
        tokio::spawn(async move {
            if let Err(report) = pending.wait().await {
                warn!(error = %report.current_context(), "failed to persist audio reply");
            }
        });
    }

    // A mid-stream failure aborts the chunked body.
    let body = Body::from_stream(stream.map(|chunk| {
        chunk.map_err(|report| std::io::Error::other(report.current_context().to_string()))
    }));

    let mut response = body.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(AUDIO_CONTENT_TYPE),
    );
    if let Ok(value) = HeaderValue::from_str(&exchange.user_message.id.to_string()) {
        headers.insert(USER_MESSAGE_HEADER, value);
    }
    Ok(response)
}
