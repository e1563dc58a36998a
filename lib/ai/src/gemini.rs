//! Gemini REST backend for text and structured generation.

use crate::backend::{LlmBackend, LlmMessage};
use crate::error::LlmError;
use crate::schema::OutputSchema;
use async_trait::async_trait;
use parley_core::MessageRole;
use reqwest::StatusCode;
use rootcause::Report;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, instrument};

/// Default REST endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default model for text and structured generation.
pub const DEFAULT_TEXT_MODEL: &str = "gemini-3-flash-preview";

/// Connection settings for [`GeminiBackend`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// API key sent as `x-goog-api-key`.
    pub api_key: String,
    /// REST base URL.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
}

impl GeminiConfig {
    /// Creates a config for the default endpoint and model.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_TEXT_MODEL.to_string(),
        }
    }

    /// Overrides the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Overrides the base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

/// Text/structured backend talking to the Gemini `generateContent` API.
#[derive(Debug, Clone)]
pub struct GeminiBackend {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiBackend {
    /// Creates a backend with a fresh HTTP client.
    #[must_use]
    pub fn new(config: GeminiConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    /// Creates a backend reusing an existing HTTP client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, config: GeminiConfig) -> Self {
        Self { client, config }
    }

    async fn generate(&self, body: &GenerateRequest) -> Result<String, Report<LlmError>> {
        let response = self
            .client
            .post(self.config.endpoint())
            .header("x-goog-api-key", &self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(LlmError::RateLimited { retry_after_secs }.into());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::BackendRejected {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let parsed: GenerateResponse =
            response
                .json()
                .await
                .map_err(|e| LlmError::ResponseParseFailed {
                    reason: e.to_string(),
                })?;
        let text = parsed.into_text()?;
        debug!(chars = text.len(), "generation complete");
        Ok(text)
    }
}

#[async_trait]
impl LlmBackend for GeminiBackend {
    #[instrument(skip_all, fields(model = %self.config.model, messages = messages.len()))]
    async fn generate_text(&self, messages: &[LlmMessage]) -> Result<String, Report<LlmError>> {
        self.generate(&GenerateRequest::new(messages, None)).await
    }

    #[instrument(skip_all, fields(model = %self.config.model, schema = %schema.name))]
    async fn generate_structured(
        &self,
        messages: &[LlmMessage],
        schema: &OutputSchema,
    ) -> Result<JsonValue, Report<LlmError>> {
        let text = self
            .generate(&GenerateRequest::new(messages, Some(schema)))
            .await?;
        serde_json::from_str(&text).map_err(|e| {
            LlmError::ResponseParseFailed {
                reason: format!("structured output is not JSON: {e}"),
            }
            .into()
        })
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

/// A `Content` block as used by both the REST and live APIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub(crate) fn text(role: Option<&str>, text: &str) -> Self {
        Self {
            role: role.map(str::to_string),
            parts: vec![Part {
                text: Some(text.to_string()),
                inline_data: None,
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InlineData {
    #[serde(default)]
    pub mime_type: Option<String>,
    pub data: String,
}

/// Gemini only knows `user` and `model`; system turns go elsewhere.
pub(crate) fn wire_role(role: MessageRole) -> Option<&'static str> {
    match role {
        MessageRole::User => Some("user"),
        MessageRole::Assistant => Some("model"),
        MessageRole::System => None,
    }
}

/// Splits messages into the joined system instruction and the dialogue turns.
pub(crate) fn split_system(messages: &[LlmMessage]) -> (Option<String>, Vec<Content>) {
    let mut system = Vec::new();
    let mut contents = Vec::new();
    for message in messages {
        match wire_role(message.role) {
            Some(role) => contents.push(Content::text(Some(role), &message.content)),
            None => system.push(message.content.as_str()),
        }
    }
    let system = (!system.is_empty()).then(|| system.join("\n\n"));
    (system, contents)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    response_schema: JsonValue,
}

impl GenerateRequest {
    fn new(messages: &[LlmMessage], schema: Option<&OutputSchema>) -> Self {
        let (system, contents) = split_system(messages);
        Self {
            contents,
            system_instruction: system.map(|s| Content::text(None, &s)),
            generation_config: schema.map(|schema| GenerationConfig {
                response_mime_type: "application/json",
                response_schema: schema.schema.clone(),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GenerateResponse {
    fn into_text(self) -> Result<String, Report<LlmError>> {
        let text: String = self
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect()
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(LlmError::EmptyResponse.into());
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn endpoint_includes_model() {
        let config = GeminiConfig::new("key")
            .with_base_url("http://localhost:8080/v1beta/")
            .with_model("tiny");
        assert_eq!(
            config.endpoint(),
            "http://localhost:8080/v1beta/models/tiny:generateContent"
        );
    }

    #[test]
    fn request_maps_roles_and_folds_system() {
        let messages = vec![
            LlmMessage::system("Be terse."),
            LlmMessage::user("Hi"),
            LlmMessage::assistant("Hello"),
            LlmMessage::user("Bye"),
        ];
        let body = serde_json::to_value(GenerateRequest::new(&messages, None)).expect("serialize");

        assert_eq!(
            body,
            json!({
                "contents": [
                    {"role": "user", "parts": [{"text": "Hi"}]},
                    {"role": "model", "parts": [{"text": "Hello"}]},
                    {"role": "user", "parts": [{"text": "Bye"}]}
                ],
                "systemInstruction": {"parts": [{"text": "Be terse."}]}
            })
        );
    }

    #[test]
    fn structured_request_sets_json_mime_type() {
        let schema = OutputSchema::new("answer", json!({"type": "object"}));
        let body = serde_json::to_value(GenerateRequest::new(
            &[LlmMessage::user("Give me JSON")],
            Some(&schema),
        ))
        .expect("serialize");

        assert_eq!(
            body["generationConfig"],
            json!({
                "responseMimeType": "application/json",
                "responseSchema": {"type": "object"}
            })
        );
        assert!(body.get("systemInstruction").is_none());
    }

    #[test]
    fn response_text_joins_parts() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Hel"}, {"text": "lo"}]}
            }]
        }))
        .expect("deserialize");
        assert_eq!(response.into_text().expect("text"), "Hello");
    }

    #[test]
    fn response_without_candidates_is_empty() {
        let response: GenerateResponse =
            serde_json::from_value(json!({"promptFeedback": {"blockReason": "SAFETY"}}))
                .expect("deserialize");
        let err = response.into_text().expect_err("no content");
        assert_eq!(err.current_context(), &LlmError::EmptyResponse);
    }
}
