//! Centralized server configuration.
//!
//! This module provides strongly-typed configuration for the server,
//! loaded via the `config` crate from environment variables.

use parley_ai::gemini::{DEFAULT_BASE_URL, DEFAULT_TEXT_MODEL};
use parley_ai::gemini_live::{DEFAULT_AUDIO_MODEL, DEFAULT_LIVE_URL, DEFAULT_VOICE};
use parley_ai::DEFAULT_AUDIO_BUFFER;
use serde::Deserialize;

/// Server configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// Address the HTTP listener binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Conversation behaviour.
    #[serde(default)]
    pub chat: ChatConfig,

    /// Generation backend.
    pub ai: AiConfig,
}

/// Conversation-related configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    /// Identity every request acts as until authentication exists.
    #[serde(default = "default_owner")]
    pub default_owner: String,

    /// Prepended to every generation call as a system turn.
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Whether spoken replies are appended to the transcript.
    #[serde(default)]
    pub persist_audio: bool,
}

/// Generation backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    /// Gemini API key.
    pub api_key: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_live_url")]
    pub live_url: String,

    #[serde(default = "default_text_model")]
    pub text_model: String,

    #[serde(default = "default_audio_model")]
    pub audio_model: String,

    #[serde(default = "default_voice")]
    pub voice: String,

    /// Bounded channel capacity between the live session and the response.
    #[serde(default = "default_audio_buffer")]
    pub audio_buffer: usize,
}

fn default_listen_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_owner() -> String {
    "admin".to_string()
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_live_url() -> String {
    DEFAULT_LIVE_URL.to_string()
}

fn default_text_model() -> String {
    DEFAULT_TEXT_MODEL.to_string()
}

fn default_audio_model() -> String {
    DEFAULT_AUDIO_MODEL.to_string()
}

fn default_voice() -> String {
    DEFAULT_VOICE.to_string()
}

fn default_audio_buffer() -> usize {
    DEFAULT_AUDIO_BUFFER
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_owner: default_owner(),
            system_prompt: None,
            persist_audio: false,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_config_has_correct_defaults() {
        let config = ChatConfig::default();
        assert_eq!(config.default_owner, "admin");
        assert!(config.system_prompt.is_none());
        assert!(!config.persist_audio);
    }

    #[test]
    fn minimal_config_fills_defaults() {
        let config: ServerConfig = config::Config::builder()
            .set_override("database_url", "postgres://localhost/parley")
            .unwrap()
            .set_override("ai.api_key", "secret")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:3000");
        assert_eq!(config.chat.default_owner, "admin");
        assert_eq!(config.ai.text_model, DEFAULT_TEXT_MODEL);
        assert_eq!(config.ai.voice, "Aoede");
        assert_eq!(config.ai.audio_buffer, 32);
    }

    #[test]
    fn missing_api_key_is_an_error() {
        let result: Result<ServerConfig, _> = config::Config::builder()
            .set_override("database_url", "postgres://localhost/parley")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize();
        assert!(result.is_err());
    }
}
