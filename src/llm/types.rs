//! LLM types — provider-neutral chat messages, errors, and the client traits.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ErrorCode;

// =============================================================================
// ERROR
// =============================================================================

/// Errors produced by LLM client operations.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// No API key was supplied when building a client.
    #[error("Gemini API key is not set")]
    MissingApiKey,

    /// The HTTP request to the provider failed.
    #[error("API request failed: {0}")]
    ApiRequest(String),

    /// The provider returned a non-success HTTP status.
    #[error("API response error: status {status}: {message}")]
    ApiResponse { status: u16, message: String },

    /// The provider response body could not be interpreted.
    #[error("API response parse failed: {0}")]
    ApiParse(String),

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),

    /// No response (or no next increment) arrived in time.
    #[error("timed out after {0}s waiting for the model")]
    Timeout(u64),
}

impl ErrorCode for LlmError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::MissingApiKey => "E_MISSING_API_KEY",
            Self::ApiRequest(_) => "E_API_REQUEST",
            Self::ApiResponse { .. } => "E_API_RESPONSE",
            Self::ApiParse(_) => "E_API_PARSE",
            Self::HttpClientBuild(_) => "E_HTTP_CLIENT_BUILD",
            Self::Timeout(_) => "E_LLM_TIMEOUT",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::ApiRequest(_) | Self::Timeout(_) | Self::ApiResponse { status: 429 | 500..=599, .. })
    }
}

// =============================================================================
// MESSAGE TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
        }
    }
}

/// A single turn in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn model(content: impl Into<String>) -> Self {
        Self { role: Role::Model, content: content.into() }
    }
}

/// Incremental text from a streamed reply. The channel closes when the reply
/// is complete; an `Err` item ends the stream early.
pub type TextStream = mpsc::Receiver<Result<String, LlmError>>;

/// A one-shot request whose reply must conform to `schema`.
#[derive(Debug, Clone, Copy)]
pub struct StructuredRequest<'a> {
    pub system: &'a str,
    pub prompt: &'a str,
    pub schema: &'a serde_json::Value,
}

// =============================================================================
// CLIENT TRAITS
// =============================================================================

/// Provider-neutral async chat client. Enables mocking in tests.
#[async_trait::async_trait]
pub trait LlmChat: Send + Sync {
    /// Stream a reply to `history`, whose last entry is the new user turn.
    ///
    /// # Errors
    ///
    /// Returns an [`LlmError`] if the request cannot be started. Failures after
    /// the first byte arrive as `Err` items on the stream.
    async fn stream_chat(&self, model: &str, system: &str, history: &[ChatMessage]) -> Result<TextStream, LlmError>;

    /// Send one schema-constrained request and return the raw reply text.
    ///
    /// # Errors
    ///
    /// Returns an [`LlmError`] if the request fails or the reply is empty.
    async fn generate_structured(&self, model: &str, request: StructuredRequest<'_>) -> Result<String, LlmError>;
}

/// Builds an [`LlmChat`] bound to one API key.
pub trait LlmConnector: Send + Sync {
    /// # Errors
    ///
    /// Returns [`LlmError::MissingApiKey`] for a blank key or
    /// [`LlmError::HttpClientBuild`] if the client cannot be constructed.
    fn connect(&self, api_key: &str) -> Result<Arc<dyn LlmChat>, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&ChatMessage::model("hi")).unwrap();
        assert_eq!(json, r#"{"role":"model","content":"hi"}"#);
    }

    #[test]
    fn server_errors_are_retryable() {
        assert!(LlmError::ApiResponse { status: 503, message: String::new() }.retryable());
        assert!(LlmError::ApiResponse { status: 429, message: String::new() }.retryable());
        assert!(!LlmError::ApiResponse { status: 400, message: String::new() }.retryable());
        assert!(!LlmError::MissingApiKey.retryable());
    }

    #[test]
    fn error_codes_are_distinct() {
        assert_eq!(LlmError::Timeout(3).error_code(), "E_LLM_TIMEOUT");
        assert_eq!(LlmError::ApiParse(String::new()).error_code(), "E_API_PARSE");
    }
}
