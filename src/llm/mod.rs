//! LLM — generative-AI adapter for chat and structured recommendations.
//!
//! DESIGN
//! ======
//! [`GeminiConnector`] turns an API key from the settings store into a
//! [`gemini::GeminiClient`]. Callers only see the [`LlmChat`] trait, so the
//! orchestrators can be driven by a mock in tests. A new client is built
//! whenever the key changes; clients are cheap (one `reqwest::Client`).

pub mod gemini;
pub mod types;

use std::sync::Arc;

pub use types::{ChatMessage, LlmChat, LlmConnector, LlmError, Role, StructuredRequest, TextStream};

use crate::config::LlmConfig;

// =============================================================================
// CONNECTOR
// =============================================================================

/// Builds Gemini clients from the configured base URL and timeouts.
pub struct GeminiConnector {
    config: LlmConfig,
}

impl GeminiConnector {
    #[must_use]
    pub fn new(config: LlmConfig) -> Self {
        Self { config }
    }
}

impl LlmConnector for GeminiConnector {
    fn connect(&self, api_key: &str) -> Result<Arc<dyn LlmChat>, LlmError> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }
        let client = gemini::GeminiClient::new(api_key.to_string(), &self.config.base_url, self.config.timeouts)?;
        Ok(Arc::new(client))
    }
}
