//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the settings store and one instance of each service. Services
//! receive the settings store by reference instead of reading a global.

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::llm::LlmConnector;
use crate::sandbox::SandboxProvider;
use crate::services::chat::ChatOrchestrator;
use crate::services::execution::ExecutionOrchestrator;
use crate::services::feed::ChangeFeed;
use crate::services::finder::{Finder, FinderKind};
use crate::services::view::ViewController;
use crate::settings::{AppSettings, SettingsError, SettingsStore};

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<SettingsStore>,
    pub chat: Arc<ChatOrchestrator>,
    pub model_finder: Arc<Finder>,
    pub lora_finder: Arc<Finder>,
    pub new_models: Arc<Finder>,
    pub view: Arc<ViewController>,
}

impl AppState {
    pub async fn new(
        config: &AppConfig,
        settings: Arc<SettingsStore>,
        connector: Arc<dyn LlmConnector>,
        sandboxes: Arc<dyn SandboxProvider>,
    ) -> Self {
        let feed = ChangeFeed::new();
        let execution = ExecutionOrchestrator::new(sandboxes, settings.clone(), &config.sandbox, feed.clone());
        let chat = ChatOrchestrator::new(
            connector.clone(),
            settings.clone(),
            execution,
            feed,
            Duration::from_secs(config.chat_chunk_timeout_secs),
        )
        .await;

        let finder_timeout = Duration::from_secs(config.llm.timeouts.request_secs);
        let finder = |kind| Arc::new(Finder::new(kind, connector.clone(), settings.clone(), finder_timeout));

        Self {
            model_finder: finder(FinderKind::Models),
            lora_finder: finder(FinderKind::Loras),
            new_models: finder(FinderKind::NewModels),
            settings,
            chat: Arc::new(chat),
            view: Arc::new(ViewController::default()),
        }
    }

    #[must_use]
    pub fn finder(&self, kind: FinderKind) -> &Finder {
        match kind {
            FinderKind::Models => &self.model_finder,
            FinderKind::Loras => &self.lora_finder,
            FinderKind::NewModels => &self.new_models,
        }
    }

    /// Persist new settings. The chat session is rebuilt only when the
    /// Gemini key or model changed.
    ///
    /// # Errors
    ///
    /// Returns a [`SettingsError`] if the blob cannot be written; the chat
    /// session is left as it was.
    pub async fn save_settings(&self, settings: AppSettings) -> Result<(), SettingsError> {
        let previous = self.settings.current();
        let rebuild = previous.gemini_api_key != settings.gemini_api_key || previous.model != settings.model;
        self.settings.save(settings).await?;
        if rebuild {
            self.chat.rebuild().await;
        }
        Ok(())
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
mod tests {
    use super::test_helpers::*;
    use super::*;
    use crate::llm::ChatMessage;
    use crate::settings::ModelFamily;

    #[tokio::test]
    async fn new_state_without_key_shows_banner() {
        let state = test_app_state(MockLlm::default(), "", "").await;
        let snapshot = state.chat.snapshot().await;
        assert!(snapshot.session_id.is_none());
        assert!(snapshot.error.unwrap().contains("Gemini API Key is not set"));
    }

    #[tokio::test]
    async fn save_settings_rebuilds_chat() {
        let state = test_app_state(MockLlm::default(), "", "").await;
        let settings = AppSettings { gemini_api_key: "g".into(), e2b_api_key: String::new(), model: ModelFamily::Gemini25Flash };
        state.save_settings(settings.clone()).await.unwrap();

        assert_eq!(state.settings.current(), settings);
        let snapshot = state.chat.snapshot().await;
        assert!(snapshot.session_id.is_some());
        assert!(snapshot.error.is_none());
    }

    #[tokio::test]
    async fn sandbox_key_change_keeps_chat_history() {
        let connector = MockConnector::new(MockLlm::streaming(&["Hello"]));
        let state = AppState::new(
            &test_config(),
            test_settings("g", ""),
            connector.clone(),
            MockSandboxProvider::new(MockBehavior::default()),
        )
        .await;
        state.chat.begin_send("hi").await.unwrap().run().await;
        let session = state.chat.snapshot().await.session_id;

        let mut settings = state.settings.current();
        settings.e2b_api_key = "e2b-key".into();
        state.save_settings(settings).await.unwrap();
        state.chat.begin_send("again").await.unwrap().run().await;

        assert_eq!(state.chat.snapshot().await.session_id, session);
        assert_eq!(connector.connects(), 1);
        let calls = connector.llm.chat_calls();
        assert_eq!(
            calls[1].1,
            vec![ChatMessage::user("hi"), ChatMessage::model("Hello"), ChatMessage::user("again")]
        );
    }

    #[tokio::test]
    async fn gemini_key_change_rebuilds_chat() {
        let state = test_app_state(MockLlm::default(), "old", "").await;
        let session = state.chat.snapshot().await.session_id;

        let mut settings = state.settings.current();
        settings.gemini_api_key = "new".into();
        state.save_settings(settings).await.unwrap();

        assert_ne!(state.chat.snapshot().await.session_id, session);
    }

    #[tokio::test]
    async fn finder_lookup_matches_kind() {
        let state = test_app_state(MockLlm::default(), "g", "").await;
        for kind in [FinderKind::Models, FinderKind::Loras, FinderKind::NewModels] {
            assert_eq!(state.finder(kind).kind(), kind);
        }
    }
}
