//! Chat service — streamed conversation with the model plus code-block runs.
//!
//! DESIGN
//! ======
//! The orchestrator owns the displayed conversation and a backend session.
//! A session pins the model, system instruction, and client, and keeps its
//! own history; `rebuild` swaps in a fresh one. A reply that is still
//! streaming holds its original session and appends to that history when it
//! completes, so a rebuild never mixes conversations.
//!
//! `send` is split into [`ChatOrchestrator::begin_send`], which checks and
//! sets the streaming flag under one lock and inserts the placeholder, and
//! [`PendingReply::run`], which consumes the stream. Each reset bumps an
//! epoch; a reply from an older epoch stops writing to the display. A reply
//! started by [`ChatOrchestrator::send`] runs as a task that reset aborts,
//! closing the upstream stream.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::AbortHandle;
use tracing::{info, warn};
use uuid::Uuid;

use super::execution::{BlockId, ExecutionError, ExecutionOrchestrator, ExecutionRecord, MISSING_KEY_BANNER};
use super::feed::ChangeFeed;
use super::message::{self, MessagePart, PartKind};
use crate::error::ErrorCode;
use crate::llm::{ChatMessage, LlmChat, LlmConnector, LlmError, Role};
use crate::settings::{ModelFamily, SettingsStore};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant specialized in software development.";
pub const MISSING_KEY_MESSAGE: &str = "Gemini API Key is not set. Please add it in the settings panel.";
pub const NOT_INITIALIZED_MESSAGE: &str = "Chat is not initialized. Please check your API key in settings.";

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("Chat is not initialized. Please check your API key in settings.")]
    NotInitialized,
    #[error("message is empty")]
    EmptyMessage,
    #[error("a reply is still streaming")]
    Busy,
    #[error("no code block at {0}")]
    BlockNotFound(BlockId),
}

impl ErrorCode for ChatError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotInitialized => "E_CHAT_NOT_INITIALIZED",
            Self::EmptyMessage => "E_EMPTY_MESSAGE",
            Self::Busy => "E_CHAT_BUSY",
            Self::BlockNotFound(_) => "E_BLOCK_NOT_FOUND",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Busy)
    }
}

/// Backend conversation bound to one client, model, and system instruction.
struct ChatSession {
    id: Uuid,
    model: ModelFamily,
    system: String,
    client: Arc<dyn LlmChat>,
    history: Mutex<Vec<ChatMessage>>,
}

struct ChatInner {
    system_prompt: String,
    messages: Vec<ChatMessage>,
    streaming: bool,
    error: Option<String>,
    session: Option<Arc<ChatSession>>,
    epoch: u64,
    /// Task streaming the current reply, if `send` started one.
    reply: Option<AbortHandle>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    pub role: Role,
    pub content: String,
    pub parts: Vec<MessagePart>,
}

impl MessageView {
    fn from_message(message: &ChatMessage) -> Self {
        let parts = match message.role {
            Role::Model => message::parse(&message.content),
            Role::User => vec![MessagePart { kind: PartKind::Text, content: message.content.clone(), language: None }],
        };
        Self { role: message.role, content: message.content.clone(), parts }
    }
}

/// Everything the chat pane renders.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSnapshot {
    pub revision: u64,
    pub session_id: Option<Uuid>,
    pub system_prompt: String,
    pub messages: Vec<MessageView>,
    pub records: BTreeMap<String, ExecutionRecord>,
    pub streaming: bool,
    pub error: Option<String>,
}

// =============================================================================
// ORCHESTRATOR
// =============================================================================

pub struct ChatOrchestrator {
    inner: Arc<RwLock<ChatInner>>,
    connector: Arc<dyn LlmConnector>,
    settings: Arc<SettingsStore>,
    execution: ExecutionOrchestrator,
    feed: ChangeFeed,
    chunk_timeout: Duration,
}

impl ChatOrchestrator {
    /// Build the orchestrator and its first session.
    pub async fn new(
        connector: Arc<dyn LlmConnector>,
        settings: Arc<SettingsStore>,
        execution: ExecutionOrchestrator,
        feed: ChangeFeed,
        chunk_timeout: Duration,
    ) -> Self {
        let chat = Self {
            inner: Arc::new(RwLock::new(ChatInner {
                system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
                messages: Vec::new(),
                streaming: false,
                error: None,
                session: None,
                epoch: 0,
                reply: None,
            })),
            connector,
            settings,
            execution,
            feed,
            chunk_timeout,
        };
        chat.rebuild().await;
        chat
    }

    /// Replace the backend session using the current key, model, and system
    /// prompt. The displayed conversation is kept.
    pub async fn rebuild(&self) {
        let settings = self.settings.current();
        let mut inner = self.inner.write().await;
        inner.error = None;
        inner.session = None;

        if settings.has_gemini_key() {
            match self.connector.connect(&settings.gemini_api_key) {
                Ok(client) => {
                    let session = ChatSession {
                        id: Uuid::new_v4(),
                        model: settings.model,
                        system: inner.system_prompt.clone(),
                        client,
                        history: Mutex::new(Vec::new()),
                    };
                    info!(session = %session.id, model = settings.model.as_str(), "chat: session ready");
                    inner.session = Some(Arc::new(session));
                }
                Err(e) => {
                    warn!(error = %e, "chat: session init failed");
                    inner.error = Some(format!("Failed to initialize AI Studio. Error: {e}"));
                }
            }
        } else {
            inner.error = Some(MISSING_KEY_MESSAGE.to_string());
        }
        drop(inner);
        self.feed.bump();
    }

    /// Append the user turn and an empty model placeholder, and enter the
    /// streaming state.
    ///
    /// # Errors
    ///
    /// [`ChatError::EmptyMessage`] for blank input, [`ChatError::Busy`] while a
    /// reply streams, and [`ChatError::NotInitialized`] without a session (the
    /// banner is set in that case).
    pub async fn begin_send(&self, text: &str) -> Result<PendingReply, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let mut inner = self.inner.write().await;
        if inner.streaming {
            return Err(ChatError::Busy);
        }
        let Some(session) = inner.session.clone() else {
            inner.error = Some(NOT_INITIALIZED_MESSAGE.to_string());
            drop(inner);
            self.feed.bump();
            return Err(ChatError::NotInitialized);
        };

        inner.error = None;
        inner.streaming = true;
        inner.messages.push(ChatMessage::user(text));
        inner.messages.push(ChatMessage::model(""));
        let placeholder = inner.messages.len() - 1;
        let epoch = inner.epoch;
        drop(inner);
        self.feed.bump();
        info!(session = %session.id, len = text.len(), "chat: send");

        Ok(PendingReply {
            inner: self.inner.clone(),
            feed: self.feed.clone(),
            session,
            user: ChatMessage::user(text),
            placeholder,
            epoch,
            chunk_timeout: self.chunk_timeout,
        })
    }

    /// Send and stream the reply in the background.
    ///
    /// # Errors
    ///
    /// Same as [`Self::begin_send`].
    pub async fn send(&self, text: &str) -> Result<(), ChatError> {
        let pending = self.begin_send(text).await?;
        let epoch = pending.epoch;
        let reply = tokio::spawn(pending.run()).abort_handle();

        let mut inner = self.inner.write().await;
        if inner.epoch == epoch {
            inner.reply = Some(reply);
        } else {
            reply.abort();
        }
        Ok(())
    }

    /// Clear the conversation and execution records, then rebuild. A reply
    /// still streaming is aborted.
    pub async fn reset(&self) {
        {
            let mut inner = self.inner.write().await;
            if let Some(reply) = inner.reply.take() {
                reply.abort();
                info!("chat: streaming reply aborted");
            }
            inner.messages.clear();
            inner.streaming = false;
            inner.epoch += 1;
        }
        self.execution.clear().await;
        self.rebuild().await;
        info!("chat: reset");
    }

    pub async fn set_system_prompt(&self, text: &str) {
        self.inner.write().await.system_prompt = text.to_string();
        self.rebuild().await;
    }

    /// Run the code block at (`message`, `part`) and return its fresh record.
    ///
    /// # Errors
    ///
    /// [`ChatError::BlockNotFound`] if that position is not a code part of a
    /// model message.
    pub async fn run_block(&self, block: BlockId) -> Result<ExecutionRecord, ChatError> {
        let (language, code) = self.code_block(block).await?;
        match self.execution.run(block, &language, &code).await {
            Ok(()) => {}
            Err(ExecutionError::MissingApiKey) => {
                self.inner.write().await.error = Some(MISSING_KEY_BANNER.to_string());
                self.feed.bump();
            }
            Err(ExecutionError::UnsupportedLanguage(_)) => {}
        }
        Ok(self.execution.record(block).await.unwrap_or_default())
    }

    pub async fn cancel_block(&self, block: BlockId) -> bool {
        self.execution.cancel(block).await
    }

    async fn code_block(&self, block: BlockId) -> Result<(String, String), ChatError> {
        let inner = self.inner.read().await;
        let message = inner
            .messages
            .get(block.message)
            .filter(|m| m.role == Role::Model)
            .ok_or(ChatError::BlockNotFound(block))?;
        message::parse(&message.content)
            .into_iter()
            .nth(block.part)
            .filter(|p| p.kind == PartKind::Code)
            .map(|p| (p.language.unwrap_or_default(), p.content))
            .ok_or(ChatError::BlockNotFound(block))
    }

    pub async fn snapshot(&self) -> ChatSnapshot {
        let revision = self.feed.revision();
        let records = self
            .execution
            .records()
            .await
            .into_iter()
            .map(|(id, record)| (id.to_string(), record))
            .collect();
        let inner = self.inner.read().await;
        ChatSnapshot {
            revision,
            session_id: inner.session.as_ref().map(|s| s.id),
            system_prompt: inner.system_prompt.clone(),
            messages: inner.messages.iter().map(MessageView::from_message).collect(),
            records,
            streaming: inner.streaming,
            error: inner.error.clone(),
        }
    }

    #[must_use]
    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }
}

// =============================================================================
// STREAMING
// =============================================================================

/// A reply in flight. Consumed by [`PendingReply::run`].
pub struct PendingReply {
    inner: Arc<RwLock<ChatInner>>,
    feed: ChangeFeed,
    session: Arc<ChatSession>,
    user: ChatMessage,
    placeholder: usize,
    epoch: u64,
    chunk_timeout: Duration,
}

impl PendingReply {
    /// Consume the stream, updating the placeholder with the running text.
    /// Streaming always ends, with the reply or an error in the placeholder.
    pub async fn run(self) {
        match self.stream().await {
            Ok(reply) => {
                info!(session = %self.session.id, len = reply.len(), "chat: reply complete");
                self.session
                    .history
                    .lock()
                    .await
                    .extend([self.user.clone(), ChatMessage::model(reply)]);
                self.finish(None).await;
            }
            Err(e) => {
                warn!(session = %self.session.id, error = %e, "chat: reply failed");
                let message = format!("An error occurred with the Gemini API: {e}. Check your key and permissions.");
                self.finish(Some(message)).await;
            }
        }
    }

    async fn stream(&self) -> Result<String, LlmError> {
        let mut history = self.session.history.lock().await.clone();
        history.push(self.user.clone());

        let secs = self.chunk_timeout.as_secs();
        let mut stream = tokio::time::timeout(
            self.chunk_timeout,
            self.session
                .client
                .stream_chat(self.session.model.as_str(), &self.session.system, &history),
        )
        .await
        .map_err(|_| LlmError::Timeout(secs))??;

        let mut reply = String::new();
        loop {
            match tokio::time::timeout(self.chunk_timeout, stream.recv()).await {
                Err(_) => return Err(LlmError::Timeout(secs)),
                Ok(None) => return Ok(reply),
                Ok(Some(Err(e))) => return Err(e),
                Ok(Some(Ok(chunk))) => {
                    reply.push_str(&chunk);
                    self.write_placeholder(&reply).await;
                }
            }
        }
    }

    async fn write_placeholder(&self, text: &str) {
        let mut inner = self.inner.write().await;
        if inner.epoch != self.epoch {
            return;
        }
        if let Some(message) = inner.messages.get_mut(self.placeholder) {
            message.content = text.to_string();
        }
        drop(inner);
        self.feed.bump();
    }

    async fn finish(&self, error: Option<String>) {
        let mut inner = self.inner.write().await;
        if inner.epoch != self.epoch {
            return;
        }
        inner.streaming = false;
        if let Some(message) = error {
            if let Some(placeholder) = inner.messages.get_mut(self.placeholder) {
                placeholder.content = format!("**Error:** {message}");
            }
            inner.error = Some(message);
        }
        drop(inner);
        self.feed.bump();
    }
}

#[cfg(test)]
#[path = "chat_test.rs"]
mod tests;
