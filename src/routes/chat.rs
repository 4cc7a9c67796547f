//! Chat pane routes: conversation, SSE revision feed, and code-block runs.
//!
//! DESIGN
//! ======
//! Mutations return immediately; streamed replies and execution output land
//! in the chat snapshot. `GET /api/chat/events` emits a `revision` event each
//! time the snapshot changes so the client knows to re-fetch it.

use std::convert::Infallible;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::watch;

use crate::error::ApiError;
use crate::services::chat::{ChatError, ChatSnapshot};
use crate::services::execution::{BlockId, ExecutionRecord};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SendBody {
    pub text: String,
}

#[derive(Deserialize)]
pub struct SystemPromptBody {
    pub text: String,
}

/// `GET /api/chat`
pub async fn get_chat(State(state): State<AppState>) -> Json<ChatSnapshot> {
    Json(state.chat.snapshot().await)
}

/// `POST /api/chat/messages` — start a reply; 409 while one is streaming.
pub async fn send_message(
    State(state): State<AppState>,
    Json(body): Json<SendBody>,
) -> Result<(StatusCode, Json<ChatSnapshot>), ApiError> {
    state.chat.send(&body.text).await.map_err(chat_error)?;
    Ok((StatusCode::ACCEPTED, Json(state.chat.snapshot().await)))
}

/// `POST /api/chat/reset`
pub async fn reset(State(state): State<AppState>) -> Json<ChatSnapshot> {
    state.chat.reset().await;
    Json(state.chat.snapshot().await)
}

/// `PUT /api/chat/system-prompt`
pub async fn set_system_prompt(
    State(state): State<AppState>,
    Json(body): Json<SystemPromptBody>,
) -> Json<ChatSnapshot> {
    state.chat.set_system_prompt(&body.text).await;
    Json(state.chat.snapshot().await)
}

/// `GET /api/chat/events` — server-sent `revision` events.
pub async fn events(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = revision_stream(state.chat.feed().subscribe())
        .map(|revision| Ok::<_, Infallible>(Event::default().event("revision").data(revision.to_string())));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Current revision, then each later one. Skips revisions that land between
/// polls.
fn revision_stream(mut rx: watch::Receiver<u64>) -> impl Stream<Item = u64> {
    rx.mark_changed();
    futures::stream::unfold(rx, |mut rx| async move {
        rx.changed().await.ok()?;
        let revision = *rx.borrow_and_update();
        Some((revision, rx))
    })
}

/// `POST /api/chat/blocks/{message}/{part}/run`
pub async fn run_block(
    State(state): State<AppState>,
    Path((message, part)): Path<(usize, usize)>,
) -> Result<Json<ExecutionRecord>, ApiError> {
    let record = state
        .chat
        .run_block(BlockId::new(message, part))
        .await
        .map_err(chat_error)?;
    Ok(Json(record))
}

/// `POST /api/chat/blocks/{message}/{part}/cancel`
pub async fn cancel_block(
    State(state): State<AppState>,
    Path((message, part)): Path<(usize, usize)>,
) -> Json<serde_json::Value> {
    let cancelled = state.chat.cancel_block(BlockId::new(message, part)).await;
    Json(serde_json::json!({ "cancelled": cancelled }))
}

pub(crate) fn chat_error_to_status(err: &ChatError) -> StatusCode {
    match err {
        ChatError::EmptyMessage => StatusCode::BAD_REQUEST,
        ChatError::Busy => StatusCode::CONFLICT,
        ChatError::NotInitialized => StatusCode::PRECONDITION_FAILED,
        ChatError::BlockNotFound(_) => StatusCode::NOT_FOUND,
    }
}

fn chat_error(err: ChatError) -> ApiError {
    ApiError::new(chat_error_to_status(&err), &err)
}

#[cfg(test)]
#[path = "chat_test.rs"]
mod tests;
