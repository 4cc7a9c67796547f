//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! This module binds the JSON API the studio front end talks to: settings,
//! the download-tab view, script generation, the chat pane with its SSE
//! revision feed, code-block execution, and the three finders.

pub mod chat;
pub mod finder;
pub mod settings;
pub mod view;

use axum::Router;
use axum::http::{HeaderValue, StatusCode};
use axum::routing::{get, post, put};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Full API router with CORS and request tracing. Only `cors_origins` may
/// call the API cross-origin; with none configured, browsers are held to
/// same-origin.
pub fn app(state: AppState, cors_origins: &[String]) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(allowed_origins(cors_origins))
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/settings", get(settings::get_settings).put(settings::put_settings))
        .route("/api/view", get(view::get_view))
        .route("/api/view/mode", put(view::set_mode))
        .route("/api/view/destination", put(view::set_destination))
        .route("/api/view/select", post(view::select_model))
        .route("/api/scripts", post(view::generate_script))
        .route("/api/direct-link", get(view::direct_link))
        .route("/api/chat", get(chat::get_chat))
        .route("/api/chat/messages", post(chat::send_message))
        .route("/api/chat/reset", post(chat::reset))
        .route("/api/chat/system-prompt", put(chat::set_system_prompt))
        .route("/api/chat/events", get(chat::events))
        .route("/api/chat/blocks/{message}/{part}/run", post(chat::run_block))
        .route("/api/chat/blocks/{message}/{part}/cancel", post(chat::cancel_block))
        .route("/api/finder/models", post(finder::search_models))
        .route("/api/finder/loras", post(finder::search_loras))
        .route("/api/finder/new-models", get(finder::new_models))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn allowed_origins(origins: &[String]) -> AllowOrigin {
    AllowOrigin::list(origins.iter().filter_map(|origin| HeaderValue::from_str(origin).ok()))
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_helpers::{MockLlm, test_app_state};

    #[tokio::test]
    async fn healthz_is_ok() {
        assert_eq!(healthz().await, StatusCode::OK);
    }

    #[tokio::test]
    async fn router_builds_with_state() {
        let state = test_app_state(MockLlm::default(), "", "").await;
        let _router = app(state, &["http://localhost:5173".to_string()]);
    }

    async fn allow_origin_header(origin: &str) -> Option<HeaderValue> {
        use tower::ServiceExt;

        let state = test_app_state(MockLlm::default(), "", "").await;
        let router = app(state, &["http://localhost:5173".to_string()]);
        let request = axum::http::Request::builder()
            .uri("/healthz")
            .header(axum::http::header::ORIGIN, origin)
            .body(axum::body::Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        response.headers().get(axum::http::header::ACCESS_CONTROL_ALLOW_ORIGIN).cloned()
    }

    #[tokio::test]
    async fn configured_origin_is_allowed() {
        let header = allow_origin_header("http://localhost:5173").await;
        assert_eq!(header, Some(HeaderValue::from_static("http://localhost:5173")));
    }

    #[tokio::test]
    async fn foreign_origin_gets_no_cors_grant() {
        assert!(allow_origin_header("https://evil.example").await.is_none());
    }
}
