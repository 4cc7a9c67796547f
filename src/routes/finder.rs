//! Finder routes: model and LoRA search, newest-models dashboard.

use axum::Json;
use axum::extract::State;
use serde::Deserialize;

use crate::services::finder::{FinderKind, FinderView};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SearchBody {
    #[serde(default)]
    pub prompt: String,
}

// Failures are reported in the view's banner; these handlers always answer 200.

/// `POST /api/finder/models`
pub async fn search_models(State(state): State<AppState>, Json(body): Json<SearchBody>) -> Json<FinderView> {
    Json(state.finder(FinderKind::Models).search(&body.prompt).await)
}

/// `POST /api/finder/loras`
pub async fn search_loras(State(state): State<AppState>, Json(body): Json<SearchBody>) -> Json<FinderView> {
    Json(state.finder(FinderKind::Loras).search(&body.prompt).await)
}

/// `GET /api/finder/new-models`
pub async fn new_models(State(state): State<AppState>) -> Json<FinderView> {
    Json(state.finder(FinderKind::NewModels).fetch_latest().await)
}
