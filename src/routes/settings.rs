//! Settings routes. Keys are write-only over HTTP.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;

use crate::error::ApiError;
use crate::settings::{ModelFamily, SettingsUpdate, SettingsView};
use crate::state::AppState;

#[derive(Serialize)]
pub struct SettingsResponse {
    pub settings: SettingsView,
    pub models: Vec<&'static str>,
}

fn response(state: &AppState) -> SettingsResponse {
    SettingsResponse {
        settings: SettingsView::from(&state.settings.current()),
        models: ModelFamily::ALL.iter().map(|m| m.as_str()).collect(),
    }
}

/// `GET /api/settings` — key presence, key hints, and model.
pub async fn get_settings(State(state): State<AppState>) -> Json<SettingsResponse> {
    Json(response(&state))
}

/// `PUT /api/settings` — apply a partial edit and persist it.
pub async fn put_settings(
    State(state): State<AppState>,
    Json(body): Json<SettingsUpdate>,
) -> Result<Json<SettingsResponse>, ApiError> {
    let next = body.apply(&state.settings.current());
    state
        .save_settings(next)
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, &e))?;
    Ok(Json(response(&state)))
}
