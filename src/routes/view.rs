//! Download-tab view and script generation routes.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use serde::Deserialize;

use crate::error::ApiError;
use crate::script::{self, DownloadDestination, ScriptArtifact, ScriptError};
use crate::services::view::{DownloadMode, ScriptForm, ViewState};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ModeBody {
    pub mode: DownloadMode,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationBody {
    pub destination: DownloadDestination,
    pub gdrive_folder_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRef {
    pub repo_id: String,
    pub filename: String,
}

/// `GET /api/view`
pub async fn get_view(State(state): State<AppState>) -> Json<ViewState> {
    Json(state.view.state().await)
}

/// `PUT /api/view/mode` — switch tabs.
pub async fn set_mode(State(state): State<AppState>, Json(body): Json<ModeBody>) -> Json<ViewState> {
    Json(state.view.set_mode(body.mode).await)
}

/// `PUT /api/view/destination` — local or Drive, plus the Drive folder.
pub async fn set_destination(State(state): State<AppState>, Json(body): Json<DestinationBody>) -> Json<ViewState> {
    Json(state.view.set_destination(body.destination, body.gdrive_folder_name).await)
}

/// `POST /api/view/select` — a finder result was chosen.
pub async fn select_model(
    State(state): State<AppState>,
    Json(body): Json<ModelRef>,
) -> Result<Json<ViewState>, ApiError> {
    let view = state
        .view
        .select_model(&body.repo_id, &body.filename)
        .await
        .map_err(script_error)?;
    Ok(Json(view))
}

/// `POST /api/scripts` — generate a download script from a form.
pub async fn generate_script(
    State(state): State<AppState>,
    Json(form): Json<ScriptForm>,
) -> Result<Json<ScriptArtifact>, ApiError> {
    let artifact = state.view.generate(form).await.map_err(script_error)?;
    Ok(Json(artifact))
}

/// `GET /api/direct-link?repoId=…&filename=…`
pub async fn direct_link(Query(query): Query<ModelRef>) -> Result<Json<serde_json::Value>, ApiError> {
    if query.repo_id.trim().is_empty() {
        return Err(script_error(ScriptError::MissingField("repoId")));
    }
    if query.filename.trim().is_empty() {
        return Err(script_error(ScriptError::MissingField("filename")));
    }
    let url = script::direct_download_url(&query.repo_id, &query.filename);
    Ok(Json(serde_json::json!({ "url": url })))
}

pub(crate) fn script_error_to_status(err: &ScriptError) -> StatusCode {
    match err {
        ScriptError::MissingField(_) | ScriptError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
    }
}

fn script_error(err: ScriptError) -> ApiError {
    ApiError::new(script_error_to_status(&err), &err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_helpers::{MockLlm, test_app_state};

    #[test]
    fn script_errors_are_bad_requests() {
        assert_eq!(script_error_to_status(&ScriptError::MissingField("url")), StatusCode::BAD_REQUEST);
        assert_eq!(script_error_to_status(&ScriptError::InvalidUrl("x".into())), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn direct_link_builds_resolve_url() {
        let query = ModelRef { repo_id: "org/repo".into(), filename: "m.gguf".into() };
        let Json(value) = direct_link(Query(query)).await.unwrap();
        assert_eq!(value["url"], "https://huggingface.co/org/repo/resolve/main/m.gguf");
    }

    #[tokio::test]
    async fn direct_link_requires_both_fields() {
        let query = ModelRef { repo_id: "org/repo".into(), filename: " ".into() };
        let err = direct_link(Query(query)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.body.code, "E_MISSING_FIELD");
    }

    #[tokio::test]
    async fn select_then_switch_tab() {
        let state = test_app_state(MockLlm::default(), "", "").await;
        let body = ModelRef { repo_id: "org/repo".into(), filename: "m.gguf".into() };

        let Json(view) = select_model(State(state.clone()), Json(body)).await.unwrap();
        assert_eq!(view.mode, DownloadMode::HuggingFace);
        assert!(view.script.is_some());

        let Json(view) = set_mode(State(state), Json(ModeBody { mode: DownloadMode::NewModels })).await;
        assert!(view.script.is_none());
    }

    #[tokio::test]
    async fn invalid_form_is_rejected() {
        let state = test_app_state(MockLlm::default(), "", "").await;
        let form: ScriptForm = serde_json::from_value(serde_json::json!({
            "locator": { "kind": "direct_url", "url": "not a url" }
        }))
        .unwrap();

        let err = generate_script(State(state), Json(form)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.body.code, "E_INVALID_URL");
    }
}
