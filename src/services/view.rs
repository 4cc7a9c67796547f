//! View controller — tab mode, destination, selected model, and script pane.

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::script::{self, DEFAULT_DOWNLOAD_DIR, DownloadDestination, ModelLocator, ScriptArtifact, ScriptError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DownloadMode {
    #[default]
    #[serde(rename = "AIStudio")]
    AiStudio,
    ModelFinder,
    NewModels,
    LoraFinder,
    HuggingFace,
    CustomUrl,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedModel {
    pub repo_id: String,
    pub filename: String,
}

/// A script request as submitted from the Hugging Face or Custom URL form.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptForm {
    pub locator: ModelLocator,
    #[serde(default = "default_download_dir")]
    pub download_dir: String,
    pub destination: Option<DownloadDestination>,
    pub gdrive_folder_name: Option<String>,
}

fn default_download_dir() -> String {
    DEFAULT_DOWNLOAD_DIR.to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewState {
    pub mode: DownloadMode,
    pub destination: DownloadDestination,
    pub gdrive_folder_name: String,
    pub selected_model: Option<SelectedModel>,
    pub script: Option<ScriptArtifact>,
}

#[derive(Default)]
pub struct ViewController {
    state: RwLock<ViewState>,
}

impl ViewController {
    pub async fn state(&self) -> ViewState {
        self.state.read().await.clone()
    }

    /// Switch tabs. Any displayed script and selection are cleared.
    pub async fn set_mode(&self, mode: DownloadMode) -> ViewState {
        let mut state = self.state.write().await;
        state.mode = mode;
        state.script = None;
        state.selected_model = None;
        info!(?mode, "view: mode");
        state.clone()
    }

    pub async fn set_destination(&self, destination: DownloadDestination, gdrive_folder_name: Option<String>) -> ViewState {
        let mut state = self.state.write().await;
        state.destination = destination;
        if let Some(name) = gdrive_folder_name {
            state.gdrive_folder_name = name;
        }
        state.clone()
    }

    /// Model-selection callback shared by the finders: jump to the Hugging
    /// Face tab with a script for the chosen file.
    ///
    /// # Errors
    ///
    /// Returns a [`ScriptError`] if the repo id or filename is blank.
    pub async fn select_model(&self, repo_id: &str, filename: &str) -> Result<ViewState, ScriptError> {
        let locator = ModelLocator::HuggingFace { repo_id: repo_id.trim().into(), filename: filename.trim().into() };
        script::validate(&locator, DEFAULT_DOWNLOAD_DIR)?;

        let mut state = self.state.write().await;
        let artifact = script::generate(
            &locator,
            DEFAULT_DOWNLOAD_DIR,
            state.destination,
            Some(state.gdrive_folder_name.as_str()),
        );
        state.mode = DownloadMode::HuggingFace;
        state.selected_model = Some(SelectedModel { repo_id: repo_id.trim().into(), filename: filename.trim().into() });
        state.script = Some(artifact);
        info!(repo_id = repo_id.trim(), "view: model selected");
        Ok(state.clone())
    }

    /// Generate a script from a form and show it in the pane.
    ///
    /// # Errors
    ///
    /// Returns a [`ScriptError`] when the form fails validation; the pane is
    /// left unchanged.
    pub async fn generate(&self, form: ScriptForm) -> Result<ScriptArtifact, ScriptError> {
        script::validate(&form.locator, &form.download_dir)?;

        let mut state = self.state.write().await;
        if let Some(destination) = form.destination {
            state.destination = destination;
        }
        if let Some(name) = form.gdrive_folder_name {
            state.gdrive_folder_name = name;
        }
        let artifact = script::generate(
            &form.locator,
            form.download_dir.trim(),
            state.destination,
            Some(state.gdrive_folder_name.as_str()),
        );
        state.script = Some(artifact.clone());
        Ok(artifact)
    }
}

#[cfg(test)]
#[path = "view_test.rs"]
mod tests;
