//! Finder service — one-shot structured model recommendations.
//!
//! DESIGN
//! ======
//! Model Finder, LoRA Finder, and the New Models dashboard share one
//! [`Finder`] parameterized by [`FinderKind`]: a fixed system instruction,
//! response schema, and banner prefix. Results are replaced wholesale; a
//! failure leaves them empty and sets a single banner message.
//!
//! Every search takes a generation number. Only the newest one may write the
//! view, so a slow reply cannot overwrite the outcome of a later search.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::ErrorCode;
use crate::llm::{LlmConnector, LlmError, StructuredRequest};
use crate::settings::SettingsStore;

const MISSING_KEY_MESSAGE: &str = "Gemini API Key is not set. Please add it in the settings panel.";

const MODEL_FINDER_SYSTEM: &str = "You are an expert assistant for finding GGUF models on Hugging Face. Recommend 3-5 models based on the user's request. Strictly return a valid JSON array matching the provided schema. Do not include markdown formatting or any text outside the JSON array.";

const LORA_FINDER_SYSTEM: &str = "You are an expert assistant for finding LoRA (Low-Rank Adaptation) files on Hugging Face. The user will describe a style or character. Find 3-5 relevant LoRA models. It is critical that the filename you provide is a `.safetensors` file. Strictly return a valid JSON array matching the provided schema. Do not include markdown formatting or any text outside the JSON array.";

const NEW_MODELS_SYSTEM: &str = "You are an expert assistant for finding GGUF models. Your task is to find the top 5-7 newest, most popular, and highest quality small-to-medium GGUF models (under 15 billion parameters) released on Hugging Face within the last 7 days. For each model, provide its repo ID, a suitable GGUF filename (prefer Q4_K_M or similar), a short description, its parameter size in billions, and the release date. Return a valid JSON array matching the schema. Do not include markdown.";

const NEW_MODELS_PROMPT: &str = "List the newest popular GGUF models from the last 7 days.";

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum FinderError {
    #[error("{0}")]
    EmptyPrompt(&'static str),
    #[error("Gemini API key is not set")]
    MissingApiKey,
    #[error("{0}")]
    Llm(#[from] LlmError),
    #[error("invalid recommendation JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ErrorCode for FinderError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::EmptyPrompt(_) => "E_EMPTY_PROMPT",
            Self::MissingApiKey => "E_MISSING_API_KEY",
            Self::Llm(e) => e.error_code(),
            Self::Parse(_) => "E_RECOMMENDATION_PARSE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Llm(e) if e.retryable())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinderKind {
    Models,
    Loras,
    NewModels,
}

impl FinderKind {
    fn system_instruction(self) -> &'static str {
        match self {
            Self::Models => MODEL_FINDER_SYSTEM,
            Self::Loras => LORA_FINDER_SYSTEM,
            Self::NewModels => NEW_MODELS_SYSTEM,
        }
    }

    fn user_prompt(self, prompt: &str) -> String {
        match self {
            Self::Models => format!("Find GGUF models that match this description: \"{prompt}\"."),
            Self::Loras => {
                format!("Find LoRA models (.safetensors files) on Hugging Face that match this description: \"{prompt}\".")
            }
            Self::NewModels => NEW_MODELS_PROMPT.to_string(),
        }
    }

    fn empty_prompt_message(self) -> &'static str {
        match self {
            Self::Models | Self::NewModels => "Please describe the model you're looking for.",
            Self::Loras => "Please describe the LoRA you're looking for.",
        }
    }

    fn banner(self, err: &FinderError) -> String {
        match (self, err) {
            (_, FinderError::EmptyPrompt(message)) => (*message).to_string(),
            (_, FinderError::MissingApiKey) => MISSING_KEY_MESSAGE.to_string(),
            (Self::Models, _) => format!("Sorry, something went wrong while finding models. Error: {err}"),
            (Self::Loras, _) => format!("Sorry, something went wrong while finding LoRAs. Error: {err}"),
            (Self::NewModels, _) => format!("Could not fetch new models. Error: {err}"),
        }
    }

    /// Gemini response schema for this finder's result array.
    #[must_use]
    pub fn schema(self) -> serde_json::Value {
        let (repo_example, filename_desc, description_desc) = match self {
            Self::Models => (
                "The Hugging Face repository ID, e.g., 'TheBloke/Mistral-7B-Instruct-v0.2-GGUF'.",
                "A recommended GGUF filename from the repository, e.g., 'mistral-7b-instruct-v0.2.Q4_K_M.gguf'. Prioritize a general-purpose quantization like Q4_K_M or Q5_K_M.",
                "A brief, one-sentence explanation of why this model is a good recommendation for the user's prompt.",
            ),
            Self::Loras => (
                "The Hugging Face repository ID, e.g., 'stabilityai/stable-diffusion-xl-base-1.0'.",
                "The specific LoRA filename, which must end in .safetensors.",
                "A brief, one-sentence explanation of what this LoRA does or what style it creates.",
            ),
            Self::NewModels => (
                "The Hugging Face repository ID, e.g., 'TheBloke/New-Model-7B-GGUF'.",
                "A recommended GGUF filename, e.g., 'new-model-7b.Q4_K_M.gguf'.",
                "A brief, one-sentence explanation of the model's purpose.",
            ),
        };

        let mut properties = json!({
            "repoId": { "type": "STRING", "description": repo_example },
            "filename": { "type": "STRING", "description": filename_desc },
            "description": { "type": "STRING", "description": description_desc },
        });
        let mut required = vec!["repoId", "filename", "description"];
        if self == Self::NewModels {
            properties["parameterSize"] =
                json!({ "type": "NUMBER", "description": "The number of parameters in billions, e.g., 7.2" });
            properties["releaseDate"] =
                json!({ "type": "STRING", "description": "The release date in YYYY-MM-DD format." });
            required.extend(["parameterSize", "releaseDate"]);
        }

        json!({
            "type": "ARRAY",
            "items": { "type": "OBJECT", "properties": properties, "required": required },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRecommendation {
    pub repo_id: String,
    pub filename: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FinderView {
    pub results: Vec<ModelRecommendation>,
    pub loading: bool,
    pub error: Option<String>,
}

// =============================================================================
// FINDER
// =============================================================================

pub struct Finder {
    kind: FinderKind,
    connector: Arc<dyn LlmConnector>,
    settings: Arc<SettingsStore>,
    view: RwLock<FinderView>,
    generation: AtomicU64,
    timeout: Duration,
}

impl Finder {
    pub fn new(kind: FinderKind, connector: Arc<dyn LlmConnector>, settings: Arc<SettingsStore>, timeout: Duration) -> Self {
        Self {
            kind,
            connector,
            settings,
            view: RwLock::new(FinderView::default()),
            generation: AtomicU64::new(0),
            timeout,
        }
    }

    #[must_use]
    pub fn kind(&self) -> FinderKind {
        self.kind
    }

    pub async fn view(&self) -> FinderView {
        self.view.read().await.clone()
    }

    /// Model and LoRA finders: recommend files matching `prompt`.
    ///
    /// Returns the view as it stands afterwards. If a newer search started
    /// meanwhile, that is the newer search's view.
    pub async fn search(&self, prompt: &str) -> FinderView {
        let generation = self.next_generation();
        let prompt = prompt.trim();
        if prompt.is_empty() && self.kind != FinderKind::NewModels {
            let err = FinderError::EmptyPrompt(self.kind.empty_prompt_message());
            return self.fail(generation, &err).await;
        }
        self.request(generation, &self.kind.user_prompt(prompt)).await
    }

    /// New Models dashboard: recent releases, newest first.
    pub async fn fetch_latest(&self) -> FinderView {
        let generation = self.next_generation();
        self.request(generation, NEW_MODELS_PROMPT).await
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn request(&self, generation: u64, prompt: &str) -> FinderView {
        let settings = self.settings.current();
        if !settings.has_gemini_key() {
            return self.fail(generation, &FinderError::MissingApiKey).await;
        }

        self.settle(generation, FinderView { loading: true, ..FinderView::default() }).await;
        info!(kind = ?self.kind, generation, "finder: request");

        let schema = self.kind.schema();
        let request = StructuredRequest { system: self.kind.system_instruction(), prompt, schema: &schema };
        let result: Result<Vec<ModelRecommendation>, FinderError> = async {
            let client = self.connector.connect(&settings.gemini_api_key)?;
            let text = tokio::time::timeout(self.timeout, client.generate_structured(settings.model.as_str(), request))
                .await
                .map_err(|_| LlmError::Timeout(self.timeout.as_secs()))??;
            parse_recommendations(&text, self.kind)
        }
        .await;

        match result {
            Ok(results) => {
                info!(kind = ?self.kind, generation, count = results.len(), "finder: results");
                self.settle(generation, FinderView { results, loading: false, error: None }).await
            }
            Err(e) => self.fail(generation, &e).await,
        }
    }

    async fn fail(&self, generation: u64, err: &FinderError) -> FinderView {
        warn!(kind = ?self.kind, generation, error = %err, "finder: failed");
        let view = FinderView { results: Vec::new(), loading: false, error: Some(self.kind.banner(err)) };
        self.settle(generation, view).await
    }

    /// Store `view` if `generation` is still the newest, then return what is stored.
    async fn settle(&self, generation: u64, view: FinderView) -> FinderView {
        let mut current = self.view.write().await;
        if self.generation.load(Ordering::SeqCst) == generation {
            *current = view;
        } else {
            info!(kind = ?self.kind, generation, "finder: stale reply dropped");
        }
        current.clone()
    }
}

/// Parse the reply as a recommendation array; New Models results are sorted
/// newest first with unparseable dates last.
///
/// # Errors
///
/// Returns [`FinderError::Parse`] when the text is not a matching JSON array.
pub fn parse_recommendations(text: &str, kind: FinderKind) -> Result<Vec<ModelRecommendation>, FinderError> {
    let mut results: Vec<ModelRecommendation> = serde_json::from_str(text.trim())?;
    if kind == FinderKind::NewModels {
        results.sort_by(|a, b| release_key(b).cmp(&release_key(a)));
    }
    Ok(results)
}

/// Sortable `(year, month, day)`; `None` orders before every date.
fn release_key(rec: &ModelRecommendation) -> Option<(u32, u32, u32)> {
    let date = rec.release_date.as_deref()?.trim();
    let mut fields = date.get(..10)?.split('-');
    let year = fields.next().filter(|y| y.len() == 4)?.parse().ok()?;
    let month = fields.next().filter(|m| m.len() == 2)?.parse().ok()?;
    let day = fields.next().filter(|d| d.len() == 2)?.parse().ok()?;
    ((1..=12).contains(&month) && (1..=31).contains(&day)).then_some((year, month, day))
}

#[cfg(test)]
#[path = "finder_test.rs"]
mod tests;
