//! Settings store — API keys and model choice, persisted as one named blob.
//!
//! DESIGN
//! ======
//! `AppSettings` is serialized to JSON and stored under [`SETTINGS_KEY`] in a
//! [`KeyValueStore`]. Loading never fails: an absent or malformed blob falls
//! back to defaults. Saving overwrites the blob wholesale. There is no
//! versioning or migration.
//!
//! The store is handed to the orchestrators by reference (through
//! `AppState`) rather than being an ambient global.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ErrorCode;

/// Storage key under which the serialized settings live.
pub const SETTINGS_KEY: &str = "ai_studio_settings";

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("settings I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ErrorCode for SettingsError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Io(_) => "E_SETTINGS_IO",
            Self::Serialize(_) => "E_SETTINGS_SERIALIZE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// Generative model used for chat and recommendations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ModelFamily {
    #[default]
    #[serde(rename = "gemini-2.5-flash")]
    Gemini25Flash,
}

impl ModelFamily {
    pub const ALL: &'static [ModelFamily] = &[ModelFamily::Gemini25Flash];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gemini25Flash => "gemini-2.5-flash",
        }
    }
}

/// User-editable settings. Field names match the stored JSON blob.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub gemini_api_key: String,
    pub e2b_api_key: String,
    pub model: ModelFamily,
}

impl AppSettings {
    #[must_use]
    pub fn has_gemini_key(&self) -> bool {
        !self.gemini_api_key.trim().is_empty()
    }

    #[must_use]
    pub fn has_e2b_key(&self) -> bool {
        !self.e2b_api_key.trim().is_empty()
    }
}

impl std::fmt::Debug for AppSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppSettings")
            .field("gemini_api_key", &redact(&self.gemini_api_key))
            .field("e2b_api_key", &redact(&self.e2b_api_key))
            .field("model", &self.model)
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() { "<unset>" } else { "<redacted>" }
}

/// What the settings panel may see: key presence and a short hint, never the
/// key itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsView {
    pub has_gemini_key: bool,
    pub has_e2b_key: bool,
    pub gemini_key_hint: Option<String>,
    pub e2b_key_hint: Option<String>,
    pub model: ModelFamily,
}

impl From<&AppSettings> for SettingsView {
    fn from(settings: &AppSettings) -> Self {
        Self {
            has_gemini_key: settings.has_gemini_key(),
            has_e2b_key: settings.has_e2b_key(),
            gemini_key_hint: key_hint(&settings.gemini_api_key),
            e2b_key_hint: key_hint(&settings.e2b_api_key),
            model: settings.model,
        }
    }
}

/// Last four characters, only for keys long enough that they stay secret.
fn key_hint(secret: &str) -> Option<String> {
    let chars: Vec<char> = secret.trim().chars().collect();
    (chars.len() >= 12).then(|| format!("…{}", chars[chars.len() - 4..].iter().collect::<String>()))
}

/// A partial edit from the settings panel. Absent fields keep their value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    pub gemini_api_key: Option<String>,
    pub e2b_api_key: Option<String>,
    pub model: Option<ModelFamily>,
}

impl SettingsUpdate {
    #[must_use]
    pub fn apply(self, current: &AppSettings) -> AppSettings {
        AppSettings {
            gemini_api_key: self.gemini_api_key.unwrap_or_else(|| current.gemini_api_key.clone()),
            e2b_api_key: self.e2b_api_key.unwrap_or_else(|| current.e2b_api_key.clone()),
            model: self.model.unwrap_or(current.model),
        }
    }
}

// =============================================================================
// KEY/VALUE STORE
// =============================================================================

/// Durable get/set of named string blobs.
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, SettingsError>;

    async fn set(&self, key: &str, value: String) -> Result<(), SettingsError>;
}

/// JSON-object file on disk: `{ "<key>": "<blob>", ... }`.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_entries(&self) -> Result<HashMap<String, String>, SettingsError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait::async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
        let mut entries = self.read_entries().await?;
        Ok(entries.remove(key))
    }

    async fn set(&self, key: &str, value: String) -> Result<(), SettingsError> {
        // A corrupt file is replaced rather than blocking every future save.
        let mut entries = self.read_entries().await.unwrap_or_default();
        entries.insert(key.to_string(), value);
        let text = serde_json::to_string_pretty(&entries)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// In-process store. Used by tests and when `SETTINGS_PATH` is empty.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), SettingsError> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.insert(key.to_string(), value);
        Ok(())
    }
}

// =============================================================================
// SETTINGS STORE
// =============================================================================

/// Loaded settings plus the backing store they are written to.
pub struct SettingsStore {
    backend: std::sync::Arc<dyn KeyValueStore>,
    current: RwLock<AppSettings>,
}

impl SettingsStore {
    /// Load settings from `backend`, falling back to defaults when the blob is
    /// absent, unreadable, or malformed.
    pub async fn load(backend: std::sync::Arc<dyn KeyValueStore>) -> Self {
        let settings = match backend.get(SETTINGS_KEY).await {
            Ok(Some(blob)) => match serde_json::from_str::<AppSettings>(&blob) {
                Ok(settings) => {
                    info!(model = settings.model.as_str(), "settings: loaded");
                    settings
                }
                Err(e) => {
                    warn!(error = %e, "settings: stored blob malformed, using defaults");
                    AppSettings::default()
                }
            },
            Ok(None) => AppSettings::default(),
            Err(e) => {
                warn!(error = %e, "settings: could not read store, using defaults");
                AppSettings::default()
            }
        };
        Self::with_settings(backend, settings)
    }

    pub fn with_settings(backend: std::sync::Arc<dyn KeyValueStore>, settings: AppSettings) -> Self {
        Self { backend, current: RwLock::new(settings) }
    }

    /// Snapshot of the current settings.
    #[must_use]
    pub fn current(&self) -> AppSettings {
        self.current
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Persist `settings` and make them current.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob cannot be serialized or written; the
    /// in-memory settings are left unchanged in that case.
    pub async fn save(&self, settings: AppSettings) -> Result<(), SettingsError> {
        let blob = serde_json::to_string(&settings)?;
        self.backend.set(SETTINGS_KEY, blob).await?;
        *self
            .current
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = settings;
        info!("settings: saved");
        Ok(())
    }
}

#[cfg(test)]
#[path = "settings_test.rs"]
mod tests;
