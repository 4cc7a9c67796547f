//! Script generator — download scripts and dependency manifests.
//!
//! DESIGN
//! ======
//! Pure text templating: nothing here touches the network or the disk. One
//! template per (locator kind, destination) pair lives in [`templates`].
//! Every user value is embedded as a Python string literal via
//! [`python_literal`], and substitution is single pass, so arbitrary input
//! always yields well-formed source and a value can never inject a
//! placeholder.

mod templates;

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

pub const DEFAULT_DOWNLOAD_DIR: &str = "./models";
const HF_HOST: &str = "https://huggingface.co";

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ScriptError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl ErrorCode for ScriptError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "E_MISSING_FIELD",
            Self::InvalidUrl(_) => "E_INVALID_URL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DownloadDestination {
    #[default]
    Local,
    GoogleDrive,
}

/// Where the model file comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelLocator {
    #[serde(rename_all = "camelCase")]
    HuggingFace { repo_id: String, filename: String },
    DirectUrl { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScriptArtifact {
    pub code: String,
    pub requirements: String,
}

// =============================================================================
// GENERATION
// =============================================================================

/// Build the script and manifest for `locator`. Total: any input yields a
/// syntactically valid script. An empty or absent `gdrive_folder_name`
/// uploads to the Drive root.
#[must_use]
pub fn generate(
    locator: &ModelLocator,
    download_dir: &str,
    destination: DownloadDestination,
    gdrive_folder_name: Option<&str>,
) -> ScriptArtifact {
    let folder = gdrive_folder_name.unwrap_or_default();
    match (locator, destination) {
        (ModelLocator::HuggingFace { repo_id, filename }, DownloadDestination::Local) => ScriptArtifact {
            code: render(
                templates::HF_LOCAL,
                &[("REPO_ID", repo_id), ("FILENAME", filename), ("DOWNLOAD_DIR", download_dir)],
            ),
            requirements: templates::HF_LOCAL_REQUIREMENTS.to_string(),
        },
        (ModelLocator::DirectUrl { url }, DownloadDestination::Local) => ScriptArtifact {
            code: render(templates::URL_LOCAL, &[("URL", url), ("DOWNLOAD_DIR", download_dir)]),
            requirements: templates::URL_LOCAL_REQUIREMENTS.to_string(),
        },
        (ModelLocator::HuggingFace { repo_id, filename }, DownloadDestination::GoogleDrive) => {
            let template = drive_template(templates::HF_IMPORT, templates::HF_SOURCE_CONFIG, templates::HF_DRIVE_DOWNLOAD);
            ScriptArtifact {
                code: render(
                    &template,
                    &[
                        ("REPO_ID", repo_id),
                        ("FILENAME", filename),
                        ("DOWNLOAD_DIR", download_dir),
                        ("GDRIVE_FOLDER_NAME", folder),
                    ],
                ),
                requirements: drive_requirements(templates::HF_BASE_REQUIREMENT),
            }
        }
        (ModelLocator::DirectUrl { url }, DownloadDestination::GoogleDrive) => {
            let template =
                drive_template(templates::URL_IMPORT, templates::URL_SOURCE_CONFIG, templates::URL_DRIVE_DOWNLOAD);
            ScriptArtifact {
                code: render(
                    &template,
                    &[("URL", url), ("DOWNLOAD_DIR", download_dir), ("GDRIVE_FOLDER_NAME", folder)],
                ),
                requirements: drive_requirements(templates::URL_BASE_REQUIREMENT),
            }
        }
    }
}

fn drive_template(source_import: &str, source_config: &str, download_fn: &str) -> String {
    [
        templates::DRIVE_IMPORTS,
        source_import,
        templates::DRIVE_GOOGLE_IMPORTS,
        source_config,
        templates::DRIVE_CONFIG,
        download_fn,
        templates::DRIVE_MAIN,
    ]
    .concat()
}

fn drive_requirements(base: &str) -> String {
    std::iter::once(base)
        .chain(templates::DRIVE_REQUIREMENTS.iter().copied())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Direct download link for a file in a Hugging Face repository.
#[must_use]
pub fn direct_download_url(repo_id: &str, filename: &str) -> String {
    format!("{HF_HOST}/{}/resolve/main/{}", repo_id.trim(), filename.trim())
}

/// Reject requests the forms would not submit.
///
/// # Errors
///
/// Returns [`ScriptError::MissingField`] for a blank repo id, filename, URL
/// or download dir, and [`ScriptError::InvalidUrl`] for a URL that is not
/// absolute http(s).
pub fn validate(locator: &ModelLocator, download_dir: &str) -> Result<(), ScriptError> {
    match locator {
        ModelLocator::HuggingFace { repo_id, filename } => {
            if repo_id.trim().is_empty() {
                return Err(ScriptError::MissingField("repoId"));
            }
            if filename.trim().is_empty() {
                return Err(ScriptError::MissingField("filename"));
            }
        }
        ModelLocator::DirectUrl { url } => {
            if url.trim().is_empty() {
                return Err(ScriptError::MissingField("url"));
            }
            match reqwest::Url::parse(url.trim()) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                _ => return Err(ScriptError::InvalidUrl(url.clone())),
            }
        }
    }
    if download_dir.trim().is_empty() {
        return Err(ScriptError::MissingField("downloadDir"));
    }
    Ok(())
}

// =============================================================================
// TEMPLATING
// =============================================================================

/// Quote `value` as a Python string literal.
#[must_use]
pub fn python_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                out.push_str(&format!("\\u{:04x}", u32::from(c)));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Replace each `{{NAME}}` with the quoted value for `NAME`. Unknown
/// placeholders are left as is; substituted text is never rescanned.
fn render(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len() + 128);
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &after[..end];
        match values.iter().find(|(key, _)| *key == name) {
            Some((_, value)) => out.push_str(&python_literal(value)),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
