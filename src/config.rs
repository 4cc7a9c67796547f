//! Process configuration parsed from environment variables.
//!
//! Everything here is infrastructure: ports, file locations, provider base
//! URLs and timeouts. User-editable values (API keys, model choice) live in
//! [`crate::settings`] and are persisted separately.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ErrorCode;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_BIND_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
pub const DEFAULT_SETTINGS_PATH: &str = "data/settings.json";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_E2B_API_URL: &str = "https://api.e2b.dev";
pub const DEFAULT_E2B_DOMAIN: &str = "e2b.app";
pub const DEFAULT_E2B_TEMPLATE: &str = "base";
pub const DEFAULT_LLM_REQUEST_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_LLM_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_CHAT_CHUNK_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_SANDBOX_STEP_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_SANDBOX_RUN_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid PORT: {0}")]
    InvalidPort(String),
    #[error("invalid BIND_ADDR: {0}")]
    InvalidBindAddr(String),
    #[error("invalid URL in {var}: {value}")]
    InvalidUrl { var: &'static str, value: String },
}

impl ErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidPort(_) => "E_CONFIG_PORT",
            Self::InvalidBindAddr(_) => "E_CONFIG_BIND_ADDR",
            Self::InvalidUrl { .. } => "E_CONFIG_URL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LlmTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

/// Generative-AI backend connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmConfig {
    pub base_url: String,
    pub timeouts: LlmTimeouts,
}

/// Remote sandbox connection settings and per-step bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxConfig {
    pub api_url: String,
    pub domain: String,
    pub template: String,
    pub connect_timeout_secs: u64,
    pub step_timeout_secs: u64,
    pub run_timeout_secs: u64,
}

impl SandboxConfig {
    #[must_use]
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    #[must_use]
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: IpAddr,
    pub port: u16,
    /// Browser origins allowed to call the API. Empty means same-origin only.
    pub cors_origins: Vec<String>,
    pub settings_path: PathBuf,
    pub llm: LlmConfig,
    pub sandbox: SandboxConfig,
    /// Longest silence tolerated between two streamed chat increments.
    pub chat_chunk_timeout_secs: u64,
}

impl AppConfig {
    /// Build typed config from environment variables.
    ///
    /// All optional:
    /// - `BIND_ADDR`: default `127.0.0.1`
    /// - `PORT`: default 3000
    /// - `CORS_ORIGINS`: comma-separated origins, default none
    /// - `SETTINGS_PATH`: default `data/settings.json`
    /// - `GEMINI_BASE_URL`, `E2B_API_URL`, `E2B_DOMAIN`, `E2B_TEMPLATE`
    /// - `LLM_REQUEST_TIMEOUT_SECS` (120), `LLM_CONNECT_TIMEOUT_SECS` (10)
    /// - `CHAT_CHUNK_TIMEOUT_SECS` (60)
    /// - `SANDBOX_STEP_TIMEOUT_SECS` (60), `SANDBOX_RUN_TIMEOUT_SECS` (300)
    ///
    /// # Errors
    ///
    /// Returns an error if `PORT` or `BIND_ADDR` does not parse, or if a
    /// provider URL or CORS origin is not an absolute http(s) URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match std::env::var("PORT") {
            Ok(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort(raw.clone()))?,
            Err(_) => DEFAULT_PORT,
        };
        let bind_addr = match std::env::var("BIND_ADDR") {
            Ok(raw) => raw
                .trim()
                .parse::<IpAddr>()
                .map_err(|_| ConfigError::InvalidBindAddr(raw.clone()))?,
            Err(_) => DEFAULT_BIND_ADDR,
        };
        let cors_origins = std::env::var("CORS_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(|origin| parse_origin("CORS_ORIGINS", origin))
            .collect::<Result<Vec<_>, _>>()?;
        let settings_path =
            PathBuf::from(std::env::var("SETTINGS_PATH").unwrap_or_else(|_| DEFAULT_SETTINGS_PATH.to_string()));

        let connect_secs = env_parse_u64("LLM_CONNECT_TIMEOUT_SECS", DEFAULT_LLM_CONNECT_TIMEOUT_SECS);
        let llm = LlmConfig {
            base_url: env_url("GEMINI_BASE_URL", DEFAULT_GEMINI_BASE_URL)?,
            timeouts: LlmTimeouts {
                request_secs: env_parse_u64("LLM_REQUEST_TIMEOUT_SECS", DEFAULT_LLM_REQUEST_TIMEOUT_SECS),
                connect_secs,
            },
        };

        let sandbox = SandboxConfig {
            api_url: env_url("E2B_API_URL", DEFAULT_E2B_API_URL)?,
            domain: std::env::var("E2B_DOMAIN").unwrap_or_else(|_| DEFAULT_E2B_DOMAIN.to_string()),
            template: std::env::var("E2B_TEMPLATE").unwrap_or_else(|_| DEFAULT_E2B_TEMPLATE.to_string()),
            connect_timeout_secs: connect_secs,
            step_timeout_secs: env_parse_u64("SANDBOX_STEP_TIMEOUT_SECS", DEFAULT_SANDBOX_STEP_TIMEOUT_SECS),
            run_timeout_secs: env_parse_u64("SANDBOX_RUN_TIMEOUT_SECS", DEFAULT_SANDBOX_RUN_TIMEOUT_SECS),
        };

        Ok(Self {
            bind_addr,
            port,
            cors_origins,
            settings_path,
            llm,
            sandbox,
            chat_chunk_timeout_secs: env_parse_u64("CHAT_CHUNK_TIMEOUT_SECS", DEFAULT_CHAT_CHUNK_TIMEOUT_SECS),
        })
    }
}

fn env_parse_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn env_url(var: &'static str, default: &str) -> Result<String, ConfigError> {
    let raw = std::env::var(var).unwrap_or_else(|_| default.to_string());
    let trimmed = raw.trim().trim_end_matches('/').to_string();
    match reqwest::Url::parse(&trimmed) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(trimmed),
        _ => Err(ConfigError::InvalidUrl { var, value: raw }),
    }
}

/// Normalize an origin to `scheme://host[:port]`.
fn parse_origin(var: &'static str, raw: &str) -> Result<String, ConfigError> {
    match reqwest::Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => Ok(url.origin().ascii_serialization()),
        _ => Err(ConfigError::InvalidUrl { var, value: raw.to_string() }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
