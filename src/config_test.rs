use super::*;
use std::sync::{Mutex, MutexGuard};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn env_guard() -> MutexGuard<'static, ()> {
    ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

const VARS: &[&str] = &[
    "BIND_ADDR",
    "CORS_ORIGINS",
    "PORT",
    "SETTINGS_PATH",
    "GEMINI_BASE_URL",
    "E2B_API_URL",
    "E2B_DOMAIN",
    "E2B_TEMPLATE",
    "LLM_REQUEST_TIMEOUT_SECS",
    "LLM_CONNECT_TIMEOUT_SECS",
    "CHAT_CHUNK_TIMEOUT_SECS",
    "SANDBOX_STEP_TIMEOUT_SECS",
    "SANDBOX_RUN_TIMEOUT_SECS",
];

/// # Safety
/// Callers hold `ENV_LOCK` so no other test touches these vars concurrently.
unsafe fn clear_env() {
    for var in VARS {
        unsafe { std::env::remove_var(var) };
    }
}

#[test]
fn from_env_uses_defaults() {
    let _env = env_guard();
    unsafe { clear_env() };

    let cfg = AppConfig::from_env().unwrap();
    assert_eq!(cfg.port, DEFAULT_PORT);
    assert_eq!(cfg.bind_addr, IpAddr::V4(Ipv4Addr::LOCALHOST));
    assert!(cfg.cors_origins.is_empty());
    assert_eq!(cfg.settings_path, PathBuf::from(DEFAULT_SETTINGS_PATH));
    assert_eq!(cfg.llm.base_url, DEFAULT_GEMINI_BASE_URL);
    assert_eq!(
        cfg.llm.timeouts,
        LlmTimeouts { request_secs: DEFAULT_LLM_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_LLM_CONNECT_TIMEOUT_SECS }
    );
    assert_eq!(cfg.sandbox.api_url, DEFAULT_E2B_API_URL);
    assert_eq!(cfg.sandbox.template, "base");
    assert_eq!(cfg.sandbox.step_timeout(), Duration::from_secs(DEFAULT_SANDBOX_STEP_TIMEOUT_SECS));
    assert_eq!(cfg.chat_chunk_timeout_secs, DEFAULT_CHAT_CHUNK_TIMEOUT_SECS);
}

#[test]
fn from_env_parses_overrides() {
    let _env = env_guard();
    unsafe {
        clear_env();
        std::env::set_var("PORT", "8080");
        std::env::set_var("SETTINGS_PATH", "/tmp/studio.json");
        std::env::set_var("GEMINI_BASE_URL", "https://gemini.example.test/v1beta/");
        std::env::set_var("E2B_DOMAIN", "sandbox.example.test");
        std::env::set_var("SANDBOX_RUN_TIMEOUT_SECS", "42");
        std::env::set_var("CHAT_CHUNK_TIMEOUT_SECS", "7");
    }

    let cfg = AppConfig::from_env().unwrap();
    assert_eq!(cfg.port, 8080);
    assert_eq!(cfg.settings_path, PathBuf::from("/tmp/studio.json"));
    assert_eq!(cfg.llm.base_url, "https://gemini.example.test/v1beta");
    assert_eq!(cfg.sandbox.domain, "sandbox.example.test");
    assert_eq!(cfg.sandbox.run_timeout(), Duration::from_secs(42));
    assert_eq!(cfg.chat_chunk_timeout_secs, 7);

    unsafe { clear_env() };
}

#[test]
fn from_env_rejects_bad_port() {
    let _env = env_guard();
    unsafe {
        clear_env();
        std::env::set_var("PORT", "not-a-port");
    }

    let err = AppConfig::from_env().unwrap_err();
    assert_eq!(err.error_code(), "E_CONFIG_PORT");

    unsafe { clear_env() };
}

#[test]
fn from_env_rejects_non_http_url() {
    let _env = env_guard();
    unsafe {
        clear_env();
        std::env::set_var("E2B_API_URL", "ftp://nope");
    }

    let err = AppConfig::from_env().unwrap_err().to_string();
    assert!(err.contains("E2B_API_URL"));

    unsafe { clear_env() };
}

#[test]
fn zero_timeouts_fall_back_to_default() {
    let _env = env_guard();
    unsafe {
        clear_env();
        std::env::set_var("SANDBOX_STEP_TIMEOUT_SECS", "0");
    }

    let cfg = AppConfig::from_env().unwrap();
    assert_eq!(cfg.sandbox.step_timeout_secs, DEFAULT_SANDBOX_STEP_TIMEOUT_SECS);

    unsafe { clear_env() };
}

#[test]
fn from_env_reads_bind_addr_and_origins() {
    let _env = env_guard();
    unsafe {
        clear_env();
        std::env::set_var("BIND_ADDR", "0.0.0.0");
        std::env::set_var("CORS_ORIGINS", "http://localhost:5173/, https://studio.example.test");
    }

    let cfg = AppConfig::from_env().unwrap();
    assert_eq!(cfg.bind_addr, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    assert_eq!(cfg.cors_origins, vec!["http://localhost:5173", "https://studio.example.test"]);

    unsafe { clear_env() };
}

#[test]
fn from_env_rejects_bad_bind_addr_and_origin() {
    let _env = env_guard();
    unsafe {
        clear_env();
        std::env::set_var("BIND_ADDR", "localhost");
    }
    assert_eq!(AppConfig::from_env().unwrap_err().error_code(), "E_CONFIG_BIND_ADDR");

    unsafe {
        clear_env();
        std::env::set_var("CORS_ORIGINS", "*");
    }
    assert_eq!(AppConfig::from_env().unwrap_err().error_code(), "E_CONFIG_URL");

    unsafe { clear_env() };
}
