mod config;
mod error;
mod llm;
mod routes;
mod sandbox;
mod script;
mod services;
mod settings;
mod state;

use std::sync::Arc;

use crate::settings::{FileStore, KeyValueStore, MemoryStore, SettingsStore};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let config = config::AppConfig::from_env().expect("invalid configuration");

    let backend: Arc<dyn KeyValueStore> = if config.settings_path.as_os_str().is_empty() {
        tracing::warn!("SETTINGS_PATH is empty; settings will not survive a restart");
        Arc::new(MemoryStore::default())
    } else {
        Arc::new(FileStore::new(&config.settings_path))
    };
    let settings = Arc::new(SettingsStore::load(backend).await);

    let connector = Arc::new(llm::GeminiConnector::new(config.llm.clone()));
    let sandboxes = Arc::new(sandbox::E2bProvider::new(&config.sandbox).expect("sandbox client init failed"));
    let state = state::AppState::new(&config, settings, connector, sandboxes).await;

    let app = routes::app(state, &config.cors_origins);
    let addr = std::net::SocketAddr::new(config.bind_addr, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");

    tracing::info!(%addr, "model studio listening");
    axum::serve(listener, app).await.expect("server failed");
}
