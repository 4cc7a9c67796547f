use super::*;
use std::sync::Arc;

fn sample() -> AppSettings {
    AppSettings { gemini_api_key: "g-key".into(), e2b_api_key: "e-key".into(), model: ModelFamily::Gemini25Flash }
}

// =============================================================================
// AppSettings
// =============================================================================

#[test]
fn defaults_have_model_and_empty_keys() {
    let settings = AppSettings::default();
    assert_eq!(settings.model, ModelFamily::Gemini25Flash);
    assert!(!settings.has_gemini_key());
    assert!(!settings.has_e2b_key());
}

#[test]
fn blob_uses_camel_case_field_names() {
    let json = serde_json::to_value(sample()).unwrap();
    assert_eq!(json["geminiApiKey"], "g-key");
    assert_eq!(json["e2bApiKey"], "e-key");
    assert_eq!(json["model"], "gemini-2.5-flash");
}

#[test]
fn debug_redacts_keys() {
    let text = format!("{:?}", sample());
    assert!(!text.contains("g-key"));
    assert!(!text.contains("e-key"));
    assert!(text.contains("<redacted>"));
}

#[test]
fn view_never_contains_keys() {
    let settings = AppSettings {
        gemini_api_key: "AIzaSyD-secret-gemini-1234".into(),
        e2b_api_key: "e2b_short".into(),
        model: ModelFamily::Gemini25Flash,
    };
    let view = SettingsView::from(&settings);
    assert!(view.has_gemini_key && view.has_e2b_key);
    assert_eq!(view.gemini_key_hint.as_deref(), Some("…1234"));
    assert!(view.e2b_key_hint.is_none());

    let json = serde_json::to_string(&view).unwrap();
    assert!(!json.contains("secret"));
    assert!(!json.contains("e2b_short"));
}

#[test]
fn view_of_defaults_has_no_keys() {
    let view = SettingsView::from(&AppSettings::default());
    assert!(!view.has_gemini_key && !view.has_e2b_key);
    assert!(view.gemini_key_hint.is_none());
}

#[test]
fn update_keeps_absent_fields() {
    let update: SettingsUpdate = serde_json::from_str(r#"{"e2bApiKey":"new-e2b"}"#).unwrap();
    let next = update.apply(&sample());
    assert_eq!(next.gemini_api_key, "g-key");
    assert_eq!(next.e2b_api_key, "new-e2b");
    assert_eq!(next.model, ModelFamily::Gemini25Flash);
}

#[test]
fn update_can_clear_a_key() {
    let update: SettingsUpdate = serde_json::from_str(r#"{"geminiApiKey":""}"#).unwrap();
    assert!(!update.apply(&sample()).has_gemini_key());
}

#[test]
fn whitespace_key_counts_as_missing() {
    let settings = AppSettings { gemini_api_key: "   ".into(), ..AppSettings::default() };
    assert!(!settings.has_gemini_key());
}

// =============================================================================
// SettingsStore
// =============================================================================

#[tokio::test]
async fn load_from_empty_store_gives_defaults() {
    let store = SettingsStore::load(Arc::new(MemoryStore::default())).await;
    assert_eq!(store.current(), AppSettings::default());
}

#[tokio::test]
async fn load_malformed_blob_falls_back_to_defaults() {
    let backend = Arc::new(MemoryStore::default());
    backend.set(SETTINGS_KEY, "{not json".into()).await.unwrap();
    let store = SettingsStore::load(backend).await;
    assert_eq!(store.current(), AppSettings::default());
}

#[tokio::test]
async fn load_unknown_model_falls_back_to_defaults() {
    let backend = Arc::new(MemoryStore::default());
    backend
        .set(SETTINGS_KEY, r#"{"geminiApiKey":"a","e2bApiKey":"b","model":"gpt-9"}"#.into())
        .await
        .unwrap();
    let store = SettingsStore::load(backend).await;
    assert_eq!(store.current().model, ModelFamily::Gemini25Flash);
    assert!(store.current().gemini_api_key.is_empty());
}

#[tokio::test]
async fn save_then_reload_round_trips() {
    let backend: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::default());
    let store = SettingsStore::load(backend.clone()).await;
    store.save(sample()).await.unwrap();
    assert_eq!(store.current(), sample());

    let reloaded = SettingsStore::load(backend).await;
    assert_eq!(reloaded.current(), sample());
}

#[tokio::test]
async fn file_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("settings.json");

    {
        let store = SettingsStore::load(Arc::new(FileStore::new(&path))).await;
        store.save(sample()).await.unwrap();
    }

    let restarted = SettingsStore::load(Arc::new(FileStore::new(&path))).await;
    assert_eq!(restarted.current(), sample());
}

#[tokio::test]
async fn file_store_missing_file_reads_none() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path().join("absent.json"));
    assert!(store.get(SETTINGS_KEY).await.unwrap().is_none());
}

#[tokio::test]
async fn file_store_overwrites_corrupt_file_on_save() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, "garbage").unwrap();

    let store = SettingsStore::load(Arc::new(FileStore::new(&path))).await;
    assert_eq!(store.current(), AppSettings::default());
    store.save(sample()).await.unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains(SETTINGS_KEY));
}

#[tokio::test]
async fn file_store_keeps_other_keys() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path().join("kv.json"));
    store.set("other", "1".into()).await.unwrap();
    store.set(SETTINGS_KEY, "2".into()).await.unwrap();
    assert_eq!(store.get("other").await.unwrap().as_deref(), Some("1"));
    assert_eq!(store.get(SETTINGS_KEY).await.unwrap().as_deref(), Some("2"));
}
