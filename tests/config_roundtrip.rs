//! Config file persistence: save, reload, and key handling on disk.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use ada::config::LlmProvider;
use ada::{AdaConfig, AdaError};

#[test]
fn test_saved_config_reloads_identically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = AdaConfig::default();
    config.llm.provider = LlmProvider::OpenAi;
    config.llm.base_url = Some("http://localhost:11434/v1".into());
    config.llm.model = "llama3".into();
    config.tts.voice = "Kore".into();
    config.pipeline.max_tool_rounds = 2;
    config.pipeline.stt_retry.max_attempts = 7;

    config.save_to_file(&path).unwrap();
    let loaded = AdaConfig::load(Some(&path)).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_keys_stay_off_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    let mut config = AdaConfig::default();
    config.llm.api_key = Some("llm-secret".into());
    config.tools.maps_api_key = Some("maps-secret".into());
    config.save_to_file(&path).unwrap();

    let on_disk = std::fs::read_to_string(&path).unwrap();
    assert!(!on_disk.contains("secret"));

    let mut loaded = AdaConfig::load(Some(&path)).unwrap();
    assert_eq!(loaded.llm.api_key, None);
    loaded.apply_env_from(|key| (key == "GOOGLE_API_KEY").then(|| "from-env".to_owned()));
    assert_eq!(loaded.llm.api_key.as_deref(), Some("from-env"));
    assert_eq!(loaded.tts.api_key.as_deref(), Some("from-env"));
}

#[test]
fn test_malformed_file_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[pipeline]\nmax_tool_rounds = \"many\"\n").unwrap();

    let err = AdaConfig::load(Some(&path)).unwrap_err();
    assert!(matches!(err, AdaError::Config(_)));
}
