use super::load_existing_config as load_existing_config_impl;
use super::*;
use tempfile::TempDir;

#[test]
fn load_existing_config() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    let config = load_existing_config_impl(temp_dir.path());
    assert_eq!(config.get_base_dir(), temp_dir.path());
    assert!(!config.provider.embedding_model.is_empty());
    assert!(config.provider.batch_size > 0);
}

#[test]
fn invalid_existing_config_falls_back_to_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    std::fs::write(temp_dir.path().join("config.toml"), "[memory]\nmax_turns = 0\n")
        .expect("should write config");

    let config = load_existing_config_impl(temp_dir.path());
    assert_eq!(config.memory.max_turns, 10);
}

#[test]
fn summary_masks_secrets() {
    let mut config = Config::default();
    config.provider.api_key = Some("co-secret-key".to_string());
    config.telegram.bot_token = Some("123456:telegram-token".to_string());

    let rows = config_summary(&config);
    let rendered: Vec<String> = rows.iter().map(|(_, _, value)| value.clone()).collect();

    assert!(rendered.contains(&"co-s****".to_string()));
    assert!(rendered.contains(&"1234****".to_string()));
    assert!(!rendered.iter().any(|value| value.contains("secret-key")));
    assert!(!rendered.iter().any(|value| value.contains("telegram-token")));
}

#[test]
fn summary_lists_every_section() {
    let rows = config_summary(&Config::default());
    for section in ["Provider", "Chunking", "Retrieval", "Memory", "Storage", "Telegram"] {
        assert!(
            rows.iter().any(|(name, _, _)| *name == section),
            "missing section {section}"
        );
    }
}
