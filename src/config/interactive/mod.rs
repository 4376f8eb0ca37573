#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Password, Select};
use std::path::Path;

use super::settings::mask_secret;
use super::{Config, ConfigError, ProviderConfig, StorageBackend, TelegramConfig};
use crate::chunking::ChunkingConfig;

#[inline]
pub fn run_interactive_config(config_dir: &Path) -> Result<()> {
    eprintln!("{}", style("🔧 ragdesk Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config(config_dir);

    eprintln!("{}", style("Model Provider").bold().yellow());
    eprintln!("Embeddings and answers are generated by a hosted Cohere-compatible API.");
    eprintln!();
    configure_provider(&mut config.provider)?;

    eprintln!();
    eprintln!("{}", style("Chunking & Storage").bold().yellow());
    configure_chunking(&mut config.chunking)?;
    configure_storage(&mut config)?;

    eprintln!();
    eprintln!("{}", style("Telegram").bold().yellow());
    configure_telegram(&mut config.telegram)?;

    eprintln!();
    eprintln!("{}", style("Testing configuration...").yellow());

    if test_provider_connection(&config.provider) {
        eprintln!("{}", style("✓ Provider accepted the API key!").green());
    } else {
        eprintln!(
            "{}",
            style("⚠ Warning: Could not verify the provider API key").yellow()
        );
        eprintln!("You can continue, but ingestion and answers will fail until it is fixed.");
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());

    let mut current_section = "";
    for (section, key, value) in config_summary(&config) {
        if section != current_section {
            eprintln!();
            eprintln!("{}", style(format!("{section}:")).bold().yellow());
            current_section = section;
        }
        eprintln!("  {}: {}", key, style(value).cyan());
    }

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

/// Flatten the effective configuration into `(section, key, value)` rows with secrets masked
pub(crate) fn config_summary(config: &Config) -> Vec<(&'static str, &'static str, String)> {
    let secret = |configured: Option<&str>, env_var: &str| match configured {
        Some(value) if !value.trim().is_empty() => mask_secret(value),
        _ if std::env::var_os(env_var).is_some() => format!("(from {env_var})"),
        _ => "(not set)".to_string(),
    };

    let provider = &config.provider;
    let telegram = &config.telegram;
    vec![
        ("Provider", "Base URL", provider.base_url.clone()),
        (
            "Provider",
            "API Key",
            secret(provider.api_key.as_deref(), super::settings::API_KEY_ENV),
        ),
        ("Provider", "Embedding Model", provider.embedding_model.clone()),
        ("Provider", "Chat Model", provider.chat_model.clone()),
        ("Provider", "Batch Size", provider.batch_size.to_string()),
        ("Provider", "Temperature", provider.temperature.to_string()),
        ("Provider", "Max Tokens", provider.max_tokens.to_string()),
        ("Chunking", "Chunk Size", config.chunking.chunk_size.to_string()),
        (
            "Chunking",
            "Chunk Overlap",
            config.chunking.chunk_overlap.to_string(),
        ),
        ("Retrieval", "Top K", config.retrieval.top_k.to_string()),
        (
            "Retrieval",
            "Query Variants",
            config.retrieval.query_variants.to_string(),
        ),
        (
            "Retrieval",
            "Max Results",
            config.retrieval.max_results.to_string(),
        ),
        ("Memory", "Max Turns", config.memory.max_turns.to_string()),
        (
            "Memory",
            "Max Sessions",
            config.memory.max_sessions.to_string(),
        ),
        ("Storage", "Backend", config.storage.backend.to_string()),
        (
            "Storage",
            "Answer Timeout",
            format!("{}s", config.answer_timeout_seconds),
        ),
        (
            "Telegram",
            "Bot Token",
            secret(telegram.bot_token.as_deref(), super::settings::BOT_TOKEN_ENV),
        ),
        (
            "Telegram",
            "Bot Username",
            telegram
                .bot_username
                .clone()
                .unwrap_or_else(|| "(not set)".to_string()),
        ),
        ("Telegram", "Collection", telegram.collection.clone()),
    ]
}

fn load_existing_config(config_dir: &Path) -> Config {
    let defaults = || Config {
        base_dir: config_dir.to_path_buf(),
        ..Config::default()
    };

    if !config_dir.join("config.toml").exists() {
        eprintln!(
            "{}",
            style("No existing configuration found. Using defaults.").yellow()
        );
        return defaults();
    }

    Config::load(config_dir).map_or_else(
        |_| {
            eprintln!(
                "{}",
                style("Existing configuration is invalid. Starting from defaults.").yellow()
            );
            defaults()
        },
        |config| {
            eprintln!("{}", style("Found existing configuration.").green());
            config
        },
    )
}

fn configure_provider(provider: &mut ProviderConfig) -> Result<()> {
    let base_url: String = Input::new()
        .with_prompt("Provider base URL")
        .default(provider.base_url.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let candidate = ProviderConfig {
                base_url: input.clone(),
                ..ProviderConfig::default()
            };
            candidate.provider_url().map(|_| ())
        })
        .interact_text()?;

    let api_key: String = Password::new()
        .with_prompt("API key (leave empty to use COHERE_API_KEY)")
        .allow_empty_password(true)
        .interact()?;

    let embedding_model: String = Input::new()
        .with_prompt("Embedding model")
        .default(provider.embedding_model.clone())
        .interact_text()?;

    let chat_model: String = Input::new()
        .with_prompt("Chat model")
        .default(provider.chat_model.clone())
        .interact_text()?;

    let batch_size: u32 = Input::new()
        .with_prompt("Batch size for embedding requests")
        .default(provider.batch_size)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if *input == 0 || *input > 96 {
                Err("Batch size must be between 1 and 96")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let temperature: f32 = Input::new()
        .with_prompt("Answer temperature")
        .default(provider.temperature)
        .interact_text()?;

    provider.set_base_url(base_url)?;
    if !api_key.trim().is_empty() {
        provider.api_key = Some(api_key.trim().to_string());
    }
    provider.set_embedding_model(embedding_model)?;
    provider.set_chat_model(chat_model)?;
    provider.set_batch_size(batch_size)?;
    provider.set_temperature(temperature)?;

    Ok(())
}

fn configure_chunking(chunking: &mut ChunkingConfig) -> Result<()> {
    let chunk_size: usize = Input::new()
        .with_prompt("Chunk size (characters)")
        .default(chunking.chunk_size)
        .interact_text()?;

    let chunk_overlap: usize = Input::new()
        .with_prompt("Chunk overlap (characters)")
        .default(chunking.chunk_overlap)
        .validate_with(|input: &usize| -> Result<(), ConfigError> {
            ChunkingConfig::new(chunk_size, *input).map(|_| ())
        })
        .interact_text()?;

    *chunking = ChunkingConfig::new(chunk_size, chunk_overlap)?;
    Ok(())
}

fn configure_storage(config: &mut Config) -> Result<()> {
    let backends = [StorageBackend::Lancedb, StorageBackend::Memory];
    let labels = &["lancedb (persistent)", "memory (JSON snapshots)"];
    let default_index = backends
        .iter()
        .position(|&b| b == config.storage.backend)
        .unwrap_or(0);

    let backend_index = Select::new()
        .with_prompt("Vector index backend")
        .default(default_index)
        .items(labels)
        .interact()?;

    config.storage.backend = backends
        .get(backend_index)
        .copied()
        .unwrap_or_default();
    Ok(())
}

fn configure_telegram(telegram: &mut TelegramConfig) -> Result<()> {
    let bot_username: String = Input::new()
        .with_prompt("Bot handle for group mentions (empty to skip)")
        .default(telegram.bot_username.clone().unwrap_or_default())
        .allow_empty(true)
        .interact_text()?;

    let collection: String = Input::new()
        .with_prompt("Collection answered by the bot")
        .default(telegram.collection.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            crate::database::vector_store::validate_collection_name(input)
                .map_err(|_| ConfigError::InvalidCollection(input.clone()))
        })
        .interact_text()?;

    telegram.bot_username = Some(bot_username.trim().to_string()).filter(|name| !name.is_empty());
    telegram.collection = collection;
    Ok(())
}

fn test_provider_connection(provider: &ProviderConfig) -> bool {
    let Ok(api_key) = provider.resolve_api_key() else {
        return false;
    };
    let Ok(url) = provider.provider_url().and_then(|base| {
        base.join("v1/check-api-key")
            .map_err(|_| ConfigError::InvalidUrl(provider.base_url.clone()))
    }) else {
        return false;
    };

    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(std::time::Duration::from_secs(5)))
        .build()
        .into();

    agent
        .post(url.as_str())
        .header("Authorization", &format!("Bearer {api_key}"))
        .send_empty()
        .is_ok()
}
