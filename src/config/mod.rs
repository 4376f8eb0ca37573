// Configuration management module
// TOML settings in the ragdesk home directory plus the interactive editor

pub mod interactive;
pub mod settings;


pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    Config, ConfigError, MemoryConfig, PromptConfig, ProviderConfig, StorageBackend,
    StorageConfig, TelegramConfig,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}
