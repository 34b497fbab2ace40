pub mod loader;
pub mod schema;

use std::path::PathBuf;

pub use loader::{load_config, load_config_from_str};
pub use schema::{
    AiConfig, BooksumConfig, ChapterFailurePolicy, LogFormat, LoggingConfig, PipelineSettings,
    StorageConfig, StoreBackend, StoreBackendConfig, TocConfig, VaultConfig,
};

/// Returns the canonical config path: `~/.booksum/config.json`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".booksum").join("config.json"))
}
