//! Configuration loading, validation, and hot-reload management.

pub mod hot_reload;
pub mod loader;
pub mod model;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, RwLock};

use hot_reload::{ConfigReloadEvent, ConfigWatcher};
pub use model::AppConfig;

/// Owns the live configuration shared with the rest of the service.
pub struct ConfigManager {
    config: Arc<RwLock<AppConfig>>,
    config_path: PathBuf,
}

impl ConfigManager {
    /// Creates a new ConfigManager by loading and validating the config file.
    pub fn new(config_path: &Path) -> Result<Self> {
        let config = loader::load_and_validate(config_path)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path: config_path.to_path_buf(),
        })
    }

    /// Returns a shared handle to the current configuration.
    pub fn get_config(&self) -> Arc<RwLock<AppConfig>> {
        Arc::clone(&self.config)
    }

    /// Returns a copy of the current configuration.
    pub async fn snapshot(&self) -> AppConfig {
        self.config.read().await.clone()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Starts watching the config file; reload outcomes arrive on the receiver.
    pub fn watch(&self) -> Result<mpsc::Receiver<ConfigReloadEvent>> {
        let (tx, rx) = mpsc::channel(8);
        ConfigWatcher::new(self.get_config(), &self.config_path, tx).start()?;
        Ok(rx)
    }
}
