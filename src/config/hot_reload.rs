//! Configuration hot-reload functionality.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, RwLock};

use super::loader::load_and_validate;
use super::model::AppConfig;
use crate::error::ConfigError;

const DEBOUNCE: Duration = Duration::from_millis(500);

/// Watches the configuration file and swaps in valid changes.
pub struct ConfigWatcher {
    config: Arc<RwLock<AppConfig>>,
    config_path: PathBuf,
    reload_tx: mpsc::Sender<ConfigReloadEvent>,
}

/// Events emitted by the configuration watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigReloadEvent {
    /// Configuration was successfully reloaded.
    Reloaded {
        /// Remote account credentials changed; cached remote state is stale.
        credentials_changed: bool,
    },
    /// Configuration reload failed; the previous config stays active.
    ValidationFailed { error_count: usize },
}

impl ConfigWatcher {
    pub fn new(
        config: Arc<RwLock<AppConfig>>,
        config_path: &Path,
        reload_tx: mpsc::Sender<ConfigReloadEvent>,
    ) -> Self {
        Self {
            config,
            config_path: config_path.to_path_buf(),
            reload_tx,
        }
    }

    /// Starts watching the configuration file for changes.
    pub fn start(self) -> Result<()> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            },
            Config::default(),
        )?;

        watcher.watch(&self.config_path, RecursiveMode::NonRecursive)?;

        tokio::spawn(async move {
            // The watcher stops delivering events once dropped.
            let _watcher = watcher;
            self.handle_changes(rx).await;
        });

        Ok(())
    }

    async fn handle_changes(self, mut rx: mpsc::UnboundedReceiver<notify::Event>) {
        let mut last_reload: Option<Instant> = None;

        while let Some(event) = rx.recv().await {
            if !(event.kind.is_modify() || event.kind.is_create()) {
                continue;
            }

            if last_reload.is_some_and(|at| at.elapsed() < DEBOUNCE) {
                continue;
            }

            // Let the writer finish before reading.
            tokio::time::sleep(DEBOUNCE).await;
            while rx.try_recv().is_ok() {}

            let event = self.try_reload().await;
            if self.reload_tx.send(event).await.is_err() {
                break;
            }
            last_reload = Some(Instant::now());
        }

        tracing::warn!("Config watcher channel closed");
    }

    /// Loads, validates, and swaps in the configuration.
    pub async fn try_reload(&self) -> ConfigReloadEvent {
        match load_and_validate(&self.config_path) {
            Ok(new_config) => {
                let mut config = self.config.write().await;
                let credentials_changed = config.remote.credentials_differ(&new_config.remote);
                *config = new_config;
                tracing::info!(credentials_changed, "Configuration reloaded successfully");
                ConfigReloadEvent::Reloaded { credentials_changed }
            }
            Err(e) => {
                let error_count = match e.downcast_ref::<ConfigError>() {
                    Some(ConfigError::ValidationFailed { error_count }) => *error_count,
                    _ => 1,
                };
                tracing::error!(error = %e, error_count, "Configuration reload failed");
                ConfigReloadEvent::ValidationFailed { error_count }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::load_from_path;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const BASE: &str = "global:\n  redis: {}\nremote:\n  cloud_id: c\n  access_key: a\n  secret_key: s\n";

    fn rewrite(file: &NamedTempFile, yaml: &str) {
        let mut f = std::fs::File::create(file.path()).unwrap();
        f.write_all(yaml.as_bytes()).unwrap();
    }

    fn watcher_for(file: &NamedTempFile) -> (ConfigWatcher, Arc<RwLock<AppConfig>>) {
        let config = Arc::new(RwLock::new(load_from_path(file.path()).unwrap()));
        let (tx, _rx) = mpsc::channel(4);
        (ConfigWatcher::new(Arc::clone(&config), file.path(), tx), config)
    }

    #[tokio::test]
    async fn reload_swaps_config_and_flags_credential_change() {
        let file = NamedTempFile::new().unwrap();
        rewrite(&file, BASE);
        let (watcher, config) = watcher_for(&file);

        rewrite(&file, &format!("{}transcoding:\n  poll_interval_seconds: 5\n", BASE));
        assert_eq!(
            watcher.try_reload().await,
            ConfigReloadEvent::Reloaded { credentials_changed: false }
        );
        assert_eq!(config.read().await.transcoding.poll_interval_seconds, 5);

        rewrite(&file, &BASE.replace("secret_key: s", "secret_key: rotated"));
        assert_eq!(
            watcher.try_reload().await,
            ConfigReloadEvent::Reloaded { credentials_changed: true }
        );
    }

    #[tokio::test]
    async fn invalid_reload_keeps_previous_config() {
        let file = NamedTempFile::new().unwrap();
        rewrite(&file, BASE);
        let (watcher, config) = watcher_for(&file);

        rewrite(&file, &BASE.replace("global:\n", "global:\n  log_level: loud\n"));
        assert_eq!(
            watcher.try_reload().await,
            ConfigReloadEvent::ValidationFailed { error_count: 1 }
        );
        assert_eq!(config.read().await.global.log_level, "info");
    }
}
