//! Reloads the config file when it changes on disk.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind, Debouncer};

use super::loader::load_config;
use super::schema::Config;
use crate::error::ConfigError;

/// Watches a single config file and hands each valid reload to a callback.
pub struct ConfigWatcher {
    config_path: PathBuf,
    shutdown: Arc<AtomicBool>,
}

impl ConfigWatcher {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Returns a handle that stops [`ConfigWatcher::watch`] when set.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Blocks until the shutdown flag is set. Invalid edits are logged and
    /// skipped; the callback only ever sees configs that passed validation.
    pub fn watch<F>(&self, callback: F) -> Result<(), ConfigError>
    where
        F: Fn(Config) + Send + 'static,
    {
        // Editors often replace the file, so watch the parent directory.
        let watch_dir = self
            .config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let (tx, rx) = std::sync::mpsc::channel();

        let mut debouncer: Debouncer<RecommendedWatcher> =
            new_debouncer(Duration::from_millis(500), tx)
                .map_err(|e| ConfigError::WatchError(e.to_string()))?;

        debouncer
            .watcher()
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .map_err(|e| ConfigError::WatchError(e.to_string()))?;

        log::info!("Watching config file: {}", self.config_path.display());

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(Ok(events)) => {
                    let touched = events.iter().any(|event| {
                        matches!(event.kind, DebouncedEventKind::Any)
                            && event.path.file_name() == self.config_path.file_name()
                    });
                    if touched && self.config_path.exists() {
                        match load_config(&self.config_path) {
                            Ok(config) => {
                                log::info!("Config file changed, reloading");
                                callback(config);
                            }
                            Err(e) => {
                                log::error!("Ignoring invalid config change: {}", e);
                            }
                        }
                    }
                }
                Ok(Err(e)) => {
                    log::warn!("Config watch error: {:?}", e);
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    log::error!("Config watch channel disconnected");
                    break;
                }
            }
        }

        Ok(())
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}
