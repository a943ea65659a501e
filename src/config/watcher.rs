//! Configuration file watcher for hot reload.
//!
//! Editors often emit several events per save; a reload is only forwarded
//! when the file content actually changed and still validates.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::loader::parse_config;
use crate::config::schema::DispatchConfig;
use crate::load_balancer::ip_hash::fnv1a;

/// Watches one configuration file and emits validated reloads.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<DispatchConfig>,
    last_digest: Mutex<Option<u64>>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for validated configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<DispatchConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let last_digest = std::fs::read_to_string(path).ok().map(|c| fnv1a(&c));

        (
            Self {
                path: path.to_path_buf(),
                update_tx,
                last_digest: Mutex::new(last_digest),
            },
            update_rx,
        )
    }

    /// Re-read the file and forward it if changed and valid.
    /// Returns true when an update was sent.
    pub fn reload(&self) -> bool {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                tracing::error!(path = ?self.path, error = %e, "Failed to read config file");
                return false;
            }
        };

        let digest = fnv1a(&content);
        {
            let mut last = self.last_digest.lock().unwrap_or_else(PoisonError::into_inner);
            if *last == Some(digest) {
                tracing::debug!(path = ?self.path, "Config file unchanged, skipping reload");
                return false;
            }
            *last = Some(digest);
        }

        match parse_config(&content) {
            Ok(config) => self.update_tx.send(config).is_ok(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
                false
            }
        }
    }

    /// Start watching the file. The returned handle must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    tracing::info!(path = ?self.path, "Config file change detected");
                    self.reload();
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?path, "Config watcher started");
        Ok(watcher)
    }
}
