//! Configuration persistence with change subscription.
//!
//! [`ConfigStore`] is the boundary to wherever the host keeps a block's
//! configuration. Subscribers receive every accepted config through a
//! [`tokio::sync::watch`] channel; dropping the receiver unsubscribes.
//!
//! Two implementations ship here: [`FileConfigStore`] (a JSON document on
//! disk, optionally polled for external edits) and [`MemoryConfigStore`].

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::error::ConfigError;

/// Lower bound on the config file poll interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Read the persisted config, or `None` when nothing was saved yet.
    async fn load(&self) -> Result<Option<AppConfig>, ConfigError>;

    /// Validate and persist `config`, then notify subscribers.
    async fn save(&self, config: &AppConfig) -> Result<(), ConfigError>;

    /// Receive the latest config whenever it changes.
    fn subscribe(&self) -> watch::Receiver<Option<AppConfig>>;
}

// ---------------------------------------------------------------------------
// MemoryConfigStore
// ---------------------------------------------------------------------------

/// Keeps the config in memory only.
pub struct MemoryConfigStore {
    tx: watch::Sender<Option<AppConfig>>,
}

impl MemoryConfigStore {
    pub fn new(initial: Option<AppConfig>) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }
}

impl Default for MemoryConfigStore {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn load(&self) -> Result<Option<AppConfig>, ConfigError> {
        Ok(self.tx.borrow().clone())
    }

    async fn save(&self, config: &AppConfig) -> Result<(), ConfigError> {
        config.check()?;
        self.tx.send_replace(Some(config.clone()));
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<Option<AppConfig>> {
        self.tx.subscribe()
    }
}

// ---------------------------------------------------------------------------
// FileConfigStore
// ---------------------------------------------------------------------------

/// Stores the config as a pretty-printed JSON document on disk.
///
/// Legacy or partially filled documents are upgraded on first read and
/// written back, so generated page ids stay stable across reloads.
pub struct FileConfigStore {
    path: PathBuf,
    tx: watch::Sender<Option<AppConfig>>,
    /// Modification time of the document as last read or written.
    seen_mtime: Mutex<Option<SystemTime>>,
}

impl FileConfigStore {
    /// Open the store and read the current document, if any.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let store = Self {
            path: path.into(),
            tx: watch::channel(None).0,
            seen_mtime: Mutex::new(None),
        };
        let initial = store.read_from_disk().await?;
        store.tx.send_replace(initial);
        Ok(store)
    }

    /// Re-read the document if its modification time changed since the last
    /// read or write. Returns whether subscribers were notified.
    pub async fn reload_if_changed(&self) -> Result<bool, ConfigError> {
        let current = modified_time(&self.path).await;
        if *self.seen_mtime.lock().await == current {
            return Ok(false);
        }
        let config = self.read_from_disk().await?;
        if *self.tx.borrow() == config {
            return Ok(false);
        }
        tracing::info!(path = %self.path.display(), "Config file changed, reloading");
        self.tx.send_replace(config);
        Ok(true)
    }

    /// Poll the document for external edits until `cancel` fires. The
    /// interval is floored at [`MIN_POLL_INTERVAL`].
    pub async fn watch_file(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval.max(MIN_POLL_INTERVAL));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Config file watcher cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.reload_if_changed().await {
                        tracing::warn!(
                            path = %self.path.display(),
                            error = %e,
                            "Ignoring unreadable config file",
                        );
                    }
                }
            }
        }
    }

    async fn read_from_disk(&self) -> Result<Option<AppConfig>, ConfigError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                *self.seen_mtime.lock().await = None;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let raw: serde_json::Value = serde_json::from_str(&text)?;
        let config = AppConfig::from_json(raw.clone())?;

        if serde_json::to_value(&config)? != raw {
            self.write_to_disk(&config).await?;
        } else {
            *self.seen_mtime.lock().await = modified_time(&self.path).await;
        }
        Ok(Some(config))
    }

    /// Write via a sibling temp file and rename, so readers never observe a
    /// half-written document.
    async fn write_to_disk(&self, config: &AppConfig) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(config)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        *self.seen_mtime.lock().await = modified_time(&self.path).await;
        Ok(())
    }
}

async fn modified_time(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn load(&self) -> Result<Option<AppConfig>, ConfigError> {
        self.read_from_disk().await
    }

    async fn save(&self, config: &AppConfig) -> Result<(), ConfigError> {
        config.check()?;
        self.write_to_disk(config).await?;
        tracing::info!(
            path = %self.path.display(),
            pages = config.pages.len(),
            "Config saved",
        );
        self.tx.send_replace(Some(config.clone()));
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<Option<AppConfig>> {
        self.tx.subscribe()
    }
}
