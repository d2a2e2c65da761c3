//! Settings persistence backends
//!
//! Every store merges what it holds over the caller's defaults on `get`, and
//! broadcasts a key-level diff after each successful `set`.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use super::{SettingsChange, SettingsMap};

/// Errors from a settings backend
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings from {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write settings to {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("settings file {path} is not a JSON object: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("settings file {0} does not contain a JSON object")]
    NotAnObject(PathBuf),
}

/// Key/value persistence with change notifications
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Stored values merged over `defaults`
    async fn get(&self, defaults: SettingsMap) -> Result<SettingsMap, SettingsError>;

    /// Merge `values` into the store
    async fn set(&self, values: SettingsMap) -> Result<(), SettingsError>;

    /// Diffs of every successful `set`
    fn subscribe(&self) -> broadcast::Receiver<SettingsChange>;
}

fn merge_over(mut base: SettingsMap, values: SettingsMap) -> SettingsMap {
    base.extend(values);
    base
}

fn notify(tx: &broadcast::Sender<SettingsChange>, change: SettingsChange) {
    if change.is_empty() {
        return;
    }
    debug!(keys = ?change.changes.keys().collect::<Vec<_>>(), "settings changed");
    // No subscribers is fine
    let _ = tx.send(change);
}

/// In-process store, lost on exit
pub struct MemoryStore {
    data: RwLock<SettingsMap>,
    change_tx: broadcast::Sender<SettingsChange>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_values(SettingsMap::new())
    }

    pub fn with_values(values: SettingsMap) -> Self {
        let (change_tx, _) = broadcast::channel(16);
        Self {
            data: RwLock::new(values),
            change_tx,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn get(&self, defaults: SettingsMap) -> Result<SettingsMap, SettingsError> {
        Ok(merge_over(defaults, self.data.read().await.clone()))
    }

    async fn set(&self, values: SettingsMap) -> Result<(), SettingsError> {
        let change = {
            let mut data = self.data.write().await;
            let change = SettingsChange::diff(&data, &values);
            data.extend(values);
            change
        };
        notify(&self.change_tx, change);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SettingsChange> {
        self.change_tx.subscribe()
    }
}

/// JSON object on disk. A missing file reads as empty.
pub struct FileStore {
    path: PathBuf,
    /// Serialises read-modify-write cycles
    write_lock: tokio::sync::Mutex<()>,
    change_tx: broadcast::Sender<SettingsChange>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let (change_tx, _) = broadcast::channel(16);
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
            change_tx,
        }
    }

    async fn load(&self) -> Result<SettingsMap, SettingsError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(SettingsMap::new()),
            Err(source) => {
                return Err(SettingsError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let value: Value =
            serde_json::from_slice(&bytes).map_err(|source| SettingsError::Parse {
                path: self.path.clone(),
                source,
            })?;

        match value {
            Value::Object(map) => Ok(map),
            _ => Err(SettingsError::NotAnObject(self.path.clone())),
        }
    }

    async fn store(&self, map: &SettingsMap) -> Result<(), SettingsError> {
        let write_err = |source| SettingsError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let bytes = serde_json::to_vec_pretty(map).map_err(|e| write_err(e.into()))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await.map_err(write_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(write_err)?;
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for FileStore {
    async fn get(&self, defaults: SettingsMap) -> Result<SettingsMap, SettingsError> {
        Ok(merge_over(defaults, self.load().await?))
    }

    async fn set(&self, values: SettingsMap) -> Result<(), SettingsError> {
        let change = {
            let _guard = self.write_lock.lock().await;
            let mut current = self.load().await?;
            let change = SettingsChange::diff(&current, &values);
            current.extend(values);
            self.store(&current).await?;
            change
        };
        notify(&self.change_tx, change);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SettingsChange> {
        self.change_tx.subscribe()
    }
}

/// Prefer `primary`, fall back to `secondary` when it fails.
///
/// Reads that fail on both sides yield the defaults; writes that fail on both
/// sides are logged and dropped.
pub struct FallbackStore<P, S> {
    primary: P,
    secondary: S,
    change_tx: broadcast::Sender<SettingsChange>,
}

impl<P: SettingsStore, S: SettingsStore> FallbackStore<P, S> {
    pub fn new(primary: P, secondary: S) -> Self {
        let (change_tx, _) = broadcast::channel(16);
        Self {
            primary,
            secondary,
            change_tx,
        }
    }
}

#[async_trait]
impl<P: SettingsStore, S: SettingsStore> SettingsStore for FallbackStore<P, S> {
    async fn get(&self, defaults: SettingsMap) -> Result<SettingsMap, SettingsError> {
        match self.primary.get(defaults.clone()).await {
            Ok(map) => return Ok(map),
            Err(e) => warn!(error = %e, "primary settings read failed"),
        }
        match self.secondary.get(defaults.clone()).await {
            Ok(map) => Ok(map),
            Err(e) => {
                warn!(error = %e, "fallback settings read failed, using defaults");
                Ok(defaults)
            }
        }
    }

    async fn set(&self, values: SettingsMap) -> Result<(), SettingsError> {
        let previous = self.get(SettingsMap::new()).await?;
        let change = SettingsChange::diff(&previous, &values);

        if let Err(e) = self.primary.set(values.clone()).await {
            warn!(error = %e, "primary settings write failed");
            if let Err(e) = self.secondary.set(values).await {
                warn!(error = %e, "fallback settings write failed");
                return Ok(());
            }
        }

        notify(&self.change_tx, change);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SettingsChange> {
        self.change_tx.subscribe()
    }
}
