use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::SessionConfig;
use crate::error::{AppError, Result};

/// Configuration store with optional JSON file persistence
///
/// Uses `ArcSwap` for lock-free reads; consumers take a snapshot with
/// [`ConfigStore::get`] and keep it for the lifetime of a capture or session.
#[derive(Clone)]
pub struct ConfigStore {
    path: Option<PathBuf>,
    /// Lock-free cache using ArcSwap for zero-cost reads
    cache: Arc<ArcSwap<SessionConfig>>,
    change_tx: broadcast::Sender<ConfigChange>,
}

/// Configuration change event
#[derive(Debug, Clone)]
pub struct ConfigChange {
    pub key: String,
}

impl ConfigStore {
    /// Create an in-memory store
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let (change_tx, _) = broadcast::channel(16);
        Ok(Self {
            path: None,
            cache: Arc::new(ArcSwap::from_pointee(config)),
            change_tx,
        })
    }

    /// Load from a JSON file, writing defaults if it does not exist
    pub async fn load(path: &Path) -> Result<Self> {
        let config = match tokio::fs::read_to_string(path).await {
            Ok(json) => {
                let config: SessionConfig = serde_json::from_str(&json).map_err(|e| {
                    AppError::Config(format!("Invalid config file {}: {}", path.display(), e))
                })?;
                info!("Loaded configuration from {}", path.display());
                config
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = SessionConfig::default();
                Self::write_file(path, &config).await?;
                info!("Created default configuration at {}", path.display());
                config
            }
            Err(e) => return Err(e.into()),
        };

        let mut store = Self::new(config)?;
        store.path = Some(path.to_path_buf());
        Ok(store)
    }

    async fn write_file(path: &Path, config: &SessionConfig) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_string_pretty(config)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    /// Get current configuration (lock-free, zero-copy)
    pub fn get(&self) -> Arc<SessionConfig> {
        self.cache.load_full()
    }

    /// Replace the entire configuration
    pub fn set(&self, config: SessionConfig) -> Result<()> {
        config.validate()?;
        self.cache.store(Arc::new(config));
        self.notify("session");
        Ok(())
    }

    /// Update configuration with a fallible closure
    ///
    /// The closure works on a copy; the cache is only replaced when the
    /// closure and validation both succeed. Last write wins.
    pub fn update<F>(&self, key: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut SessionConfig) -> Result<()>,
    {
        let current = self.cache.load();
        let mut config = (**current).clone();
        f(&mut config)?;
        config.validate()?;

        self.cache.store(Arc::new(config));
        self.notify(key);
        Ok(())
    }

    /// Write the current snapshot to the backing file, if any
    pub async fn persist(&self) -> Result<()> {
        match &self.path {
            Some(path) => {
                Self::write_file(path, &self.get()).await?;
                debug!("Configuration saved to {}", path.display());
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Subscribe to configuration changes
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.change_tx.subscribe()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn notify(&self, key: &str) {
        let _ = self.change_tx.send(ConfigChange {
            key: key.to_string(),
        });
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        let (change_tx, _) = broadcast::channel(16);
        Self {
            path: None,
            cache: Arc::new(ArcSwap::from_pointee(SessionConfig::default())),
            change_tx,
        }
    }
}
