//! Persisted graph storage
//!
//! A storage driver saves and restores a whole [`Configuration`]. Drivers are
//! chosen by name from the CLI configuration; `file` is built in and keeps a
//! bincode blob at `driver_config.file`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::Configuration;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Unknown storage driver '{0}' (available: {available})", available = DRIVERS.join(", "))]
    UnknownDriver(String),

    #[error("Storage driver '{driver}' requires '{key}' in driver_config")]
    MissingConfig { driver: String, key: String },

    #[error("Failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to encode graph at {}: {source}", .path.display())]
    Encoding {
        path: PathBuf,
        source: bincode::Error,
    },
}

/// Names accepted by [`open_driver`].
pub const DRIVERS: &[&str] = &["file"];

#[async_trait]
pub trait StorageDriver: Send + Sync {
    async fn save(&self, configuration: &Configuration) -> Result<(), StorageError>;

    async fn load(&self) -> Result<Configuration, StorageError>;
}

/// Build the driver registered under `name`.
pub fn open_driver(
    name: &str,
    config: &BTreeMap<String, String>,
) -> Result<Box<dyn StorageDriver>, StorageError> {
    match name {
        "file" => {
            let path = config.get("file").ok_or_else(|| StorageError::MissingConfig {
                driver: name.to_string(),
                key: "file".to_string(),
            })?;
            Ok(Box::new(FileStorage::new(path)))
        }
        other => Err(StorageError::UnknownDriver(other.to_string())),
    }
}

/// Single-file bincode storage.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl StorageDriver for FileStorage {
    async fn save(&self, configuration: &Configuration) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        let bytes = bincode::serialize(configuration).map_err(|source| StorageError::Encoding {
            path: self.path.clone(),
            source,
        })?;
        tokio::fs::write(&self.path, &bytes)
            .await
            .map_err(|e| self.io_error(e))?;

        debug!(path = %self.path.display(), bytes = bytes.len(), "Saved graph");
        Ok(())
    }

    async fn load(&self) -> Result<Configuration, StorageError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        let configuration = bincode::deserialize(&bytes).map_err(|source| StorageError::Encoding {
            path: self.path.clone(),
            source,
        })?;

        debug!(path = %self.path.display(), bytes = bytes.len(), "Loaded graph");
        Ok(configuration)
    }
}
