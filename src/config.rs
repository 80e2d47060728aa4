//! Engine configuration
//!
//! Loads scheduler tuning from YAML. Every field is defaulted, so an empty
//! file (or no file) yields the stock engine.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use graph_types::Kind;
use serde::{Deserialize, Serialize};

pub const ENV_ATTEST_TIMEOUT: &str = "COMPLIANCE_ATTEST_TIMEOUT_SECS";
pub const ENV_RECONCILE_TIMEOUT: &str = "COMPLIANCE_RECONCILE_TIMEOUT_SECS";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid value for {name}: {value}")]
    Invalid { name: String, value: String },
}

/// Per-kind controller tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Concurrent workers for this kind.
    pub workers: usize,
    /// Period of the unconditional re-list.
    pub resync_secs: u64,
    /// Ignore updates that leave the generation unchanged.
    #[serde(default)]
    pub generation_filter: bool,
}

impl ControllerConfig {
    /// Stock tuning: few workers for kinds that call out to providers, short
    /// resync for status-bearing kinds, long resync for the structural tree.
    pub fn default_for(kind: Kind) -> Self {
        let expensive = matches!(kind, Kind::Attestation | Kind::NodeAttestation);
        let structural = matches!(kind, Kind::Node | Kind::Join);
        Self {
            workers: if expensive { 5 } else { 100 },
            resync_secs: if structural { 3600 } else { 60 },
            generation_filter: expensive,
        }
    }

    pub fn resync(&self) -> Duration {
        Duration::from_secs(self.resync_secs)
    }
}

/// Engine-wide configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Overrides keyed by kind. Kinds not listed use [`ControllerConfig::default_for`].
    pub controllers: BTreeMap<Kind, ControllerConfig>,
    pub attest_timeout_secs: u64,
    pub reconcile_timeout_secs: u64,
    pub error_backoff_secs: u64,
    pub max_converge_passes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            controllers: BTreeMap::new(),
            attest_timeout_secs: 120,
            reconcile_timeout_secs: 300,
            error_backoff_secs: 5,
            max_converge_passes: 16,
        }
    }
}

impl EngineConfig {
    /// Load from a YAML file, then apply environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: Self =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        config.apply_env()?;
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(secs) = env_secs(ENV_ATTEST_TIMEOUT)? {
            self.attest_timeout_secs = secs;
        }
        if let Some(secs) = env_secs(ENV_RECONCILE_TIMEOUT)? {
            self.reconcile_timeout_secs = secs;
        }
        Ok(())
    }

    pub fn controller(&self, kind: Kind) -> ControllerConfig {
        self.controllers
            .get(&kind)
            .copied()
            .unwrap_or_else(|| ControllerConfig::default_for(kind))
    }

    pub fn attest_timeout(&self) -> Duration {
        Duration::from_secs(self.attest_timeout_secs)
    }

    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
}

fn env_secs(name: &str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                name: name.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}
