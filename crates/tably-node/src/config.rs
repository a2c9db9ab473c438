//! Node configuration types.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tably_protocol::session::DEFAULT_MAX_PACKFILE_SIZE;
use tably_protocol::RefUpdatePolicy;
use tably_storage::Actor;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration for a Tably node.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    /// HTTP listen address.
    pub listen_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Log format (pretty or json).
    pub log_format: String,
    /// Where objects and refs are kept.
    pub storage: StorageConfig,
    /// Fetch and push limits and policies.
    pub transfer: TransferConfig,
    /// Identity written into reflog entries for pushed refs.
    pub reflog: ReflogConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            storage: StorageConfig::default(),
            transfer: TransferConfig::default(),
            reflog: ReflogConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Loads a YAML configuration file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Parses YAML configuration text.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that would make the node unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transfer.max_packfile_size == 0 {
            return Err(ConfigError::Invalid(
                "transfer.max_packfile_size must be positive".to_string(),
            ));
        }
        if self.transfer.max_sessions == 0 {
            return Err(ConfigError::Invalid(
                "transfer.max_sessions must be positive".to_string(),
            ));
        }
        if self.transfer.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "transfer.sweep_interval_secs must be positive".to_string(),
            ));
        }
        if self.storage.backend == StorageBackend::RocksDb && self.storage.path.is_none() {
            return Err(ConfigError::Invalid(
                "storage.path is required for the rocksdb backend".to_string(),
            ));
        }
        Ok(())
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local maps, lost on exit.
    #[default]
    Memory,
    /// RocksDB database at `storage.path`.
    RocksDb,
}

/// Storage settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Database directory for persistent backends.
    pub path: Option<PathBuf>,
}

/// Transfer limits and ref update policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Upper bound on one packfile chunk, in bytes.
    pub max_packfile_size: usize,
    /// Reject pushes that delete refs.
    pub deny_deletes: bool,
    /// Reject pushes that are not fast-forwards.
    pub deny_non_fast_forwards: bool,
    /// Maximum lifetime of a session.
    pub session_ttl_secs: u64,
    /// Maximum time a session may sit between requests.
    pub session_idle_secs: u64,
    /// Sessions kept per kind before the least recently used is evicted.
    pub max_sessions: usize,
    /// How often expired sessions are swept.
    pub sweep_interval_secs: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_packfile_size: DEFAULT_MAX_PACKFILE_SIZE,
            deny_deletes: false,
            deny_non_fast_forwards: false,
            session_ttl_secs: 24 * 60 * 60,
            session_idle_secs: 10 * 60,
            max_sessions: 10_000,
            sweep_interval_secs: 60,
        }
    }
}

impl TransferConfig {
    pub fn policy(&self) -> RefUpdatePolicy {
        RefUpdatePolicy {
            deny_deletes: self.deny_deletes,
            deny_non_fast_forwards: self.deny_non_fast_forwards,
        }
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Reflog identity.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReflogConfig {
    pub actor_name: String,
    pub actor_email: String,
}

impl Default for ReflogConfig {
    fn default() -> Self {
        Self {
            actor_name: "tably-node".to_string(),
            actor_email: "tably-node@localhost".to_string(),
        }
    }
}

impl ReflogConfig {
    pub fn actor(&self) -> Actor {
        Actor::new(&self.actor_name, &self.actor_email)
    }
}
