//! Service configuration loaded from TOML or JSON.

use serde::{Deserialize, Serialize};
use std::path::Path;

use snfs_storage::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};

use crate::credential::DEFAULT_HASH_ITERATIONS;

/// Admin account created at startup when no user exists yet.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapAdmin {
    /// Login name
    pub name: String,
    /// Initial password
    pub password: String,
}

impl std::fmt::Debug for BootstrapAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapAdmin")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Tunables for an [`crate::Snfs`] instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnfsConfig {
    /// Content chunk size in bytes.
    pub chunk_size: usize,
    /// Sessions idle longer than this are expired; 0 disables expiry.
    pub session_idle_timeout_secs: u64,
    /// How often the daemon reaps idle sessions.
    pub reap_interval_secs: u64,
    /// Password hashing rounds for new credentials.
    pub hash_iterations: u32,
    /// First admin account.
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

impl Default for SnfsConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            session_idle_timeout_secs: 3600,
            reap_interval_secs: 60,
            hash_iterations: DEFAULT_HASH_ITERATIONS,
            bootstrap_admin: None,
        }
    }
}

impl SnfsConfig {
    /// Loads a config file; the format follows the extension.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: SnfsConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the service cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            anyhow::bail!("chunk_size must be between 1 and {} bytes", MAX_CHUNK_SIZE);
        }
        if self.reap_interval_secs == 0 {
            anyhow::bail!("reap_interval_secs must be positive");
        }
        if let Some(admin) = &self.bootstrap_admin {
            if admin.name.is_empty() {
                anyhow::bail!("bootstrap_admin.name must not be empty");
            }
        }
        Ok(())
    }
}
