//! Configuration schema for vvsync
//!
//! Configuration is stored at `~/.config/vvsync/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Key derivation cost parameters
    pub kdf: KdfConfig,

    /// Sync orchestrator settings
    pub sync: SyncConfig,

    /// Edit lock settings
    pub lock: LockConfig,

    /// Local and remote storage locations
    pub storage: StorageConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,

    /// Log format: "text" or "json"
    pub log_format: String,

    /// Enable audit logging
    pub audit_log: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: "text".to_string(),
            audit_log: true,
        }
    }
}

/// Argon2id cost parameters.
///
/// Every device sharing a budget must use the same values, otherwise the
/// derived keys differ and the vault will not decrypt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    /// Memory cost in KiB
    pub memory_kib: u32,

    /// Number of passes
    pub iterations: u32,

    /// Degree of parallelism
    pub parallelism: u32,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// Sync orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Periodic pass interval in seconds
    pub interval_secs: u64,

    /// First retry delay in milliseconds
    pub backoff_base_ms: u64,

    /// Upper bound for a single retry delay in milliseconds
    pub backoff_cap_ms: u64,

    /// Attempts per remote call before the pass fails
    pub max_attempts: u32,

    /// Delay before the very first pull of a fresh device
    pub cold_start_delay_ms: u64,

    /// Debounce for normal-priority change notifications
    pub debounce_normal_ms: u64,

    /// Debounce for high-priority change notifications
    pub debounce_high_ms: u64,
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn cold_start_delay(&self) -> Duration {
        Duration::from_millis(self.cold_start_delay_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 30_000,
            max_attempts: 5,
            cold_start_delay_ms: 2_000,
            debounce_normal_ms: 10_000,
            debounce_high_ms: 2_000,
        }
    }
}

/// Edit lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Lease duration in seconds
    pub ttl_secs: u64,

    /// Poll interval for backends without change notifications
    pub watch_poll_ms: u64,
}

impl LockConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_secs as i64)
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 60,
            watch_poll_ms: 5_000,
        }
    }
}

/// Storage locations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the encrypted vault blob (defaults to the state dir)
    pub data_dir: Option<PathBuf>,

    /// Directory used as the shared remote store and lock backend
    pub remote_dir: Option<PathBuf>,
}
