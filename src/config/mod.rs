//! Configuration management for vvsync

pub mod schema;

pub use schema::{Config, KdfConfig, LockConfig, StorageConfig, SyncConfig};

use crate::error::{VaultError, VaultResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vvsync")
            .join("config.toml")
    }

    /// Get the state directory path
    pub fn state_dir() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vvsync")
    }

    /// Get the audit log path
    pub fn audit_log_path() -> PathBuf {
        Self::state_dir().join("audit.log")
    }

    /// Directory holding the encrypted vault blob
    pub fn data_dir(config: &Config) -> PathBuf {
        config
            .storage
            .data_dir
            .clone()
            .unwrap_or_else(|| Self::state_dir().join("vault"))
    }

    /// Load configuration, using defaults if the file does not exist
    pub async fn load(&self) -> VaultResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> VaultResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| VaultError::io(format!("reading config from {}", path.display()), e))?;

        toml::from_str(&content).map_err(|e| VaultError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> VaultResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            VaultError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> VaultResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| VaultError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Ensure the vault data directory exists with owner-only permissions
    pub async fn ensure_data_dir(config: &Config) -> VaultResult<PathBuf> {
        let dir = Self::data_dir(config);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| VaultError::io(format!("creating directory {}", dir.display()), e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            std::fs::set_permissions(&dir, perms)
                .map_err(|e| VaultError::io("setting vault dir permissions", e))?;
        }

        Ok(dir)
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_default_when_missing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nonexistent.toml");
        let manager = ConfigManager::with_path(path);

        let config = manager.load().await.unwrap();
        assert_eq!(config.lock.ttl_secs, 60);
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        let manager = ConfigManager::with_path(path);

        let mut config = Config::default();
        config.sync.interval_secs = 12;
        config.storage.remote_dir = Some(temp.path().join("remote"));

        manager.save(&config).await.unwrap();
        let loaded = manager.load().await.unwrap();

        assert_eq!(loaded.sync.interval_secs, 12);
        assert_eq!(loaded.storage.remote_dir, Some(temp.path().join("remote")));
    }

    #[tokio::test]
    async fn invalid_file_reports_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        tokio::fs::write(&path, "[sync]\ninterval_secs = \"soon\"").await.unwrap();

        let err = ConfigManager::with_path(path.clone()).load().await.unwrap_err();
        assert!(matches!(err, VaultError::ConfigInvalid { path: p, .. } if p == path));
    }

    #[tokio::test]
    async fn data_dir_prefers_configured_path() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.data_dir = Some(temp.path().join("vault"));

        let dir = ConfigManager::ensure_data_dir(&config).await.unwrap();
        assert_eq!(dir, temp.path().join("vault"));
        assert!(dir.is_dir());
    }

    #[cfg(target_os = "linux")]
    #[test]
    #[serial_test::serial]
    fn default_paths_follow_xdg_dirs() {
        let temp = TempDir::new().unwrap();
        let previous = (
            std::env::var_os("XDG_CONFIG_HOME"),
            std::env::var_os("XDG_STATE_HOME"),
        );
        std::env::set_var("XDG_CONFIG_HOME", temp.path().join("config"));
        std::env::set_var("XDG_STATE_HOME", temp.path().join("state"));

        let config_path = ConfigManager::default_config_path();
        let data_dir = ConfigManager::data_dir(&Config::default());
        let audit = ConfigManager::audit_log_path();

        for (key, value) in [("XDG_CONFIG_HOME", previous.0), ("XDG_STATE_HOME", previous.1)] {
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
        }

        assert_eq!(config_path, temp.path().join("config/vvsync/config.toml"));
        assert_eq!(data_dir, temp.path().join("state/vvsync/vault"));
        assert_eq!(audit, temp.path().join("state/vvsync/audit.log"));
    }
}
