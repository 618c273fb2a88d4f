//! Error types for vvsync
//!
//! All modules use `VaultResult<T>` as their return type.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for vvsync operations
pub type VaultResult<T> = Result<T, VaultError>;

/// All errors that can occur in vvsync
#[derive(Error, Debug)]
pub enum VaultError {
    // Share code / identity errors
    #[error("Invalid share code format: {reason}")]
    InvalidFormat { reason: String },

    #[error("Invalid share code: {0}")]
    InvalidShareCode(String),

    #[error("Password is required")]
    EmptyPassword,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    // Encrypted store errors
    #[error("Invalid credentials or corrupted data")]
    DecryptionError,

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Failed to write {key}: {reason}")]
    StorageWrite { key: String, reason: String },

    #[error("Vault not initialized at {0}")]
    VaultNotFound(PathBuf),

    // Cache errors
    #[error("Durable write failed for {key}: {reason}")]
    DurableWriteFailed { key: String, reason: String },

    // Lock errors
    #[error("Record is being edited by {owner_name} until {expires_at}")]
    LockedByOther {
        owner_name: String,
        expires_at: DateTime<Utc>,
    },

    #[error("Lock has not expired yet (expires at {expires_at})")]
    NotExpired { expires_at: DateTime<Utc> },

    #[error("Lock backend error: {0}")]
    LockBackend(String),

    // Remote errors
    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Remote store rejected request: {0}")]
    Remote(String),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Remote directory not configured")]
    RemoteNotConfigured,

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl VaultError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create an invalid share code format error
    pub fn invalid_format(reason: impl Into<String>) -> Self {
        Self::InvalidFormat {
            reason: reason.into(),
        }
    }

    /// Create a durable write failure for a cache key
    pub fn durable_write(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DurableWriteFailed {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RemoteUnavailable(_)
                | Self::Io { .. }
                | Self::StorageWrite { .. }
                | Self::DurableWriteFailed { .. }
                | Self::LockBackend(_)
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::InvalidFormat { .. } | Self::InvalidShareCode(_) => {
                Some("A share code is exactly 4 words, e.g. \"abandon ability able about\"")
            }
            Self::EmptyPassword => Some("Pass --password or set VVSYNC_PASSWORD"),
            Self::DecryptionError => Some("Check the password and share code"),
            Self::VaultNotFound(_) => Some("Run: vvsync vault init"),
            Self::RemoteNotConfigured => Some("Run: vvsync config set storage.remote_dir <dir>"),
            Self::NotExpired { .. } => Some("Wait for the lease to expire before breaking it"),
            _ => None,
        }
    }
}
