//! Sync pass metrics and health classification

use crate::error::VaultError;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

/// Number of passes kept for averages and display
pub const MAX_RECENT: usize = 50;

const ERROR_RATE_THRESHOLD: f64 = 0.05;
const CONSECUTIVE_FAILURE_THRESHOLD: u32 = 3;
const SLOW_AVERAGE: Duration = Duration::from_secs(10);

/// Overall sync health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Error rate above 5%
    Degraded,
    /// Three or more failures in a row
    Unhealthy,
    /// Passes succeed but average over 10 s
    Slow,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
            Self::Slow => "slow",
        };
        f.write_str(s)
    }
}

/// Coarse failure classes for reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Network,
    Encryption,
    Remote,
    Validation,
    Storage,
    Unknown,
}

impl ErrorCategory {
    pub fn of(err: &VaultError) -> Self {
        match err {
            VaultError::RemoteUnavailable(_) => Self::Network,
            VaultError::DecryptionError | VaultError::Encryption(_) | VaultError::KeyDerivation(_) => {
                Self::Encryption
            }
            VaultError::Remote(_) | VaultError::RemoteNotConfigured => Self::Remote,
            VaultError::InvalidFormat { .. }
            | VaultError::InvalidShareCode(_)
            | VaultError::EmptyPassword
            | VaultError::Json(_) => Self::Validation,
            VaultError::StorageWrite { .. }
            | VaultError::DurableWriteFailed { .. }
            | VaultError::Io { .. }
            | VaultError::VaultNotFound(_) => Self::Storage,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Encryption => "encryption",
            Self::Remote => "remote",
            Self::Validation => "validation",
            Self::Storage => "storage",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// One finished pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassRecord {
    /// Epoch ms when the pass finished
    pub finished_at: i64,
    pub duration_ms: u64,
    pub success: bool,
    pub category: Option<ErrorCategory>,
}

/// Running pass statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncHealth {
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub last_success_at: Option<i64>,
    pub last_error: Option<String>,
    /// Newest first
    pub recent: VecDeque<PassRecord>,
}

impl SyncHealth {
    pub fn record_success(&mut self, finished_at: i64, duration: Duration) {
        self.successes += 1;
        self.consecutive_failures = 0;
        self.last_success_at = Some(finished_at);
        self.push(PassRecord {
            finished_at,
            duration_ms: duration.as_millis() as u64,
            success: true,
            category: None,
        });
    }

    pub fn record_failure(&mut self, finished_at: i64, duration: Duration, err: &VaultError) {
        self.failures += 1;
        self.consecutive_failures += 1;
        self.last_error = Some(err.to_string());
        self.push(PassRecord {
            finished_at,
            duration_ms: duration.as_millis() as u64,
            success: false,
            category: Some(ErrorCategory::of(err)),
        });
    }

    fn push(&mut self, record: PassRecord) {
        self.recent.push_front(record);
        self.recent.truncate(MAX_RECENT);
    }

    pub fn total(&self) -> u64 {
        self.successes + self.failures
    }

    pub fn error_rate(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.failures as f64 / total as f64,
        }
    }

    /// Mean duration over the recent window
    pub fn average_duration(&self) -> Duration {
        if self.recent.is_empty() {
            return Duration::ZERO;
        }
        let sum: u64 = self.recent.iter().map(|r| r.duration_ms).sum();
        Duration::from_millis(sum / self.recent.len() as u64)
    }

    pub fn status(&self) -> HealthStatus {
        if self.consecutive_failures >= CONSECUTIVE_FAILURE_THRESHOLD {
            HealthStatus::Unhealthy
        } else if self.error_rate() > ERROR_RATE_THRESHOLD {
            HealthStatus::Degraded
        } else if self.average_duration() > SLOW_AVERAGE {
            HealthStatus::Slow
        } else {
            HealthStatus::Healthy
        }
    }
}
