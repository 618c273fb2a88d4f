//! Lease documents

use crate::clock::from_ms;
use crate::error::{VaultError, VaultResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// An edit lease on one record.
///
/// Timestamps are epoch milliseconds. `fence` is assigned by the backend
/// and changes on every write to the lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockDocument {
    pub record_type: String,
    pub record_id: String,
    pub user_id: String,
    pub user_name: String,
    pub budget_id: String,
    pub acquired_at: i64,
    pub expires_at: i64,
    pub last_activity: i64,
    #[serde(default)]
    pub fence: u64,
}

impl LockDocument {
    pub fn lock_id(&self) -> String {
        format!("{}/{}/{}", self.budget_id, self.record_type, self.record_id)
    }

    /// A lease is live up to and including `expires_at`
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms > self.expires_at
    }

    pub fn remaining(&self, now_ms: i64) -> Duration {
        Duration::from_millis(self.expires_at.saturating_sub(now_ms).max(0) as u64)
    }

    pub fn expires_at_utc(&self) -> DateTime<Utc> {
        from_ms(self.expires_at)
    }

    pub fn is_held_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}

/// Who is asking for a lease
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockOwner {
    pub user_id: String,
    pub user_name: String,
}

impl LockOwner {
    pub fn new(user_id: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: user_name.into(),
        }
    }
}

/// Storage id of the lock on a record of one budget.
///
/// Parts are restricted to characters that are safe in file names and
/// never contain `/`, so each `(budget, type, record)` has its own id.
pub fn lock_id(budget_id: &str, record_type: &str, record_id: &str) -> VaultResult<String> {
    validate_part("budget id", budget_id)?;
    validate_part("record type", record_type)?;
    validate_part("record id", record_id)?;
    Ok(format!("{}/{}/{}", budget_id, record_type, record_id))
}

fn validate_part(what: &str, value: &str) -> VaultResult<()> {
    if value.is_empty() {
        return Err(VaultError::invalid_format(format!("{} is empty", what)));
    }
    if let Some(bad) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(VaultError::invalid_format(format!(
            "{} contains '{}'",
            what, bad
        )));
    }
    if value.starts_with('.') {
        return Err(VaultError::invalid_format(format!(
            "{} may not start with '.'",
            what
        )));
    }
    Ok(())
}
