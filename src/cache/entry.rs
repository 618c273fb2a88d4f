use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// All entries by key, tombstones included
pub type EntryMap = BTreeMap<String, CacheEntry>;

/// One keyed value with its write stamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    /// Epoch milliseconds of the last write, monotonic per key
    pub last_modified: i64,
    /// Tombstone marker; deleted entries keep `value = null`
    #[serde(default)]
    pub deleted: bool,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, value: Value, last_modified: i64) -> Self {
        Self {
            key: key.into(),
            value,
            last_modified,
            deleted: false,
        }
    }

    pub fn tombstone(key: impl Into<String>, last_modified: i64) -> Self {
        Self {
            key: key.into(),
            value: Value::Null,
            last_modified,
            deleted: true,
        }
    }

    pub fn is_live(&self) -> bool {
        !self.deleted
    }

    /// Collection prefix of keys like `envelopes:rent`
    pub fn collection(&self) -> Option<&str> {
        self.key.split_once(':').map(|(c, _)| c)
    }
}

/// Result of a single-key mutation
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    /// Memory and durable layer both hold the new entry
    Applied(CacheEntry),
    /// Key is absent or deleted; nothing changed
    NotFound,
}

impl MutationOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Result of a batch update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub applied: Vec<String>,
    pub not_found: Vec<String>,
}
