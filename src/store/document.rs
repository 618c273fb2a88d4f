//! Decrypted vault document and its schema migrations

use crate::cache::{CacheEntry, EntryMap};
use crate::error::{VaultError, VaultResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Schema version written by this build
pub const CURRENT_SCHEMA: u32 = 2;

/// Top-level collections of pre-entry vaults, in migration order
const LEGACY_COLLECTIONS: &[&str] = &[
    "envelopes",
    "bills",
    "transactions",
    "savingsGoals",
    "debts",
    "paycheckHistory",
];

/// Everything stored in the vault blob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultDocument {
    pub schema_version: u32,
    #[serde(default)]
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    pub budget: BudgetRecord,
    #[serde(default)]
    pub entries: EntryMap,
    #[serde(default)]
    pub sync: SyncMarkers,
}

impl VaultDocument {
    /// Empty document for a brand new vault
    pub fn new(budget_id: &str, user_name: Option<String>, now_ms: i64) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA,
            device_id: uuid::Uuid::new_v4().to_string(),
            user_name,
            budget: BudgetRecord::empty(budget_id, now_ms),
            entries: EntryMap::new(),
            sync: SyncMarkers::default(),
        }
    }

    /// Entries that are not tombstones
    pub fn live_entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values().filter(|e| !e.deleted)
    }
}

/// Budget-wide metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BudgetRecord {
    pub id: String,
    pub unassigned_cash: f64,
    pub actual_balance: f64,
    pub is_actual_balance_manual: bool,
    pub biweekly_allocation: f64,
    pub supplemental_accounts: Vec<Value>,
    pub last_modified: i64,
}

impl BudgetRecord {
    pub fn empty(budget_id: &str, now_ms: i64) -> Self {
        Self {
            id: budget_id.to_string(),
            last_modified: now_ms,
            ..Self::default()
        }
    }
}

impl Default for BudgetRecord {
    fn default() -> Self {
        Self {
            id: String::new(),
            unassigned_cash: 0.0,
            actual_balance: 0.0,
            is_actual_balance_manual: false,
            biweekly_allocation: 0.0,
            supplemental_accounts: Vec::new(),
            last_modified: 0,
        }
    }
}

/// Sync bookkeeping persisted alongside the data
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncMarkers {
    /// Epoch ms of the last completed pass, `None` on a device that never synced
    pub last_synced_at: Option<i64>,
    /// Highest `last_modified` the remote has confirmed receiving from us
    pub last_acknowledged: i64,
}

/// Result of reading a stored document
#[derive(Debug)]
pub struct Migrated {
    pub document: VaultDocument,
    /// Version the document was stored with, if it had to be upgraded
    pub from_version: Option<u32>,
}

/// Parse a decrypted document, upgrading older schemas in memory.
///
/// Shape errors are reported as [`VaultError::DecryptionError`]: a blob that
/// decrypts but does not parse is corrupted data.
pub fn migrate(value: Value, budget_id: &str, now_ms: i64) -> VaultResult<Migrated> {
    let Value::Object(mut obj) = value else {
        return Err(VaultError::DecryptionError);
    };

    let stored_version = obj
        .get("schemaVersion")
        .and_then(Value::as_u64)
        .map(|v| v as u32);
    let mut version = stored_version.unwrap_or(0);

    if version == 0 {
        obj = upgrade_v0(obj, budget_id, now_ms);
        version = 1;
    }
    if version == 1 {
        obj = upgrade_v1(obj, now_ms);
        version = 2;
    }
    if version > CURRENT_SCHEMA {
        return Err(VaultError::User(format!(
            "vault was written by a newer version (schema {})",
            version
        )));
    }

    let mut document: VaultDocument =
        serde_json::from_value(Value::Object(obj)).map_err(|_| VaultError::DecryptionError)?;

    let mut changed = stored_version != Some(CURRENT_SCHEMA);
    if document.device_id.is_empty() {
        document.device_id = uuid::Uuid::new_v4().to_string();
        changed = true;
    }
    if document.budget.id.is_empty() {
        document.budget.id = budget_id.to_string();
        changed = true;
    }

    Ok(Migrated {
        document,
        from_version: changed.then_some(stored_version.unwrap_or(0)),
    })
}

/// v0: flat legacy state, possibly wrapped in `{"state": {...}}`.
/// Lift budget metadata into a `budget` object with defaults.
fn upgrade_v0(mut obj: Map<String, Value>, budget_id: &str, now_ms: i64) -> Map<String, Value> {
    if let Some(Value::Object(state)) = obj.remove("state") {
        obj = state;
    }
    debug!("Upgrading vault document from schema 0");

    let number = |obj: &Map<String, Value>, key: &str| obj.get(key).and_then(Value::as_f64).unwrap_or(0.0);

    let budget = serde_json::json!({
        "id": budget_id,
        "unassignedCash": number(&obj, "unassignedCash"),
        "actualBalance": number(&obj, "actualBalance"),
        "isActualBalanceManual": obj.get("isActualBalanceManual").and_then(Value::as_bool).unwrap_or(false),
        "biweeklyAllocation": number(&obj, "biweeklyAllocation"),
        "supplementalAccounts": obj.get("supplementalAccounts").filter(|v| v.is_array()).cloned().unwrap_or_else(|| Value::Array(Vec::new())),
        "lastModified": obj.get("lastModified").and_then(Value::as_i64).unwrap_or(now_ms),
    });

    for key in [
        "unassignedCash",
        "actualBalance",
        "isActualBalanceManual",
        "biweeklyAllocation",
        "supplementalAccounts",
        "lastModified",
    ] {
        obj.remove(key);
    }

    obj.insert("budget".to_string(), budget);
    obj.insert("schemaVersion".to_string(), Value::from(1));
    obj
}

/// v1: legacy collections move into keyed entries
fn upgrade_v1(mut obj: Map<String, Value>, now_ms: i64) -> Map<String, Value> {
    debug!("Upgrading vault document from schema 1");
    let mut entries = match obj.remove("entries") {
        Some(Value::Object(existing)) => existing,
        _ => Map::new(),
    };

    // Older vaults kept the full ledger in `allTransactions`
    if let Some(Value::Array(all)) = obj.remove("allTransactions") {
        if !all.is_empty() {
            obj.insert("transactions".to_string(), Value::Array(all));
        }
    }

    for collection in LEGACY_COLLECTIONS {
        let Some(Value::Array(items)) = obj.remove(*collection) else {
            continue;
        };
        for (index, item) in items.into_iter().enumerate() {
            let id = match item.get("id") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => index.to_string(),
            };
            let key = format!("{}:{}", collection, id);
            let last_modified = item
                .get("lastModified")
                .or_else(|| item.get("updatedAt"))
                .and_then(Value::as_i64)
                .unwrap_or(now_ms);
            let entry = serde_json::json!({
                "key": key,
                "value": item,
                "lastModified": last_modified,
                "deleted": false,
            });
            entries.insert(key, entry);
        }
    }

    obj.insert("entries".to_string(), Value::Object(entries));
    obj.insert("schemaVersion".to_string(), Value::from(CURRENT_SCHEMA));
    obj
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BUDGET: &str = "budget_0123456789abcdef";
    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn current_document_is_untouched() {
        let doc = VaultDocument::new(BUDGET, Some("Alex".to_string()), NOW);
        let value = serde_json::to_value(&doc).unwrap();

        let migrated = migrate(value, BUDGET, NOW).unwrap();
        assert!(migrated.from_version.is_none());
        assert_eq!(migrated.document, doc);
    }

    #[test]
    fn v0_synthesizes_budget_defaults() {
        let legacy = json!({"unassignedCash": 125.5});

        let migrated = migrate(legacy, BUDGET, NOW).unwrap();
        assert_eq!(migrated.from_version, Some(0));

        let budget = &migrated.document.budget;
        assert_eq!(budget.id, BUDGET);
        assert_eq!(budget.unassigned_cash, 125.5);
        assert_eq!(budget.actual_balance, 0.0);
        assert!(!budget.is_actual_balance_manual);
        assert!(budget.supplemental_accounts.is_empty());
        assert_eq!(budget.last_modified, NOW);
        assert_eq!(migrated.document.schema_version, CURRENT_SCHEMA);
        assert!(!migrated.document.device_id.is_empty());
    }

    #[test]
    fn v0_wrapped_state_is_unwrapped() {
        let legacy = json!({
            "state": {
                "actualBalance": 900,
                "envelopes": [{"id": "groceries", "balance": 40}]
            }
        });

        let doc = migrate(legacy, BUDGET, NOW).unwrap().document;
        assert_eq!(doc.budget.actual_balance, 900.0);
        assert!(doc.entries.contains_key("envelopes:groceries"));
    }

    #[test]
    fn v1_collections_become_entries() {
        let legacy = json!({
            "schemaVersion": 1,
            "deviceId": "device-1",
            "budget": {"id": BUDGET, "unassignedCash": 10},
            "envelopes": [
                {"id": "rent", "balance": 800, "lastModified": 1_000},
                {"id": "fun", "balance": 20}
            ],
            "bills": [{"id": 7, "name": "power"}],
            "debts": [{"name": "no id"}]
        });

        let migrated = migrate(legacy, BUDGET, NOW).unwrap();
        assert_eq!(migrated.from_version, Some(1));

        let entries = &migrated.document.entries;
        assert_eq!(entries["envelopes:rent"].last_modified, 1_000);
        assert_eq!(entries["envelopes:fun"].last_modified, NOW);
        assert_eq!(entries["bills:7"].value["name"], "power");
        assert!(entries.contains_key("debts:0"));
        assert_eq!(migrated.document.device_id, "device-1");
    }

    #[test]
    fn all_transactions_preferred_when_present() {
        let legacy = json!({
            "schemaVersion": 1,
            "budget": {"id": BUDGET},
            "transactions": [{"id": "t1"}],
            "allTransactions": [{"id": "t1"}, {"id": "t2"}]
        });

        let doc = migrate(legacy, BUDGET, NOW).unwrap().document;
        assert!(doc.entries.contains_key("transactions:t2"));
    }

    #[test]
    fn missing_device_id_counts_as_migration() {
        let mut value = serde_json::to_value(VaultDocument::new(BUDGET, None, NOW)).unwrap();
        value.as_object_mut().unwrap().remove("deviceId");

        let migrated = migrate(value, BUDGET, NOW).unwrap();
        assert_eq!(migrated.from_version, Some(CURRENT_SCHEMA));
        assert!(!migrated.document.device_id.is_empty());
    }

    #[test]
    fn garbage_is_decryption_error() {
        assert!(matches!(
            migrate(json!([1, 2, 3]), BUDGET, NOW),
            Err(VaultError::DecryptionError)
        ));
        assert!(matches!(
            migrate(json!({"schemaVersion": 2, "budget": "nope"}), BUDGET, NOW),
            Err(VaultError::DecryptionError)
        ));
    }

    #[test]
    fn newer_schema_is_refused() {
        let value = json!({"schemaVersion": 9, "budget": {"id": BUDGET}});
        assert!(matches!(migrate(value, BUDGET, NOW), Err(VaultError::User(_))));
    }
}
