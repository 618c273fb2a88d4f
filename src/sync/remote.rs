//! Remote store contract and reference adapters.
//!
//! The remote only ever sees opaque record ids, timestamps and sealed
//! payloads. Entry keys and values travel inside the sealed blob.

use crate::cache::CacheEntry;
use crate::error::{VaultError, VaultResult};
use crate::identity::{BudgetId, DerivedKey};
use crate::store::{atomic_write, dir_write_lock, DirWriteLock};
use crate::store::cipher::{self, Sealed};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::fs;

const RECORD_DOMAIN: &[u8] = b"vvsync.record.v1\n";

/// One sealed entry as stored remotely
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    /// Keyed hash of the entry key
    pub id: String,
    pub last_modified: i64,
    pub deleted: bool,
    pub sealed: Sealed,
}

impl RemoteRecord {
    pub fn seal(entry: &CacheEntry, key: &DerivedKey) -> VaultResult<Self> {
        Ok(Self {
            id: record_id(&entry.key, key),
            last_modified: entry.last_modified,
            deleted: entry.deleted,
            sealed: cipher::encrypt(entry, key)?,
        })
    }

    /// Decrypt back into an entry, rejecting records whose clear metadata
    /// disagrees with the sealed content
    pub fn open(&self, key: &DerivedKey) -> VaultResult<CacheEntry> {
        let entry: CacheEntry = cipher::decrypt(&self.sealed.ciphertext, key, &self.sealed.iv)?;
        if entry.last_modified != self.last_modified
            || entry.deleted != self.deleted
            || record_id(&entry.key, key) != self.id
        {
            return Err(VaultError::DecryptionError);
        }
        Ok(entry)
    }
}

/// Opaque, per-budget stable id for an entry key
pub fn record_id(entry_key: &str, key: &DerivedKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(RECORD_DOMAIN);
    hasher.update(key.as_bytes());
    hasher.update(entry_key.as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

/// Everything the remote holds for a budget
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSnapshot {
    pub records: Vec<RemoteRecord>,
}

/// Remote confirmation of a push
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushAck {
    /// Highest `last_modified` among the records accepted
    pub acknowledged_through: i64,
}

/// Client side of the remote document store
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    async fn pull(&self, budget: &BudgetId) -> VaultResult<RemoteSnapshot>;

    async fn push(&self, budget: &BudgetId, records: Vec<RemoteRecord>) -> VaultResult<PushAck>;
}

#[async_trait]
impl<T: RemoteStore + ?Sized> RemoteStore for Arc<T> {
    async fn pull(&self, budget: &BudgetId) -> VaultResult<RemoteSnapshot> {
        (**self).pull(budget).await
    }

    async fn push(&self, budget: &BudgetId, records: Vec<RemoteRecord>) -> VaultResult<PushAck> {
        (**self).push(budget, records).await
    }
}

type RecordTable = BTreeMap<String, RemoteRecord>;

// Later or equal stamps replace; clients only re-push on a tie when their
// version wins the deterministic comparison.
fn accept(table: &mut RecordTable, records: Vec<RemoteRecord>) -> PushAck {
    let mut ack = PushAck::default();
    for record in records {
        let newer = table
            .get(&record.id)
            .map_or(true, |existing| record.last_modified >= existing.last_modified);
        ack.acknowledged_through = ack.acknowledged_through.max(record.last_modified);
        if newer {
            table.insert(record.id.clone(), record);
        }
    }
    ack
}

/// Shared in-process remote; clones see the same data.
///
/// Supports simulated outages and latency for exercising retry and
/// concurrency paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    budgets: Arc<Mutex<HashMap<BudgetId, RecordTable>>>,
    offline: Arc<AtomicU32>,
    pulls: Arc<AtomicU32>,
    latency_ms: Arc<AtomicU64>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `calls` pull/push calls as unavailable
    pub fn fail_next(&self, calls: u32) {
        self.offline.store(calls, Ordering::SeqCst);
    }

    /// Stay unavailable until `set_online`
    pub fn set_offline(&self) {
        self.offline.store(u32::MAX, Ordering::SeqCst);
    }

    pub fn set_online(&self) {
        self.offline.store(0, Ordering::SeqCst);
    }

    /// Delay every pull and push by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn pull_count(&self) -> u32 {
        self.pulls.load(Ordering::SeqCst)
    }

    /// Raw records for a budget, for inspection
    pub fn records(&self, budget: &BudgetId) -> Vec<RemoteRecord> {
        self.budgets
            .lock()
            .ok()
            .and_then(|b| b.get(budget).map(|t| t.values().cloned().collect()))
            .unwrap_or_default()
    }

    /// Plant a record directly, bypassing clients
    pub fn insert_raw(&self, budget: &BudgetId, record: RemoteRecord) {
        if let Ok(mut budgets) = self.budgets.lock() {
            budgets
                .entry(budget.clone())
                .or_default()
                .insert(record.id.clone(), record);
        }
    }

    fn check_online(&self) -> VaultResult<()> {
        let remaining = self.offline.load(Ordering::SeqCst);
        if remaining == 0 {
            return Ok(());
        }
        if remaining != u32::MAX {
            self.offline.store(remaining - 1, Ordering::SeqCst);
        }
        Err(VaultError::RemoteUnavailable("simulated outage".to_string()))
    }

    async fn delay(&self) {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
    }

    fn table(&self) -> VaultResult<std::sync::MutexGuard<'_, HashMap<BudgetId, RecordTable>>> {
        self.budgets
            .lock()
            .map_err(|_| VaultError::Internal("memory remote poisoned".to_string()))
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn pull(&self, budget: &BudgetId) -> VaultResult<RemoteSnapshot> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        self.check_online()?;
        let budgets = self.table()?;
        Ok(RemoteSnapshot {
            records: budgets
                .get(budget)
                .map(|t| t.values().cloned().collect())
                .unwrap_or_default(),
        })
    }

    async fn push(&self, budget: &BudgetId, records: Vec<RemoteRecord>) -> VaultResult<PushAck> {
        self.delay().await;
        self.check_online()?;
        let mut budgets = self.table()?;
        Ok(accept(budgets.entry(budget.clone()).or_default(), records))
    }
}

/// Directory-backed remote: one JSON file per budget.
///
/// Meant for a shared folder (network mount, synced directory). Pushes are
/// read-modify-write with an atomic replace, serialized between every
/// remote this process opens on the same directory.
#[derive(Debug, Clone)]
pub struct FsRemote {
    dir: PathBuf,
    write_lock: DirWriteLock,
}

impl FsRemote {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            write_lock: dir_write_lock(&dir),
            dir,
        }
    }

    fn path_for(&self, budget: &BudgetId) -> PathBuf {
        self.dir.join("budgets").join(format!("{}.json", budget))
    }

    async fn read_table(&self, budget: &BudgetId) -> VaultResult<RecordTable> {
        let path = self.path_for(budget);
        match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| VaultError::Remote(format!("unreadable {}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RecordTable::new()),
            Err(e) => Err(VaultError::RemoteUnavailable(format!(
                "reading {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

#[async_trait]
impl RemoteStore for FsRemote {
    async fn pull(&self, budget: &BudgetId) -> VaultResult<RemoteSnapshot> {
        let table = self.read_table(budget).await?;
        Ok(RemoteSnapshot {
            records: table.into_values().collect(),
        })
    }

    async fn push(&self, budget: &BudgetId, records: Vec<RemoteRecord>) -> VaultResult<PushAck> {
        let _guard = self.write_lock.lock().await;
        let mut table = self.read_table(budget).await?;
        let ack = accept(&mut table, records);

        let bytes = serde_json::to_vec_pretty(&table)?;
        let path = self.path_for(budget);
        atomic_write(&path, &bytes)
            .await
            .map_err(|e| VaultError::RemoteUnavailable(format!("writing {}: {}", path.display(), e)))?;
        Ok(ack)
    }
}
