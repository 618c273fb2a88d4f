//! Optimistic write-through cache
//!
//! Reads are served from memory. Writes land in memory first, are persisted
//! through a [`DurableLayer`], and are rolled back if the durable write fails.
//! Successful writes nudge the sync loop without waiting for it.

mod durable;
mod entry;
mod patch;

pub use durable::{DurableLayer, MemoryDurable};
pub use entry::{BatchOutcome, CacheEntry, EntryMap, MutationOutcome};
pub use patch::merge_patch;

use crate::clock::{next_stamp, Clock};
use crate::error::{VaultError, VaultResult};
use crate::sync::merge::{merge_into, MergeStats};
use crate::sync::{SyncHandle, SyncPriority};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tracing::{debug, warn};

/// Where a change to the cache came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationSource {
    Local,
    Remote,
    Manual,
}

/// Notification that cached keys changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalidation {
    pub keys: Vec<String>,
    pub source: InvalidationSource,
}

type Callback = Arc<dyn Fn(&Invalidation) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    callbacks: Vec<(u64, Callback)>,
}

/// Keeps an invalidation callback registered until dropped
pub struct Subscription {
    listeners: Weak<Mutex<Listeners>>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            if let Ok(mut listeners) = listeners.lock() {
                listeners.callbacks.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

/// In-memory view over a durable layer
pub struct OptimisticCache<D: DurableLayer> {
    durable: D,
    clock: Arc<dyn Clock>,
    entries: RwLock<EntryMap>,
    // Serializes mutations, including sync merges
    write_lock: tokio::sync::Mutex<()>,
    sync: RwLock<Option<SyncHandle>>,
    listeners: Arc<Mutex<Listeners>>,
}

impl<D: DurableLayer> OptimisticCache<D> {
    /// Build the memory view from whatever the durable layer holds
    pub async fn load(durable: D, clock: Arc<dyn Clock>) -> VaultResult<Self> {
        let entries = durable.load_entries().await?;
        debug!("Cache loaded with {} entries", entries.len());
        Ok(Self {
            durable,
            clock,
            entries: RwLock::new(entries),
            write_lock: tokio::sync::Mutex::new(()),
            sync: RwLock::new(None),
            listeners: Arc::new(Mutex::new(Listeners::default())),
        })
    }

    /// Route change notifications to a sync loop
    pub fn attach_sync(&self, handle: SyncHandle) {
        *self.sync.write().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    pub fn durable(&self) -> &D {
        &self.durable
    }

    fn read(&self) -> RwLockReadGuard<'_, EntryMap> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, EntryMap> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    // ---- reads ----

    /// Value of a live entry
    pub fn get(&self, key: &str) -> Option<Value> {
        self.read()
            .get(key)
            .filter(|e| e.is_live())
            .map(|e| e.value.clone())
    }

    /// Live entry with its metadata
    pub fn get_entry(&self, key: &str) -> Option<CacheEntry> {
        self.read().get(key).filter(|e| e.is_live()).cloned()
    }

    /// Typed read; `Ok(None)` if the key is absent
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> VaultResult<Option<T>> {
        match self.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Live entries in key order
    pub fn entries(&self) -> Vec<CacheEntry> {
        self.read().values().filter(|e| e.is_live()).cloned().collect()
    }

    /// Live entries whose key starts with `prefix`
    pub fn entries_with_prefix(&self, prefix: &str) -> Vec<CacheEntry> {
        self.read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(_, e)| e.is_live())
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Every entry including tombstones, for sync
    pub fn all_entries(&self) -> EntryMap {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().values().filter(|e| e.is_live()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ---- mutations ----

    /// Insert or replace a value
    pub async fn set(&self, key: &str, value: Value) -> VaultResult<CacheEntry> {
        let _guard = self.write_lock.lock().await;
        let entry = CacheEntry::new(key, value, self.stamp_for(key));
        self.commit(vec![entry.clone()]).await?;
        Ok(entry)
    }

    /// Add a new entry. Replaces a previous entry under the same key.
    pub async fn add(&self, key: &str, value: Value) -> VaultResult<MutationOutcome> {
        self.set(key, value).await.map(MutationOutcome::Applied)
    }

    /// Merge-patch an existing entry
    pub async fn update(&self, key: &str, patch: &Value) -> VaultResult<MutationOutcome> {
        let _guard = self.write_lock.lock().await;
        let Some(current) = self.get_entry(key) else {
            debug!("Update of missing key {} ignored", key);
            return Ok(MutationOutcome::NotFound);
        };

        let mut value = current.value;
        merge_patch(&mut value, patch);
        let entry = CacheEntry::new(key, value, self.stamp_for(key));
        self.commit(vec![entry.clone()]).await?;
        Ok(MutationOutcome::Applied(entry))
    }

    /// Delete an entry by writing a tombstone
    pub async fn remove(&self, key: &str) -> VaultResult<MutationOutcome> {
        let _guard = self.write_lock.lock().await;
        if self.get_entry(key).is_none() {
            return Ok(MutationOutcome::NotFound);
        }

        let tombstone = CacheEntry::tombstone(key, self.stamp_for(key));
        self.commit(vec![tombstone.clone()]).await?;
        Ok(MutationOutcome::Applied(tombstone))
    }

    /// Apply several patches with one durable write and one invalidation.
    ///
    /// All-or-nothing: if the durable write fails every patch is rolled back.
    pub async fn batch_update(&self, updates: Vec<(String, Value)>) -> VaultResult<BatchOutcome> {
        let _guard = self.write_lock.lock().await;
        let mut outcome = BatchOutcome::default();
        let mut staged: EntryMap = EntryMap::new();

        for (key, patch) in updates {
            let current = staged
                .get(&key)
                .cloned()
                .or_else(|| self.get_entry(&key))
                .filter(|e| e.is_live());
            let Some(current) = current else {
                outcome.not_found.push(key);
                continue;
            };

            let mut value = current.value;
            merge_patch(&mut value, &patch);
            let stamp = next_stamp(self.clock.as_ref(), Some(current.last_modified));
            staged.insert(key.clone(), CacheEntry::new(key.clone(), value, stamp));
            if !outcome.applied.contains(&key) {
                outcome.applied.push(key);
            }
        }

        if !staged.is_empty() {
            self.commit(staged.into_values().collect()).await?;
        }
        Ok(outcome)
    }

    /// Tell dependents that `keys` should be recomputed
    pub fn invalidate(&self, keys: &[&str]) {
        self.notify(Invalidation {
            keys: keys.iter().map(|k| k.to_string()).collect(),
            source: InvalidationSource::Manual,
        });
    }

    /// Register a callback for every change; runs on the writer's task
    pub fn subscribe_invalidations<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Invalidation) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.next_id += 1;
        let id = listeners.next_id;
        listeners.callbacks.push((id, Arc::new(callback)));
        Subscription {
            listeners: Arc::downgrade(&self.listeners),
            id,
        }
    }

    /// Merge entries pulled from the remote.
    ///
    /// Runs under the same lock as local mutations. Memory is only updated
    /// once the merged state is durable.
    pub async fn apply_remote(&self, incoming: Vec<CacheEntry>) -> VaultResult<MergeStats> {
        let _guard = self.write_lock.lock().await;
        let mut merged = self.all_entries();
        let stats = merge_into(&mut merged, incoming);

        if stats.changed_keys.is_empty() {
            return Ok(stats);
        }

        self.durable.persist(&merged).await?;
        *self.write() = merged;

        self.notify(Invalidation {
            keys: stats.changed_keys.clone(),
            source: InvalidationSource::Remote,
        });
        Ok(stats)
    }

    /// Reload the memory view from the durable layer
    pub async fn refresh(&self) -> VaultResult<()> {
        let _guard = self.write_lock.lock().await;
        let entries = self.durable.load_entries().await?;
        let previous = std::mem::replace(&mut *self.write(), entries.clone());
        let mut keys: Vec<String> = previous.into_keys().chain(entries.into_keys()).collect();
        keys.sort();
        keys.dedup();
        self.notify(Invalidation {
            keys,
            source: InvalidationSource::Manual,
        });
        Ok(())
    }

    fn stamp_for(&self, key: &str) -> i64 {
        let previous = self.read().get(key).map(|e| e.last_modified);
        next_stamp(self.clock.as_ref(), previous)
    }

    // Caller holds write_lock
    async fn commit(&self, changes: Vec<CacheEntry>) -> VaultResult<()> {
        let keys: Vec<String> = changes.iter().map(|e| e.key.clone()).collect();

        let (priors, snapshot) = {
            let mut map = self.write();
            let priors: Vec<(String, Option<CacheEntry>)> = changes
                .into_iter()
                .map(|entry| (entry.key.clone(), map.insert(entry.key.clone(), entry)))
                .collect();
            (priors, map.clone())
        };

        if let Err(e) = self.durable.persist(&snapshot).await {
            let mut map = self.write();
            for (key, prior) in priors.into_iter().rev() {
                match prior {
                    Some(entry) => map.insert(key, entry),
                    None => map.remove(&key),
                };
            }
            warn!("Durable write failed, rolled back {}: {}", keys.join(", "), e);
            return Err(VaultError::durable_write(keys.join(", "), e.to_string()));
        }

        self.notify(Invalidation {
            keys,
            source: InvalidationSource::Local,
        });
        if let Some(handle) = self.sync.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            handle.schedule(SyncPriority::Normal);
        }
        Ok(())
    }

    fn notify(&self, invalidation: Invalidation) {
        let callbacks: Vec<Callback> = self
            .listeners
            .lock()
            .map(|l| l.callbacks.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default();
        for callback in callbacks {
            callback(&invalidation);
        }
    }
}
