//! Durable layer behind the optimistic cache

use super::EntryMap;
use crate::error::{VaultError, VaultResult};
use crate::store::SyncMarkers;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Persistent home of cache entries and sync bookkeeping
#[async_trait]
pub trait DurableLayer: Send + Sync + 'static {
    /// All stored entries, tombstones included
    async fn load_entries(&self) -> VaultResult<EntryMap>;

    /// Replace the stored entries with `entries`
    async fn persist(&self, entries: &EntryMap) -> VaultResult<()>;

    async fn load_markers(&self) -> VaultResult<SyncMarkers>;

    async fn save_markers(&self, markers: SyncMarkers) -> VaultResult<()>;
}

#[async_trait]
impl<T: DurableLayer + ?Sized> DurableLayer for Arc<T> {
    async fn load_entries(&self) -> VaultResult<EntryMap> {
        (**self).load_entries().await
    }

    async fn persist(&self, entries: &EntryMap) -> VaultResult<()> {
        (**self).persist(entries).await
    }

    async fn load_markers(&self) -> VaultResult<SyncMarkers> {
        (**self).load_markers().await
    }

    async fn save_markers(&self, markers: SyncMarkers) -> VaultResult<()> {
        (**self).save_markers(markers).await
    }
}

/// Unencrypted in-memory durable layer
#[derive(Debug, Clone, Default)]
pub struct MemoryDurable {
    entries: Arc<Mutex<EntryMap>>,
    markers: Arc<Mutex<SyncMarkers>>,
    fail: Arc<AtomicBool>,
}

impl MemoryDurable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: EntryMap) -> Self {
        Self {
            entries: Arc::new(Mutex::new(entries)),
            ..Self::default()
        }
    }

    /// Make persists fail until turned off again
    pub fn fail_persists(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> EntryMap {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

fn poisoned() -> VaultError {
    VaultError::Internal("durable layer poisoned".to_string())
}

#[async_trait]
impl DurableLayer for MemoryDurable {
    async fn load_entries(&self) -> VaultResult<EntryMap> {
        Ok(self.entries.lock().map_err(|_| poisoned())?.clone())
    }

    async fn persist(&self, entries: &EntryMap) -> VaultResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(VaultError::StorageWrite {
                key: "entries".to_string(),
                reason: "injected failure".to_string(),
            });
        }
        *self.entries.lock().map_err(|_| poisoned())? = entries.clone();
        Ok(())
    }

    async fn load_markers(&self) -> VaultResult<SyncMarkers> {
        Ok(*self.markers.lock().map_err(|_| poisoned())?)
    }

    async fn save_markers(&self, markers: SyncMarkers) -> VaultResult<()> {
        *self.markers.lock().map_err(|_| poisoned())? = markers;
        Ok(())
    }
}
