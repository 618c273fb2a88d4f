//! Lock storage backends

use super::document::LockDocument;
use crate::error::{VaultError, VaultResult};
use crate::store::{atomic_write, dir_write_lock, DirWriteLock};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::fs;
use tokio::sync::broadcast;
use tracing::debug;

const FEED_CAPACITY: usize = 64;

/// Stored state of one lock id.
///
/// `fence` survives releases, so a stale writer can never match a lock that
/// was removed and created again.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSlot {
    pub fence: u64,
    pub lock: Option<LockDocument>,
}

/// A write observed by a backend with a change feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockChange {
    pub lock_id: String,
    pub lock: Option<LockDocument>,
}

#[async_trait]
pub trait LockBackend: Send + Sync + 'static {
    /// Current slot; a never-written id has fence 0 and no lock
    async fn get(&self, lock_id: &str) -> VaultResult<LockSlot>;

    /// Store `lock` if the slot's fence still equals `expected_fence`.
    ///
    /// On success the slot fence becomes `expected_fence + 1`, which is also
    /// written into the stored document. Returns false if the fence moved.
    async fn compare_and_swap(
        &self,
        lock_id: &str,
        expected_fence: u64,
        lock: Option<LockDocument>,
    ) -> VaultResult<bool>;

    /// Push feed of changes, if the backend has one
    fn changes(&self) -> Option<broadcast::Receiver<LockChange>> {
        None
    }
}

#[async_trait]
impl<T: LockBackend + ?Sized> LockBackend for Arc<T> {
    async fn get(&self, lock_id: &str) -> VaultResult<LockSlot> {
        (**self).get(lock_id).await
    }

    async fn compare_and_swap(
        &self,
        lock_id: &str,
        expected_fence: u64,
        lock: Option<LockDocument>,
    ) -> VaultResult<bool> {
        (**self).compare_and_swap(lock_id, expected_fence, lock).await
    }

    fn changes(&self) -> Option<broadcast::Receiver<LockChange>> {
        (**self).changes()
    }
}

fn next_slot(expected_fence: u64, lock: Option<LockDocument>) -> LockSlot {
    let fence = expected_fence + 1;
    LockSlot {
        fence,
        lock: lock.map(|mut l| {
            l.fence = fence;
            l
        }),
    }
}

/// In-process backend shared by clones, with a broadcast change feed
#[derive(Debug, Clone)]
pub struct MemoryLockBackend {
    slots: Arc<Mutex<HashMap<String, LockSlot>>>,
    feed: broadcast::Sender<LockChange>,
}

impl MemoryLockBackend {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            feed,
        }
    }

    fn slots(&self) -> VaultResult<std::sync::MutexGuard<'_, HashMap<String, LockSlot>>> {
        self.slots
            .lock()
            .map_err(|_| VaultError::LockBackend("memory lock table poisoned".to_string()))
    }
}

impl Default for MemoryLockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockBackend for MemoryLockBackend {
    async fn get(&self, lock_id: &str) -> VaultResult<LockSlot> {
        Ok(self.slots()?.get(lock_id).cloned().unwrap_or_default())
    }

    async fn compare_and_swap(
        &self,
        lock_id: &str,
        expected_fence: u64,
        lock: Option<LockDocument>,
    ) -> VaultResult<bool> {
        let slot = {
            let mut slots = self.slots()?;
            let current = slots.get(lock_id).map_or(0, |s| s.fence);
            if current != expected_fence {
                return Ok(false);
            }
            let slot = next_slot(expected_fence, lock);
            slots.insert(lock_id.to_string(), slot.clone());
            slot
        };

        // No receivers is fine
        let _ = self.feed.send(LockChange {
            lock_id: lock_id.to_string(),
            lock: slot.lock,
        });
        Ok(true)
    }

    fn changes(&self) -> Option<broadcast::Receiver<LockChange>> {
        Some(self.feed.subscribe())
    }
}

/// One JSON file per lock under `<dir>/locks`.
///
/// Compare-and-swap is atomic between all backends in this process that
/// were opened on the same directory. Separate processes sharing the
/// directory race on the read-modify-write.
#[derive(Debug, Clone)]
pub struct FsLockBackend {
    dir: PathBuf,
    write_lock: DirWriteLock,
}

impl FsLockBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            write_lock: dir_write_lock(&dir),
            dir,
        }
    }

    fn path_for(&self, lock_id: &str) -> PathBuf {
        self.dir.join("locks").join(format!("{}.json", lock_id))
    }
}

#[async_trait]
impl LockBackend for FsLockBackend {
    async fn get(&self, lock_id: &str) -> VaultResult<LockSlot> {
        let path = self.path_for(lock_id);
        match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                VaultError::LockBackend(format!("unreadable {}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LockSlot::default()),
            Err(e) => Err(VaultError::LockBackend(format!(
                "reading {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn compare_and_swap(
        &self,
        lock_id: &str,
        expected_fence: u64,
        lock: Option<LockDocument>,
    ) -> VaultResult<bool> {
        let _guard = self.write_lock.lock().await;
        let current = self.get(lock_id).await?;
        if current.fence != expected_fence {
            debug!(
                "Lock {} fence is {}, expected {}",
                lock_id, current.fence, expected_fence
            );
            return Ok(false);
        }

        let path = self.path_for(lock_id);
        let bytes = serde_json::to_vec_pretty(&next_slot(expected_fence, lock))?;
        atomic_write(&path, &bytes)
            .await
            .map_err(|e| VaultError::LockBackend(format!("writing {}: {}", path.display(), e)))?;
        Ok(true)
    }
}
