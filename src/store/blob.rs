//! Blob storage backends
//!
//! The vault is a single opaque blob under one key. Backends only need to
//! read, atomically replace and remove it.

use crate::error::{VaultError, VaultResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Storage key of the vault blob
pub const VAULT_KEY: &str = "envelopeBudgetData";

/// On-disk envelope of the encrypted vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedBlob {
    pub encrypted_data: Vec<u8>,
    pub salt: Vec<u8>,
    pub iv: Vec<u8>,
}

/// Key/value storage for opaque blobs
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Read a blob, `None` if it was never written
    async fn read(&self, key: &str) -> VaultResult<Option<Vec<u8>>>;

    /// Replace a blob. Readers see the old or the new bytes, never a mix.
    async fn write(&self, key: &str, bytes: &[u8]) -> VaultResult<()>;

    /// Remove a blob; missing blobs are not an error
    async fn remove(&self, key: &str) -> VaultResult<()>;
}

/// One file per key inside a directory
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl BlobStorage for FileStorage {
    async fn read(&self, key: &str) -> VaultResult<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(VaultError::io(format!("reading {}", path.display()), e)),
        }
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> VaultResult<()> {
        let path = self.path_for(key);
        atomic_write(&path, bytes)
            .await
            .map_err(|e| VaultError::StorageWrite {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }

    async fn remove(&self, key: &str) -> VaultResult<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VaultError::io(format!("removing {}", path.display()), e)),
        }
    }
}

/// Write to a sibling temp file, fsync, then rename over the target
pub async fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let temp_path = path.with_extension("tmp");

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(&temp_path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&temp_path, path).await
}

/// Async mutex guarding read-modify-write cycles on files under a directory
pub type DirWriteLock = Arc<tokio::sync::Mutex<()>>;

static DIR_WRITE_LOCKS: LazyLock<Mutex<HashMap<PathBuf, DirWriteLock>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// The write lock for `dir`, shared by every caller in this process that
/// asks for the same directory
pub fn dir_write_lock(dir: &Path) -> DirWriteLock {
    let key = std::fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
    let mut locks = DIR_WRITE_LOCKS.lock().unwrap_or_else(|e| e.into_inner());
    locks.entry(key).or_default().clone()
}

/// In-memory storage with write-failure injection for tests and simulations
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    fail_writes: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail until turned off again
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Raw access for tests that plant or inspect blobs
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.lock().ok().and_then(|b| b.get(key).cloned())
    }

    pub fn put_raw(&self, key: &str, bytes: Vec<u8>) {
        if let Ok(mut blobs) = self.blobs.lock() {
            blobs.insert(key.to_string(), bytes);
        }
    }
}

#[async_trait]
impl BlobStorage for MemoryStorage {
    async fn read(&self, key: &str) -> VaultResult<Option<Vec<u8>>> {
        let blobs = self
            .blobs
            .lock()
            .map_err(|_| VaultError::Internal("memory storage poisoned".to_string()))?;
        Ok(blobs.get(key).cloned())
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> VaultResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(VaultError::StorageWrite {
                key: key.to_string(),
                reason: "quota exceeded".to_string(),
            });
        }
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| VaultError::Internal("memory storage poisoned".to_string()))?;
        blobs.insert(key.to_string(), bytes.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, key: &str) -> VaultResult<()> {
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| VaultError::Internal("memory storage poisoned".to_string()))?;
        blobs.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn file_storage_roundtrip() {
        let temp = TempDir::new().unwrap();
        let storage = FileStorage::new(temp.path());

        assert!(storage.read(VAULT_KEY).await.unwrap().is_none());
        storage.write(VAULT_KEY, b"first").await.unwrap();
        storage.write(VAULT_KEY, b"second").await.unwrap();
        assert_eq!(storage.read(VAULT_KEY).await.unwrap().unwrap(), b"second");

        // No temp file left behind
        assert!(!storage.path_for(VAULT_KEY).with_extension("tmp").exists());

        storage.remove(VAULT_KEY).await.unwrap();
        storage.remove(VAULT_KEY).await.unwrap();
        assert!(storage.read(VAULT_KEY).await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_storage_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let storage = FileStorage::new(temp.path());
        storage.write(VAULT_KEY, b"secret").await.unwrap();

        let mode = std::fs::metadata(storage.path_for(VAULT_KEY))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn memory_storage_fault_injection() {
        let storage = MemoryStorage::new();
        storage.write("k", b"v1").await.unwrap();

        storage.fail_writes(true);
        let err = storage.write("k", b"v2").await.unwrap_err();
        assert!(matches!(err, VaultError::StorageWrite { .. }));
        assert_eq!(storage.raw("k").unwrap(), b"v1");
        assert_eq!(storage.write_count(), 1);
    }

    #[test]
    fn blob_json_shape() {
        let blob = EncryptedBlob {
            encrypted_data: vec![1, 2],
            salt: vec![3],
            iv: vec![4],
        };
        let json = serde_json::to_value(&blob).unwrap();
        assert_eq!(json["encryptedData"], serde_json::json!([1, 2]));
        assert_eq!(json["salt"], serde_json::json!([3]));
        assert_eq!(json["iv"], serde_json::json!([4]));
    }
}
