//! Unlocked vault session
//!
//! [`Session`] wires one identity to its store, cache, sync loop and lock
//! service. Everything is built in [`Session::open`] and torn down by
//! [`Session::stop`]; there is no global state.

use crate::audit::AuditLog;
use crate::cache::{MutationOutcome, OptimisticCache};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{VaultError, VaultResult};
use crate::identity::Identity;
use crate::lock::{LeaseLockService, LockBackend, LockOwner};
use crate::store::{BlobStorage, EncryptedStore, VaultDocument};
use crate::sync::{RemoteStore, SyncOrchestrator, SyncPriority};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::info;
use zeroize::Zeroizing;

/// Login input. The password is wiped from memory on drop.
#[derive(Clone)]
pub struct Credentials {
    password: Zeroizing<String>,
    share_code: String,
    user_name: Option<String>,
}

impl Credentials {
    pub fn new(password: impl Into<String>, share_code: impl Into<String>) -> Self {
        Self {
            password: Zeroizing::new(password.into()),
            share_code: share_code.into(),
            user_name: None,
        }
    }

    /// Display name recorded in the vault and on locks
    pub fn with_user_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = Some(name.into());
        self
    }

    pub fn user_name(&self) -> Option<&str> {
        self.user_name.as_deref()
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn share_code(&self) -> &str {
        &self.share_code
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("password", &"<redacted>")
            .field("share_code", &"<redacted>")
            .field("user_name", &self.user_name)
            .finish()
    }
}

/// Cache type used by sessions
pub type SessionCache<S> = OptimisticCache<Arc<EncryptedStore<S>>>;

pub struct Session<S, R, B>
where
    S: BlobStorage + 'static,
    R: RemoteStore,
    B: LockBackend,
{
    identity: Arc<Identity>,
    store: Arc<EncryptedStore<S>>,
    cache: Arc<SessionCache<S>>,
    sync: SyncOrchestrator<R, Arc<EncryptedStore<S>>>,
    locks: LeaseLockService<B>,
    owner: LockOwner,
}

impl<S, R, B> Session<S, R, B>
where
    S: BlobStorage + 'static,
    R: RemoteStore,
    B: LockBackend,
{
    /// Derive the identity, unlock (or create) the vault and build the
    /// services. Background tasks are not started.
    pub async fn open(
        config: &Config,
        credentials: &Credentials,
        storage: S,
        remote: R,
        locks: B,
    ) -> VaultResult<Self> {
        Self::open_with(
            config,
            credentials,
            storage,
            remote,
            locks,
            Arc::new(SystemClock),
            AuditLog::new(config),
        )
        .await
    }

    /// [`open`](Self::open) with an explicit clock and audit log
    pub async fn open_with(
        config: &Config,
        credentials: &Credentials,
        storage: S,
        remote: R,
        locks: B,
        clock: Arc<dyn Clock>,
        audit: AuditLog,
    ) -> VaultResult<Self> {
        // Argon2 blocks for a noticeable time
        let password = credentials.password.clone();
        let share_code = credentials.share_code.clone();
        let kdf = config.kdf.clone();
        let identity = tokio::task::spawn_blocking(move || {
            Identity::derive(&password, &share_code, &kdf)
        })
        .await
        .map_err(|e| VaultError::Internal(format!("key derivation task failed: {}", e)))??;
        let identity = Arc::new(identity);

        let store = Arc::new(
            EncryptedStore::new(storage, identity.clone(), clock.clone()).with_audit(audit.clone()),
        );
        let document = store.open_or_init(credentials.user_name.clone()).await?;
        let owner = LockOwner::new(
            document.device_id.clone(),
            document
                .user_name
                .clone()
                .unwrap_or_else(|| "Unknown user".to_string()),
        );

        let cache = Arc::new(OptimisticCache::load(store.clone(), clock.clone()).await?);
        let sync = SyncOrchestrator::new(remote, cache.clone(), config.sync.clone(), clock.clone());
        let locks = LeaseLockService::new(locks, identity.budget_id().clone(), &config.lock, clock)
            .with_audit(audit);

        info!(
            "Opened budget {} on device {}",
            identity.budget_id().short(),
            owner.user_id
        );
        Ok(Self {
            identity,
            store,
            cache,
            sync,
            locks,
            owner,
        })
    }

    /// Start the sync loop and the lock watcher
    pub async fn start(&self) {
        self.locks.start().await;
        self.sync.start(self.identity.clone()).await;
    }

    /// Stop background work. The session stays usable for local reads and
    /// writes.
    pub async fn stop(&self) {
        self.sync.stop().await;
        self.locks.stop().await;
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn cache(&self) -> &Arc<SessionCache<S>> {
        &self.cache
    }

    pub fn sync(&self) -> &SyncOrchestrator<R, Arc<EncryptedStore<S>>> {
        &self.sync
    }

    pub fn locks(&self) -> &LeaseLockService<B> {
        &self.locks
    }

    pub fn store(&self) -> &EncryptedStore<S> {
        &self.store
    }

    /// This device as a lock owner
    pub fn owner(&self) -> &LockOwner {
        &self.owner
    }

    /// Current decrypted document
    pub async fn document(&self) -> VaultResult<VaultDocument> {
        self.store.document().await
    }

    /// Patch an entry if nobody else holds the record's lock.
    ///
    /// The change is pushed with high priority since another device is
    /// likely waiting on it.
    pub async fn update_locked(
        &self,
        record_type: &str,
        record_id: &str,
        patch: &Value,
    ) -> VaultResult<MutationOutcome> {
        let status = self
            .locks
            .edit_status(record_type, record_id, &self.owner.user_id)
            .await?;
        if let Some(lock) = status.lock.filter(|_| !status.can_edit) {
            return Err(VaultError::LockedByOther {
                owner_name: lock.user_name.clone(),
                expires_at: lock.expires_at_utc(),
            });
        }

        let key = format!("{}:{}", record_type, record_id);
        let outcome = self.cache.update(&key, patch).await?;
        if outcome.is_applied() {
            self.sync.handle().schedule(SyncPriority::High);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::test_kdf;
    use crate::lock::MemoryLockBackend;
    use crate::clock::ManualClock;
    use crate::store::MemoryStorage;
    use crate::sync::MemoryRemote;
    use serde_json::json;

    const CODE: &str = "ripple canyon violin budget";

    fn config() -> Config {
        let mut config = Config::default();
        config.kdf = test_kdf();
        config.sync.cold_start_delay_ms = 0;
        config
    }

    async fn open(
        storage: MemoryStorage,
        remote: MemoryRemote,
        locks: MemoryLockBackend,
        name: &str,
    ) -> Session<MemoryStorage, MemoryRemote, MemoryLockBackend> {
        Session::open_with(
            &config(),
            &Credentials::new("hunter2", CODE).with_user_name(name),
            storage,
            remote,
            locks,
            Arc::new(ManualClock::at_epoch_ms(1_000)),
            AuditLog::disabled(),
        )
        .await
        .unwrap()
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let creds = Credentials::new("hunter2", CODE);
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("ripple"));
    }

    #[tokio::test]
    async fn open_creates_and_reopens_vault() {
        let storage = MemoryStorage::new();
        let first = open(storage.clone(), MemoryRemote::new(), MemoryLockBackend::new(), "Alex").await;
        first.cache().set("envelopes:rent", json!({"balance": 800})).await.unwrap();
        let device = first.owner().user_id.clone();

        let second = open(storage, MemoryRemote::new(), MemoryLockBackend::new(), "Alex").await;
        assert_eq!(second.cache().get("envelopes:rent").unwrap()["balance"], 800);
        assert_eq!(second.owner().user_id, device);
        assert_eq!(second.owner().user_name, "Alex");
    }

    #[tokio::test]
    async fn wrong_password_fails_to_open() {
        let storage = MemoryStorage::new();
        open(storage.clone(), MemoryRemote::new(), MemoryLockBackend::new(), "Alex").await;

        let result = Session::open_with(
            &config(),
            &Credentials::new("hunter3", CODE),
            storage,
            MemoryRemote::new(),
            MemoryLockBackend::new(),
            Arc::new(ManualClock::at_epoch_ms(1_000)),
            AuditLog::disabled(),
        )
        .await;
        assert!(matches!(result, Err(VaultError::DecryptionError)));
    }

    #[tokio::test]
    async fn sessions_sync_through_shared_remote() {
        let remote = MemoryRemote::new();
        let a = open(MemoryStorage::new(), remote.clone(), MemoryLockBackend::new(), "Alex").await;
        let b = open(MemoryStorage::new(), remote, MemoryLockBackend::new(), "Sam").await;
        a.start().await;
        b.start().await;

        a.cache().set("bills:power", json!({"amount": 60})).await.unwrap();
        assert!(a.sync().force_sync().await.is_completed());
        assert!(b.sync().force_sync().await.is_completed());
        assert_eq!(b.cache().get("bills:power").unwrap()["amount"], 60);

        a.stop().await;
        b.stop().await;
    }

    #[tokio::test]
    async fn locked_records_reject_other_editors() {
        let locks = MemoryLockBackend::new();
        let remote = MemoryRemote::new();
        let a = open(MemoryStorage::new(), remote.clone(), locks.clone(), "Alex").await;
        let b = open(MemoryStorage::new(), remote, locks, "Sam").await;

        a.cache().set("envelopes:rent", json!({"balance": 1})).await.unwrap();
        b.cache().set("envelopes:rent", json!({"balance": 1})).await.unwrap();
        a.locks().acquire_lock("envelopes", "rent", a.owner()).await.unwrap();

        let outcome = a
            .update_locked("envelopes", "rent", &json!({"balance": 2}))
            .await
            .unwrap();
        assert!(outcome.is_applied());

        match b.update_locked("envelopes", "rent", &json!({"balance": 3})).await {
            Err(VaultError::LockedByOther { owner_name, .. }) => assert_eq!(owner_name, "Alex"),
            other => panic!("expected LockedByOther, got {:?}", other),
        }
    }
}
