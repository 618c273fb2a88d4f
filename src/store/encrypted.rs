use super::blob::{BlobStorage, EncryptedBlob, VAULT_KEY};
use super::cipher;
use super::document::{migrate, SyncMarkers, VaultDocument};
use crate::audit::{self, AuditLog};
use crate::cache::{DurableLayer, EntryMap};
use crate::clock::Clock;
use crate::error::{VaultError, VaultResult};
use crate::identity::Identity;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// The encrypted vault of one identity.
///
/// Holds the decrypted document in memory after the first read; every
/// write re-encrypts and atomically replaces the whole blob.
pub struct EncryptedStore<S: BlobStorage> {
    storage: S,
    identity: Arc<Identity>,
    clock: Arc<dyn Clock>,
    audit: AuditLog,
    document: Mutex<Option<VaultDocument>>,
}

impl<S: BlobStorage> EncryptedStore<S> {
    pub fn new(storage: S, identity: Arc<Identity>, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            identity,
            clock,
            audit: AuditLog::disabled(),
            document: Mutex::new(None),
        }
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = audit;
        self
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Whether a blob exists, without decrypting it
    pub async fn exists(&self) -> VaultResult<bool> {
        Ok(self.storage.read(VAULT_KEY).await?.is_some())
    }

    /// Read, decrypt and migrate the stored document.
    ///
    /// A migrated document is written back exactly once.
    pub async fn load(&self) -> VaultResult<Option<VaultDocument>> {
        let mut slot = self.document.lock().await;
        let document = self.read_blob().await?;
        *slot = document.clone();
        Ok(document)
    }

    /// Encrypt and persist a document
    pub async fn save(&self, document: &VaultDocument) -> VaultResult<()> {
        let mut slot = self.document.lock().await;
        self.write_blob(document).await?;
        *slot = Some(document.clone());
        Ok(())
    }

    /// Current document, unlocking or creating the vault on first use
    pub async fn document(&self) -> VaultResult<VaultDocument> {
        let mut slot = self.document.lock().await;
        self.current(&mut slot).await
    }

    /// Load the vault, creating an empty one if none exists
    pub async fn open_or_init(&self, user_name: Option<String>) -> VaultResult<VaultDocument> {
        let mut slot = self.document.lock().await;
        let document = self.current(&mut slot).await?;
        if user_name.is_some() && document.user_name != user_name {
            let mut renamed = document.clone();
            renamed.user_name = user_name;
            self.write_blob(&renamed).await?;
            *slot = Some(renamed.clone());
            return Ok(renamed);
        }
        Ok(document)
    }

    /// Apply a change to the document and persist it
    pub async fn modify<F>(&self, change: F) -> VaultResult<VaultDocument>
    where
        F: FnOnce(&mut VaultDocument) + Send,
    {
        let mut slot = self.document.lock().await;
        let mut document = self.current(&mut slot).await?;
        change(&mut document);
        self.write_blob(&document).await?;
        *slot = Some(document.clone());
        Ok(document)
    }

    // Cached document, falling back to storage, falling back to a new one
    async fn current(&self, slot: &mut Option<VaultDocument>) -> VaultResult<VaultDocument> {
        if let Some(document) = slot.as_ref() {
            return Ok(document.clone());
        }
        let document = match self.read_blob().await? {
            Some(document) => document,
            None => {
                let fresh = VaultDocument::new(
                    self.identity.budget_id().as_str(),
                    None,
                    self.clock.now_ms(),
                );
                self.write_blob(&fresh).await?;
                info!("Created vault for budget {}", self.identity.budget_id().short());
                fresh
            }
        };
        *slot = Some(document.clone());
        Ok(document)
    }

    async fn read_blob(&self) -> VaultResult<Option<VaultDocument>> {
        let budget = self.identity.budget_id();
        let Some(bytes) = self.storage.read(VAULT_KEY).await? else {
            debug!("No vault blob for budget {}", budget.short());
            return Ok(None);
        };

        let value = match serde_json::from_slice::<EncryptedBlob>(&bytes)
            .map_err(|_| VaultError::DecryptionError)
            .and_then(|blob| {
                cipher::decrypt::<serde_json::Value>(
                    &blob.encrypted_data,
                    self.identity.key(),
                    &blob.iv,
                )
            }) {
            Ok(value) => value,
            Err(e) => {
                warn!("Vault for budget {} failed to decrypt", budget.short());
                self.audit
                    .log(
                        audit::VAULT_DECRYPT_FAILED,
                        &serde_json::json!({ "budget": budget.short() }),
                    )
                    .await;
                return Err(e);
            }
        };

        let migrated = migrate(value, budget.as_str(), self.clock.now_ms())?;
        if let Some(from) = migrated.from_version {
            self.write_blob(&migrated.document).await?;
            info!(
                "Migrated vault for budget {} from schema {}",
                budget.short(),
                from
            );
            self.audit
                .log(
                    audit::VAULT_MIGRATED,
                    &serde_json::json!({ "budget": budget.short(), "from": from }),
                )
                .await;
        }

        self.audit
            .log(
                audit::VAULT_UNLOCKED,
                &serde_json::json!({ "budget": budget.short() }),
            )
            .await;
        Ok(Some(migrated.document))
    }

    async fn write_blob(&self, document: &VaultDocument) -> VaultResult<()> {
        let sealed = cipher::encrypt(document, self.identity.key())?;
        let blob = EncryptedBlob {
            encrypted_data: sealed.ciphertext,
            salt: self.identity.salt().to_vec(),
            iv: sealed.iv,
        };
        let bytes = serde_json::to_vec(&blob)?;
        self.storage.write(VAULT_KEY, &bytes).await
    }
}

#[async_trait]
impl<S: BlobStorage + 'static> DurableLayer for EncryptedStore<S> {
    async fn load_entries(&self) -> VaultResult<EntryMap> {
        let mut slot = self.document.lock().await;
        Ok(self.current(&mut slot).await?.entries)
    }

    async fn persist(&self, entries: &EntryMap) -> VaultResult<()> {
        let mut slot = self.document.lock().await;
        let mut document = self.current(&mut slot).await?;
        document.entries = entries.clone();
        self.write_blob(&document).await?;
        *slot = Some(document);
        Ok(())
    }

    async fn load_markers(&self) -> VaultResult<SyncMarkers> {
        let mut slot = self.document.lock().await;
        Ok(self.current(&mut slot).await?.sync)
    }

    async fn save_markers(&self, markers: SyncMarkers) -> VaultResult<()> {
        let mut slot = self.document.lock().await;
        let mut document = self.current(&mut slot).await?;
        document.sync = markers;
        self.write_blob(&document).await?;
        *slot = Some(document);
        Ok(())
    }
}
