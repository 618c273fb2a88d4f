//! Encrypted local persistence
//!
//! The whole vault is one AES-GCM sealed JSON document stored under a
//! single key. Nothing readable is ever written to disk.

pub mod cipher;
mod blob;
mod document;
mod encrypted;

pub use blob::{
    atomic_write, dir_write_lock, BlobStorage, DirWriteLock, EncryptedBlob, FileStorage,
    MemoryStorage, VAULT_KEY,
};
pub use document::{migrate, BudgetRecord, Migrated, SyncMarkers, VaultDocument, CURRENT_SCHEMA};
pub use encrypted::EncryptedStore;
