//! Edit leases
//!
//! A lease marks a record as being edited by one user for a bounded time.
//! Leases live in a [`LockBackend`]; every write is a compare-and-swap on
//! the slot's fence so racing writers resolve to a single holder.

mod backend;
mod document;
mod service;

pub use backend::{FsLockBackend, LockBackend, LockChange, LockSlot, MemoryLockBackend};
pub use document::{lock_id, LockDocument, LockOwner};
pub use service::{EditStatus, LeaseLockService, LockEvent, LockEventKind, LockWatch};
