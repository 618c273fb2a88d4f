//! Background reconciliation with the remote store
//!
//! The [`SyncOrchestrator`] owns a loop that pulls remote records, merges
//! them into the [`OptimisticCache`](crate::cache::OptimisticCache), and
//! pushes whatever the remote is missing. Writers nudge it through a
//! [`SyncHandle`].

mod backoff;
mod handle;
mod health;
pub mod merge;
mod orchestrator;
mod remote;

pub use backoff::{retry, Backoff, BackoffPolicy};
pub use handle::{channel, SyncHandle, SyncPriority, SyncRequests};
pub use health::{ErrorCategory, HealthStatus, PassRecord, SyncHealth, MAX_RECENT};
pub use orchestrator::{SyncOrchestrator, SyncOutcome, SyncReport, SyncState, SyncStatus};
pub use remote::{record_id, FsRemote, MemoryRemote, PushAck, RemoteRecord, RemoteSnapshot, RemoteStore};
