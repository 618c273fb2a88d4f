//! Change notifications from writers to the sync loop

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

use crate::config::SyncConfig;

/// How soon a local change should reach the remote
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SyncPriority {
    /// Ordinary edits, batched behind the normal debounce
    Normal,
    /// Edits others are likely waiting on, short debounce
    High,
    /// Run a pass right away
    Immediate,
}

impl SyncPriority {
    /// Debounce before the pass, `None` for immediate
    pub fn delay(self, config: &SyncConfig) -> Option<Duration> {
        match self {
            Self::Normal => Some(Duration::from_millis(config.debounce_normal_ms)),
            Self::High => Some(Duration::from_millis(config.debounce_high_ms)),
            Self::Immediate => None,
        }
    }
}

#[derive(Debug, Default)]
struct Pending {
    // Highest priority requested since the loop last looked
    priority: Mutex<Option<SyncPriority>>,
    notify: Notify,
}

impl Pending {
    fn slot(&self) -> MutexGuard<'_, Option<SyncPriority>> {
        self.priority.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Cheap, cloneable sender used by writers to request a pass.
///
/// Never blocks. Requests coalesce into a single pending priority, the
/// highest asked for, so nothing accumulates while the loop is busy or
/// stopped. A loop that starts discards whatever was pending.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    pending: Arc<Pending>,
}

/// Receiving half, owned by the orchestrator
#[derive(Debug)]
pub struct SyncRequests {
    pending: Arc<Pending>,
}

/// Create a connected handle and request stream
pub fn channel() -> (SyncHandle, SyncRequests) {
    let pending = Arc::new(Pending::default());
    (
        SyncHandle {
            pending: pending.clone(),
        },
        SyncRequests { pending },
    )
}

impl SyncHandle {
    pub fn schedule(&self, priority: SyncPriority) {
        {
            let mut slot = self.pending.slot();
            *slot = Some(slot.map_or(priority, |current| current.max(priority)));
        }
        self.pending.notify.notify_one();
    }
}

impl SyncRequests {
    /// Take the pending request, if any
    pub fn try_recv(&mut self) -> Option<SyncPriority> {
        self.pending.slot().take()
    }

    /// Wait for the next request. Cancel safe: a request is only taken
    /// when it is returned.
    pub async fn recv(&mut self) -> SyncPriority {
        loop {
            if let Some(priority) = self.try_recv() {
                return priority;
            }
            self.pending.notify.notified().await;
        }
    }
}
