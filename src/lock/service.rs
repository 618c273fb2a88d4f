use super::backend::{LockBackend, LockChange};
use super::document::{lock_id, LockDocument, LockOwner};
use crate::audit::{self, AuditLog};
use crate::clock::{from_ms, Clock};
use crate::config::LockConfig;
use crate::error::{VaultError, VaultResult};
use crate::identity::BudgetId;
use serde::Serialize;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

// Attempts before giving up on a lock that keeps changing underneath us
const CAS_ATTEMPTS: usize = 3;

/// Kind of lock transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LockEventKind {
    Created,
    Refreshed,
    Released,
    Expired,
    Broken,
}

/// A transition seen on a watched lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockEvent {
    pub kind: LockEventKind,
    pub lock_id: String,
    /// The lock after the transition; the old lock for removals
    pub lock: Option<LockDocument>,
}

/// Whether a user may edit a record right now
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditStatus {
    /// Live lock, if any
    pub lock: Option<LockDocument>,
    pub can_edit: bool,
    /// Name of another user holding the lock
    pub locked_by: Option<String>,
    pub remaining: Option<Duration>,
}

type Callback = Arc<dyn Fn(&LockEvent) + Send + Sync>;

struct Watcher {
    id: u64,
    lock_id: String,
    last: Option<LockDocument>,
    expired_reported: bool,
    callback: Callback,
}

#[derive(Default)]
struct Watchers {
    next_id: u64,
    entries: Vec<Watcher>,
}

/// Subscription to one lock; dropping it stops the callbacks
pub struct LockWatch {
    watchers: Weak<Mutex<Watchers>>,
    id: u64,
}

impl LockWatch {
    pub fn unsubscribe(self) {}
}

impl Drop for LockWatch {
    fn drop(&mut self) {
        if let Some(watchers) = self.watchers.upgrade() {
            let mut watchers = watchers.lock().unwrap_or_else(|e| e.into_inner());
            watchers.entries.retain(|w| w.id != self.id);
        }
    }
}

/// Time-bounded edit leases on records of one budget
pub struct LeaseLockService<B: LockBackend> {
    inner: Arc<LockInner<B>>,
    poller: tokio::sync::Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

struct LockInner<B: LockBackend> {
    backend: B,
    budget_id: BudgetId,
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
    poll: Duration,
    audit: AuditLog,
    watchers: Arc<Mutex<Watchers>>,
}

impl<B: LockBackend> LeaseLockService<B> {
    pub fn new(backend: B, budget_id: BudgetId, config: &LockConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(LockInner {
                backend,
                budget_id,
                clock,
                ttl_ms: config.ttl().num_milliseconds(),
                poll: Duration::from_millis(config.watch_poll_ms.max(1)),
                audit: AuditLog::disabled(),
                watchers: Arc::new(Mutex::new(Watchers::default())),
            }),
            poller: tokio::sync::Mutex::new(None),
        }
    }

    /// Attach an audit log. Must be called before the service is shared.
    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.audit = audit;
        }
        self
    }

    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    fn lock_id(&self, record_type: &str, record_id: &str) -> VaultResult<String> {
        lock_id(self.inner.budget_id.as_str(), record_type, record_id)
    }

    /// Take or extend the lease on a record.
    ///
    /// Re-acquiring a live lease you hold extends it; `expires_at` never
    /// moves backwards.
    pub async fn acquire_lock(
        &self,
        record_type: &str,
        record_id: &str,
        owner: &LockOwner,
    ) -> VaultResult<LockDocument> {
        let id = self.lock_id(record_type, record_id)?;
        let inner = &self.inner;

        for _ in 0..CAS_ATTEMPTS {
            let slot = inner.backend.get(&id).await?;
            let now = inner.clock.now_ms();
            let fence = slot.fence + 1;

            let (lock, kind) = match slot.lock {
                Some(held) if !held.is_expired_at(now) && !held.is_held_by(&owner.user_id) => {
                    debug!("Lock {} held by {}", id, held.user_id);
                    return Err(VaultError::LockedByOther {
                        owner_name: held.user_name,
                        expires_at: from_ms(held.expires_at),
                    });
                }
                Some(held) if !held.is_expired_at(now) => (
                    LockDocument {
                        user_name: owner.user_name.clone(),
                        expires_at: held.expires_at.max(now + inner.ttl_ms),
                        last_activity: now,
                        fence,
                        ..held
                    },
                    LockEventKind::Refreshed,
                ),
                _ => (
                    LockDocument {
                        record_type: record_type.to_string(),
                        record_id: record_id.to_string(),
                        user_id: owner.user_id.clone(),
                        user_name: owner.user_name.clone(),
                        budget_id: inner.budget_id.to_string(),
                        acquired_at: now,
                        expires_at: now + inner.ttl_ms,
                        last_activity: now,
                        fence,
                    },
                    LockEventKind::Created,
                ),
            };

            if inner
                .backend
                .compare_and_swap(&id, slot.fence, Some(lock.clone()))
                .await?
            {
                match kind {
                    LockEventKind::Created => info!("Acquired lock {} (fence {})", id, fence),
                    _ => debug!("Refreshed lock {} until {}", id, lock.expires_at),
                }
                inner.observe(&id, Some(lock.clone()), Some(kind));
                return Ok(lock);
            }
            debug!("Lock {} changed during acquire, retrying", id);
        }

        Err(VaultError::LockBackend(format!("lock {} kept changing", id)))
    }

    /// Drop a lease. Only the holder can release; anyone else is ignored.
    pub async fn release_lock(
        &self,
        record_type: &str,
        record_id: &str,
        owner_id: &str,
    ) -> VaultResult<()> {
        let id = self.lock_id(record_type, record_id)?;
        let inner = &self.inner;

        for _ in 0..CAS_ATTEMPTS {
            let slot = inner.backend.get(&id).await?;
            match slot.lock.as_ref() {
                Some(held) if held.is_held_by(owner_id) => {}
                Some(held) => {
                    debug!("Ignoring release of lock {} held by {}", id, held.user_id);
                    return Ok(());
                }
                None => return Ok(()),
            }

            if inner.backend.compare_and_swap(&id, slot.fence, None).await? {
                info!("Released lock {}", id);
                inner.observe(&id, None, Some(LockEventKind::Released));
                return Ok(());
            }
        }

        Err(VaultError::LockBackend(format!("lock {} kept changing", id)))
    }

    /// Remove an expired lease held by anyone. Returns the broken lock,
    /// `None` if there was nothing to break.
    pub async fn break_lock(
        &self,
        record_type: &str,
        record_id: &str,
    ) -> VaultResult<Option<LockDocument>> {
        let id = self.lock_id(record_type, record_id)?;
        let inner = &self.inner;

        for _ in 0..CAS_ATTEMPTS {
            let slot = inner.backend.get(&id).await?;
            let Some(held) = slot.lock else {
                return Ok(None);
            };
            let now = inner.clock.now_ms();
            if !held.is_expired_at(now) {
                return Err(VaultError::NotExpired {
                    expires_at: from_ms(held.expires_at),
                });
            }

            if inner.backend.compare_and_swap(&id, slot.fence, None).await? {
                warn!("Broke expired lock {} held by {}", id, held.user_id);
                inner
                    .audit
                    .log(
                        audit::LOCK_BROKEN,
                        &serde_json::json!({
                            "budget": inner.budget_id.short(),
                            "lock": id,
                            "holder": held.user_id,
                            "expired_at": held.expires_at,
                        }),
                    )
                    .await;
                inner.observe(&id, None, Some(LockEventKind::Broken));
                return Ok(Some(held));
            }
        }

        Err(VaultError::LockBackend(format!("lock {} kept changing", id)))
    }

    /// Who may edit a record, from the point of view of `owner_id`
    pub async fn edit_status(
        &self,
        record_type: &str,
        record_id: &str,
        owner_id: &str,
    ) -> VaultResult<EditStatus> {
        let id = self.lock_id(record_type, record_id)?;
        let now = self.inner.clock.now_ms();
        let lock = self
            .inner
            .backend
            .get(&id)
            .await?
            .lock
            .filter(|l| !l.is_expired_at(now));

        Ok(EditStatus {
            can_edit: lock.as_ref().map_or(true, |l| l.is_held_by(owner_id)),
            locked_by: lock
                .as_ref()
                .filter(|l| !l.is_held_by(owner_id))
                .map(|l| l.user_name.clone()),
            remaining: lock.as_ref().map(|l| l.remaining(now)),
            lock,
        })
    }

    /// Call `callback` on every transition of a record's lock.
    ///
    /// Changes made through this service are reported immediately; changes
    /// from elsewhere arrive through the backend feed or polling once
    /// [`start`](Self::start) has been called.
    pub async fn watch_lock<F>(
        &self,
        record_type: &str,
        record_id: &str,
        callback: F,
    ) -> VaultResult<LockWatch>
    where
        F: Fn(&LockEvent) + Send + Sync + 'static,
    {
        let id = self.lock_id(record_type, record_id)?;
        let current = self.inner.backend.get(&id).await?.lock;
        let now = self.inner.clock.now_ms();

        let mut watchers = self.inner.watchers.lock().unwrap_or_else(|e| e.into_inner());
        watchers.next_id += 1;
        let watch_id = watchers.next_id;
        watchers.entries.push(Watcher {
            id: watch_id,
            lock_id: id,
            expired_reported: current.as_ref().is_some_and(|l| l.is_expired_at(now)),
            last: current,
            callback: Arc::new(callback),
        });

        Ok(LockWatch {
            watchers: Arc::downgrade(&self.inner.watchers),
            id: watch_id,
        })
    }

    /// Start following remote changes for watched locks
    pub async fn start(&self) {
        let mut poller = self.poller.lock().await;
        if poller.as_ref().is_some_and(|(_, task)| !task.is_finished()) {
            return;
        }
        let (shutdown, shutdown_rx) = watch::channel(false);
        let inner = self.inner.clone();
        let task = tokio::spawn(async move { inner.follow(shutdown_rx).await });
        debug!(
            "Lock watcher started for budget {}",
            self.inner.budget_id.short()
        );
        *poller = Some((shutdown, task));
    }

    pub async fn stop(&self) {
        if let Some((shutdown, task)) = self.poller.lock().await.take() {
            let _ = shutdown.send(true);
            if let Err(e) = task.await {
                warn!("Lock watcher ended abnormally: {}", e);
            }
            debug!("Lock watcher stopped");
        }
    }
}

enum Wake {
    Stop,
    Tick,
    Change(Option<LockChange>),
}

impl<B: LockBackend> LockInner<B> {
    async fn follow(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut feed = self.backend.changes();
        let mut ticker = tokio::time::interval(self.poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let wake = tokio::select! {
                _ = shutdown.changed() => Wake::Stop,
                _ = ticker.tick() => Wake::Tick,
                change = next_change(&mut feed) => Wake::Change(change),
            };
            match wake {
                Wake::Stop => break,
                Wake::Tick => self.poll_watched().await,
                Wake::Change(Some(change)) => self.observe(&change.lock_id, change.lock, None),
                Wake::Change(None) => feed = None,
            }
        }
    }

    // Re-read every watched lock; also how expiry is noticed
    async fn poll_watched(&self) {
        let ids: Vec<String> = {
            let watchers = self.watchers.lock().unwrap_or_else(|e| e.into_inner());
            let mut ids: Vec<String> = watchers.entries.iter().map(|w| w.lock_id.clone()).collect();
            ids.sort();
            ids.dedup();
            ids
        };
        for id in ids {
            match self.backend.get(&id).await {
                Ok(slot) => self.observe(&id, slot.lock, None),
                Err(e) => debug!("Polling lock {} failed: {}", id, e),
            }
        }
    }

    /// Compare a fresh view of a lock with what each watcher last saw and
    /// fire callbacks outside the watcher lock
    fn observe(&self, lock_id: &str, current: Option<LockDocument>, known: Option<LockEventKind>) {
        let now = self.clock.now_ms();
        let mut fired: Vec<(Callback, LockEvent)> = Vec::new();
        {
            let mut watchers = self.watchers.lock().unwrap_or_else(|e| e.into_inner());
            for watcher in watchers.entries.iter_mut().filter(|w| w.lock_id == lock_id) {
                let kind = match known {
                    Some(kind) if watcher.last != current => Some(kind),
                    Some(_) => None,
                    None => classify(watcher.last.as_ref(), current.as_ref(), now, watcher.expired_reported),
                };

                if let Some(kind) = kind {
                    let lock = match kind {
                        LockEventKind::Released | LockEventKind::Broken => watcher.last.clone(),
                        _ => current.clone(),
                    };
                    fired.push((
                        watcher.callback.clone(),
                        LockEvent {
                            kind,
                            lock_id: lock_id.to_string(),
                            lock,
                        },
                    ));
                }
                watcher.expired_reported = current.as_ref().is_some_and(|l| l.is_expired_at(now));
                watcher.last = current.clone();
            }
        }

        for (callback, event) in fired {
            callback(&event);
        }
    }
}

// Transition between two observations of the same lock. Removal of an
// expired lease is taken as a break, removal of a live one as a release.
fn classify(
    previous: Option<&LockDocument>,
    current: Option<&LockDocument>,
    now: i64,
    expired_reported: bool,
) -> Option<LockEventKind> {
    match (previous, current) {
        (None, None) => None,
        (None, Some(lock)) if lock.is_expired_at(now) => None,
        (None, Some(_)) => Some(LockEventKind::Created),
        (Some(lock), None) if lock.is_expired_at(now) => Some(LockEventKind::Broken),
        (Some(_), None) => Some(LockEventKind::Released),
        (Some(before), Some(after)) if before.fence == after.fence => {
            (after.is_expired_at(now) && !expired_reported).then_some(LockEventKind::Expired)
        }
        (Some(before), Some(after))
            if before.user_id == after.user_id && before.acquired_at == after.acquired_at =>
        {
            Some(LockEventKind::Refreshed)
        }
        (Some(_), Some(_)) => Some(LockEventKind::Created),
    }
}

async fn next_change(feed: &mut Option<broadcast::Receiver<LockChange>>) -> Option<LockChange> {
    let Some(rx) = feed.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(change) => return Some(change),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                debug!("Lock feed lagged by {} changes, next poll will resync", missed);
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}
