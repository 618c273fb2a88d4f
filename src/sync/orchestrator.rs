use super::backoff::{retry, BackoffPolicy};
use super::handle::{self, SyncHandle, SyncPriority, SyncRequests};
use super::health::{ErrorCategory, HealthStatus, SyncHealth};
use super::merge;
use super::remote::{RemoteRecord, RemoteStore};
use crate::cache::{CacheEntry, DurableLayer, OptimisticCache};
use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::error::VaultResult;
use crate::identity::{BudgetId, Identity};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Lifecycle of the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum SyncState {
    Stopped,
    Starting,
    Idle,
    Syncing,
    Error { retryable: bool, message: String },
}

/// How a pass ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum SyncOutcome {
    Completed,
    Skipped {
        reason: String,
    },
    Failed {
        category: ErrorCategory,
        message: String,
        retryable: bool,
    },
}

/// Result of one pass, shared by every caller that joined it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    #[serde(flatten)]
    pub outcome: SyncOutcome,
    /// Records pulled and opened
    pub pulled: usize,
    /// Pulled records that changed local state
    pub applied: usize,
    /// Local entries sent to the remote
    pub pushed: usize,
    /// Remote records that could not be decrypted and were skipped
    pub undecryptable: usize,
    pub duration_ms: u64,
}

impl SyncReport {
    fn skipped(reason: &str) -> Self {
        Self {
            outcome: SyncOutcome::Skipped {
                reason: reason.to_string(),
            },
            pulled: 0,
            applied: 0,
            pushed: 0,
            undecryptable: 0,
            duration_ms: 0,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, SyncOutcome::Completed)
    }
}

/// Point-in-time view for status displays
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub state: SyncState,
    pub health: HealthStatus,
    pub metrics: SyncHealth,
}

#[derive(Debug, Default)]
struct PassCounts {
    pulled: usize,
    applied: usize,
    pushed: usize,
    undecryptable: usize,
}

type SharedPass = Shared<BoxFuture<'static, SyncReport>>;

struct Running {
    budget: BudgetId,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Reconciles the local cache with a remote store.
///
/// Passes are serialized: a pass requested while another is running joins
/// the running one and gets its report.
pub struct SyncOrchestrator<R: RemoteStore, D: DurableLayer> {
    inner: Arc<Inner<R, D>>,
    running: tokio::sync::Mutex<Option<Running>>,
}

struct Inner<R: RemoteStore, D: DurableLayer> {
    remote: R,
    cache: Arc<OptimisticCache<D>>,
    config: SyncConfig,
    policy: BackoffPolicy,
    clock: Arc<dyn Clock>,
    handle: SyncHandle,
    requests: tokio::sync::Mutex<SyncRequests>,
    identity: RwLock<Option<Arc<Identity>>>,
    pass_lock: tokio::sync::Mutex<()>,
    in_flight: Mutex<Option<(u64, SharedPass)>>,
    pass_seq: AtomicU64,
    cold_start_done: AtomicBool,
    state: watch::Sender<SyncState>,
    health: Mutex<SyncHealth>,
}

impl<R: RemoteStore, D: DurableLayer> SyncOrchestrator<R, D> {
    /// Create a stopped orchestrator and route the cache's change
    /// notifications to it
    pub fn new(
        remote: R,
        cache: Arc<OptimisticCache<D>>,
        config: SyncConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (handle, requests) = handle::channel();
        cache.attach_sync(handle.clone());
        let (state, _) = watch::channel(SyncState::Stopped);

        Self {
            inner: Arc::new(Inner {
                remote,
                cache,
                policy: BackoffPolicy::from_config(&config),
                config,
                clock,
                handle,
                requests: tokio::sync::Mutex::new(requests),
                identity: RwLock::new(None),
                pass_lock: tokio::sync::Mutex::new(()),
                in_flight: Mutex::new(None),
                pass_seq: AtomicU64::new(0),
                cold_start_done: AtomicBool::new(false),
                state,
                health: Mutex::new(SyncHealth::default()),
            }),
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// Begin background syncing for `identity`.
    ///
    /// Calling again with the same budget is a no-op; a different budget
    /// stops the current loop first.
    pub async fn start(&self, identity: Arc<Identity>) {
        let mut running = self.running.lock().await;

        if let Some(current) = running.as_ref() {
            if &current.budget == identity.budget_id() && !current.task.is_finished() {
                debug!("Sync already running for budget {}", current.budget.short());
                return;
            }
        }
        if let Some(previous) = running.take() {
            info!(
                "Switching sync from budget {} to {}",
                previous.budget.short(),
                identity.budget_id().short()
            );
            self.inner.halt(previous).await;
        }

        *self.inner.identity.write().unwrap_or_else(|e| e.into_inner()) = Some(identity.clone());
        self.inner.set_state(SyncState::Starting);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let inner = self.inner.clone();
        let task = tokio::spawn(async move { inner.run_loop(shutdown_rx).await });

        info!("Sync started for budget {}", identity.budget_id().short());
        *running = Some(Running {
            budget: identity.budget_id().clone(),
            shutdown,
            task,
        });
    }

    /// Stop the loop and cancel pending timers
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        if let Some(current) = running.take() {
            self.inner.halt(current).await;
            info!("Sync stopped");
        }
        *self.inner.identity.write().unwrap_or_else(|e| e.into_inner()) = None;
        *self.inner.in_flight.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.inner.set_state(SyncState::Stopped);
    }

    /// Run a pass now, or join the one already running
    pub async fn force_sync(&self) -> SyncReport {
        self.inner.clone().coalesced_pass().await
    }

    /// Sender for change notifications
    pub fn handle(&self) -> SyncHandle {
        self.inner.handle.clone()
    }

    pub fn state(&self) -> SyncState {
        self.inner.state.borrow().clone()
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.inner.state.subscribe()
    }

    pub fn status(&self) -> SyncStatus {
        let metrics = self.inner.health.lock().unwrap_or_else(|e| e.into_inner()).clone();
        SyncStatus {
            state: self.state(),
            health: metrics.status(),
            metrics,
        }
    }

    /// Budget the loop is running for, if any
    pub async fn running_budget(&self) -> Option<BudgetId> {
        self.running.lock().await.as_ref().map(|r| r.budget.clone())
    }
}

impl<R: RemoteStore, D: DurableLayer> Inner<R, D> {
    fn identity(&self) -> Option<Arc<Identity>> {
        self.identity.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_state(&self, state: SyncState) {
        self.state.send_replace(state);
    }

    async fn halt(&self, running: Running) {
        let _ = running.shutdown.send(true);
        if let Err(e) = running.task.await {
            warn!("Sync loop ended abnormally: {}", e);
        }
    }

    async fn coalesced_pass(self: Arc<Self>) -> SyncReport {
        let (seq, pass) = {
            let mut slot = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            match slot.as_ref() {
                Some((seq, pass)) => (*seq, pass.clone()),
                None => {
                    let seq = self.pass_seq.fetch_add(1, Ordering::SeqCst) + 1;
                    let inner = self.clone();
                    let pass = async move { inner.run_pass().await }.boxed().shared();
                    *slot = Some((seq, pass.clone()));
                    (seq, pass)
                }
            }
        };

        let report = pass.await;

        let mut slot = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(slot.as_ref(), Some((current, _)) if *current == seq) {
            *slot = None;
        }
        report
    }

    async fn run_pass(&self) -> SyncReport {
        let Some(identity) = self.identity() else {
            return SyncReport::skipped("sync is not started");
        };
        let Ok(_guard) = self.pass_lock.try_lock() else {
            debug!("Sync pass already running, skipping");
            return SyncReport::skipped("another pass is running");
        };

        self.cold_start_delay().await;
        self.set_state(SyncState::Syncing);

        let budget = identity.budget_id();
        let started = Instant::now();
        let result = self.pass(&identity).await;
        let duration = started.elapsed();
        let finished_at = self.clock.now_ms();
        let still_running = self.identity().is_some();

        match result {
            Ok(counts) => {
                self.health
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .record_success(finished_at, duration);
                if still_running {
                    self.set_state(SyncState::Idle);
                }
                info!(
                    "Sync pass for budget {} finished in {:?}: pulled {}, applied {}, pushed {}, undecryptable {}",
                    budget.short(),
                    duration,
                    counts.pulled,
                    counts.applied,
                    counts.pushed,
                    counts.undecryptable
                );
                SyncReport {
                    outcome: SyncOutcome::Completed,
                    pulled: counts.pulled,
                    applied: counts.applied,
                    pushed: counts.pushed,
                    undecryptable: counts.undecryptable,
                    duration_ms: duration.as_millis() as u64,
                }
            }
            Err(e) => {
                let retryable = e.is_retryable();
                let category = ErrorCategory::of(&e);
                self.health
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .record_failure(finished_at, duration, &e);
                if still_running {
                    self.set_state(SyncState::Error {
                        retryable,
                        message: e.to_string(),
                    });
                }
                warn!(
                    "Sync pass for budget {} failed after {:?} ({}): {}",
                    budget.short(),
                    duration,
                    category,
                    e
                );
                SyncReport {
                    outcome: SyncOutcome::Failed {
                        category,
                        message: e.to_string(),
                        retryable,
                    },
                    pulled: 0,
                    applied: 0,
                    pushed: 0,
                    undecryptable: 0,
                    duration_ms: duration.as_millis() as u64,
                }
            }
        }
    }

    // A device that never synced waits before its first pull
    async fn cold_start_delay(&self) {
        if self.cold_start_done.swap(true, Ordering::SeqCst) {
            return;
        }
        let never_synced = self
            .cache
            .durable()
            .load_markers()
            .await
            .map(|m| m.last_synced_at.is_none())
            .unwrap_or(false);
        let delay = self.config.cold_start_delay();
        if never_synced && !delay.is_zero() {
            debug!("First sync on this device, waiting {:?}", delay);
            tokio::time::sleep(delay).await;
        }
    }

    async fn pass(&self, identity: &Identity) -> VaultResult<PassCounts> {
        let budget = identity.budget_id();
        let mut counts = PassCounts::default();

        let snapshot = retry(self.policy, "pull", || self.remote.pull(budget)).await?;

        let mut remote_entries: HashMap<String, CacheEntry> = HashMap::new();
        for record in &snapshot.records {
            match record.open(identity.key()) {
                Ok(entry) => {
                    remote_entries.insert(entry.key.clone(), entry);
                }
                Err(_) => counts.undecryptable += 1,
            }
        }
        if counts.undecryptable > 0 {
            warn!(
                "Skipped {} undecryptable remote records for budget {}",
                counts.undecryptable,
                budget.short()
            );
        }
        counts.pulled = remote_entries.len();

        let stats = self
            .cache
            .apply_remote(remote_entries.values().cloned().collect())
            .await?;
        counts.applied = stats.applied;

        // Anything the remote lacks, or holds an older version of
        let outgoing: Vec<CacheEntry> = self
            .cache
            .all_entries()
            .into_values()
            .filter(|local| match remote_entries.get(&local.key) {
                Some(remote) => merge::compare(local, remote) == CmpOrdering::Greater,
                None => true,
            })
            .collect();

        let mut markers = self.cache.durable().load_markers().await?;
        if !outgoing.is_empty() {
            let records = outgoing
                .iter()
                .map(|entry| RemoteRecord::seal(entry, identity.key()))
                .collect::<VaultResult<Vec<_>>>()?;
            let ack = retry(self.policy, "push", || {
                self.remote.push(budget, records.clone())
            })
            .await?;
            markers.last_acknowledged = markers.last_acknowledged.max(ack.acknowledged_through);
            counts.pushed = records.len();
        }

        markers.last_synced_at = Some(self.clock.now_ms());
        self.cache.durable().save_markers(markers).await?;
        Ok(counts)
    }

    async fn run_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut requests = self.requests.lock().await;
        if let Some(stale) = requests.try_recv() {
            debug!("Dropping {:?} request made while stopped", stale);
        }

        let interval = self.config.interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut pending: Option<(Instant, SyncPriority)> = None;
        let mut run_now = true;

        loop {
            if run_now {
                run_now = false;
                pending = None;
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = self.clone().coalesced_pass() => {}
                }
                continue;
            }

            let deadline = pending.map(|(at, _)| at);
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => run_now = true,
                request = requests.recv() => match request {
                    SyncPriority::Immediate => run_now = true,
                    priority => {
                        pending = Some(debounce(pending, priority, Instant::now(), &self.config));
                    }
                },
                _ = sleep_until(deadline), if deadline.is_some() => run_now = true,
            }
        }
        debug!("Sync loop exited");
    }
}

/// Trailing debounce. A pending high-priority deadline is never pushed
/// back by a normal request.
fn debounce(
    pending: Option<(Instant, SyncPriority)>,
    priority: SyncPriority,
    now: Instant,
    config: &SyncConfig,
) -> (Instant, SyncPriority) {
    let at = now + priority.delay(config).unwrap_or(Duration::ZERO);
    match pending {
        Some((existing, SyncPriority::High)) if priority == SyncPriority::Normal => {
            (existing, SyncPriority::High)
        }
        _ => (at, priority),
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryDurable;
    use crate::clock::ManualClock;
    use crate::identity::test_kdf;
    use crate::sync::MemoryRemote;
    use serde_json::json;

    const CODE: &str = "ripple canyon violin budget";

    struct Device {
        cache: Arc<OptimisticCache<MemoryDurable>>,
        sync: SyncOrchestrator<MemoryRemote, MemoryDurable>,
        clock: ManualClock,
        identity: Arc<Identity>,
    }

    fn config() -> SyncConfig {
        SyncConfig {
            cold_start_delay_ms: 0,
            ..SyncConfig::default()
        }
    }

    async fn device(remote: &MemoryRemote, start_ms: i64, config: SyncConfig) -> Device {
        let clock = ManualClock::at_epoch_ms(start_ms);
        let cache = Arc::new(
            OptimisticCache::load(MemoryDurable::new(), Arc::new(clock.clone()))
                .await
                .unwrap(),
        );
        let sync = SyncOrchestrator::new(remote.clone(), cache.clone(), config, Arc::new(clock.clone()));
        let identity = Arc::new(Identity::derive("hunter2", CODE, &test_kdf()).unwrap());
        Device {
            cache,
            sync,
            clock,
            identity,
        }
    }

    #[tokio::test]
    async fn force_sync_before_start_is_skipped() {
        let remote = MemoryRemote::new();
        let a = device(&remote, 1_000, config()).await;
        let report = a.sync.force_sync().await;
        assert!(matches!(report.outcome, SyncOutcome::Skipped { .. }));
        assert_eq!(remote.pull_count(), 0);
    }

    #[tokio::test]
    async fn two_devices_converge() {
        let remote = MemoryRemote::new();
        let a = device(&remote, 1_000, config()).await;
        let b = device(&remote, 1_000, config()).await;
        a.sync.start(a.identity.clone()).await;
        b.sync.start(b.identity.clone()).await;

        a.cache.set("envelopes:rent", json!({"balance": 800})).await.unwrap();
        b.cache.set("bills:power", json!({"amount": 60})).await.unwrap();

        assert!(a.sync.force_sync().await.is_completed());
        let report = b.sync.force_sync().await;
        assert!(report.is_completed());
        assert_eq!(report.applied, 1);
        assert!(a.sync.force_sync().await.is_completed());

        assert_eq!(a.cache.entries(), b.cache.entries());
        assert_eq!(a.cache.len(), 2);

        a.sync.stop().await;
        b.sync.stop().await;
    }

    #[tokio::test]
    async fn last_write_wins_across_devices() {
        let remote = MemoryRemote::new();
        let a = device(&remote, 1_000, config()).await;
        let b = device(&remote, 5_000, config()).await;
        a.sync.start(a.identity.clone()).await;
        b.sync.start(b.identity.clone()).await;

        // b writes later in wall time but syncs first
        b.cache.set("envelopes:rent", json!({"balance": 2})).await.unwrap();
        a.cache.set("envelopes:rent", json!({"balance": 1})).await.unwrap();
        b.sync.force_sync().await;
        a.sync.force_sync().await;
        b.sync.force_sync().await;

        assert_eq!(a.cache.get("envelopes:rent").unwrap()["balance"], 2);
        assert_eq!(b.cache.get("envelopes:rent").unwrap()["balance"], 2);
    }

    #[tokio::test]
    async fn deletes_propagate() {
        let remote = MemoryRemote::new();
        let a = device(&remote, 1_000, config()).await;
        let b = device(&remote, 1_000, config()).await;
        a.sync.start(a.identity.clone()).await;
        b.sync.start(b.identity.clone()).await;

        a.cache.set("debts:car", json!({"owed": 10})).await.unwrap();
        a.sync.force_sync().await;
        b.sync.force_sync().await;
        assert!(b.cache.get("debts:car").is_some());

        b.clock.advance(chrono::Duration::seconds(1));
        b.cache.remove("debts:car").await.unwrap();
        b.sync.force_sync().await;
        a.sync.force_sync().await;
        assert!(a.cache.get("debts:car").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn offline_pass_fails_retryable_and_recovers() {
        let remote = MemoryRemote::new();
        let a = device(&remote, 1_000, config()).await;
        a.sync.start(a.identity.clone()).await;
        a.sync.force_sync().await;

        remote.set_offline();
        a.cache.set("k", json!(1)).await.unwrap();
        let report = a.sync.force_sync().await;
        match report.outcome {
            SyncOutcome::Failed {
                category,
                retryable,
                ..
            } => {
                assert_eq!(category, ErrorCategory::Network);
                assert!(retryable);
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(matches!(a.sync.state(), SyncState::Error { retryable: true, .. }));
        assert_eq!(a.sync.status().metrics.consecutive_failures, 1);

        // Local writes keep working while offline
        assert!(a.cache.set("k2", json!(2)).await.is_ok());

        remote.set_online();
        let report = a.sync.force_sync().await;
        assert!(report.is_completed());
        assert_eq!(a.sync.state(), SyncState::Idle);
        assert_eq!(remote.records(a.identity.budget_id()).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_outage_is_retried_within_a_pass() {
        let remote = MemoryRemote::new();
        let a = device(&remote, 1_000, config()).await;
        a.sync.start(a.identity.clone()).await;
        a.sync.force_sync().await;

        remote.fail_next(2);
        assert!(a.sync.force_sync().await.is_completed());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_force_sync_coalesces() {
        let remote = MemoryRemote::new();
        let a = device(&remote, 1_000, config()).await;
        *a.sync.inner.identity.write().unwrap() = Some(a.identity.clone());
        a.cache.set("k", json!(1)).await.unwrap();

        // The first pass is still waiting on the remote when the second call joins
        remote.set_latency(Duration::from_millis(50));
        let (first, second) = tokio::join!(a.sync.force_sync(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            a.sync.force_sync().await
        });

        assert!(first.is_completed());
        assert_eq!(first.pushed, 1);
        assert_eq!(first, second);
        assert_eq!(remote.pull_count(), 1);

        // Once it has finished, the next call runs a fresh pass
        let third = a.sync.force_sync().await;
        assert!(third.is_completed());
        assert_eq!(third.pushed, 0);
        assert_eq!(remote.pull_count(), 2);
    }

    #[tokio::test]
    async fn state_subscribers_see_passes() {
        let remote = MemoryRemote::new();
        let a = device(&remote, 1_000, config()).await;
        let mut states = a.sync.subscribe_state();
        assert_eq!(*states.borrow_and_update(), SyncState::Stopped);

        *a.sync.inner.identity.write().unwrap() = Some(a.identity.clone());
        a.sync.force_sync().await;
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), SyncState::Idle);

        a.sync.stop().await;
        assert_eq!(*states.borrow_and_update(), SyncState::Stopped);
    }

    #[tokio::test]
    async fn undecryptable_records_are_skipped() {
        let remote = MemoryRemote::new();
        let a = device(&remote, 1_000, config()).await;
        a.sync.start(a.identity.clone()).await;

        let stranger = Identity::derive("other-password", CODE, &test_kdf()).unwrap();
        let foreign = RemoteRecord::seal(&CacheEntry::new("x", json!(1), 5), stranger.key()).unwrap();
        remote.insert_raw(a.identity.budget_id(), foreign);

        let report = a.sync.force_sync().await;
        assert!(report.is_completed());
        assert_eq!(report.undecryptable, 1);
        assert!(a.cache.get("x").is_none());
    }

    #[tokio::test]
    async fn pushes_only_what_remote_lacks() {
        let remote = MemoryRemote::new();
        let a = device(&remote, 1_000, config()).await;
        a.sync.start(a.identity.clone()).await;
        a.cache.set("k", json!(1)).await.unwrap();

        assert_eq!(a.sync.force_sync().await.pushed, 1);
        assert_eq!(a.sync.force_sync().await.pushed, 0);

        let markers = a.cache.durable().load_markers().await.unwrap();
        assert_eq!(markers.last_acknowledged, 1_000);
        assert!(markers.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn start_is_idempotent_and_switches_identity() {
        let remote = MemoryRemote::new();
        let a = device(&remote, 1_000, config()).await;
        a.sync.start(a.identity.clone()).await;
        a.sync.start(a.identity.clone()).await;
        assert_eq!(a.sync.running_budget().await.as_ref(), Some(a.identity.budget_id()));

        let other = Arc::new(Identity::derive("hunter3", CODE, &test_kdf()).unwrap());
        a.sync.start(other.clone()).await;
        assert_eq!(a.sync.running_budget().await.as_ref(), Some(other.budget_id()));

        a.sync.stop().await;
        assert_eq!(a.sync.state(), SyncState::Stopped);
        assert!(a.sync.running_budget().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cold_start_delays_first_pull_only() {
        let remote = MemoryRemote::new();
        let a = device(&remote, 1_000, SyncConfig::default()).await;
        *a.sync.inner.identity.write().unwrap() = Some(a.identity.clone());

        let started = Instant::now();
        a.sync.force_sync().await;
        assert!(started.elapsed() >= Duration::from_millis(2_000));

        let again = Instant::now();
        a.sync.force_sync().await;
        assert!(again.elapsed() < Duration::from_millis(2_000));
    }

    #[tokio::test(start_paused = true)]
    async fn local_change_syncs_after_debounce() {
        let remote = MemoryRemote::new();
        let a = device(&remote, 1_000, config()).await;
        a.sync.start(a.identity.clone()).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(remote.pull_count(), 1);

        a.cache.set("k", json!(1)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(remote.pull_count(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(remote.pull_count(), 2);
        assert_eq!(remote.records(a.identity.budget_id()).len(), 1);

        a.sync.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn high_priority_is_not_delayed_by_normal() {
        let remote = MemoryRemote::new();
        let a = device(&remote, 1_000, config()).await;
        a.sync.start(a.identity.clone()).await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        a.sync.handle().schedule(SyncPriority::High);
        a.sync.handle().schedule(SyncPriority::Normal);
        tokio::time::sleep(Duration::from_millis(2_100)).await;
        assert_eq!(remote.pull_count(), 2);

        a.sync.stop().await;
    }

    #[test]
    fn debounce_rules() {
        let config = SyncConfig::default();
        let now = Instant::now();

        let (at, p) = debounce(None, SyncPriority::Normal, now, &config);
        assert_eq!((at - now, p), (Duration::from_secs(10), SyncPriority::Normal));

        let (at, p) = debounce(Some((now + Duration::from_secs(2), SyncPriority::High)), SyncPriority::Normal, now, &config);
        assert_eq!((at - now, p), (Duration::from_secs(2), SyncPriority::High));

        let later = now + Duration::from_secs(1);
        let (at, _) = debounce(Some((now + Duration::from_secs(10), SyncPriority::Normal)), SyncPriority::Normal, later, &config);
        assert_eq!(at - later, Duration::from_secs(10));
    }
}
