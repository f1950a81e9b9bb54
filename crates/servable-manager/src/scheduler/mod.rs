//! Transition Scheduler
//!
//! Reconciles the aspired versions of every servable name against what is
//! loaded, under the [`ResourceTracker`] budget.
//!
//! # Overview
//!
//! A reconciliation round runs whenever the aspired set changes, whenever a
//! Load or Unload completes, and on a periodic timer once
//! [`TransitionScheduler::start`] has been called. Rounds are short and
//! synchronous: they plan under the registry lock, publish a fresh
//! [`ServableStateTable`](crate::table::ServableStateTable), then spawn one
//! task per dispatched Load or Unload. No lock is held while a Loader runs.
//!
//! # Concurrency
//!
//! - Loads and Unloads draw from separate semaphores
//!   (`max_concurrent_loads`, `max_concurrent_unloads`), so pending loads
//!   never hold up unloads.
//! - A record's Loader is owned by at most one task at a time.
//! - An Unload first waits for every [`ServableHandle`] and table snapshot
//!   referencing the servable to be dropped.
//!
//! # Example
//!
//! ```ignore
//! let scheduler = TransitionScheduler::new(ServingConfig::default())?;
//! scheduler.set_aspired_versions("m", vec![(ServableId::new("m", 1), loader)])?;
//! scheduler.settle().await?;
//! let handle = scheduler.get_servable("m", VersionSelector::Latest)?;
//! ```

mod execute;
mod reconcile;


use std::collections::VecDeque;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use servable_core::{
    Loader, LoaderState, ResourceTracker, ServableId, ServingConfig, ServingError, ServingResult,
    TrackerOccupancy,
};

use crate::registry::{RecordSnapshot, RegistryCounts, ServableRegistry};
use crate::source::{VersionEvent, VersionSource};
use crate::state::{ErrorRecord, ServableStateEvent};
use crate::table::{ServableHandle, ServableStateTable, ServableTable, VersionSelector};

pub use reconcile::ReconcileSummary;

/// Capacity of the lifecycle event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Number of recent errors kept for diagnostics.
const MAX_RECORDED_ERRORS: usize = 100;

/// How long `stop()` waits for the background loop to exit.
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// State shared between the scheduler and its tasks.
pub(crate) struct SchedulerInner {
    pub(crate) config: ServingConfig,
    pub(crate) registry: Mutex<ServableRegistry>,
    pub(crate) tracker: Arc<ResourceTracker>,
    pub(crate) table: Arc<ServableTable>,
    load_permits: Semaphore,
    unload_permits: Semaphore,
    events: broadcast::Sender<ServableStateEvent>,
    progress: Notify,
    stopped: AtomicBool,
    recent_errors: Mutex<VecDeque<ErrorRecord>>,
    runtime: Handle,
    pub(crate) started_at: Instant,
}

impl SchedulerInner {
    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Plan, publish and dispatch one round.
    pub(crate) fn reconcile_round(self: &Arc<Self>) -> ServingResult<ReconcileSummary> {
        if self.is_stopped() {
            return Err(ServingError::SchedulerStopped);
        }

        let plan = {
            let mut registry = self.registry.lock();
            let plan = self.plan(&mut registry, Instant::now());
            self.publish_locked(&registry);
            plan
        };

        for record in plan.errors {
            self.record_error(record);
        }
        for event in plan.events {
            self.emit(event);
        }
        self.dispatch(plan.actions);

        if plan.summary.loads_dispatched > 0 || plan.summary.unloads_dispatched > 0 {
            debug!(
                loads = plan.summary.loads_dispatched,
                unloads = plan.summary.unloads_dispatched,
                deferred = plan.summary.deferred,
                in_flight = plan.summary.in_flight,
                "Reconciliation round dispatched work"
            );
        }
        Ok(plan.summary)
    }

    /// Build and swap in a new table. Must be called with the registry lock
    /// held so publications follow registry order.
    pub(crate) fn publish_locked(&self, registry: &ServableRegistry) {
        let mut builder = ServableStateTable::builder(self.table.next_generation());
        for record in registry.records.values() {
            if matches!(record.state, LoaderState::LoadFailed | LoaderState::Disposed) {
                continue;
            }
            builder.row(
                &record.id,
                record.state,
                record.manager_state(),
                record.loaded.clone(),
            );
        }
        self.table.publish(builder.build());
    }

    pub(crate) fn emit(&self, event: ServableStateEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub(crate) fn record_error(&self, record: ErrorRecord) {
        let mut errors = self.recent_errors.lock();
        if errors.len() >= MAX_RECORDED_ERRORS {
            errors.pop_front();
        }
        errors.push_back(record);
    }

    pub(crate) fn recent_errors(&self) -> Vec<ErrorRecord> {
        self.recent_errors.lock().iter().cloned().collect()
    }

    fn apply_event(self: &Arc<Self>, event: VersionEvent) -> ServingResult<()> {
        if self.is_stopped() {
            return Err(ServingError::SchedulerStopped);
        }
        debug!(servable = %event.id, withdraw = event.is_withdrawal(), "Aspiration event");
        self.registry.lock().apply_event(event);
        self.reconcile_round().map(|_| ())
    }
}

/// Orchestrates Loads and Unloads for every managed servable.
pub struct TransitionScheduler {
    inner: Arc<SchedulerInner>,
    running: AtomicBool,
    shutdown_tx: RwLock<Option<mpsc::Sender<()>>>,
    join_handle: RwLock<Option<JoinHandle<()>>>,
}

impl TransitionScheduler {
    /// Create a scheduler with a tracker built from `config.capacity`.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`ServingError::InvalidConfig`] if `config` fails validation
    /// - [`ServingError::InvalidResource`] if the capacity is malformed
    /// - [`ServingError::FailedPrecondition`] outside a tokio runtime
    pub fn new(config: ServingConfig) -> ServingResult<Self> {
        config.validate()?;
        let tracker = Arc::new(config.resource_tracker()?);
        Self::with_tracker(config, tracker)
    }

    /// Create a scheduler that admits against an existing tracker.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new), except the tracker is not rebuilt.
    pub fn with_tracker(config: ServingConfig, tracker: Arc<ResourceTracker>) -> ServingResult<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| ServingError::FailedPrecondition {
            reason: format!("TransitionScheduler requires a tokio runtime: {}", e),
        })?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        info!(
            policy = %config.transition_policy.as_str(),
            max_concurrent_loads = config.max_concurrent_loads,
            max_concurrent_unloads = config.max_concurrent_unloads,
            "Transition scheduler created"
        );

        let inner = SchedulerInner {
            load_permits: Semaphore::new(config.max_concurrent_loads),
            unload_permits: Semaphore::new(config.max_concurrent_unloads),
            config,
            registry: Mutex::new(ServableRegistry::new()),
            tracker,
            table: Arc::new(ServableTable::new()),
            events,
            progress: Notify::new(),
            stopped: AtomicBool::new(false),
            recent_errors: Mutex::new(VecDeque::new()),
            runtime,
            started_at: Instant::now(),
        };

        Ok(Self {
            inner: Arc::new(inner),
            running: AtomicBool::new(false),
            shutdown_tx: RwLock::new(None),
            join_handle: RwLock::new(None),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ServingConfig {
        &self.inner.config
    }

    // ========================================================================
    // ASPIRATION
    // ========================================================================

    /// Replace the aspired versions of `name` and reconcile.
    ///
    /// # Errors
    ///
    /// - [`ServingError::FailedPrecondition`] if an id belongs to another name
    /// - [`ServingError::SchedulerStopped`] after [`stop`](Self::stop)
    pub fn set_aspired_versions(
        &self,
        name: &str,
        versions: Vec<(ServableId, Box<dyn Loader>)>,
    ) -> ServingResult<()> {
        if self.inner.is_stopped() {
            return Err(ServingError::SchedulerStopped);
        }
        debug!(servable_name = name, count = versions.len(), "Aspired versions replaced");
        self.inner
            .registry
            .lock()
            .set_aspired_versions(name, versions)?;
        self.inner.reconcile_round().map(|_| ())
    }

    /// Apply one aspiration event and reconcile.
    ///
    /// # Errors
    ///
    /// Returns [`ServingError::SchedulerStopped`] after [`stop`](Self::stop).
    pub fn apply_event(&self, event: VersionEvent) -> ServingResult<()> {
        self.inner.apply_event(event)
    }

    /// Drain `source` into the scheduler on a background task.
    ///
    /// The task ends when the source is exhausted or the scheduler stops.
    pub fn connect_source<S>(&self, mut source: S) -> JoinHandle<()>
    where
        S: VersionSource + 'static,
    {
        let inner = Arc::clone(&self.inner);
        self.inner.runtime.spawn(async move {
            while let Some(event) = source.next_event().await {
                if let Err(e) = inner.apply_event(event) {
                    warn!(error = %e, "Version source disconnected");
                    return;
                }
            }
            debug!("Version source exhausted");
        })
    }

    // ========================================================================
    // LOOKUP
    // ========================================================================

    /// Resolve a loaded servable. See [`ServableTable::get_servable`].
    ///
    /// # Errors
    ///
    /// Returns [`ServingError::NotFound`] if no matching version is loaded.
    pub fn get_servable(&self, name: &str, selector: VersionSelector) -> ServingResult<ServableHandle> {
        self.inner.table.get_servable(name, selector)
    }

    /// The published table, shareable with front ends.
    #[must_use]
    pub fn table(&self) -> Arc<ServableTable> {
        Arc::clone(&self.inner.table)
    }

    /// The current published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<ServableStateTable> {
        self.inner.table.snapshot()
    }

    #[must_use]
    pub fn tracker(&self) -> &Arc<ResourceTracker> {
        &self.inner.tracker
    }

    #[must_use]
    pub fn occupancy(&self) -> TrackerOccupancy {
        self.inner.tracker.occupancy()
    }

    /// Subscribe to lifecycle events from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ServableStateEvent> {
        self.inner.events.subscribe()
    }

    #[must_use]
    pub fn records(&self) -> Vec<RecordSnapshot> {
        self.inner.registry.lock().snapshot()
    }

    #[must_use]
    pub fn counts(&self) -> RegistryCounts {
        self.inner.registry.lock().counts()
    }

    /// Most recent failures, oldest first.
    #[must_use]
    pub fn recent_errors(&self) -> Vec<ErrorRecord> {
        self.inner.recent_errors()
    }

    // ========================================================================
    // RECONCILIATION
    // ========================================================================

    /// Run one reconciliation round now.
    ///
    /// # Errors
    ///
    /// Returns [`ServingError::SchedulerStopped`] after [`stop`](Self::stop).
    pub fn reconcile(&self) -> ServingResult<ReconcileSummary> {
        self.inner.reconcile_round()
    }

    /// Reconcile until a round dispatches nothing and nothing is in flight.
    ///
    /// Deferred loads and unloads waiting for a retry do not keep this
    /// waiting. Handles held by the caller do: an Unload waits for them.
    ///
    /// # Errors
    ///
    /// Returns [`ServingError::SchedulerStopped`] after [`stop`](Self::stop).
    pub async fn settle(&self) -> ServingResult<()> {
        loop {
            let mut notified = pin!(self.inner.progress.notified());
            notified.as_mut().enable();

            let summary = self.inner.reconcile_round()?;
            if summary.is_idle() {
                return Ok(());
            }
            notified.await;
        }
    }

    // ========================================================================
    // BACKGROUND LOOP
    // ========================================================================

    /// Start the periodic reconciliation loop.
    ///
    /// Deferred loads are retried on every tick. Calling `start` on a
    /// running scheduler is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ServingError::SchedulerStopped`] after [`stop`](Self::stop).
    pub fn start(&self) -> ServingResult<()> {
        if self.inner.is_stopped() {
            return Err(ServingError::SchedulerStopped);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let interval = self.inner.config.reconcile_interval();
        info!(interval_ms = interval.as_millis() as u64, "Starting reconciliation loop");

        let (tx, mut rx) = mpsc::channel(1);
        *self.shutdown_tx.write() = Some(tx);

        let inner = Arc::clone(&self.inner);
        let handle = self.inner.runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = rx.recv() => {
                        info!("Received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        match inner.reconcile_round() {
                            Ok(summary) => {
                                if summary.deferred > 0 {
                                    debug!(deferred = summary.deferred, "Deferred loads still waiting");
                                }
                            }
                            Err(e) => {
                                debug!(error = %e, "Reconciliation loop exiting");
                                break;
                            }
                        }
                    }
                }
            }
        });
        *self.join_handle.write() = Some(handle);
        Ok(())
    }

    /// Stop scheduling.
    ///
    /// In-flight Loads and Unloads run to completion (Loaders cannot be
    /// cancelled) but trigger no further rounds. Later calls that would
    /// reconcile return [`ServingError::SchedulerStopped`].
    pub async fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Stopping transition scheduler");

        let tx = self.shutdown_tx.write().take();
        if let Some(tx) = tx {
            let _ = tx.send(()).await;
        }

        let handle = self.join_handle.write().take();
        if let Some(handle) = handle {
            match tokio::time::timeout(STOP_TIMEOUT, handle).await {
                Ok(Ok(())) => info!("Reconciliation loop completed normally"),
                Ok(Err(e)) => error!("Reconciliation loop panicked: {:?}", e),
                Err(_) => error!("Reconciliation loop did not shut down within 10 seconds"),
            }
        }
        self.running.store(false, Ordering::SeqCst);
        self.inner.progress.notify_waiters();
    }

    /// Whether the periodic loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }

    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.inner.started_at.elapsed()
    }

    pub(crate) fn inner(&self) -> &Arc<SchedulerInner> {
        &self.inner
    }
}

impl Drop for TransitionScheduler {
    fn drop(&mut self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        if let Some(handle) = self.join_handle.get_mut().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for TransitionScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionScheduler")
            .field("policy", &self.inner.config.transition_policy)
            .field("running", &self.is_running())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
