//! Load and Unload execution.
//!
//! Each dispatched action runs on its own task. The task owns the Loader
//! for the whole call, so a second Load or Unload for the same id cannot
//! start until the Loader is handed back to the registry.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use servable_core::{AnyServable, Loader, LoadMetadata, ServableId};

use super::reconcile::Action;
use super::SchedulerInner;
use crate::state::{ErrorRecord, ServableStateEvent};
use crate::table::{wait_for_leases, LoadedServable};

impl SchedulerInner {
    /// Spawn a task per action.
    pub(crate) fn dispatch(self: &Arc<Self>, actions: Vec<Action>) {
        for action in actions {
            let inner = Arc::clone(self);
            match action {
                Action::Load { id, loader } => {
                    self.runtime.spawn(inner.run_load(id, loader));
                }
                Action::Unload { id, loader, loaded } => {
                    self.runtime.spawn(inner.run_unload(id, loader, loaded));
                }
            }
        }
    }

    async fn run_load(self: Arc<Self>, id: ServableId, mut loader: Box<dyn Loader>) {
        let started = Instant::now();
        let outcome = {
            let _permit = self.load_permits.acquire().await.ok();
            load_servable(&id, loader.as_mut()).await
        };

        match outcome {
            Ok(servable) => self.finish_load(id, loader, servable, started),
            Err(reason) => self.fail_load(id, reason),
        }
        self.after_operation();
    }

    fn finish_load(
        &self,
        id: ServableId,
        loader: Box<dyn Loader>,
        servable: AnyServable,
        started: Instant,
    ) {
        // The Loader may now report a tighter, device-bound footprint.
        match loader.estimate_resources() {
            Ok(measured) => {
                if let Err(e) = self.tracker.recompute(&id, &measured) {
                    warn!(servable = %id, error = %e, "Could not recompute reservation after load");
                }
            }
            Err(e) => {
                warn!(servable = %id, error = %e, "Post-load estimate failed; keeping reservation");
            }
        }

        let loaded = Arc::new(LoadedServable::new(id.clone(), servable));
        {
            let mut registry = self.registry.lock();
            if let Err(e) = registry.mark_loaded(&id, loader, loaded) {
                error!(servable = %id, error = %e, "Loaded servable has no matching record");
                self.tracker.release(&id);
            }
            self.publish_locked(&registry);
        }

        info!(
            servable = %id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Servable loaded"
        );
        self.emit(ServableStateEvent::Loaded { id });
    }

    fn fail_load(&self, id: ServableId, reason: String) {
        // A failed Load leaves no footprint behind.
        self.tracker.release(&id);
        {
            let mut registry = self.registry.lock();
            if let Err(e) = registry.mark_load_failed(&id, reason.clone()) {
                warn!(servable = %id, error = %e, "Could not record load failure");
            }
            self.publish_locked(&registry);
        }

        error!(servable = %id, error = %reason, "Servable load failed");
        self.record_error(ErrorRecord::new(Some(id.clone()), "load", reason.clone()));
        self.emit(ServableStateEvent::LoadFailed { id, error: reason });
    }

    async fn run_unload(
        self: Arc<Self>,
        id: ServableId,
        mut loader: Box<dyn Loader>,
        loaded: Option<Arc<LoadedServable>>,
    ) {
        // Already unpublished; wait for readers still holding it.
        if let Some(loaded) = loaded {
            wait_for_leases(&loaded, self.config.lease_poll_interval()).await;
        }

        let result = {
            let _permit = self.unload_permits.acquire().await.ok();
            loader.unload().await
        };

        match result {
            Ok(()) => {
                self.tracker.release(&id);
                let revived = {
                    let mut registry = self.registry.lock();
                    let revived = registry.mark_disposed(&id).unwrap_or_else(|e| {
                        warn!(servable = %id, error = %e, "Could not record disposal");
                        false
                    });
                    self.publish_locked(&registry);
                    revived
                };
                drop(loader);

                info!(servable = %id, revived, "Servable unloaded");
                self.emit(ServableStateEvent::Unloaded { id });
            }
            Err(e) => {
                let retry_at = Instant::now() + self.config.unload_retry_interval();
                let attempt = {
                    let mut registry = self.registry.lock();
                    let attempt = registry
                        .mark_unload_failed(&id, loader, e.to_string(), retry_at)
                        .unwrap_or_else(|err| {
                            warn!(servable = %id, error = %err, "Could not record unload failure");
                            0
                        });
                    self.publish_locked(&registry);
                    attempt
                };

                warn!(
                    servable = %id,
                    error = %e,
                    attempt,
                    retry_in_ms = self.config.unload_retry_interval_ms,
                    "Servable unload failed; reservation kept until retry succeeds"
                );
                self.record_error(ErrorRecord::new(Some(id.clone()), "unload", e.to_string()));
                self.emit(ServableStateEvent::UnloadFailed {
                    id,
                    error: e.to_string(),
                    attempt,
                });
                self.schedule_retry();
            }
        }
        self.after_operation();
    }

    /// Trigger a round once the unload retry interval has passed.
    fn schedule_retry(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        let delay = self.config.unload_retry_interval();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            inner.after_operation();
        });
    }

    /// Reconcile again and wake anyone waiting for progress.
    pub(crate) fn after_operation(self: &Arc<Self>) {
        if !self.is_stopped() {
            if let Err(e) = self.reconcile_round() {
                warn!(error = %e, "Reconciliation after operation failed");
            }
        }
        self.progress.notify_waiters();
    }
}

/// Run the Load and check that it produced a servable.
async fn load_servable(id: &ServableId, loader: &mut dyn Loader) -> Result<AnyServable, String> {
    let metadata = LoadMetadata::new(id.clone());
    if let Err(e) = loader.load_with_metadata(&metadata).await {
        return Err(e.to_string());
    }

    match loader.servable() {
        Some(servable) => Ok(servable),
        None => {
            // Treat as failed and release whatever the Loader acquired.
            if let Err(e) = loader.unload().await {
                warn!(servable = %id, error = %e, "Unload after empty load failed");
            }
            Err("load reported success but produced no servable".to_string())
        }
    }
}
