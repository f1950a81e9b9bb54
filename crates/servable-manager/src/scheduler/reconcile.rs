//! Reconciliation planning.
//!
//! A round runs entirely under the registry lock and never awaits. It
//! decides which records to dispose, unload and load, takes their Loaders
//! out of the registry and hands them back as [`Action`]s for the caller
//! to execute once the lock is released.
//!
//! # Round Order
//!
//! 1. Dispose records that are neither aspired nor holding resources.
//! 2. Unload stale versions. Under
//!    [`TransitionPolicy::AvailabilityPreserving`] a stale version is kept
//!    while its name still waits for an aspired version to load.
//! 3. Admit loads by priority: starved entries first, then arrival order
//!    of the name, then the higher version within a name.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use servable_core::{Loader, LoaderState, ResourceAllocation, ServableId, TransitionPolicy};

use super::SchedulerInner;
use crate::registry::ServableRegistry;
use crate::state::{ErrorRecord, ServableStateEvent};
use crate::table::LoadedServable;

/// Work taken out of the registry by a round.
pub(crate) enum Action {
    Load {
        id: ServableId,
        loader: Box<dyn Loader>,
    },
    Unload {
        id: ServableId,
        loader: Box<dyn Loader>,
        loaded: Option<Arc<LoadedServable>>,
    },
}

/// Outcome of one reconciliation round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub loads_dispatched: usize,
    pub unloads_dispatched: usize,
    /// Loads denied admission this round.
    pub deferred: usize,
    /// Records removed this round.
    pub disposed: usize,
    /// Operations still running after the round.
    pub in_flight: usize,
}

impl ReconcileSummary {
    /// Nothing was dispatched and nothing is running.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.loads_dispatched == 0 && self.unloads_dispatched == 0 && self.in_flight == 0
    }
}

#[derive(Default)]
pub(crate) struct Plan {
    pub(crate) actions: Vec<Action>,
    pub(crate) events: Vec<ServableStateEvent>,
    pub(crate) errors: Vec<ErrorRecord>,
    pub(crate) summary: ReconcileSummary,
}

struct Candidate {
    id: ServableId,
    starved: bool,
    name_arrival: u64,
}

impl SchedulerInner {
    pub(crate) fn plan(&self, registry: &mut ServableRegistry, now: Instant) -> Plan {
        let mut plan = Plan::default();
        self.dispose_unused(registry, &mut plan);
        self.plan_unloads(registry, now, &mut plan);
        self.plan_loads(registry, &mut plan);
        plan.summary.in_flight = registry.in_flight_count();
        plan
    }

    fn dispose_unused(&self, registry: &mut ServableRegistry, plan: &mut Plan) {
        let disposable: Vec<ServableId> = registry
            .records
            .values()
            .filter(|r| !r.aspired && !r.in_flight)
            .filter(|r| {
                matches!(
                    r.state,
                    LoaderState::New | LoaderState::Disposed | LoaderState::LoadFailed
                )
            })
            .map(|r| r.id.clone())
            .collect();

        for id in disposable {
            if registry.remove(&id).is_some() {
                debug!(servable = %id, "Record disposed");
                plan.summary.disposed += 1;
            }
        }
    }

    fn plan_unloads(&self, registry: &mut ServableRegistry, now: Instant, plan: &mut Plan) {
        let preserve = self.config.transition_policy == TransitionPolicy::AvailabilityPreserving;
        let awaiting = if preserve {
            names_awaiting_replacement(registry)
        } else {
            BTreeSet::new()
        };

        let unloads: Vec<ServableId> = registry
            .records
            .values()
            .filter(|r| !r.aspired && !r.in_flight)
            .filter(|r| match r.state {
                LoaderState::Loaded => {
                    let retained = awaiting.contains(&r.id.name);
                    if retained {
                        debug!(servable = %r.id, "Keeping stale version until a newer one loads");
                    }
                    !retained
                }
                LoaderState::Unloading => r.retry_after.map_or(true, |at| at <= now),
                _ => false,
            })
            .map(|r| r.id.clone())
            .collect();

        for id in unloads {
            self.take_unload(registry, &id, plan);
        }
    }

    fn plan_loads(&self, registry: &mut ServableRegistry, plan: &mut Plan) {
        let threshold = self.config.starvation_threshold;
        let candidates = load_order(registry, threshold);
        if candidates.is_empty() {
            return;
        }

        let mut blocked_by: Option<ServableId> = None;
        for candidate in candidates {
            let id = candidate.id;

            if let Some(head) = &blocked_by {
                if head.name != id.name {
                    debug!(servable = %id, blocked_by = %head, "Admission held for starved servable");
                    self.defer(registry, &id, plan);
                    continue;
                }
            }

            let estimate = match registry.record(&id).and_then(|r| r.loader.as_ref()) {
                Some(loader) => loader.estimate_resources(),
                None => continue,
            };
            let estimate = match estimate {
                Ok(estimate) => estimate,
                Err(e) => {
                    error!(servable = %id, error = %e, "Resource estimate failed");
                    if let Err(err) = registry.mark_estimate_failed(&id, e.to_string()) {
                        warn!(servable = %id, error = %err, "Could not record estimate failure");
                    }
                    plan.errors
                        .push(ErrorRecord::new(Some(id.clone()), "estimate", e.to_string()));
                    plan.events.push(ServableStateEvent::LoadFailed {
                        id,
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            match self.tracker.try_reserve(&id, &estimate) {
                Ok(true) => match registry.start_loading(&id) {
                    Ok(loader) => {
                        debug!(servable = %id, estimate = %estimate, "Load admitted");
                        plan.summary.loads_dispatched += 1;
                        plan.actions.push(Action::Load { id, loader });
                    }
                    Err(e) => {
                        warn!(servable = %id, error = %e, "Could not start load");
                        self.tracker.release(&id);
                    }
                },
                Ok(false) => {
                    let swapping = self.make_room(registry, &id, &estimate, plan);
                    self.defer(registry, &id, plan);
                    if !swapping
                        && candidate.starved
                        && blocked_by.is_none()
                        && self.could_fit_soon(registry, &estimate)
                    {
                        debug!(servable = %id, "Starved servable takes head of line");
                        blocked_by = Some(id);
                    }
                }
                Err(e) => {
                    warn!(servable = %id, error = %e, "Admission check failed");
                    self.defer(registry, &id, plan);
                }
            }
        }
    }

    /// Unload stale versions of `id`'s name if that alone makes `estimate` fit.
    ///
    /// This is the swap rule: when the old and new versions cannot be
    /// resident together, the old one goes first instead of waiting for
    /// headroom that will never appear. If releases already in flight will
    /// make room for both, the stale versions stay and the load waits.
    fn make_room(
        &self,
        registry: &mut ServableRegistry,
        id: &ServableId,
        estimate: &ResourceAllocation,
        plan: &mut Plan,
    ) -> bool {
        let stale: Vec<ServableId> = registry
            .records
            .values()
            .filter(|r| r.id.name == id.name && !r.aspired && !r.in_flight)
            .filter(|r| r.state == LoaderState::Loaded)
            .map(|r| r.id.clone())
            .collect();

        if stale.is_empty() || !self.tracker.would_fit_after_release(estimate, &stale) {
            return false;
        }
        if self.could_fit_soon(registry, estimate) {
            debug!(servable = %id, "Pending releases make room; keeping stale versions");
            return false;
        }

        for old in &stale {
            info!(servable = %old, replacement = %id, "Unloading stale version to make room");
            self.take_unload(registry, old, plan);
        }
        true
    }

    /// Whether `estimate` fits once every operation already headed for
    /// release completes.
    fn could_fit_soon(&self, registry: &ServableRegistry, estimate: &ResourceAllocation) -> bool {
        let releasing: Vec<ServableId> = registry
            .records
            .values()
            .filter(|r| {
                r.state == LoaderState::Unloading
                    || (r.state == LoaderState::Loading && !r.aspired)
            })
            .map(|r| r.id.clone())
            .collect();
        self.tracker.would_fit_after_release(estimate, &releasing)
    }

    fn take_unload(&self, registry: &mut ServableRegistry, id: &ServableId, plan: &mut Plan) {
        match registry.start_unloading(id) {
            Ok((loader, loaded)) => {
                debug!(servable = %id, "Unload dispatched");
                plan.summary.unloads_dispatched += 1;
                plan.actions.push(Action::Unload {
                    id: id.clone(),
                    loader,
                    loaded,
                });
            }
            Err(e) => warn!(servable = %id, error = %e, "Could not start unload"),
        }
    }

    fn defer(&self, registry: &mut ServableRegistry, id: &ServableId, plan: &mut Plan) {
        let Ok(record) = registry.record_mut(id) else {
            return;
        };
        record.deferrals = record.deferrals.saturating_add(1);
        let deferrals = record.deferrals;
        plan.summary.deferred += 1;

        debug!(servable = %id, deferrals, "Load deferred for lack of headroom");
        if deferrals == 1 || deferrals == self.config.starvation_threshold {
            plan.events.push(ServableStateEvent::Deferred {
                id: id.clone(),
                deferrals,
            });
        }
    }
}

/// Names with an aspired version but no aspired version loaded.
fn names_awaiting_replacement(registry: &ServableRegistry) -> BTreeSet<String> {
    let mut awaiting = BTreeSet::new();
    let mut served = BTreeSet::new();
    for record in registry.records.values().filter(|r| r.aspired) {
        if record.state == LoaderState::Loaded {
            served.insert(record.id.name.clone());
        } else {
            awaiting.insert(record.id.name.clone());
        }
    }
    awaiting.retain(|name| !served.contains(name));
    awaiting
}

/// Load candidates in admission order.
fn load_order(registry: &ServableRegistry, starvation_threshold: u32) -> Vec<Candidate> {
    let mut name_arrival: BTreeMap<&str, u64> = BTreeMap::new();
    for record in registry.records.values().filter(|r| r.is_load_candidate()) {
        let arrival = name_arrival.entry(record.id.name.as_str()).or_insert(record.arrival);
        *arrival = (*arrival).min(record.arrival);
    }

    let mut candidates: Vec<Candidate> = registry
        .records
        .values()
        .filter(|r| r.is_load_candidate())
        .map(|r| Candidate {
            id: r.id.clone(),
            starved: starvation_threshold > 0 && r.deferrals >= starvation_threshold,
            name_arrival: name_arrival
                .get(r.id.name.as_str())
                .copied()
                .unwrap_or(r.arrival),
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.starved
            .cmp(&a.starved)
            .then(a.name_arrival.cmp(&b.name_arrival))
            .then_with(|| a.id.name.cmp(&b.id.name))
            .then(b.id.version.cmp(&a.id.version))
    });
    candidates
}
