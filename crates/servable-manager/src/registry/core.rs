//! Core registry implementation.
//!
//! Contains [`ServableRecord`], [`ServableRegistry`] and registration.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use servable_core::{Loader, LoaderState, ServableId, ServingError, ServingResult};

use crate::state::ManagerState;
use crate::table::LoadedServable;

/// Lifecycle record for one [`ServableId`].
///
/// # Invariants
///
/// - `loader` is `None` exactly while a Load or Unload is in flight
///   (`in_flight == true`) and after the Loader was discarded
///   (`LoadFailed`, `Disposed`).
/// - `loaded` is `Some` only in `Loaded`; the unload path takes it out.
/// - `next_loader` is only set while `Unloading`.
pub struct ServableRecord {
    pub(crate) id: ServableId,
    pub(crate) loader: Option<Box<dyn Loader>>,
    pub(crate) state: LoaderState,
    pub(crate) aspired: bool,
    pub(crate) in_flight: bool,
    /// Order in which the current Loader arrived. Drives admission fairness.
    pub(crate) arrival: u64,
    /// Consecutive admission denials of the current Loader.
    pub(crate) deferrals: u32,
    pub(crate) load_error: Option<String>,
    pub(crate) unload_failures: u32,
    pub(crate) unload_error: Option<String>,
    pub(crate) retry_after: Option<Instant>,
    /// Fresh Loader supplied while the previous one was unloading.
    pub(crate) next_loader: Option<Box<dyn Loader>>,
    pub(crate) loaded: Option<Arc<LoadedServable>>,
}

impl ServableRecord {
    pub(crate) fn new(id: ServableId, loader: Box<dyn Loader>, arrival: u64) -> Self {
        Self {
            id,
            loader: Some(loader),
            state: LoaderState::New,
            aspired: true,
            in_flight: false,
            arrival,
            deferrals: 0,
            load_error: None,
            unload_failures: 0,
            unload_error: None,
            retry_after: None,
            next_loader: None,
            loaded: None,
        }
    }

    /// Start over with a fresh Loader in `New`.
    pub(crate) fn reset(&mut self, loader: Box<dyn Loader>, arrival: u64) {
        self.loader = Some(loader);
        self.state = LoaderState::New;
        self.in_flight = false;
        self.arrival = arrival;
        self.deferrals = 0;
        self.load_error = None;
        self.unload_failures = 0;
        self.unload_error = None;
        self.retry_after = None;
        self.next_loader = None;
        self.loaded = None;
    }

    #[must_use]
    pub fn id(&self) -> &ServableId {
        &self.id
    }

    #[must_use]
    pub fn state(&self) -> LoaderState {
        self.state
    }

    #[must_use]
    pub fn is_aspired(&self) -> bool {
        self.aspired
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    #[must_use]
    pub fn manager_state(&self) -> ManagerState {
        ManagerState::derive(self.aspired, self.state)
    }

    #[must_use]
    pub fn deferrals(&self) -> u32 {
        self.deferrals
    }

    #[must_use]
    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    #[must_use]
    pub fn unload_failures(&self) -> u32 {
        self.unload_failures
    }

    /// Whether a load for this record could be dispatched now.
    pub(crate) fn is_load_candidate(&self) -> bool {
        self.aspired && !self.in_flight && self.state == LoaderState::New && self.loader.is_some()
    }

    pub(crate) fn transition(&mut self, next: LoaderState) -> ServingResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(ServingError::InvalidTransition {
                servable: self.id.clone(),
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }
}

impl fmt::Debug for ServableRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServableRecord")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("aspired", &self.aspired)
            .field("in_flight", &self.in_flight)
            .field("arrival", &self.arrival)
            .field("deferrals", &self.deferrals)
            .field("has_loader", &self.loader.is_some())
            .field("has_next_loader", &self.next_loader.is_some())
            .field("load_error", &self.load_error)
            .field("unload_failures", &self.unload_failures)
            .finish()
    }
}

/// Registry of per-id lifecycle records.
///
/// Not thread-safe by itself; the scheduler wraps it in a mutex and never
/// holds that mutex across a Load or Unload call.
#[derive(Debug, Default)]
pub struct ServableRegistry {
    pub(crate) records: BTreeMap<ServableId, ServableRecord>,
    next_arrival: u64,
}

impl ServableRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` in `New`, aspired, owning `loader`.
    ///
    /// # Errors
    ///
    /// Returns [`ServingError::AlreadyRegistered`] if `id` has a record.
    pub fn register(&mut self, id: ServableId, loader: Box<dyn Loader>) -> ServingResult<()> {
        if self.records.contains_key(&id) {
            return Err(ServingError::AlreadyRegistered { servable: id });
        }
        let arrival = self.next_arrival();
        self.records
            .insert(id.clone(), ServableRecord::new(id, loader, arrival));
        Ok(())
    }

    /// Drop the record for `id`, disposing any Loader it still owns.
    pub fn remove(&mut self, id: &ServableId) -> Option<ServableRecord> {
        self.records.remove(id)
    }

    #[must_use]
    pub fn record(&self, id: &ServableId) -> Option<&ServableRecord> {
        self.records.get(id)
    }

    pub(crate) fn record_mut(&mut self, id: &ServableId) -> ServingResult<&mut ServableRecord> {
        self.records
            .get_mut(id)
            .ok_or_else(|| ServingError::NotRegistered {
                servable: id.clone(),
            })
    }

    pub(crate) fn next_arrival(&mut self) -> u64 {
        let arrival = self.next_arrival;
        self.next_arrival = self.next_arrival.saturating_add(1);
        arrival
    }
}
