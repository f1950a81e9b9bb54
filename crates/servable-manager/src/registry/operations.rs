//! State transition operations for the servable registry.
//!
//! Contains methods for moving records through the Loader state machine:
//! - `start_loading`: New -> Loading (takes the Loader out)
//! - `mark_loaded`: Loading -> Loaded (returns the Loader)
//! - `mark_load_failed`: Loading -> LoadFailed
//! - `mark_estimate_failed`: New -> LoadFailed
//! - `start_unloading`: Loaded/Unloading -> Unloading (takes the Loader out)
//! - `mark_unload_failed`: Unloading -> Unloading (returns the Loader)
//! - `mark_disposed`: Unloading -> Disposed

use std::sync::Arc;
use std::time::Instant;

use servable_core::{Loader, LoaderState, ServableId, ServingError, ServingResult};

use super::core::ServableRegistry;
use crate::table::LoadedServable;

impl ServableRegistry {
    /// Take the Loader of `id` out for loading.
    ///
    /// While the Loader is out the record is in flight and no other
    /// operation can be dispatched for it.
    ///
    /// # Errors
    ///
    /// - [`ServingError::NotRegistered`] if `id` has no record
    /// - [`ServingError::FailedPrecondition`] if an operation is in flight
    /// - [`ServingError::InvalidTransition`] if the record is not `New`
    pub fn start_loading(&mut self, id: &ServableId) -> ServingResult<Box<dyn Loader>> {
        let record = self.record_mut(id)?;
        if record.in_flight {
            return Err(ServingError::FailedPrecondition {
                reason: format!("{} already has an operation in flight", id),
            });
        }
        record.transition(LoaderState::Loading)?;
        match record.loader.take() {
            Some(loader) => {
                record.in_flight = true;
                Ok(loader)
            }
            None => {
                record.state = LoaderState::New;
                Err(ServingError::FailedPrecondition {
                    reason: format!("{} has no loader to load", id),
                })
            }
        }
    }

    /// Return the Loader after a successful load.
    ///
    /// # Errors
    ///
    /// [`ServingError::InvalidTransition`] unless the record is `Loading`.
    pub(crate) fn mark_loaded(
        &mut self,
        id: &ServableId,
        loader: Box<dyn Loader>,
        loaded: Arc<LoadedServable>,
    ) -> ServingResult<()> {
        let record = self.record_mut(id)?;
        record.transition(LoaderState::Loaded)?;
        record.loader = Some(loader);
        record.loaded = Some(loaded);
        record.in_flight = false;
        record.deferrals = 0;
        record.load_error = None;
        Ok(())
    }

    /// Record a failed load. The Loader is discarded by the caller.
    ///
    /// # Errors
    ///
    /// [`ServingError::InvalidTransition`] unless the record is `Loading`.
    pub fn mark_load_failed(&mut self, id: &ServableId, reason: impl Into<String>) -> ServingResult<()> {
        let record = self.record_mut(id)?;
        record.transition(LoaderState::LoadFailed)?;
        record.in_flight = false;
        record.loader = None;
        record.load_error = Some(reason.into());
        Ok(())
    }

    /// Record that the Loader could not estimate its resources.
    ///
    /// The Loader never started loading and is discarded.
    ///
    /// # Errors
    ///
    /// [`ServingError::InvalidTransition`] unless the record is `New`.
    pub fn mark_estimate_failed(&mut self, id: &ServableId, reason: impl Into<String>) -> ServingResult<()> {
        let record = self.record_mut(id)?;
        record.transition(LoaderState::LoadFailed)?;
        record.loader = None;
        record.load_error = Some(reason.into());
        Ok(())
    }

    /// Take the Loader (and the published servable) out for unloading.
    ///
    /// Also used to retry a failed unload.
    ///
    /// # Errors
    ///
    /// - [`ServingError::FailedPrecondition`] if an operation is in flight
    /// - [`ServingError::InvalidTransition`] unless `Loaded` or `Unloading`
    pub(crate) fn start_unloading(
        &mut self,
        id: &ServableId,
    ) -> ServingResult<(Box<dyn Loader>, Option<Arc<LoadedServable>>)> {
        let record = self.record_mut(id)?;
        if record.in_flight {
            return Err(ServingError::FailedPrecondition {
                reason: format!("{} already has an operation in flight", id),
            });
        }
        let previous = record.state;
        record.transition(LoaderState::Unloading)?;
        match record.loader.take() {
            Some(loader) => {
                record.in_flight = true;
                record.retry_after = None;
                Ok((loader, record.loaded.take()))
            }
            None => {
                record.state = previous;
                Err(ServingError::FailedPrecondition {
                    reason: format!("{} has no loader to unload", id),
                })
            }
        }
    }

    /// Return the Loader after a failed unload.
    ///
    /// The record stays `Unloading` and becomes eligible for a retry at
    /// `retry_after`. Returns the number of failed attempts so far.
    ///
    /// # Errors
    ///
    /// [`ServingError::InvalidTransition`] unless the record is `Unloading`.
    pub fn mark_unload_failed(
        &mut self,
        id: &ServableId,
        loader: Box<dyn Loader>,
        reason: impl Into<String>,
        retry_after: Instant,
    ) -> ServingResult<u32> {
        let record = self.record_mut(id)?;
        record.transition(LoaderState::Unloading)?;
        record.loader = Some(loader);
        record.in_flight = false;
        record.unload_failures = record.unload_failures.saturating_add(1);
        record.unload_error = Some(reason.into());
        record.retry_after = Some(retry_after);
        Ok(record.unload_failures)
    }

    /// Record a completed unload. The Loader is discarded by the caller.
    ///
    /// If a fresh Loader was supplied for this id while it was unloading,
    /// the record restarts in `New` with it and `true` is returned.
    ///
    /// # Errors
    ///
    /// [`ServingError::InvalidTransition`] unless the record is `Unloading`.
    pub fn mark_disposed(&mut self, id: &ServableId) -> ServingResult<bool> {
        let arrival = self.next_arrival();
        let record = self.record_mut(id)?;
        record.transition(LoaderState::Disposed)?;
        record.in_flight = false;
        record.loader = None;
        record.loaded = None;

        match record.next_loader.take() {
            Some(next) if record.aspired => {
                record.reset(next, arrival);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
