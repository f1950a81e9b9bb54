//! Aspired-version updates.
//!
//! Upstream discovery communicates churn either as a full replacement of a
//! name's aspired set ([`ServableRegistry::set_aspired_versions`]) or as
//! single-id stream events ([`ServableRegistry::apply_event`]).

use tracing::debug;

use servable_core::{Loader, LoaderState, ServableId, ServingError, ServingResult};

use super::core::{ServableRecord, ServableRegistry};
use crate::source::VersionEvent;

impl ServableRegistry {
    /// Mark `id` aspired, supplying a Loader for it.
    ///
    /// - No record: a new record is registered in `New`.
    /// - `LoadFailed` or `Disposed`: the record restarts in `New` with the
    ///   fresh Loader.
    /// - `Unloading`: the Loader is stashed and installed once disposal
    ///   completes.
    /// - Otherwise the record already has a live Loader and `loader` is
    ///   dropped.
    ///
    /// Returns `true` if `loader` was kept.
    pub fn aspire(&mut self, id: ServableId, loader: Box<dyn Loader>) -> bool {
        let arrival = self.next_arrival();
        let Some(record) = self.records.get_mut(&id) else {
            self.records
                .insert(id.clone(), ServableRecord::new(id, loader, arrival));
            return true;
        };

        record.aspired = true;
        match record.state {
            LoaderState::LoadFailed | LoaderState::Disposed if !record.in_flight => {
                debug!(servable = %id, previous = %record.state, "Restarting record with fresh loader");
                record.reset(loader, arrival);
                true
            }
            LoaderState::Unloading => {
                debug!(servable = %id, "Loader stashed until unload completes");
                record.next_loader = Some(loader);
                true
            }
            state => {
                debug!(servable = %id, state = %state, "Already managed, dropping duplicate loader");
                false
            }
        }
    }

    /// Withdraw the aspiration for `id`.
    ///
    /// In-flight operations are not cancelled; a load that completes for a
    /// withdrawn id is unloaded on a later round. Returns `false` if `id`
    /// has no record.
    pub fn unaspire(&mut self, id: &ServableId) -> bool {
        match self.records.get_mut(id) {
            Some(record) => {
                record.aspired = false;
                record.next_loader = None;
                true
            }
            None => {
                debug!(servable = %id, "Ignoring withdrawal of unknown servable");
                false
            }
        }
    }

    /// Replace the aspired set of `name`.
    ///
    /// Versions of `name` missing from `versions` stop being aspired.
    ///
    /// # Errors
    ///
    /// Returns [`ServingError::FailedPrecondition`] if any id in `versions`
    /// belongs to another name. Nothing is changed in that case.
    pub fn set_aspired_versions(
        &mut self,
        name: &str,
        versions: Vec<(ServableId, Box<dyn Loader>)>,
    ) -> ServingResult<()> {
        if let Some((stray, _)) = versions.iter().find(|(id, _)| id.name != name) {
            return Err(ServingError::FailedPrecondition {
                reason: format!("{} does not belong to aspired set of '{}'", stray, name),
            });
        }

        let withdrawn: Vec<ServableId> = self
            .records
            .values()
            .filter(|r| r.id.name == name && r.aspired)
            .filter(|r| !versions.iter().any(|(id, _)| *id == r.id))
            .map(|r| r.id.clone())
            .collect();
        for id in &withdrawn {
            self.unaspire(id);
        }

        for (id, loader) in versions {
            self.aspire(id, loader);
        }
        Ok(())
    }

    /// Apply one stream event: a Loader aspires the id, `None` withdraws it.
    pub fn apply_event(&mut self, event: VersionEvent) {
        let VersionEvent { id, loader } = event;
        match loader {
            Some(loader) => {
                self.aspire(id, loader);
            }
            None => {
                self.unaspire(&id);
            }
        }
    }
}
