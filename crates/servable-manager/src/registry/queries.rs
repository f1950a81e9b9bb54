//! Read-only queries over the registry.

use serde::{Deserialize, Serialize};

use servable_core::{LoaderState, ServableId};

use super::core::ServableRegistry;
use crate::state::ManagerState;

/// Per-state record counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCounts {
    pub total: usize,
    /// Aspired and waiting for admission.
    pub pending: usize,
    pub loading: usize,
    pub aspired_loaded: usize,
    /// Not aspired but still holding resources.
    pub stale: usize,
    pub unloading: usize,
    pub failed: usize,
    pub in_flight: usize,
}

/// Serializable view of one record, used by diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSnapshot {
    pub id: ServableId,
    pub state: LoaderState,
    pub manager_state: ManagerState,
    pub aspired: bool,
    pub in_flight: bool,
    pub deferrals: u32,
    pub load_error: Option<String>,
    pub unload_failures: u32,
    pub unload_error: Option<String>,
}

impl ServableRegistry {
    #[must_use]
    pub fn get_state(&self, id: &ServableId) -> Option<LoaderState> {
        self.records.get(id).map(|r| r.state)
    }

    #[must_use]
    pub fn manager_state(&self, id: &ServableId) -> Option<ManagerState> {
        self.records.get(id).map(|r| r.manager_state())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Distinct servable names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.records.keys().map(|id| id.name.clone()).collect();
        names.dedup();
        names
    }

    /// Aspired ids of `name`, ascending by version.
    #[must_use]
    pub fn aspired_versions(&self, name: &str) -> Vec<ServableId> {
        self.records
            .values()
            .filter(|r| r.id.name == name && r.aspired)
            .map(|r| r.id.clone())
            .collect()
    }

    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.records.values().filter(|r| r.in_flight).count()
    }

    #[must_use]
    pub fn counts(&self) -> RegistryCounts {
        let mut counts = RegistryCounts {
            total: self.records.len(),
            ..RegistryCounts::default()
        };
        for record in self.records.values() {
            if record.in_flight {
                counts.in_flight += 1;
            }
            match record.state {
                LoaderState::New if record.aspired => counts.pending += 1,
                LoaderState::Loading => counts.loading += 1,
                LoaderState::Unloading => counts.unloading += 1,
                LoaderState::LoadFailed => counts.failed += 1,
                _ => {}
            }
            match record.manager_state() {
                ManagerState::AspiredLoaded => counts.aspired_loaded += 1,
                ManagerState::NotAspiredLoaded if record.state == LoaderState::Loaded => {
                    counts.stale += 1
                }
                _ => {}
            }
        }
        counts
    }

    /// Ids whose last load failed, with the failure reason.
    #[must_use]
    pub fn failed_entries(&self) -> Vec<(ServableId, String)> {
        self.records
            .values()
            .filter(|r| r.state == LoaderState::LoadFailed)
            .map(|r| (r.id.clone(), r.load_error.clone().unwrap_or_default()))
            .collect()
    }

    /// Snapshot of every record in id order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RecordSnapshot> {
        self.records
            .values()
            .map(|r| RecordSnapshot {
                id: r.id.clone(),
                state: r.state,
                manager_state: r.manager_state(),
                aspired: r.aspired,
                in_flight: r.in_flight,
                deferrals: r.deferrals,
                load_error: r.load_error.clone(),
                unload_failures: r.unload_failures,
                unload_error: r.unload_error.clone(),
            })
            .collect()
    }
}
