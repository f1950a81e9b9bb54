//! Published servable state table.
//!
//! # Overview
//!
//! The scheduler is the only writer. After every reconciliation round and
//! every completed Load or Unload it builds a fresh [`ServableStateTable`]
//! from the registry and swaps it in atomically. Readers never observe a
//! partially updated table.
//!
//! Lookups return a [`ServableHandle`], a lease that keeps the servable from
//! being unloaded until it is dropped.
//!
//! # Visibility
//!
//! | Loader state | Row present | Handle available |
//! |--------------|-------------|------------------|
//! | `New`, `Loading` | yes | no |
//! | `Loaded` | yes | yes |
//! | `Unloading` | yes | no |
//! | `LoadFailed`, `Disposed` | no | no |

mod handle;
mod selector;


use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use servable_core::{LoaderState, ServableId, ServingError, ServingResult};

use crate::state::ManagerState;

pub(crate) use handle::{wait_for_leases, LoadedServable};
pub use handle::ServableHandle;
pub use selector::VersionSelector;

/// One published row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRow {
    pub id: ServableId,
    pub state: LoaderState,
    pub manager_state: ManagerState,
    /// Whether a lookup can currently obtain a handle.
    pub available: bool,
}

#[derive(Debug, Clone)]
struct TableEntry {
    state: LoaderState,
    manager_state: ManagerState,
    loaded: Option<Arc<LoadedServable>>,
}

/// Immutable snapshot of every managed id and its state.
#[derive(Debug, Clone, Default)]
pub struct ServableStateTable {
    generation: u64,
    entries: BTreeMap<ServableId, TableEntry>,
}

impl ServableStateTable {
    /// Builder used by the scheduler while holding the registry lock.
    pub(crate) fn builder(generation: u64) -> TableBuilder {
        TableBuilder {
            table: Self {
                generation,
                entries: BTreeMap::new(),
            },
        }
    }

    /// Publication counter. Strictly increasing across snapshots.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Loader state of `id`, if published.
    #[must_use]
    pub fn state_of(&self, id: &ServableId) -> Option<LoaderState> {
        self.entries.get(id).map(|e| e.state)
    }

    /// Loaded versions of `name`, ascending.
    #[must_use]
    pub fn available_versions(&self, name: &str) -> Vec<u64> {
        self.versions_of(name)
            .filter(|(_, e)| e.loaded.is_some())
            .map(|(id, _)| id.version)
            .collect()
    }

    /// All rows in id order.
    #[must_use]
    pub fn rows(&self) -> Vec<TableRow> {
        self.entries
            .iter()
            .map(|(id, e)| TableRow {
                id: id.clone(),
                state: e.state,
                manager_state: e.manager_state,
                available: e.loaded.is_some(),
            })
            .collect()
    }

    pub(crate) fn lookup(&self, name: &str, selector: VersionSelector) -> Option<&Arc<LoadedServable>> {
        let mut loaded = self
            .versions_of(name)
            .filter_map(|(_, e)| e.loaded.as_ref());
        match selector {
            VersionSelector::Latest => loaded.last(),
            VersionSelector::Earliest => loaded.next(),
            VersionSelector::Specific(version) => self
                .entries
                .get(&ServableId::new(name, version))
                .and_then(|e| e.loaded.as_ref()),
        }
    }

    fn versions_of(&self, name: &str) -> impl Iterator<Item = (&ServableId, &TableEntry)> + '_ {
        let start = ServableId::new(name, 0);
        let name = name.to_owned();
        self.entries
            .range(start..)
            .take_while(move |(id, _)| id.name == name)
    }
}

pub(crate) struct TableBuilder {
    table: ServableStateTable,
}

impl TableBuilder {
    pub(crate) fn row(
        &mut self,
        id: &ServableId,
        state: LoaderState,
        manager_state: ManagerState,
        loaded: Option<Arc<LoadedServable>>,
    ) {
        self.table.entries.insert(
            id.clone(),
            TableEntry {
                state,
                manager_state,
                loaded,
            },
        );
    }

    pub(crate) fn build(self) -> ServableStateTable {
        self.table
    }
}

/// Shared, atomically replaced [`ServableStateTable`].
///
/// Cheap to share with request-serving front ends.
#[derive(Debug)]
pub struct ServableTable {
    current: ArcSwap<ServableStateTable>,
    generation: AtomicU64,
}

impl Default for ServableTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ServableTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(ServableStateTable::default()),
            generation: AtomicU64::new(0),
        }
    }

    /// The current snapshot.
    ///
    /// Holding the snapshot keeps every servable it lists loaded, so drop it
    /// once done.
    #[must_use]
    pub fn snapshot(&self) -> Arc<ServableStateTable> {
        self.current.load_full()
    }

    /// Resolve `name` and `selector` to a handle.
    ///
    /// # Errors
    ///
    /// Returns [`ServingError::NotFound`] when no matching version is loaded.
    pub fn get_servable(&self, name: &str, selector: VersionSelector) -> ServingResult<ServableHandle> {
        let table = self.current.load();
        table
            .lookup(name, selector)
            .map(|loaded| ServableHandle::new(Arc::clone(loaded)))
            .ok_or_else(|| ServingError::NotFound {
                name: name.to_string(),
                selector: selector.to_string(),
            })
    }

    pub(crate) fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst).saturating_add(1)
    }

    pub(crate) fn publish(&self, table: ServableStateTable) {
        self.current.store(Arc::new(table));
    }
}
