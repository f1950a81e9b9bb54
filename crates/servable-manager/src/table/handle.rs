//! Loaded servables and the leases readers hold on them.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::debug;

use servable_core::{AnyServable, ServableId};

/// A loaded servable as published in the table.
///
/// Every strong reference is a lease: the record, each published table
/// snapshot that lists it, and each [`ServableHandle`]. The unload path
/// waits until it holds the only reference before calling `Unload`.
pub(crate) struct LoadedServable {
    id: ServableId,
    servable: AnyServable,
    released: Arc<Notify>,
}

impl LoadedServable {
    pub(crate) fn new(id: ServableId, servable: AnyServable) -> Self {
        Self {
            id,
            servable,
            released: Arc::new(Notify::new()),
        }
    }

    pub(crate) fn id(&self) -> &ServableId {
        &self.id
    }

    pub(crate) fn type_name(&self) -> &'static str {
        self.servable.type_name()
    }
}

impl fmt::Debug for LoadedServable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedServable")
            .field("id", &self.id)
            .field("type_name", &self.servable.type_name())
            .finish()
    }
}

/// Wait until `loaded` is the last reference to its servable.
///
/// Woken by handle drops; table snapshots released by readers are picked
/// up by polling every `poll`.
pub(crate) async fn wait_for_leases(loaded: &Arc<LoadedServable>, poll: Duration) {
    let mut rounds: u64 = 0;
    loop {
        let notified = loaded.released.notified();
        let outstanding = Arc::strong_count(loaded).saturating_sub(1);
        if outstanding == 0 {
            return;
        }
        if rounds == 0 {
            debug!(servable = %loaded.id, outstanding, "Waiting for handles to drain before unload");
        }
        rounds = rounds.saturating_add(1);
        let _ = tokio::time::timeout(poll, notified).await;
    }
}

/// Reader lease on a loaded servable.
///
/// While any handle for an id is alive, that id is not unloaded. Drop the
/// handle promptly once the request is served.
pub struct ServableHandle {
    id: ServableId,
    servable: Option<Arc<LoadedServable>>,
    released: Arc<Notify>,
}

impl ServableHandle {
    pub(crate) fn new(servable: Arc<LoadedServable>) -> Self {
        let released = Arc::clone(&servable.released);
        Self {
            id: servable.id().clone(),
            servable: Some(servable),
            released,
        }
    }

    /// The id this handle refers to.
    #[must_use]
    pub fn id(&self) -> &ServableId {
        &self.id
    }

    /// Borrow the servable as `T`, or `None` if it is another type.
    #[must_use]
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.servable.as_ref().and_then(|s| s.servable.get::<T>())
    }

    /// Name of the servable's concrete type.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.servable.as_ref().map_or("", |s| s.type_name())
    }
}

impl Clone for ServableHandle {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            servable: self.servable.clone(),
            released: Arc::clone(&self.released),
        }
    }
}

impl Drop for ServableHandle {
    fn drop(&mut self) {
        // Give up the reference before waking the unloader so it sees the
        // decremented count.
        drop(self.servable.take());
        self.released.notify_one();
    }
}

impl fmt::Debug for ServableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServableHandle")
            .field("id", &self.id)
            .field("type_name", &self.type_name())
            .finish()
    }
}
