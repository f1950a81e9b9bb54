//! The Loader trait and the types it exchanges with the scheduler.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ServingError, ServingResult};
use crate::resources::ResourceAllocation;
use crate::types::LoadMetadata;

/// Lifecycle controller for one servable version.
///
/// A Loader starts unloaded and cheap: typically it only knows where its
/// data lives. Expensive work happens in [`load_with_metadata`](Self::load_with_metadata).
/// The lifecycle is one-shot; after [`unload`](Self::unload) a fresh
/// instance is required to load again.
///
/// # Caller Contract
///
/// The scheduler guarantees that `load`/`load_with_metadata` and `unload`
/// are never called concurrently on the same instance. Implementations do
/// not need internal re-entrancy protection across those calls.
///
/// # Resource Estimates
///
/// [`estimate_resources`](Self::estimate_resources) must:
/// 1. be an upper bound on actual usage,
/// 2. name concrete device instances once loaded,
/// 3. be monotonically non-increasing over the Loader's lifetime,
/// 4. be free of side effects.
///
/// A later estimate that exceeds an earlier one is a contract breach. The
/// scheduler logs it and keeps charging the earlier, smaller number.
#[async_trait]
pub trait Loader: Send + Sync {
    /// Estimate the resources the servable uses (or will use once loaded).
    fn estimate_resources(&self) -> ServingResult<ResourceAllocation>;

    /// Fetch and initialize all servable state.
    ///
    /// May use no more resources than [`estimate_resources`](Self::estimate_resources)
    /// reported. Implementors that need the servable id override
    /// [`load_with_metadata`](Self::load_with_metadata) instead.
    async fn load(&mut self) -> ServingResult<()> {
        Err(ServingError::unimplemented("Load isn't implemented"))
    }

    /// Like [`load`](Self::load), with the id being loaded.
    ///
    /// On error the Loader must retain no resources; the scheduler assumes a
    /// zero footprint after a failed load and never retries this instance.
    async fn load_with_metadata(&mut self, metadata: &LoadMetadata) -> ServingResult<()> {
        let _ = metadata;
        self.load().await
    }

    /// Release resources acquired by the load.
    ///
    /// Resources shared with sibling servables that are still needed may be
    /// kept. An error leaves the reservation in place and the scheduler
    /// retries later.
    async fn unload(&mut self) -> ServingResult<()>;

    /// The loaded servable.
    ///
    /// `Some` strictly between a successful load and unload, `None` otherwise.
    fn servable(&self) -> Option<AnyServable>;
}

/// Type-erased servable object.
///
/// The concrete type is known only to matching front-end code, which asks
/// for it with [`get`](Self::get). A wrong type yields `None`, never a
/// reinterpretation.
#[derive(Clone)]
pub struct AnyServable {
    type_name: &'static str,
    inner: Arc<dyn Any + Send + Sync>,
}

impl AnyServable {
    /// Wrap an owned servable.
    #[must_use]
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    /// Wrap a shared servable.
    #[must_use]
    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            inner: value,
        }
    }

    /// Borrow the servable as `T`, if that is its concrete type.
    #[must_use]
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// Whether the servable's concrete type is `T`.
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.inner.is::<T>()
    }

    /// Name of the concrete type.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for AnyServable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyServable")
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// Lifecycle state of one Loader instance.
///
/// ```text
/// New --> Loading --> Loaded --> Unloading --> Disposed
///  | |       |                      ^   |
///  | |       v                      +---+ (failed unload, retried)
///  | +--> LoadFailed (estimate or load error)
///  +---------------------------------------> Disposed (never loaded)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoaderState {
    /// Created, not yet loaded.
    New,
    /// Load in progress.
    Loading,
    /// Loaded and servable.
    Loaded,
    /// Unload in progress, or awaiting an unload retry.
    Unloading,
    /// Unloaded or discarded. Terminal.
    Disposed,
    /// Load failed. Terminal for this instance.
    LoadFailed,
}

impl LoaderState {
    /// Whether `self -> next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: LoaderState) -> bool {
        use LoaderState::*;
        matches!(
            (self, next),
            (New, Loading)
                | (New, Disposed)
                | (New, LoadFailed)
                | (Loading, Loaded)
                | (Loading, LoadFailed)
                | (Loaded, Unloading)
                | (Unloading, Unloading)
                | (Unloading, Disposed)
                | (LoadFailed, Disposed)
        )
    }

    /// Whether no further Load or Unload will happen on this instance.
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disposed | Self::LoadFailed)
    }

    /// Whether the Loader currently holds (or may hold) resources.
    #[inline]
    #[must_use]
    pub fn holds_resources(self) -> bool {
        matches!(self, Self::Loading | Self::Loaded | Self::Unloading)
    }

    /// Human-readable name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Unloading => "unloading",
            Self::Disposed => "disposed",
            Self::LoadFailed => "load_failed",
        }
    }
}

impl fmt::Display for LoaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
