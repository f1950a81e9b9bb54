//! Closure-based Loader for servables with a static resource footprint.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::contract::{AnyServable, Loader};
use crate::error::{ServingError, ServingResult};
use crate::resources::ResourceAllocation;
use crate::types::LoadMetadata;

/// Builds the servable without knowing its id.
pub type Creator<T> = Box<dyn Fn() -> ServingResult<T> + Send + Sync>;

/// Builds the servable, tagged with the id being loaded.
pub type CreatorWithMetadata<T> = Box<dyn Fn(&LoadMetadata) -> ServingResult<T> + Send + Sync>;

/// Produces a resource estimate.
pub type ResourceEstimator = Box<dyn Fn() -> ServingResult<ResourceAllocation> + Send + Sync>;

enum CreatorVariant<T> {
    Plain(Creator<T>),
    WithMetadata(CreatorWithMetadata<T>),
}

/// A Loader for simple cases:
/// - the estimated footprint is static (optionally replaced once after load),
/// - the servable is built by a synchronous closure,
/// - unloading means dropping the servable.
///
/// The first estimate is memoized. If a post-load estimator is supplied, its
/// result replaces the memoized value after a successful load; it must not
/// exceed the pre-load estimate.
///
/// Creators run inline on the scheduler's load worker. Servables that need
/// long asynchronous I/O should implement [`Loader`] directly.
///
/// # Example
///
/// ```
/// use servable_core::loader::SimpleLoader;
/// use servable_core::resources::{device_types, resource_kinds, ResourceAllocation};
///
/// let loader = SimpleLoader::new(
///     || Ok(vec![1.0_f32, 2.0, 3.0]),
///     || Ok(ResourceAllocation::new()
///         .with_unbound(device_types::MAIN, resource_kinds::RAM_BYTES, 12)),
/// );
/// ```
pub struct SimpleLoader<T> {
    creator: CreatorVariant<T>,
    resource_estimator: ResourceEstimator,
    post_load_resource_estimator: Option<ResourceEstimator>,
    memoized_estimate: Mutex<Option<ResourceAllocation>>,
    servable: Option<Arc<T>>,
}

impl<T: Send + Sync + 'static> SimpleLoader<T> {
    /// Loader whose creator ignores metadata.
    pub fn new<C, E>(creator: C, resource_estimator: E) -> Self
    where
        C: Fn() -> ServingResult<T> + Send + Sync + 'static,
        E: Fn() -> ServingResult<ResourceAllocation> + Send + Sync + 'static,
    {
        Self::from_parts(
            CreatorVariant::Plain(Box::new(creator)),
            Box::new(resource_estimator),
        )
    }

    /// Loader whose creator receives the [`LoadMetadata`].
    ///
    /// Calling [`Loader::load`] on it fails; the scheduler always calls
    /// [`Loader::load_with_metadata`].
    pub fn with_metadata<C, E>(creator: C, resource_estimator: E) -> Self
    where
        C: Fn(&LoadMetadata) -> ServingResult<T> + Send + Sync + 'static,
        E: Fn() -> ServingResult<ResourceAllocation> + Send + Sync + 'static,
    {
        Self::from_parts(
            CreatorVariant::WithMetadata(Box::new(creator)),
            Box::new(resource_estimator),
        )
    }

    /// Add an estimator consulted once after a successful load.
    #[must_use]
    pub fn with_post_load_estimator<E>(mut self, estimator: E) -> Self
    where
        E: Fn() -> ServingResult<ResourceAllocation> + Send + Sync + 'static,
    {
        self.post_load_resource_estimator = Some(Box::new(estimator));
        self
    }

    /// An estimator that reports zero usage.
    ///
    /// Loaders built with it opt out of admission control entirely.
    #[must_use]
    pub fn estimate_no_resources() -> ResourceEstimator {
        Box::new(|| Ok(ResourceAllocation::new()))
    }

    fn from_parts(creator: CreatorVariant<T>, resource_estimator: ResourceEstimator) -> Self {
        Self {
            creator,
            resource_estimator,
            post_load_resource_estimator: None,
            memoized_estimate: Mutex::new(None),
            servable: None,
        }
    }

    fn estimate_post_load(&self) -> ServingResult<()> {
        if let Some(estimator) = &self.post_load_resource_estimator {
            // Make sure the pre-load value is memoized before replacing it.
            let during_load = self.estimate_resources()?;
            let post_load = estimator()?;
            debug!(during_load = %during_load, post_load = %post_load, "Post-load estimate");
            *self.memoized_estimate.lock() = Some(post_load);
        }
        Ok(())
    }

    fn finish_load(&mut self, created: ServingResult<T>) -> ServingResult<()> {
        self.servable = Some(Arc::new(created?));
        if let Err(e) = self.estimate_post_load() {
            self.servable = None;
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> Loader for SimpleLoader<T> {
    fn estimate_resources(&self) -> ServingResult<ResourceAllocation> {
        let mut memoized = self.memoized_estimate.lock();
        if let Some(estimate) = memoized.as_ref() {
            return Ok(estimate.clone());
        }
        let estimate = (self.resource_estimator)()?;
        *memoized = Some(estimate.clone());
        Ok(estimate)
    }

    async fn load(&mut self) -> ServingResult<()> {
        let created = match &self.creator {
            CreatorVariant::Plain(creator) => creator(),
            CreatorVariant::WithMetadata(_) => {
                return Err(ServingError::FailedPrecondition {
                    reason: "SimpleLoader::load() called on a loader built with a metadata \
                             creator; use load_with_metadata() instead"
                        .to_string(),
                })
            }
        };
        self.finish_load(created)
    }

    async fn load_with_metadata(&mut self, metadata: &LoadMetadata) -> ServingResult<()> {
        let created = match &self.creator {
            CreatorVariant::Plain(creator) => creator(),
            CreatorVariant::WithMetadata(creator) => creator(metadata),
        };
        self.finish_load(created)
    }

    async fn unload(&mut self) -> ServingResult<()> {
        // Estimate before dropping in case the estimator reads the servable.
        let estimate = self.estimate_resources();
        self.servable = None;
        if let Ok(estimate) = estimate {
            debug!(released = %estimate, "SimpleLoader dropped servable");
        }
        Ok(())
    }

    fn servable(&self) -> Option<AnyServable> {
        self.servable.as_ref().map(|s| AnyServable::from_arc(s.clone()))
    }
}
