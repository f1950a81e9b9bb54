//! Loader wrapper that opts out of resource-based admission.

use async_trait::async_trait;

use super::contract::{AnyServable, Loader};
use crate::error::ServingResult;
use crate::resources::ResourceAllocation;
use crate::types::LoadMetadata;

/// Wraps a Loader and always reports an empty estimate.
///
/// Use only for servables whose footprint is negligible or accounted
/// elsewhere. The wrapped Loader's own estimate is never consulted.
pub struct ResourceUnsafeLoader<L> {
    inner: L,
}

impl<L: Loader> ResourceUnsafeLoader<L> {
    /// Wrap `inner`.
    pub fn new(inner: L) -> Self {
        Self { inner }
    }

    /// The wrapped Loader.
    pub fn inner(&self) -> &L {
        &self.inner
    }

    /// Unwrap.
    pub fn into_inner(self) -> L {
        self.inner
    }
}

#[async_trait]
impl<L: Loader> Loader for ResourceUnsafeLoader<L> {
    fn estimate_resources(&self) -> ServingResult<ResourceAllocation> {
        Ok(ResourceAllocation::new())
    }

    async fn load(&mut self) -> ServingResult<()> {
        self.inner.load().await
    }

    async fn load_with_metadata(&mut self, metadata: &LoadMetadata) -> ServingResult<()> {
        self.inner.load_with_metadata(metadata).await
    }

    async fn unload(&mut self) -> ServingResult<()> {
        self.inner.unload().await
    }

    fn servable(&self) -> Option<AnyServable> {
        self.inner.servable()
    }
}
