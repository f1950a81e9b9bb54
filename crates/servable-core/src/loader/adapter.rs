//! Turns per-version source data into [`SimpleLoader`]s.

use std::sync::Arc;

use super::contract::Loader;
use super::simple::SimpleLoader;
use crate::error::ServingResult;
use crate::resources::ResourceAllocation;
use crate::types::ServableId;

type DataCreator<D, T> = Arc<dyn Fn(&D) -> ServingResult<T> + Send + Sync>;
type DataEstimator<D> = Arc<dyn Fn(&D) -> ServingResult<ResourceAllocation> + Send + Sync>;

/// Builds one [`SimpleLoader`] per data item emitted by a version source.
///
/// `D` is whatever the source knows about a version (a path, a config
/// blob). The creator and estimator are shared by every Loader built.
pub struct SimpleLoaderSourceAdapter<D, T> {
    creator: DataCreator<D, T>,
    estimator: DataEstimator<D>,
}

impl<D, T> Clone for SimpleLoaderSourceAdapter<D, T> {
    fn clone(&self) -> Self {
        Self {
            creator: Arc::clone(&self.creator),
            estimator: Arc::clone(&self.estimator),
        }
    }
}

impl<D, T> SimpleLoaderSourceAdapter<D, T>
where
    D: Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    pub fn new<C, E>(creator: C, estimator: E) -> Self
    where
        C: Fn(&D) -> ServingResult<T> + Send + Sync + 'static,
        E: Fn(&D) -> ServingResult<ResourceAllocation> + Send + Sync + 'static,
    {
        Self {
            creator: Arc::new(creator),
            estimator: Arc::new(estimator),
        }
    }

    /// Adapter whose Loaders report no resource usage.
    pub fn without_estimates<C>(creator: C) -> Self
    where
        C: Fn(&D) -> ServingResult<T> + Send + Sync + 'static,
    {
        Self::new(creator, |_| Ok(ResourceAllocation::new()))
    }

    /// Build a Loader for one data item.
    pub fn adapt(&self, data: D) -> Box<dyn Loader> {
        let data = Arc::new(data);
        let creator = Arc::clone(&self.creator);
        let estimator = Arc::clone(&self.estimator);
        let create_from = Arc::clone(&data);
        Box::new(SimpleLoader::new(
            move || creator(create_from.as_ref()),
            move || estimator(data.as_ref()),
        ))
    }

    /// Build Loaders for a batch of versions of `name`.
    pub fn adapt_versions<I>(&self, name: &str, versions: I) -> Vec<(ServableId, Box<dyn Loader>)>
    where
        I: IntoIterator<Item = (u64, D)>,
    {
        versions
            .into_iter()
            .map(|(version, data)| (ServableId::new(name, version), self.adapt(data)))
            .collect()
    }
}
