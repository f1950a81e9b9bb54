//! Per-version lifecycle contract and stock Loader implementations.
//!
//! # Overview
//!
//! A [`Loader`] owns at most one servable instance for one [`ServableId`]
//! and walks the [`LoaderState`] machine exactly once. The scheduler drives
//! it; the Loader knows nothing about scheduling.
//!
//! | Type | Use |
//! |------|-----|
//! | [`SimpleLoader`] | closure-built servable with a static footprint |
//! | [`ResourceUnsafeLoader`] | opts a Loader out of admission control |
//! | [`SimpleLoaderSourceAdapter`] | one `SimpleLoader` per source data item |
//!
//! [`ServableId`]: crate::types::ServableId

mod adapter;
mod contract;
mod simple;
mod unsafe_loader;

#[cfg(test)]
mod tests;

pub use adapter::SimpleLoaderSourceAdapter;
pub use contract::{AnyServable, Loader, LoaderState};
pub use simple::{Creator, CreatorWithMetadata, ResourceEstimator, SimpleLoader};
pub use unsafe_loader::ResourceUnsafeLoader;
