//! Tests for the Loader contract and stock loaders.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use super::*;
use crate::error::{ServingError, ServingResult};
use crate::resources::{device_types, resource_kinds, ResourceAllocation};
use crate::types::{LoadMetadata, ServableId};

fn ram(quantity: u64) -> ResourceAllocation {
    ResourceAllocation::new().with_unbound(device_types::MAIN, resource_kinds::RAM_BYTES, quantity)
}

fn metadata(name: &str, version: u64) -> LoadMetadata {
    LoadMetadata::new(ServableId::new(name, version))
}

/// Loader that only implements the required methods.
struct BareLoader;

#[async_trait]
impl Loader for BareLoader {
    fn estimate_resources(&self) -> ServingResult<ResourceAllocation> {
        Ok(ResourceAllocation::new())
    }

    async fn unload(&mut self) -> ServingResult<()> {
        Ok(())
    }

    fn servable(&self) -> Option<AnyServable> {
        None
    }
}

// =========================================================================
// Contract defaults
// =========================================================================

#[tokio::test]
async fn test_default_load_is_unimplemented() {
    let mut loader = BareLoader;
    let err = loader.load().await.unwrap_err();
    assert!(matches!(err, ServingError::Unimplemented { .. }));

    let err = loader
        .load_with_metadata(&metadata("m", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, ServingError::Unimplemented { .. }));
}

#[test]
fn test_any_servable_type_check() {
    let servable = AnyServable::new(String::from("lookup-table"));
    assert!(servable.is::<String>());
    assert_eq!(servable.get::<String>().map(String::as_str), Some("lookup-table"));
    assert!(servable.get::<u64>().is_none());
    assert!(servable.type_name().contains("String"));
}

#[test]
fn test_loader_state_transitions() {
    use LoaderState::*;

    assert!(New.can_transition_to(Loading));
    assert!(Loading.can_transition_to(Loaded));
    assert!(Loading.can_transition_to(LoadFailed));
    assert!(Loaded.can_transition_to(Unloading));
    assert!(Unloading.can_transition_to(Unloading));
    assert!(Unloading.can_transition_to(Disposed));

    assert!(!New.can_transition_to(Loaded));
    assert!(!Loaded.can_transition_to(Loading));
    assert!(!LoadFailed.can_transition_to(Loading));
    assert!(!Disposed.can_transition_to(Loading));
    assert!(!Loading.can_transition_to(Unloading));

    assert!(LoadFailed.is_terminal());
    assert!(Disposed.is_terminal());
    assert!(!Loaded.is_terminal());
    assert!(Loading.holds_resources());
    assert!(!New.holds_resources());
    assert_eq!(LoadFailed.to_string(), "load_failed");
}

// =========================================================================
// SimpleLoader
// =========================================================================

#[tokio::test]
async fn test_simple_loader_lifecycle() {
    let mut loader = SimpleLoader::new(|| Ok(vec![1_u32, 2, 3]), || Ok(ram(60)));
    assert!(loader.servable().is_none());

    loader.load().await.unwrap();
    let servable = loader.servable().expect("servable after load");
    assert_eq!(servable.get::<Vec<u32>>(), Some(&vec![1, 2, 3]));

    loader.unload().await.unwrap();
    assert!(loader.servable().is_none());
}

#[test]
fn test_simple_loader_memoizes_estimate() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let loader = SimpleLoader::new(
        || Ok(()),
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(ram(50))
        },
    );

    assert_eq!(loader.estimate_resources().unwrap(), ram(50));
    assert_eq!(loader.estimate_resources().unwrap(), ram(50));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_simple_loader_post_load_estimate() {
    let mut loader = SimpleLoader::new(|| Ok(()), || Ok(ram(50)))
        .with_post_load_estimator(|| {
            Ok(ResourceAllocation::new().with_bound(
                device_types::MAIN,
                0,
                resource_kinds::RAM_BYTES,
                40,
            ))
        });

    assert_eq!(loader.estimate_resources().unwrap(), ram(50));
    loader.load_with_metadata(&metadata("m", 1)).await.unwrap();

    let after = loader.estimate_resources().unwrap();
    assert!(after.is_bound());
    assert!(after.is_bounded_by(&ram(50)));
    assert_eq!(after.iter().map(|(_, q)| q).sum::<u64>(), 40);
}

#[tokio::test]
async fn test_simple_loader_metadata_creator() {
    let mut loader = SimpleLoader::with_metadata(
        |meta: &LoadMetadata| Ok(meta.servable_id.to_string()),
        || Ok(ram(1)),
    );

    let err = loader.load().await.unwrap_err();
    assert!(matches!(err, ServingError::FailedPrecondition { .. }));
    assert!(loader.servable().is_none());

    loader.load_with_metadata(&metadata("mnist", 7)).await.unwrap();
    let servable = loader.servable().unwrap();
    assert_eq!(servable.get::<String>().map(String::as_str), Some("mnist:7"));
}

#[tokio::test]
async fn test_simple_loader_creator_failure_leaves_nothing() {
    let id = ServableId::new("m", 2);
    let failing_id = id.clone();
    let mut loader: SimpleLoader<()> = SimpleLoader::new(
        move || Err(ServingError::load_failed(&failing_id, "corrupt weights")),
        || Ok(ram(10)),
    );

    let err = loader.load_with_metadata(&LoadMetadata::new(id)).await.unwrap_err();
    assert!(matches!(err, ServingError::LoadFailed { .. }));
    assert!(loader.servable().is_none());
}

#[tokio::test]
async fn test_simple_loader_post_load_estimator_failure_fails_load() {
    let mut loader = SimpleLoader::new(|| Ok(5_u8), || Ok(ram(10))).with_post_load_estimator(|| {
        Err(ServingError::InvalidResource {
            reason: "probe failed".into(),
        })
    });

    assert!(loader.load().await.is_err());
    assert!(loader.servable().is_none());
}

#[test]
fn test_estimate_no_resources() {
    let loader = SimpleLoader::new(|| Ok(()), SimpleLoader::<()>::estimate_no_resources());
    assert!(loader.estimate_resources().unwrap().is_empty());
}

// =========================================================================
// ResourceUnsafeLoader
// =========================================================================

#[tokio::test]
async fn test_resource_unsafe_loader_reports_empty() {
    let inner = SimpleLoader::new(|| Ok(42_i64), || Ok(ram(1_000_000)));
    let mut loader = ResourceUnsafeLoader::new(inner);

    assert!(loader.estimate_resources().unwrap().is_empty());
    assert_eq!(loader.inner().estimate_resources().unwrap(), ram(1_000_000));

    loader.load_with_metadata(&metadata("sandbox", 1)).await.unwrap();
    assert_eq!(loader.servable().unwrap().get::<i64>(), Some(&42));
    loader.unload().await.unwrap();
    assert!(loader.servable().is_none());
}

// =========================================================================
// SimpleLoaderSourceAdapter
// =========================================================================

#[tokio::test]
async fn test_source_adapter_builds_loaders() {
    let adapter = SimpleLoaderSourceAdapter::new(
        |path: &String| Ok(format!("table@{}", path)),
        |path: &String| Ok(ram(path.len() as u64)),
    );

    let mut loaders = adapter.adapt_versions(
        "lookup",
        vec![(1, "/data/1".to_string()), (2, "/data/22".to_string())],
    );
    assert_eq!(loaders.len(), 2);
    assert_eq!(loaders[0].0, ServableId::new("lookup", 1));
    assert_eq!(loaders[1].1.estimate_resources().unwrap(), ram(8));

    let (id, loader) = &mut loaders[1];
    loader
        .load_with_metadata(&LoadMetadata::new(id.clone()))
        .await
        .unwrap();
    let servable = loader.servable().unwrap();
    assert_eq!(servable.get::<String>().map(String::as_str), Some("table@/data/22"));
}

#[test]
fn test_source_adapter_without_estimates() {
    let adapter = SimpleLoaderSourceAdapter::without_estimates(|n: &u32| Ok(*n * 2));
    let loader = adapter.clone().adapt(21);
    assert!(loader.estimate_resources().unwrap().is_empty());
}
