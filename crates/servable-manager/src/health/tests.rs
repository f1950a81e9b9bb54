//! Unit Tests for Health Check Module

use std::time::Duration;

use super::*;
use crate::scheduler::TransitionScheduler;
use servable_core::resources::{device_types, resource_kinds};
use servable_core::{
    CapacityEntry, Loader, ResourceAllocation, ServableId, ServingConfig, ServingError,
    SimpleLoader,
};

fn test_config() -> ServingConfig {
    ServingConfig {
        capacity: vec![CapacityEntry::new(
            device_types::MAIN,
            1,
            resource_kinds::RAM_BYTES,
            100,
        )],
        starvation_threshold: 2,
        ..ServingConfig::default()
    }
}

fn ok_loader(ram: u64) -> Box<dyn Loader> {
    Box::new(SimpleLoader::new(
        || Ok("weights".to_string()),
        move || {
            Ok(ResourceAllocation::new().with_unbound(
                device_types::MAIN,
                resource_kinds::RAM_BYTES,
                ram,
            ))
        },
    ))
}

fn failing_loader(id: ServableId) -> Box<dyn Loader> {
    Box::new(SimpleLoader::new(
        move || Err::<String, _>(ServingError::load_failed(&id, "corrupt weights")),
        SimpleLoader::<String>::estimate_no_resources(),
    ))
}

async fn settle(scheduler: &TransitionScheduler) {
    tokio::time::timeout(Duration::from_secs(5), scheduler.settle())
        .await
        .expect("settled within 5s")
        .unwrap();
}

#[test]
fn test_health_status_enum_variants() {
    let healthy = ServingHealthStatus::Healthy;
    assert!(healthy.is_healthy());
    assert!(!healthy.is_loading());
    assert!(!healthy.is_degraded());
    assert!(!healthy.is_not_initialized());
    assert_eq!(healthy.as_str(), "healthy");

    let loading = ServingHealthStatus::Loading;
    assert!(!loading.is_healthy());
    assert!(loading.is_loading());
    assert_eq!(loading.as_str(), "loading");

    let degraded = ServingHealthStatus::Degraded;
    assert!(!degraded.is_healthy());
    assert!(degraded.is_degraded());
    assert_eq!(degraded.to_string(), "degraded");

    let not_init = ServingHealthStatus::NotInitialized;
    assert!(not_init.is_not_initialized());
    assert_eq!(not_init.as_str(), "not_initialized");
}

#[test]
fn test_health_status_serde_snake_case() {
    let json = serde_json::to_string(&ServingHealthStatus::NotInitialized).unwrap();
    assert_eq!(json, "\"not_initialized\"");
}

#[test]
fn test_health_check_default_and_percentage() {
    let mut check = ServingHealthCheck::default();
    assert_eq!(check.status, ServingHealthStatus::NotInitialized);
    assert_eq!(check.loaded_percentage(), 0.0);

    check.aspired = 4;
    check.aspired_loaded = 3;
    assert!((check.loaded_percentage() - 75.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_health_check_initial_not_initialized() {
    let scheduler = TransitionScheduler::new(test_config()).unwrap();
    let checker = ServingHealthChecker::from_scheduler(&scheduler);

    let health = checker.check();
    assert_eq!(health.status, ServingHealthStatus::NotInitialized);
    assert_eq!(health.servables_total, 0);
    assert!(health.error_messages.is_empty());
    assert!(health.uptime.is_some());
    assert!(!checker.is_healthy());
}

#[tokio::test]
async fn test_health_check_loading_then_healthy() {
    let scheduler = TransitionScheduler::new(test_config()).unwrap();
    let checker = ServingHealthChecker::from_scheduler(&scheduler);

    scheduler
        .set_aspired_versions("m", vec![(ServableId::new("m", 1), ok_loader(40))])
        .unwrap();
    let health = checker.check();
    assert_eq!(health.status, ServingHealthStatus::Loading);
    assert_eq!(health.loading, 1);

    settle(&scheduler).await;
    let health = checker.check();
    assert_eq!(health.status, ServingHealthStatus::Healthy);
    assert_eq!(health.aspired, 1);
    assert_eq!(health.aspired_loaded, 1);
    assert!((health.loaded_percentage() - 100.0).abs() < f64::EPSILON);
    assert!(health.peak_utilization > 0.0);
    assert!(checker.clone().is_healthy());
}

#[tokio::test]
async fn test_health_check_degraded_on_failed_load() {
    let scheduler = TransitionScheduler::new(test_config()).unwrap();
    let checker = ServingHealthChecker::from_scheduler(&scheduler);

    let bad = ServableId::new("bad", 1);
    scheduler
        .set_aspired_versions("bad", vec![(bad.clone(), failing_loader(bad.clone()))])
        .unwrap();
    scheduler
        .set_aspired_versions("good", vec![(ServableId::new("good", 1), ok_loader(10))])
        .unwrap();
    settle(&scheduler).await;

    let health = checker.check();
    assert_eq!(health.status, ServingHealthStatus::Degraded);
    assert_eq!(health.failed, 1);
    assert_eq!(health.aspired_loaded, 1);
    assert_eq!(health.error_messages.len(), 1);
    assert!(health.error_messages[0].starts_with("bad:1: "));
    assert!(health.error_messages[0].contains("corrupt weights"));
}

#[tokio::test]
async fn test_health_check_reports_starved_entry() {
    let scheduler = TransitionScheduler::new(test_config()).unwrap();
    let checker = ServingHealthChecker::from_scheduler(&scheduler);

    scheduler
        .set_aspired_versions("a", vec![(ServableId::new("a", 1), ok_loader(80))])
        .unwrap();
    settle(&scheduler).await;

    // Two denied rounds reach the threshold.
    scheduler
        .set_aspired_versions("b", vec![(ServableId::new("b", 1), ok_loader(80))])
        .unwrap();
    scheduler.reconcile().unwrap();

    let health = checker.check();
    assert_eq!(health.status, ServingHealthStatus::Loading);
    assert_eq!(health.pending, 1);
    assert_eq!(health.error_messages.len(), 1);
    assert!(health.error_messages[0].contains("Resource exhausted for b:1"));
}
