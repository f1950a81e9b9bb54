//! Aspired-version update tests for the servable registry.

use servable_core::{LoaderState, ServingError};

use super::tests::{id, load, noop};
use super::*;
use crate::source::VersionEvent;

#[test]
fn test_aspire_registers_unknown_id() {
    let mut registry = ServableRegistry::new();
    assert!(registry.aspire(id("m", 1), noop()));
    assert_eq!(registry.get_state(&id("m", 1)), Some(LoaderState::New));
}

#[test]
fn test_aspire_drops_loader_for_live_record() {
    let mut registry = ServableRegistry::new();
    registry.aspire(id("m", 1), noop());
    load(&mut registry, &id("m", 1));

    assert!(!registry.aspire(id("m", 1), noop()));
    assert_eq!(registry.get_state(&id("m", 1)), Some(LoaderState::Loaded));
}

#[test]
fn test_fresh_loader_restarts_failed_record() {
    let mut registry = ServableRegistry::new();
    let m1 = id("m", 1);
    registry.aspire(m1.clone(), noop());
    let _loader = registry.start_loading(&m1).unwrap();
    registry.mark_load_failed(&m1, "bad weights").unwrap();

    assert!(registry.aspire(m1.clone(), noop()));
    let record = registry.record(&m1).unwrap();
    assert_eq!(record.state(), LoaderState::New);
    assert!(record.load_error().is_none());
    assert!(record.is_load_candidate());
}

#[test]
fn test_fresh_loader_during_unload_is_installed_after_disposal() {
    let mut registry = ServableRegistry::new();
    let m1 = id("m", 1);
    registry.aspire(m1.clone(), noop());
    load(&mut registry, &m1);
    registry.unaspire(&m1);
    let _unloading = registry.start_unloading(&m1).unwrap();

    // Re-aspired while the old Loader is still unloading.
    assert!(registry.aspire(m1.clone(), noop()));
    assert_eq!(registry.get_state(&m1), Some(LoaderState::Unloading));

    assert!(registry.mark_disposed(&m1).unwrap(), "stashed loader installed");
    let record = registry.record(&m1).unwrap();
    assert_eq!(record.state(), LoaderState::New);
    assert!(record.is_load_candidate());
}

#[test]
fn test_withdrawal_discards_stashed_loader() {
    let mut registry = ServableRegistry::new();
    let m1 = id("m", 1);
    registry.aspire(m1.clone(), noop());
    load(&mut registry, &m1);
    registry.unaspire(&m1);
    let _unloading = registry.start_unloading(&m1).unwrap();
    registry.aspire(m1.clone(), noop());
    registry.unaspire(&m1);

    assert!(!registry.mark_disposed(&m1).unwrap());
    assert_eq!(registry.get_state(&m1), Some(LoaderState::Disposed));
}

#[test]
fn test_unaspire_unknown_is_ignored() {
    let mut registry = ServableRegistry::new();
    assert!(!registry.unaspire(&id("ghost", 3)));
    assert!(registry.is_empty());
}

#[test]
fn test_set_aspired_versions_replaces_set() {
    let mut registry = ServableRegistry::new();
    registry
        .set_aspired_versions("m", vec![(id("m", 1), noop()), (id("m", 2), noop())])
        .unwrap();
    registry.aspire(id("n", 1), noop());
    assert_eq!(registry.aspired_versions("m"), vec![id("m", 1), id("m", 2)]);

    registry
        .set_aspired_versions("m", vec![(id("m", 2), noop()), (id("m", 3), noop())])
        .unwrap();
    assert_eq!(registry.aspired_versions("m"), vec![id("m", 2), id("m", 3)]);
    assert!(!registry.record(&id("m", 1)).unwrap().is_aspired());
    assert!(registry.record(&id("n", 1)).unwrap().is_aspired(), "other names untouched");

    registry.set_aspired_versions("m", Vec::new()).unwrap();
    assert!(registry.aspired_versions("m").is_empty());
}

#[test]
fn test_set_aspired_versions_rejects_foreign_ids() {
    let mut registry = ServableRegistry::new();
    registry.aspire(id("m", 1), noop());

    let err = registry
        .set_aspired_versions("m", vec![(id("m", 2), noop()), (id("other", 1), noop())])
        .unwrap_err();
    assert!(matches!(err, ServingError::FailedPrecondition { .. }));
    assert_eq!(registry.aspired_versions("m"), vec![id("m", 1)], "nothing changed");
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_apply_event() {
    let mut registry = ServableRegistry::new();
    registry.apply_event(VersionEvent::aspire(id("m", 4), noop()));
    assert!(registry.record(&id("m", 4)).unwrap().is_aspired());

    registry.apply_event(VersionEvent::withdraw(id("m", 4)));
    assert!(!registry.record(&id("m", 4)).unwrap().is_aspired());
}

#[test]
fn test_arrival_order_follows_aspiration_order() {
    let mut registry = ServableRegistry::new();
    registry.aspire(id("b", 1), noop());
    registry.aspire(id("a", 1), noop());
    let b = registry.record(&id("b", 1)).unwrap().arrival;
    let a = registry.record(&id("a", 1)).unwrap().arrival;
    assert!(b < a);
}
