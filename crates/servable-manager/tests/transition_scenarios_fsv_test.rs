//! Full State Verification (FSV) tests for version transitions.
//!
//! Each test drives a real `TransitionScheduler` through a rollout and
//! checks the published table, the tracker and the event stream:
//! 1. Define expected output before running
//! 2. Execute with synthetic input
//! 3. Verify actual output matches expected

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Semaphore};

use servable_core::resources::{device_types, resource_kinds};
use servable_core::{
    AnyServable, CapacityEntry, LoadMetadata, Loader, LoaderState, ResourceAllocation, ServableId,
    ServingConfig, ServingError, ServingResult,
};
use servable_manager::{ServableStateEvent, TransitionScheduler, VersionSelector};

// =============================================================================
// Helpers
// =============================================================================

fn ram(quantity: u64) -> ResourceAllocation {
    ResourceAllocation::new().with_unbound(device_types::MAIN, resource_kinds::RAM_BYTES, quantity)
}

fn config(capacity: u64) -> ServingConfig {
    ServingConfig {
        capacity: vec![CapacityEntry::new(
            device_types::MAIN,
            1,
            resource_kinds::RAM_BYTES,
            capacity,
        )],
        reconcile_interval_ms: 20,
        unload_retry_interval_ms: 20,
        lease_poll_interval_ms: 5,
        starvation_threshold: 2,
        ..ServingConfig::default()
    }
}

fn id(name: &str, version: u64) -> ServableId {
    ServableId::new(name, version)
}

/// Counters shared by every loader in a test.
#[derive(Default)]
struct Probe {
    loads: AtomicUsize,
    unloads: AtomicUsize,
    overlapping_calls: AtomicUsize,
}

/// Loader with scripted timing and failures that detects overlapping
/// Load/Unload calls on the same instance.
struct ScriptedLoader {
    estimate: u64,
    post_load_estimate: Option<u64>,
    fail_load: bool,
    load_gate: Option<Arc<Semaphore>>,
    load_delay: Duration,
    busy: AtomicBool,
    probe: Arc<Probe>,
    servable: Option<AnyServable>,
}

impl ScriptedLoader {
    fn new(estimate: u64, probe: &Arc<Probe>) -> Self {
        Self {
            estimate,
            post_load_estimate: None,
            fail_load: false,
            load_gate: None,
            load_delay: Duration::ZERO,
            busy: AtomicBool::new(false),
            probe: Arc::clone(probe),
            servable: None,
        }
    }

    fn boxed(self) -> Box<dyn Loader> {
        Box::new(self)
    }

    fn enter(&self) {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.probe.overlapping_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn exit(&self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Loader for ScriptedLoader {
    fn estimate_resources(&self) -> ServingResult<ResourceAllocation> {
        match (self.servable.is_some(), self.post_load_estimate) {
            (true, Some(measured)) => Ok(ram(measured)),
            _ => Ok(ram(self.estimate)),
        }
    }

    async fn load_with_metadata(&mut self, metadata: &LoadMetadata) -> ServingResult<()> {
        self.enter();
        self.probe.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.load_gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }
        let result = if self.fail_load {
            Err(ServingError::load_failed(&metadata.servable_id, "checksum mismatch"))
        } else {
            self.servable = Some(AnyServable::new(metadata.servable_id.to_string()));
            Ok(())
        };
        self.exit();
        result
    }

    async fn unload(&mut self) -> ServingResult<()> {
        self.enter();
        self.probe.unloads.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.servable = None;
        self.exit();
        Ok(())
    }

    fn servable(&self) -> Option<AnyServable> {
        self.servable.clone()
    }
}

async fn next_event(rx: &mut broadcast::Receiver<ServableStateEvent>) -> ServableStateEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event within 5s")
        .expect("event channel open")
}

async fn settle(scheduler: &TransitionScheduler) {
    tokio::time::timeout(Duration::from_secs(5), scheduler.settle())
        .await
        .expect("settled within 5s")
        .expect("scheduler running");
}

fn served_version(scheduler: &TransitionScheduler, name: &str) -> Option<String> {
    scheduler
        .get_servable(name, VersionSelector::Latest)
        .ok()
        .and_then(|h| h.get::<String>().cloned())
}

/// Aspire `version` of "m" alone, replacing any earlier version.
fn roll_to(scheduler: &TransitionScheduler, version: u64, estimate: u64, probe: &Arc<Probe>) {
    scheduler
        .set_aspired_versions(
            "m",
            vec![(id("m", version), ScriptedLoader::new(estimate, probe).boxed())],
        )
        .expect("aspire");
}

// =============================================================================
// FSV Test 1: Swap without room for both versions
// =============================================================================

#[tokio::test]
async fn fsv_scenario_a_swap_unloads_old_version_first() {
    println!("\n=== FSV TEST 1: Swap Without Co-residence ===");
    println!("SYNTHETIC INPUT:");
    println!("  Capacity: ram = 100");
    println!("  m:1 estimates 60 and is loaded; m:2 (60) then replaces it");

    let probe = Arc::new(Probe::default());
    let scheduler = TransitionScheduler::new(config(100)).unwrap();
    let mut events = scheduler.subscribe();

    roll_to(&scheduler, 1, 60, &probe);
    settle(&scheduler).await;
    assert_eq!(served_version(&scheduler, "m").as_deref(), Some("m:1"));

    println!("\nEXPECTED OUTPUT:");
    println!("  m:1 unloaded before m:2 loads");
    println!("  lookup for m returns NotFound during the gap, then m:2");

    roll_to(&scheduler, 2, 60, &probe);
    let gap = scheduler.get_servable("m", VersionSelector::Latest);

    settle(&scheduler).await;

    let mut order = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            ServableStateEvent::Loaded { id } => order.push(format!("loaded {}", id)),
            ServableStateEvent::Unloaded { id } => order.push(format!("unloaded {}", id)),
            _ => {}
        }
    }

    println!("\nACTUAL OUTPUT:");
    println!("  lookup during gap: {:?}", gap.as_ref().map(|h| h.id().clone()));
    println!("  transitions: {:?}", order);
    println!("  served after settle: {:?}", served_version(&scheduler, "m"));

    assert!(matches!(gap, Err(ServingError::NotFound { .. })));
    assert_eq!(order, vec!["loaded m:1", "unloaded m:1", "loaded m:2"]);
    assert_eq!(served_version(&scheduler, "m").as_deref(), Some("m:2"));
    assert_eq!(scheduler.tracker().used(), ram(60).normalize(scheduler.tracker().instance_counts()));

    println!("\n[VERIFIED] Old version released its 60 units before the new one was admitted");
}

// =============================================================================
// FSV Test 2: Zero-downtime swap
// =============================================================================

#[tokio::test]
async fn fsv_scenario_b_zero_downtime_swap() {
    println!("\n=== FSV TEST 2: Zero-downtime Swap ===");
    println!("SYNTHETIC INPUT:");
    println!("  Capacity: ram = 200");
    println!("  m:1 (60) loaded; m:2 (60) replaces it");

    let probe = Arc::new(Probe::default());
    let scheduler = TransitionScheduler::new(config(200)).unwrap();
    roll_to(&scheduler, 1, 60, &probe);
    settle(&scheduler).await;

    println!("\nEXPECTED OUTPUT:");
    println!("  m:2 loaded while m:1 serves; m:1 unloaded only afterwards");
    println!("  lookup for m never returns NotFound");

    let mut events = scheduler.subscribe();
    roll_to(&scheduler, 2, 60, &probe);

    let mut observed = vec![served_version(&scheduler, "m")];
    let mut order = Vec::new();
    loop {
        let event = next_event(&mut events).await;
        observed.push(served_version(&scheduler, "m"));
        match event {
            ServableStateEvent::Loaded { id } => order.push(format!("loaded {}", id)),
            ServableStateEvent::Unloaded { id } => {
                order.push(format!("unloaded {}", id));
                break;
            }
            _ => {}
        }
    }
    settle(&scheduler).await;

    println!("\nACTUAL OUTPUT:");
    println!("  served at each step: {:?}", observed);
    println!("  transitions: {:?}", order);

    assert!(observed.iter().all(Option::is_some), "m must stay serveable");
    assert_eq!(order, vec!["loaded m:2", "unloaded m:1"]);
    assert_eq!(served_version(&scheduler, "m").as_deref(), Some("m:2"));
    assert_eq!(scheduler.tracker().reservation_count(), 1);

    println!("\n[VERIFIED] Both versions were co-resident and m never disappeared");
}

// =============================================================================
// FSV Test 3: Failed load, then a fresh loader
// =============================================================================

#[tokio::test]
async fn fsv_scenario_c_failed_load_then_fresh_loader() {
    println!("\n=== FSV TEST 3: Failed Load Then Retry With Fresh Loader ===");
    println!("SYNTHETIC INPUT:");
    println!("  m:1 loader fails; same id re-aspired with a working loader");

    let probe = Arc::new(Probe::default());
    let scheduler = TransitionScheduler::new(config(100)).unwrap();
    let mut events = scheduler.subscribe();

    let mut broken = ScriptedLoader::new(30, &probe);
    broken.fail_load = true;
    scheduler
        .set_aspired_versions("m", vec![(id("m", 1), broken.boxed())])
        .unwrap();
    settle(&scheduler).await;

    println!("\nEXPECTED OUTPUT:");
    println!("  LoadFailed event; m:1 absent from table; zero reservations");
    println!("  fresh loader for m:1 loads successfully");

    let failed = next_event(&mut events).await;
    let table = scheduler.snapshot();
    let after_failure = (
        table.state_of(&id("m", 1)),
        scheduler.tracker().reservation_count(),
        served_version(&scheduler, "m"),
    );

    roll_to(&scheduler, 1, 30, &probe);
    settle(&scheduler).await;

    println!("\nACTUAL OUTPUT:");
    println!("  first event: {:?}", failed);
    println!("  after failure (table state, reservations, served): {:?}", after_failure);
    println!("  served after retry: {:?}", served_version(&scheduler, "m"));

    assert!(matches!(failed, ServableStateEvent::LoadFailed { ref id, .. } if *id == ServableId::new("m", 1)));
    assert_eq!(after_failure, (None, 0, None));
    assert_eq!(served_version(&scheduler, "m").as_deref(), Some("m:1"));
    assert_eq!(probe.loads.load(Ordering::SeqCst), 2);

    println!("\n[VERIFIED] Failure was terminal for the loader, not for the id");
}

// =============================================================================
// FSV Test 4: Post-load measurement shrinks the reservation
// =============================================================================

#[tokio::test]
async fn fsv_scenario_d_post_load_estimate_frees_headroom() {
    println!("\n=== FSV TEST 4: Post-load Estimate Frees Headroom ===");
    println!("SYNTHETIC INPUT:");
    println!("  Capacity: ram = 100");
    println!("  a:1 estimates 50, reports 40 once loaded; b:1 estimates 60");

    let probe = Arc::new(Probe::default());
    let scheduler = TransitionScheduler::new(config(100)).unwrap();

    let mut measured = ScriptedLoader::new(50, &probe);
    measured.post_load_estimate = Some(40);
    scheduler
        .set_aspired_versions("a", vec![(id("a", 1), measured.boxed())])
        .unwrap();
    settle(&scheduler).await;

    println!("\nEXPECTED OUTPUT:");
    println!("  a:1 reservation 40; b:1 admitted (40 + 60 = 100)");

    scheduler
        .set_aspired_versions("b", vec![(id("b", 1), ScriptedLoader::new(60, &probe).boxed())])
        .unwrap();
    settle(&scheduler).await;

    let counts = scheduler.tracker().instance_counts().clone();
    let reservation_a = scheduler.tracker().reservation(&id("a", 1));

    println!("\nACTUAL OUTPUT:");
    println!("  a:1 reservation: {:?}", reservation_a.as_ref().map(ToString::to_string));
    println!("  served b: {:?}", served_version(&scheduler, "b"));
    println!("  peak utilization: {}", scheduler.occupancy().peak_utilization());

    assert_eq!(reservation_a, Some(ram(40).normalize(&counts)));
    assert_eq!(served_version(&scheduler, "b").as_deref(), Some("b:1"));
    assert_eq!(scheduler.occupancy().peak_utilization(), 1.0);

    println!("\n[VERIFIED] The 10 freed units admitted b:1");
}

// =============================================================================
// FSV Test 5: Starved entry holds the line
// =============================================================================

#[tokio::test]
async fn fsv_starved_entry_is_not_overtaken() {
    println!("\n=== FSV TEST 5: Starved Entry Holds the Line ===");
    println!("SYNTHETIC INPUT:");
    println!("  Capacity: ram = 100, starvation threshold 2");
    println!("  a:1 (50) and b:1 (50) loaded; big:1 (80) aspired and deferred twice");
    println!("  a and b withdrawn; small:1 (30) aspired");

    let probe = Arc::new(Probe::default());
    let scheduler = TransitionScheduler::new(config(100)).unwrap();
    for name in ["a", "b"] {
        scheduler
            .set_aspired_versions(name, vec![(id(name, 1), ScriptedLoader::new(50, &probe).boxed())])
            .unwrap();
    }
    settle(&scheduler).await;

    scheduler
        .set_aspired_versions("big", vec![(id("big", 1), ScriptedLoader::new(80, &probe).boxed())])
        .unwrap();
    scheduler.reconcile().unwrap();

    scheduler.set_aspired_versions("a", Vec::new()).unwrap();
    scheduler.set_aspired_versions("b", Vec::new()).unwrap();
    scheduler
        .set_aspired_versions("small", vec![(id("small", 1), ScriptedLoader::new(30, &probe).boxed())])
        .unwrap();

    println!("\nEXPECTED OUTPUT:");
    println!("  small:1 does not take the 50 units freed by the first unload");
    println!("  big:1 loads once both unloads finish; small:1 stays deferred");

    settle(&scheduler).await;

    let big = scheduler.records().into_iter().find(|r| r.id == id("big", 1));
    let small = scheduler.records().into_iter().find(|r| r.id == id("small", 1));

    println!("\nACTUAL OUTPUT:");
    println!("  big:1: {:?}", big.as_ref().map(|r| r.state));
    println!("  small:1: {:?}", small.as_ref().map(|r| (r.state, r.deferrals)));

    assert_eq!(big.map(|r| r.state), Some(LoaderState::Loaded));
    let small = small.expect("small:1 still managed");
    assert_eq!(small.state, LoaderState::New);
    assert!(small.deferrals >= 2);

    println!("\n[VERIFIED] Head-of-line priority let the starved entry through");
}

// =============================================================================
// FSV Test 6: Unloads are not blocked by pending loads
// =============================================================================

#[tokio::test]
async fn fsv_unload_not_blocked_by_pending_load() {
    println!("\n=== FSV TEST 6: Unload Independent of Pending Load ===");
    println!("SYNTHETIC INPUT:");
    println!("  max_concurrent_loads 1; x:1 load held open by a gate");
    println!("  stale y:1 withdrawn while x:1 is loading");

    let probe = Arc::new(Probe::default());
    let scheduler = TransitionScheduler::new(ServingConfig {
        max_concurrent_loads: 1,
        ..config(100)
    })
    .unwrap();
    scheduler
        .set_aspired_versions("y", vec![(id("y", 1), ScriptedLoader::new(20, &probe).boxed())])
        .unwrap();
    settle(&scheduler).await;

    let gate = Arc::new(Semaphore::new(0));
    let mut gated = ScriptedLoader::new(20, &probe);
    gated.load_gate = Some(Arc::clone(&gate));
    let mut events = scheduler.subscribe();
    scheduler
        .set_aspired_versions("x", vec![(id("x", 1), gated.boxed())])
        .unwrap();
    scheduler.set_aspired_versions("y", Vec::new()).unwrap();

    println!("\nEXPECTED OUTPUT:");
    println!("  y:1 Unloaded while x:1 is still Loading");

    let first = next_event(&mut events).await;
    let x_state = scheduler.snapshot().state_of(&id("x", 1));

    gate.add_permits(1);
    settle(&scheduler).await;

    println!("\nACTUAL OUTPUT:");
    println!("  first event: {:?}", first);
    println!("  x:1 state at that time: {:?}", x_state);

    assert_eq!(first, ServableStateEvent::Unloaded { id: id("y", 1) });
    assert_eq!(x_state, Some(LoaderState::Loading));
    assert_eq!(served_version(&scheduler, "x").as_deref(), Some("x:1"));

    println!("\n[VERIFIED] The unload path never waited on the load semaphore");
}

// =============================================================================
// FSV Test 7: Unload waits for outstanding handles
// =============================================================================

#[tokio::test]
async fn fsv_unload_waits_for_leases() {
    println!("\n=== FSV TEST 7: Lease Drain Before Unload ===");
    println!("SYNTHETIC INPUT:");
    println!("  m:1 loaded; a reader holds a handle; m:1 withdrawn");

    let probe = Arc::new(Probe::default());
    let scheduler = TransitionScheduler::new(config(100)).unwrap();
    roll_to(&scheduler, 1, 10, &probe);
    settle(&scheduler).await;

    let handle = scheduler.get_servable("m", VersionSelector::Latest).unwrap();
    let mut events = scheduler.subscribe();
    scheduler.set_aspired_versions("m", Vec::new()).unwrap();

    println!("\nEXPECTED OUTPUT:");
    println!("  no Unload call while the handle lives; Unloaded soon after drop");

    tokio::time::sleep(Duration::from_millis(60)).await;
    let unloads_while_held = probe.unloads.load(Ordering::SeqCst);
    let state_while_held = scheduler.records().first().map(|r| r.state);
    let still_readable = handle.get::<String>().cloned();

    drop(handle);
    let event = next_event(&mut events).await;

    println!("\nACTUAL OUTPUT:");
    println!("  unload calls while held: {}", unloads_while_held);
    println!("  state while held: {:?}", state_while_held);
    println!("  event after drop: {:?}", event);

    assert_eq!(unloads_while_held, 0);
    assert_eq!(state_while_held, Some(LoaderState::Unloading));
    assert_eq!(still_readable.as_deref(), Some("m:1"));
    assert_eq!(event, ServableStateEvent::Unloaded { id: id("m", 1) });

    println!("\n[VERIFIED] The reader's lease was honoured");
}

// =============================================================================
// FSV Test 8: Churn never overlaps Load and Unload on one loader
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fsv_churn_keeps_calls_exclusive_and_budget_bounded() {
    println!("\n=== FSV TEST 8: Exclusivity Under Churn ===");
    println!("SYNTHETIC INPUT:");
    println!("  Capacity: ram = 100; 4 names, 5 rollouts each, loads take 5ms");

    let probe = Arc::new(Probe::default());
    let scheduler = TransitionScheduler::new(ServingConfig {
        max_concurrent_loads: 3,
        ..config(100)
    })
    .unwrap();
    scheduler.start().unwrap();

    println!("\nEXPECTED OUTPUT:");
    println!("  zero overlapping calls; utilization never above 1.0");
    println!("  every name ends on its last version");

    let mut peak: f64 = 0.0;
    for version in 1..=5 {
        for name in ["a", "b", "c", "d"] {
            let mut loader = ScriptedLoader::new(20, &probe);
            loader.load_delay = Duration::from_millis(5);
            scheduler
                .set_aspired_versions(name, vec![(id(name, version), loader.boxed())])
                .unwrap();
            peak = peak.max(scheduler.occupancy().peak_utilization());
        }
        tokio::time::sleep(Duration::from_millis(3)).await;
        peak = peak.max(scheduler.occupancy().peak_utilization());
    }
    settle(&scheduler).await;
    scheduler.stop().await;

    let served: Vec<Option<String>> = ["a", "b", "c", "d"]
        .iter()
        .map(|name| served_version(&scheduler, name))
        .collect();

    println!("\nACTUAL OUTPUT:");
    println!("  overlapping calls: {}", probe.overlapping_calls.load(Ordering::SeqCst));
    println!("  peak utilization seen: {}", peak);
    println!("  served: {:?}", served);

    assert_eq!(probe.overlapping_calls.load(Ordering::SeqCst), 0);
    assert!(peak <= 1.0);
    assert_eq!(
        served,
        vec![
            Some("a:5".to_string()),
            Some("b:5".to_string()),
            Some("c:5".to_string()),
            Some("d:5".to_string()),
        ]
    );
    assert_eq!(scheduler.tracker().reservation_count(), 4);

    println!("\n[VERIFIED] Single-flight per loader and the budget held throughout");
}
