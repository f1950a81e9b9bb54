//! Budget accounting across all loaded and in-flight servables.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use super::allocation::{Resource, ResourceAllocation};
use crate::error::{ServingError, ServingResult};
use crate::types::ServableId;

/// Tracks reservations against a fixed, fully bound total capacity.
///
/// # Invariants
///
/// - For every bound resource `r = (device, instance, kind)`:
///   `used[r] + used[(device, *, kind)] <= total[r]`. Unbound usage is
///   charged against every instance it could land on.
/// - `used` equals the sum of all entries in `reservations`.
/// - A servable holds at most one reservation.
///
/// # Thread Safety
///
/// Mutations (`try_reserve`, `release`, `recompute`) take the write lock so
/// they are serialized. Read-only admission checks share the read lock.
#[derive(Debug)]
pub struct ResourceTracker {
    /// Total capacity. Always fully bound.
    total: ResourceAllocation,
    /// Number of instances per device type, derived from `total`.
    instance_counts: BTreeMap<String, u32>,
    state: RwLock<TrackerState>,
}

#[derive(Debug, Default)]
struct TrackerState {
    used: ResourceAllocation,
    reservations: HashMap<ServableId, ResourceAllocation>,
}

impl TrackerState {
    fn rebuild_used(&mut self) {
        self.used = self
            .reservations
            .values()
            .fold(ResourceAllocation::new(), |acc, a| acc.add(a));
    }
}

impl ResourceTracker {
    /// Create a tracker for the given total capacity.
    ///
    /// # Errors
    ///
    /// Returns [`ServingError::InvalidResource`] if `total` contains unbound
    /// entries, or if a device's instances are not numbered `0..n`. Capacity
    /// always belongs to a concrete device instance.
    pub fn new(total: ResourceAllocation) -> ServingResult<Self> {
        if !total.is_bound() {
            return Err(ServingError::InvalidResource {
                reason: format!("total capacity must be fully bound: {}", total),
            });
        }

        let mut instances: BTreeMap<String, BTreeSet<u32>> = BTreeMap::new();
        for (resource, _) in total.iter() {
            if let Some(instance) = resource.device_instance {
                instances
                    .entry(resource.device.clone())
                    .or_default()
                    .insert(instance);
            }
        }

        // Instances of a device are numbered 0..n without gaps.
        let mut instance_counts: BTreeMap<String, u32> = BTreeMap::new();
        for (device, declared) in instances {
            let count = u32::try_from(declared.len()).unwrap_or(u32::MAX);
            if declared.iter().copied().ne(0..count) {
                return Err(ServingError::InvalidResource {
                    reason: format!(
                        "instances of device {} must be numbered 0..{} without gaps, got {:?}",
                        device, count, declared
                    ),
                });
            }
            instance_counts.insert(device, count);
        }

        Ok(Self {
            total,
            instance_counts,
            state: RwLock::new(TrackerState::default()),
        })
    }

    /// Total capacity.
    #[must_use]
    pub fn total(&self) -> &ResourceAllocation {
        &self.total
    }

    /// Instance count per device type.
    #[must_use]
    pub fn instance_counts(&self) -> &BTreeMap<String, u32> {
        &self.instance_counts
    }

    /// Sum of all current reservations.
    #[must_use]
    pub fn used(&self) -> ResourceAllocation {
        self.state.read().used.clone()
    }

    /// Reservation currently held by `id`, if any.
    #[must_use]
    pub fn reservation(&self, id: &ServableId) -> Option<ResourceAllocation> {
        self.state.read().reservations.get(id).cloned()
    }

    /// Number of servables holding a reservation.
    #[must_use]
    pub fn reservation_count(&self) -> usize {
        self.state.read().reservations.len()
    }

    /// Atomically check headroom for `allocation` and, if it fits, commit it.
    ///
    /// Returns `Ok(false)` when the budget would be exceeded. An empty
    /// allocation (resource-oblivious loaders) is always admitted.
    ///
    /// # Errors
    ///
    /// Returns [`ServingError::AlreadyRegistered`] if `id` already holds a
    /// reservation.
    pub fn try_reserve(
        &self,
        id: &ServableId,
        allocation: &ResourceAllocation,
    ) -> ServingResult<bool> {
        let allocation = allocation.normalize(&self.instance_counts);
        let mut state = self.state.write();

        if state.reservations.contains_key(id) {
            return Err(ServingError::AlreadyRegistered {
                servable: id.clone(),
            });
        }

        let proposed = state.used.add(&allocation);
        if let Err(reason) = self.check_fits(&proposed) {
            debug!(servable = %id, requested = %allocation, reason = %reason, "Admission denied");
            return Ok(false);
        }

        debug!(servable = %id, reserved = %allocation, "Admission granted");
        state.used = proposed;
        state.reservations.insert(id.clone(), allocation);
        Ok(true)
    }

    /// Release the reservation held by `id`.
    ///
    /// Returns the released allocation, or `None` if `id` held nothing.
    pub fn release(&self, id: &ServableId) -> Option<ResourceAllocation> {
        let mut state = self.state.write();
        let released = state.reservations.remove(id)?;

        match state.used.subtract(&released) {
            Ok(used) => state.used = used,
            Err(e) => {
                error!(servable = %id, error = %e, "Usage accounting drifted, rebuilding from reservations");
                state.rebuild_used();
            }
        }

        debug!(servable = %id, released = %released, "Reservation released");
        Some(released)
    }

    /// Replace the reservation of `id` with a smaller one.
    ///
    /// A Loader's estimate may only shrink over its lifetime. If `allocation`
    /// is not bounded by the current reservation, the breach is logged and
    /// the existing reservation is kept unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`ServingError::NotRegistered`] if `id` holds no reservation.
    pub fn recompute(&self, id: &ServableId, allocation: &ResourceAllocation) -> ServingResult<()> {
        let allocation = allocation.normalize(&self.instance_counts);
        let mut state = self.state.write();

        let previous = state
            .reservations
            .get(id)
            .cloned()
            .ok_or_else(|| ServingError::NotRegistered {
                servable: id.clone(),
            })?;

        if !allocation.is_bounded_by(&previous) {
            warn!(
                servable = %id,
                previous = %previous,
                reported = %allocation,
                "Resource estimate increased; keeping previous reservation"
            );
            return Ok(());
        }

        let used = state
            .used
            .subtract(&previous)
            .map(|u| u.add(&allocation));
        match used {
            Ok(used) => {
                state.used = used;
                state.reservations.insert(id.clone(), allocation.clone());
            }
            Err(e) => {
                error!(servable = %id, error = %e, "Usage accounting drifted, rebuilding from reservations");
                state.reservations.insert(id.clone(), allocation.clone());
                state.rebuild_used();
            }
        }

        debug!(servable = %id, previous = %previous, current = %allocation, "Reservation recomputed");
        Ok(())
    }

    /// Whether `allocation` would currently be admitted. Does not reserve.
    #[must_use]
    pub fn would_fit(&self, allocation: &ResourceAllocation) -> bool {
        let allocation = allocation.normalize(&self.instance_counts);
        let state = self.state.read();
        self.check_fits(&state.used.add(&allocation)).is_ok()
    }

    /// Whether `allocation` would be admitted once `released` give back
    /// their reservations. Does not reserve or release anything.
    #[must_use]
    pub fn would_fit_after_release(
        &self,
        allocation: &ResourceAllocation,
        released: &[ServableId],
    ) -> bool {
        let allocation = allocation.normalize(&self.instance_counts);
        let state = self.state.read();

        let mut used = state.used.clone();
        for id in released {
            if let Some(reserved) = state.reservations.get(id) {
                match used.subtract(reserved) {
                    Ok(rest) => used = rest,
                    Err(_) => return false,
                }
            }
        }

        self.check_fits(&used.add(&allocation)).is_ok()
    }

    /// Point-in-time view of capacity and usage.
    #[must_use]
    pub fn occupancy(&self) -> TrackerOccupancy {
        let state = self.state.read();

        let resources = self
            .total
            .iter()
            .map(|(resource, capacity)| {
                let bound_used = state.used.quantity(resource);
                let unbound_used = state.used.quantity(&resource.as_unbound());
                ResourceOccupancy {
                    resource: resource.clone(),
                    capacity,
                    bound_used,
                    unbound_used,
                    available: capacity.saturating_sub(bound_used.saturating_add(unbound_used)),
                }
            })
            .collect();

        let mut reservations: Vec<ReservationEntry> = state
            .reservations
            .iter()
            .map(|(id, allocation)| ReservationEntry {
                servable: id.clone(),
                allocation: allocation.clone(),
            })
            .collect();
        reservations.sort_by(|a, b| a.servable.cmp(&b.servable));

        TrackerOccupancy {
            resources,
            reservations,
        }
    }

    /// Check that `used` respects capacity on every device instance.
    fn check_fits(&self, used: &ResourceAllocation) -> Result<(), String> {
        for (resource, quantity) in used.iter() {
            match resource.device_instance {
                Some(_) => {
                    let capacity = self.total.quantity(resource);
                    let pending = quantity.saturating_add(used.quantity(&resource.as_unbound()));
                    if pending > capacity {
                        return Err(format!(
                            "{} would use {} of {} available",
                            resource, pending, capacity
                        ));
                    }
                }
                None => {
                    let instances = self.instance_counts.get(&resource.device).copied().unwrap_or(0);
                    if instances == 0 {
                        return Err(format!("no capacity configured for device of {}", resource));
                    }
                    for instance in 0..instances {
                        let bound: Resource = resource.at_instance(instance);
                        let capacity = self.total.quantity(&bound);
                        let pending = quantity.saturating_add(used.quantity(&bound));
                        if pending > capacity {
                            return Err(format!(
                                "{} could land on {} and use {} of {} available",
                                resource, bound, pending, capacity
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Capacity and usage of one bound resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceOccupancy {
    /// The bound resource.
    pub resource: Resource,
    /// Total capacity.
    pub capacity: u64,
    /// Usage bound to this instance.
    pub bound_used: u64,
    /// Unbound usage that could still land on this instance.
    pub unbound_used: u64,
    /// Capacity left under worst-case placement.
    pub available: u64,
}

/// One servable's reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationEntry {
    /// Owner of the reservation.
    pub servable: ServableId,
    /// Reserved allocation.
    pub allocation: ResourceAllocation,
}

/// Snapshot of tracker state for operational tooling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerOccupancy {
    /// Per-resource capacity and usage.
    pub resources: Vec<ResourceOccupancy>,
    /// Reservations sorted by servable id.
    pub reservations: Vec<ReservationEntry>,
}

impl TrackerOccupancy {
    /// Utilization (0.0 - 1.0) of the most loaded resource.
    #[must_use]
    pub fn peak_utilization(&self) -> f64 {
        self.resources
            .iter()
            .filter(|r| r.capacity > 0)
            .map(|r| {
                r.bound_used.saturating_add(r.unbound_used) as f64 / r.capacity as f64
            })
            .fold(0.0, f64::max)
    }
}
