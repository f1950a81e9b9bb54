//! Immutable resource allocation value type.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ServingError, ServingResult};

/// One kind of resource on one device, optionally bound to an instance.
///
/// `device_instance == None` means the quantity is not yet tied to a
/// concrete instance (e.g. "RAM on one of the GPUs").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Resource {
    /// Device type (e.g. "main", "gpu").
    pub device: String,
    /// Concrete device instance, if bound.
    pub device_instance: Option<u32>,
    /// Resource kind (e.g. "ram_in_bytes").
    pub kind: String,
}

impl Resource {
    /// A resource bound to a specific device instance.
    #[must_use]
    pub fn bound(device: impl Into<String>, instance: u32, kind: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            device_instance: Some(instance),
            kind: kind.into(),
        }
    }

    /// A resource not yet tied to a device instance.
    #[must_use]
    pub fn unbound(device: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            device_instance: None,
            kind: kind.into(),
        }
    }

    /// Whether this resource names a concrete device instance.
    #[inline]
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.device_instance.is_some()
    }

    /// The unbound resource of the same device and kind.
    #[must_use]
    pub fn as_unbound(&self) -> Self {
        Self::unbound(self.device.clone(), self.kind.clone())
    }

    /// The same device and kind, bound to `instance`.
    #[must_use]
    pub fn at_instance(&self, instance: u32) -> Self {
        Self::bound(self.device.clone(), instance, self.kind.clone())
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.device_instance {
            Some(i) => write!(f, "{}/{}/{}", self.device, i, self.kind),
            None => write!(f, "{}/*/{}", self.device, self.kind),
        }
    }
}

/// Serialized form of one allocation line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationEntry {
    /// The resource.
    pub resource: Resource,
    /// Amount of it.
    pub quantity: u64,
}

/// A quantity of resource usage, decomposed by resource.
///
/// Immutable: every operation returns a new value. Zero quantities are
/// never stored, so two allocations describing the same usage compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<AllocationEntry>", into = "Vec<AllocationEntry>")]
pub struct ResourceAllocation {
    quantities: BTreeMap<Resource, u64>,
}

impl ResourceAllocation {
    /// An empty allocation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `quantity` of `kind` on a specific device instance.
    #[must_use]
    pub fn with_bound(
        self,
        device: impl Into<String>,
        instance: u32,
        kind: impl Into<String>,
        quantity: u64,
    ) -> Self {
        self.with(Resource::bound(device, instance, kind), quantity)
    }

    /// Add `quantity` of `kind` on some not-yet-chosen instance of `device`.
    #[must_use]
    pub fn with_unbound(
        self,
        device: impl Into<String>,
        kind: impl Into<String>,
        quantity: u64,
    ) -> Self {
        self.with(Resource::unbound(device, kind), quantity)
    }

    /// Add `quantity` of `resource`.
    #[must_use]
    pub fn with(mut self, resource: Resource, quantity: u64) -> Self {
        if quantity > 0 {
            let slot = self.quantities.entry(resource).or_insert(0);
            *slot = slot.saturating_add(quantity);
        }
        self
    }

    /// Quantity of `resource` (zero if absent).
    #[must_use]
    pub fn quantity(&self, resource: &Resource) -> u64 {
        self.quantities.get(resource).copied().unwrap_or(0)
    }

    /// Iterate over non-zero entries in resource order.
    pub fn iter(&self) -> impl Iterator<Item = (&Resource, u64)> {
        self.quantities.iter().map(|(r, q)| (r, *q))
    }

    /// Number of non-zero entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.quantities.len()
    }

    /// Whether the allocation describes no usage at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quantities.is_empty()
    }

    /// Whether every entry names a concrete device instance.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.quantities.keys().all(Resource::is_bound)
    }

    /// Sum of `self` and `other`.
    #[must_use]
    pub fn add(&self, other: &ResourceAllocation) -> Self {
        other
            .iter()
            .fold(self.clone(), |acc, (r, q)| acc.with(r.clone(), q))
    }

    /// `self` minus `other`.
    ///
    /// # Errors
    ///
    /// Returns [`ServingError::InvalidResource`] if `other` holds more of any
    /// resource than `self`.
    pub fn subtract(&self, other: &ResourceAllocation) -> ServingResult<Self> {
        let mut quantities = self.quantities.clone();
        for (resource, quantity) in other.iter() {
            let current = quantities.get(resource).copied().unwrap_or(0);
            let remaining = current.checked_sub(quantity).ok_or_else(|| {
                ServingError::InvalidResource {
                    reason: format!(
                        "cannot subtract {} of {} from {}",
                        quantity, resource, current
                    ),
                }
            })?;
            if remaining == 0 {
                quantities.remove(resource);
            } else {
                quantities.insert(resource.clone(), remaining);
            }
        }
        Ok(Self { quantities })
    }

    /// Bind unbound entries of single-instance devices to instance 0.
    ///
    /// `instance_counts` maps device type to the number of instances.
    /// Unbound entries of multi-instance or unknown devices are kept as-is.
    #[must_use]
    pub fn normalize(&self, instance_counts: &BTreeMap<String, u32>) -> Self {
        self.iter().fold(Self::new(), |acc, (r, q)| {
            if !r.is_bound() && instance_counts.get(&r.device) == Some(&1) {
                acc.with(r.at_instance(0), q)
            } else {
                acc.with(r.clone(), q)
            }
        })
    }

    /// Whether usage described by `self` fits inside what `other` described.
    ///
    /// Used to check the monotonic-non-increase contract between two
    /// successive estimates of one Loader. Unbound quantities in `other` may
    /// cover any instance of their device, but only once: the excess of each
    /// bound instance over `other`'s bound amount, plus `self`'s own unbound
    /// amount, must fit in `other`'s unbound pool.
    #[must_use]
    pub fn is_bounded_by(&self, other: &ResourceAllocation) -> bool {
        let mut groups: BTreeMap<(&str, &str), u64> = BTreeMap::new();

        for (resource, quantity) in self.iter() {
            let needed_from_pool = if resource.is_bound() {
                quantity.saturating_sub(other.quantity(resource))
            } else {
                quantity
            };
            let slot = groups
                .entry((resource.device.as_str(), resource.kind.as_str()))
                .or_insert(0);
            *slot = slot.saturating_add(needed_from_pool);
        }

        groups.into_iter().all(|((device, kind), needed)| {
            needed <= other.quantity(&Resource::unbound(device, kind))
        })
    }
}

impl From<Vec<AllocationEntry>> for ResourceAllocation {
    fn from(entries: Vec<AllocationEntry>) -> Self {
        entries
            .into_iter()
            .fold(Self::new(), |acc, e| acc.with(e.resource, e.quantity))
    }
}

impl From<ResourceAllocation> for Vec<AllocationEntry> {
    fn from(allocation: ResourceAllocation) -> Self {
        allocation
            .quantities
            .into_iter()
            .map(|(resource, quantity)| AllocationEntry { resource, quantity })
            .collect()
    }
}

impl fmt::Display for ResourceAllocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "{{}}");
        }
        let parts: Vec<String> = self.iter().map(|(r, q)| format!("{}={}", r, q)).collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}
