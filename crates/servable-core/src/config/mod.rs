//! Configuration for the servable lifecycle manager.
//!
//! # Overview
//!
//! `ServingConfig` controls the resource budget, scheduler concurrency and
//! retry timing.
//!
//! # Sources
//!
//! [`ServingConfig::load()`] layers, in order:
//! 1. `config/default.toml`
//! 2. `config/{SERVING_ENV}.toml` (`SERVING_ENV` defaults to `development`)
//! 3. environment variables with the `SERVING_` prefix and `__` separator
//!
//! [`ServingConfig::from_env()`] applies the flat overrides below on top of
//! the defaults:
//!
//! | Field | Environment Variable | Default |
//! |-------|---------------------|---------|
//! | `max_concurrent_loads` | `SERVING_MAX_CONCURRENT_LOADS` | 2 |
//! | `max_concurrent_unloads` | `SERVING_MAX_CONCURRENT_UNLOADS` | 2 |
//! | `reconcile_interval_ms` | `SERVING_RECONCILE_INTERVAL_MS` | 1,000 |
//! | `unload_retry_interval_ms` | `SERVING_UNLOAD_RETRY_INTERVAL_MS` | 5,000 |
//! | `lease_poll_interval_ms` | `SERVING_LEASE_POLL_INTERVAL_MS` | 50 |
//! | `starvation_threshold` | `SERVING_STARVATION_THRESHOLD` | 8 |
//! | `transition_policy` | `SERVING_TRANSITION_POLICY` | `availability_preserving` |
//! | `diagnostic_dump_path` | `SERVING_DIAGNOSTIC_DUMP_PATH` | `/var/log/servable-manager` |


use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ServingError, ServingResult};
use crate::resources::{device_types, resource_kinds, ResourceAllocation, ResourceTracker};

/// One GiB in bytes.
const GIB: u64 = 1024 * 1024 * 1024;

/// How the scheduler orders the swap between an old and a new version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPolicy {
    /// Load the new version before unloading the old one whenever the
    /// budget allows co-residence.
    #[default]
    AvailabilityPreserving,
    /// Always unload stale versions before loading new ones.
    ResourcePreserving,
}

impl TransitionPolicy {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AvailabilityPreserving => "availability_preserving",
            Self::ResourcePreserving => "resource_preserving",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "availability_preserving" | "availability" => Some(Self::AvailabilityPreserving),
            "resource_preserving" | "resource" => Some(Self::ResourcePreserving),
            _ => None,
        }
    }
}

/// Capacity of one resource kind on every instance of a device type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityEntry {
    /// Device type (e.g. "main", "gpu").
    pub device: String,
    /// Number of instances of the device.
    #[serde(default = "default_instances")]
    pub instances: u32,
    /// Resource kind (e.g. "ram_in_bytes").
    pub kind: String,
    /// Capacity per instance.
    pub quantity: u64,
}

fn default_instances() -> u32 {
    1
}

impl CapacityEntry {
    pub fn new(device: impl Into<String>, instances: u32, kind: impl Into<String>, quantity: u64) -> Self {
        Self {
            device: device.into(),
            instances,
            kind: kind.into(),
            quantity,
        }
    }
}

/// Configuration for the servable manager.
///
/// # Example
///
/// ```
/// use servable_core::config::ServingConfig;
///
/// let config = ServingConfig::default();
/// config.validate()?;
/// let tracker = config.resource_tracker()?;
/// assert_eq!(tracker.reservation_count(), 0);
/// # Ok::<(), servable_core::ServingError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServingConfig {
    /// Maximum Load calls executing at once.
    pub max_concurrent_loads: usize,

    /// Maximum Unload calls executing at once.
    ///
    /// Separate from loads so that slow loads never hold up unloads.
    pub max_concurrent_unloads: usize,

    /// Period of the background reconciliation trigger (ms).
    ///
    /// Deferred loads are retried at least this often.
    pub reconcile_interval_ms: u64,

    /// Delay before a failed Unload is retried (ms).
    pub unload_retry_interval_ms: u64,

    /// Upper bound on one wait for outstanding handles to drain (ms).
    pub lease_poll_interval_ms: u64,

    /// Deferrals after which a pending load blocks later arrivals of other
    /// names from jumping ahead of it.
    pub starvation_threshold: u32,

    /// Swap ordering between versions of one name.
    pub transition_policy: TransitionPolicy,

    /// Directory for diagnostic JSON dumps.
    pub diagnostic_dump_path: PathBuf,

    /// Total capacity, per device type and resource kind.
    pub capacity: Vec<CapacityEntry>,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_loads: 2,
            max_concurrent_unloads: 2,
            reconcile_interval_ms: 1_000,
            unload_retry_interval_ms: 5_000,
            lease_poll_interval_ms: 50,
            starvation_threshold: 8,
            transition_policy: TransitionPolicy::AvailabilityPreserving,
            diagnostic_dump_path: PathBuf::from("/var/log/servable-manager"),
            capacity: vec![CapacityEntry::new(
                device_types::MAIN,
                1,
                resource_kinds::RAM_BYTES,
                16 * GIB,
            )],
        }
    }
}

impl ServingConfig {
    /// Load configuration from files and environment.
    ///
    /// # Errors
    ///
    /// Returns [`ServingError::InvalidConfig`] if a source fails to parse or
    /// the result fails validation.
    pub fn load() -> ServingResult<Self> {
        let env = std::env::var("SERVING_ENV").unwrap_or_else(|_| "development".to_string());

        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("SERVING").separator("__"));

        let config: ServingConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ServingError::InvalidConfig {
                field: "<sources>".to_string(),
                reason: e.to_string(),
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ServingError::InvalidConfig`] if the file cannot be read,
    /// parsed or validated.
    pub fn from_file(path: &Path) -> ServingResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ServingError::InvalidConfig {
            field: "<file>".to_string(),
            reason: format!("Failed to read config file {}: {}", path.display(), e),
        })?;

        let config: ServingConfig = toml::from_str(&content).map_err(|e| ServingError::InvalidConfig {
            field: "<file>".to_string(),
            reason: format!("Failed to parse config file: {}", e),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Defaults with flat environment overrides.
    ///
    /// Unparseable values are ignored with a warning.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_parse::<usize>("SERVING_MAX_CONCURRENT_LOADS") {
            config.max_concurrent_loads = v;
        }
        if let Some(v) = env_parse::<usize>("SERVING_MAX_CONCURRENT_UNLOADS") {
            config.max_concurrent_unloads = v;
        }
        if let Some(v) = env_parse::<u64>("SERVING_RECONCILE_INTERVAL_MS") {
            config.reconcile_interval_ms = v;
        }
        if let Some(v) = env_parse::<u64>("SERVING_UNLOAD_RETRY_INTERVAL_MS") {
            config.unload_retry_interval_ms = v;
        }
        if let Some(v) = env_parse::<u64>("SERVING_LEASE_POLL_INTERVAL_MS") {
            config.lease_poll_interval_ms = v;
        }
        if let Some(v) = env_parse::<u32>("SERVING_STARVATION_THRESHOLD") {
            config.starvation_threshold = v;
        }
        if let Ok(val) = std::env::var("SERVING_TRANSITION_POLICY") {
            match TransitionPolicy::parse(&val) {
                Some(policy) => config.transition_policy = policy,
                None => warn!(value = %val, "Ignoring unknown SERVING_TRANSITION_POLICY"),
            }
        }
        if let Ok(val) = std::env::var("SERVING_DIAGNOSTIC_DUMP_PATH") {
            config.diagnostic_dump_path = PathBuf::from(val);
        }

        config
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ServingError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> ServingResult<()> {
        if self.capacity.is_empty() {
            return Err(invalid("capacity", "at least one capacity entry is required"));
        }

        let mut seen = HashSet::new();
        for (i, entry) in self.capacity.iter().enumerate() {
            let field = format!("capacity[{}]", i);
            if entry.device.trim().is_empty() {
                return Err(invalid(&field, "device must not be empty"));
            }
            if entry.kind.trim().is_empty() {
                return Err(invalid(&field, "kind must not be empty"));
            }
            if entry.instances == 0 {
                return Err(invalid(&field, "instances must be greater than 0"));
            }
            if entry.quantity == 0 {
                return Err(invalid(&field, "quantity must be greater than 0"));
            }
            if !seen.insert((entry.device.as_str(), entry.kind.as_str())) {
                return Err(invalid(
                    &field,
                    format!("duplicate capacity for {}/{}", entry.device, entry.kind),
                ));
            }
        }

        if self.max_concurrent_loads == 0 {
            return Err(invalid("max_concurrent_loads", "must be greater than 0"));
        }
        if self.max_concurrent_unloads == 0 {
            return Err(invalid("max_concurrent_unloads", "must be greater than 0"));
        }
        if self.reconcile_interval_ms == 0 {
            return Err(invalid("reconcile_interval_ms", "must be greater than 0"));
        }
        if self.unload_retry_interval_ms == 0 {
            return Err(invalid("unload_retry_interval_ms", "must be greater than 0"));
        }
        if self.lease_poll_interval_ms == 0 {
            return Err(invalid("lease_poll_interval_ms", "must be greater than 0"));
        }

        Ok(())
    }

    /// Total capacity as a fully bound allocation.
    #[must_use]
    pub fn total_capacity(&self) -> ResourceAllocation {
        self.capacity.iter().fold(ResourceAllocation::new(), |acc, entry| {
            (0..entry.instances).fold(acc, |acc, instance| {
                acc.with_bound(entry.device.clone(), instance, entry.kind.clone(), entry.quantity)
            })
        })
    }

    /// Build a tracker for the configured capacity.
    ///
    /// # Errors
    ///
    /// Propagates validation errors.
    pub fn resource_tracker(&self) -> ServingResult<ResourceTracker> {
        self.validate()?;
        ResourceTracker::new(self.total_capacity())
    }

    #[must_use]
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }

    #[must_use]
    pub fn unload_retry_interval(&self) -> Duration {
        Duration::from_millis(self.unload_retry_interval_ms)
    }

    #[must_use]
    pub fn lease_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lease_poll_interval_ms)
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ServingError {
    ServingError::InvalidConfig {
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let val = std::env::var(key).ok()?;
    match val.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(key = key, value = %val, "Ignoring unparseable environment override");
            None
        }
    }
}
