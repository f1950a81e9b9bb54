//! Synthetic rollout plans.
//!
//! A plan lives in the same TOML file as the [`ServingConfig`]; the config
//! loader ignores the `[[servables]]` tables and this module ignores
//! everything else.
//!
//! ```toml
//! starvation_threshold = 4
//!
//! [[capacity]]
//! device = "main"
//! kind = "ram_in_bytes"
//! quantity = 1000
//!
//! [[servables]]
//! name = "ranker"
//! version = 1
//! estimate = 400
//! post_load_estimate = 350
//!
//! [[servables]]
//! name = "ranker"
//! version = 2
//! estimate = 400
//! fail = true
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use servable_core::resources::{device_types, resource_kinds};
use servable_core::{
    Loader, LoadMetadata, ResourceAllocation, ServableId, ServingConfig, ServingError,
    SimpleLoader,
};

/// One synthetic servable version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServableSpec {
    pub name: String,
    pub version: u64,
    /// Pre-load estimate.
    pub estimate: u64,
    /// Estimate reported once loaded. Must not exceed `estimate`.
    #[serde(default)]
    pub post_load_estimate: Option<u64>,
    /// Make the Load call fail.
    #[serde(default)]
    pub fail: bool,
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_kind")]
    pub kind: String,
}

fn default_device() -> String {
    device_types::MAIN.to_string()
}

fn default_kind() -> String {
    resource_kinds::RAM_BYTES.to_string()
}

impl ServableSpec {
    #[must_use]
    pub fn id(&self) -> ServableId {
        ServableId::new(self.name.clone(), self.version)
    }

    fn allocation(&self, quantity: u64) -> ResourceAllocation {
        ResourceAllocation::new().with_unbound(self.device.clone(), self.kind.clone(), quantity)
    }

    /// A Loader whose servable is the id's display string.
    #[must_use]
    pub fn loader(&self) -> Box<dyn Loader> {
        let fail = self.fail;
        let estimate = self.allocation(self.estimate);
        let loader = SimpleLoader::with_metadata(
            move |metadata: &LoadMetadata| {
                if fail {
                    Err(ServingError::load_failed(
                        &metadata.servable_id,
                        "simulated load failure",
                    ))
                } else {
                    Ok(metadata.servable_id.to_string())
                }
            },
            move || Ok(estimate.clone()),
        );

        match self.post_load_estimate {
            Some(quantity) => {
                let measured = self.allocation(quantity);
                Box::new(loader.with_post_load_estimator(move || Ok(measured.clone())))
            }
            None => Box::new(loader),
        }
    }
}

/// The `[[servables]]` section of a config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutPlan {
    #[serde(default)]
    pub servables: Vec<ServableSpec>,
}

impl RolloutPlan {
    /// Parse a plan from TOML text.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let plan: RolloutPlan = toml::from_str(content).context("Failed to parse [[servables]]")?;
        plan.validate()?;
        Ok(plan)
    }

    /// Read the config and the plan from one file.
    pub fn load(path: &Path) -> anyhow::Result<(ServingConfig, Self)> {
        let config = ServingConfig::from_file(path)?;
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok((config, Self::parse(&content)?))
    }

    fn validate(&self) -> anyhow::Result<()> {
        let mut seen = std::collections::BTreeSet::new();
        for spec in &self.servables {
            if spec.name.trim().is_empty() {
                bail!("servable name must not be empty");
            }
            if !seen.insert(spec.id()) {
                bail!("{} declared twice", spec.id());
            }
            if let Some(post) = spec.post_load_estimate {
                if post > spec.estimate {
                    bail!(
                        "{}: post_load_estimate {} exceeds estimate {}",
                        spec.id(),
                        post,
                        spec.estimate
                    );
                }
            }
        }
        Ok(())
    }

    /// Specs grouped by name, each group in ascending version order.
    #[must_use]
    pub fn rollouts(&self) -> BTreeMap<&str, Vec<&ServableSpec>> {
        let mut rollouts: BTreeMap<&str, Vec<&ServableSpec>> = BTreeMap::new();
        for spec in &self.servables {
            rollouts.entry(spec.name.as_str()).or_default().push(spec);
        }
        for specs in rollouts.values_mut() {
            specs.sort_by_key(|s| s.version);
        }
        rollouts
    }
}
