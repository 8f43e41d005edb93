pub mod feed;

use std::collections::HashMap;

use anyhow::{bail, Result};
use thiserror::Error;

/// Prefix every price key carries, e.g. `cost.us-east-1.m1.small.linux`.
pub const KEY_PREFIX: &str = "cost.";

/// Raised when a resolved resource has no price entry.
///
/// A missing price silently understates cost, which is worse than stopping,
/// so lookups fail loudly instead of defaulting to zero.
#[derive(Debug, Error)]
#[error("no cost defined for key {key:?}, please check the configured baseline prices")]
pub struct MissingPrice {
    pub key: String,
}

/// Pricing platform of a compute instance, derived from its virtualization
/// type: HVM instances are billed at Windows rates, everything else at
/// Linux rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    Windows,
}

impl Platform {
    /// Returns the canonical token used in price keys.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Windows => "windows",
        }
    }

    /// Derives the platform from an EC2 virtualization type string.
    pub fn from_virtualization(virtualization_type: &str) -> Self {
        if virtualization_type == "hvm" {
            Self::Windows
        } else {
            Self::Linux
        }
    }
}

/// Maps `cost.{region}.{class}[.platform]` keys to hourly USD costs.
///
/// Built from a required baseline table supplied by the operator and
/// optionally overlaid with entries from the remote pricing feed; overlay
/// entries win on key collisions.
pub struct PriceTable {
    entries: HashMap<String, f64>,
}

impl PriceTable {
    /// Creates a table from the operator-supplied baseline.
    ///
    /// The baseline is required: an empty or malformed table is a setup
    /// error, not something to limp along without.
    pub fn from_baseline(baseline: &HashMap<String, f64>) -> Result<Self> {
        if baseline.is_empty() {
            bail!("costs.baseline must not be empty");
        }

        for (key, value) in baseline {
            if !key.starts_with(KEY_PREFIX) {
                bail!("invalid baseline price key {key:?}, keys must start with {KEY_PREFIX:?}");
            }
            if !value.is_finite() || *value < 0.0 {
                bail!("invalid baseline price for {key:?}: {value}");
            }
        }

        Ok(Self {
            entries: baseline.clone(),
        })
    }

    /// Merges feed entries over the baseline, last writer wins.
    pub fn merge_overlay(&mut self, overlay: Vec<(String, f64)>) {
        for (key, value) in overlay {
            self.entries.insert(key, value);
        }
    }

    /// Number of known price entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hourly cost of a compute instance type in a region.
    pub fn instance_cost(
        &self,
        region: &str,
        instance_type: &str,
        platform: Platform,
    ) -> Result<f64, MissingPrice> {
        self.lookup(format!(
            "{KEY_PREFIX}{region}.{instance_type}.{}",
            platform.as_str()
        ))
    }

    /// Hourly cost of a database instance class in a region.
    pub fn db_cost(&self, region: &str, instance_class: &str) -> Result<f64, MissingPrice> {
        self.lookup(format!("{KEY_PREFIX}{region}.{instance_class}"))
    }

    fn lookup(&self, key: String) -> Result<f64, MissingPrice> {
        match self.entries.get(&key) {
            Some(cost) => Ok(*cost),
            None => Err(MissingPrice { key }),
        }
    }
}
