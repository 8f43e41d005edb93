use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::aws::{region_id, REGION_ALL};
use crate::classify::{Classifier, UsageRule};
use crate::pricing::feed::DEFAULT_FEED_URLS;

/// Top-level configuration for the costoor agent.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    #[allow(dead_code)]
    pub log_level: String,

    /// AWS account access configuration.
    pub aws: AwsConfig,

    /// Price table configuration.
    pub costs: CostsConfig,

    /// Adjustment clock persistence configuration.
    #[serde(default)]
    pub clock: ClockConfig,

    /// Measure sink configuration.
    #[serde(default)]
    pub sink: SinkConfig,

    /// Resource classification configuration.
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// How often to run a poll cycle. Default: 5m.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

/// AWS account access configuration.
#[derive(Debug, Deserialize)]
pub struct AwsConfig {
    /// Access key id of the monitored account.
    #[serde(default)]
    pub access_key_id: String,

    /// Secret access key of the monitored account.
    #[serde(default)]
    pub secret_access_key: String,

    /// Region to monitor: "All", a readable region name or a region id.
    /// Default: "All".
    #[serde(default = "default_region")]
    pub region: String,

    /// Timeout for provider API calls. Default: 60s.
    #[serde(default = "default_aws_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

/// Price table configuration.
#[derive(Debug, Deserialize)]
pub struct CostsConfig {
    /// Baseline hourly costs, keyed `cost.<region>.<class>[.platform]`.
    /// Required; a missing price at lookup time fails the cycle.
    #[serde(default)]
    pub baseline: HashMap<String, f64>,

    /// Remote pricing feed overlay configuration.
    #[serde(default)]
    pub feed: FeedConfig,
}

/// Remote pricing feed overlay configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Fetch the remote feeds at startup to refresh baseline prices.
    /// Default: true.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Feed URLs, fetched in order; later entries win on key collisions.
    #[serde(default = "default_feed_urls")]
    pub urls: Vec<String>,

    /// Timeout per feed request. Default: 30s.
    #[serde(default = "default_feed_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

/// Adjustment clock persistence configuration.
#[derive(Debug, Default, Deserialize)]
pub struct ClockConfig {
    /// Directory for the last-poll state file. Unset disables persistence;
    /// every poll then reports a full hour of accrual.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,

    /// Distinguishes state files when several agents share a state
    /// directory. Must not be shared by concurrently running agents.
    /// Default: "1".
    #[serde(default = "default_unique_id")]
    pub unique_id: String,
}

/// Measure sink configuration.
#[derive(Debug, Default, Deserialize)]
pub struct SinkConfig {
    /// File to append measure records to. Unset writes to stdout.
    #[serde(default)]
    pub output: Option<PathBuf>,

    /// Extra measure subscriptions on top of the built-in catalog.
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

/// One extra measure subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    pub group: String,
    pub name: String,
}

/// Resource classification configuration.
#[derive(Debug, Deserialize)]
pub struct ClassifierConfig {
    /// Ordered usage classification rules, first match wins. Defaults to
    /// the built-in heuristics.
    #[serde(default = "Classifier::default_rules")]
    pub usage_rules: Vec<UsageRule>,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_region() -> String {
    REGION_ALL.to_string()
}

fn default_aws_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_true() -> bool {
    true
}

fn default_feed_urls() -> Vec<String> {
    DEFAULT_FEED_URLS.iter().map(|url| url.to_string()).collect()
}

fn default_feed_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_unique_id() -> String {
    "1".to_string()
}

// --- Default trait impls ---

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            access_key_id: String::new(),
            secret_access_key: String::new(),
            region: default_region(),
            timeout: default_aws_timeout(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            urls: default_feed_urls(),
            timeout: default_feed_timeout(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            usage_rules: Classifier::default_rules(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.aws.access_key_id.is_empty() {
            bail!("aws.access_key_id is required");
        }

        if self.aws.secret_access_key.is_empty() {
            bail!("aws.secret_access_key is required");
        }

        if self.aws.region != REGION_ALL && region_id(&self.aws.region).is_none() {
            bail!("aws.region {:?} is not a known region", self.aws.region);
        }

        if self.aws.timeout.is_zero() {
            bail!("aws.timeout must be positive");
        }

        if self.costs.baseline.is_empty() {
            bail!("costs.baseline must not be empty");
        }

        if self.costs.feed.enabled {
            if self.costs.feed.urls.is_empty() {
                bail!("costs.feed.urls must not be empty when the feed is enabled");
            }
            if self.costs.feed.timeout.is_zero() {
                bail!("costs.feed.timeout must be positive");
            }
        }

        if self.clock.state_dir.is_some() && self.clock.unique_id.is_empty() {
            bail!("clock.unique_id must not be empty when clock.state_dir is set");
        }

        for subscription in &self.sink.subscriptions {
            if subscription.group.is_empty() || subscription.name.is_empty() {
                bail!("sink.subscriptions entries need both a group and a name");
            }
        }

        for rule in &self.classifier.usage_rules {
            if rule.category.is_empty() {
                bail!("classifier.usage_rules entries need a category");
            }
            if rule.any.is_empty() {
                bail!(
                    "classifier rule for {:?} needs at least one predicate",
                    rule.category
                );
            }
        }

        if self.poll_interval.is_zero() {
            bail!("poll_interval must be positive");
        }

        Ok(())
    }
}
