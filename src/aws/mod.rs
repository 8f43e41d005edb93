pub mod sdk;

use std::collections::HashMap;
use std::future::Future;

use anyhow::Result;
use chrono::DateTime;

use crate::classify::{TAG_OWNER, TAG_UNKNOWN};

// EC2 instance states as reported by the API; there is no enum on the wire.
pub const STATE_PENDING: &str = "pending";
pub const STATE_RUNNING: &str = "running";
pub const STATE_SHUTTING_DOWN: &str = "shutting-down";
pub const STATE_TERMINATED: &str = "terminated";
pub const STATE_STOPPED: &str = "stopped";

/// Sentinel region value meaning "query every region".
pub const REGION_ALL: &str = "All";

/// Regions offering the RDS and CloudFormation endpoints this agent fans
/// out over when configured for all regions.
pub const SERVICE_REGIONS: &[&str] = &[
    "us-east-1",
    "us-west-1",
    "us-west-2",
    "eu-west-1",
    "ap-northeast-1",
    "ap-southeast-1",
    "ap-southeast-2",
    "sa-east-1",
];

/// Readable region names accepted in configuration, mapped to region ids.
pub const REGION_NAMES: &[(&str, &str)] = &[
    ("US East (Virginia)", "us-east-1"),
    ("US West (N. California)", "us-west-1"),
    ("US West (Oregon)", "us-west-2"),
    ("EU West (Ireland)", "eu-west-1"),
    ("Asia Pacific (Tokyo)", "ap-northeast-1"),
    ("Asia Pacific (Singapore)", "ap-southeast-1"),
    ("Asia Pacific (Sydney)", "ap-southeast-2"),
    ("S. America (Sao Paulo)", "sa-east-1"),
];

/// Resolves a configured region (readable name or raw id) to a region id.
pub fn region_id(configured: &str) -> Option<&'static str> {
    REGION_NAMES
        .iter()
        .find(|(name, id)| *name == configured || *id == configured)
        .map(|(_, id)| *id)
}

/// A region known to the account, as returned by DescribeRegions.
#[derive(Debug, Clone)]
pub struct RegionInfo {
    pub name: String,
    pub endpoint: String,
}

/// Read-only view of an EC2 instance.
#[derive(Debug, Clone, Default)]
pub struct Ec2Instance {
    pub id: String,
    pub state: String,
    pub instance_type: String,
    pub virtualization_type: String,
    pub key_name: Option<String>,
    pub public_dns: Option<String>,
    /// Launch time as epoch seconds.
    pub launch_time: Option<i64>,
    pub tags: HashMap<String, String>,
}

impl Ec2Instance {
    /// Whether the instance counts as active and accrues cost.
    ///
    /// Although AWS documents only terminated instances as free, stopped
    /// instances do not accrue compute cost either.
    pub fn is_active(&self) -> bool {
        self.state != STATE_STOPPED && self.state != STATE_TERMINATED
    }

    /// One-line description used by the CLI utilities.
    pub fn description(&self) -> String {
        let launched = self
            .launch_time
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(|time| time.to_rfc3339())
            .unwrap_or_else(|| "unknown".to_string());

        format!(
            "Instance: {}: {}: Started at {}, Key: {}, Type: {}, State: {}, Owner: {}, Tags: {:?}",
            self.id,
            self.tags.get("Name").map(String::as_str).unwrap_or(""),
            launched,
            self.key_name.as_deref().unwrap_or(""),
            self.instance_type,
            self.state,
            self.tags
                .get(TAG_OWNER)
                .map(String::as_str)
                .unwrap_or(TAG_UNKNOWN),
            self.tags,
        )
    }
}

/// Read-only view of an RDS database instance.
#[derive(Debug, Clone, Default)]
pub struct DbInstance {
    pub id: String,
    pub status: String,
    pub class: String,
}

/// Read-only view of a CloudFormation stack.
#[derive(Debug, Clone, Default)]
pub struct StackInfo {
    pub name: String,
    pub status: String,
}

/// EC2 API surface the monitor and CLI utilities depend on.
pub trait ComputeApi: Send + Sync {
    /// Lists all regions known to the account.
    fn list_regions(&self) -> impl Future<Output = Result<Vec<RegionInfo>>> + Send;

    /// Lists all instances in a region, following pagination.
    fn list_instances(&self, region: &str)
        -> impl Future<Output = Result<Vec<Ec2Instance>>> + Send;

    /// Sets the `Usage` tag on an instance.
    fn tag_usage(
        &self,
        region: &str,
        instance_id: &str,
        value: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// RDS API surface the monitor depends on.
pub trait DatabaseApi: Send + Sync {
    /// Lists all database instances in a region, following pagination.
    fn list_db_instances(&self, region: &str)
        -> impl Future<Output = Result<Vec<DbInstance>>> + Send;
}

/// CloudFormation API surface the monitor depends on.
pub trait StackApi: Send + Sync {
    /// Lists all stacks in a region, following pagination.
    fn list_stacks(&self, region: &str) -> impl Future<Output = Result<Vec<StackInfo>>> + Send;
}
