use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_ec2::config::Credentials;
use tracing::debug;

use crate::classify::TAG_USAGE;

use super::{ComputeApi, DatabaseApi, DbInstance, Ec2Instance, RegionInfo, StackApi, StackInfo};

/// Region used for calls that are not bound to a particular region, such
/// as DescribeRegions.
const HOME_REGION: &str = "us-east-1";

/// AWS SDK backed implementation of the provider API seams.
///
/// Holds one shared SDK configuration; per-region service clients are
/// derived from it on demand. Clients are cheap to construct, and a poll
/// cycle touches each region only once per service.
#[derive(Clone)]
pub struct SdkApi {
    base: SdkConfig,
}

impl SdkApi {
    /// Builds the shared SDK configuration from static credentials.
    pub async fn new(access_key_id: &str, secret_access_key: &str, timeout: Duration) -> Self {
        let credentials = Credentials::new(
            access_key_id.to_string(),
            secret_access_key.to_string(),
            None,
            None,
            "costoor-config",
        );

        let timeouts = TimeoutConfig::builder().operation_timeout(timeout).build();

        let base = aws_config::defaults(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .timeout_config(timeouts)
            .region(Region::new(HOME_REGION))
            .load()
            .await;

        Self { base }
    }

    fn ec2(&self, region: &str) -> aws_sdk_ec2::Client {
        let config = aws_sdk_ec2::config::Builder::from(&self.base)
            .region(Region::new(region.to_string()))
            .build();
        aws_sdk_ec2::Client::from_conf(config)
    }

    fn rds(&self, region: &str) -> aws_sdk_rds::Client {
        let config = aws_sdk_rds::config::Builder::from(&self.base)
            .region(Region::new(region.to_string()))
            .build();
        aws_sdk_rds::Client::from_conf(config)
    }

    fn cloudformation(&self, region: &str) -> aws_sdk_cloudformation::Client {
        let config = aws_sdk_cloudformation::config::Builder::from(&self.base)
            .region(Region::new(region.to_string()))
            .build();
        aws_sdk_cloudformation::Client::from_conf(config)
    }
}

impl ComputeApi for SdkApi {
    async fn list_regions(&self) -> Result<Vec<RegionInfo>> {
        debug!("listing EC2 regions");

        let response = self
            .ec2(HOME_REGION)
            .describe_regions()
            .send()
            .await
            .context("describing regions")?;

        let regions = response
            .regions()
            .iter()
            .map(|region| RegionInfo {
                name: region.region_name().unwrap_or_default().to_string(),
                endpoint: region.endpoint().unwrap_or_default().to_string(),
            })
            .collect();

        Ok(regions)
    }

    async fn list_instances(&self, region: &str) -> Result<Vec<Ec2Instance>> {
        debug!(region, "listing EC2 instances");

        let client = self.ec2(region);
        let mut instances = Vec::new();
        let mut next_token = None;

        loop {
            let response = client
                .describe_instances()
                .set_next_token(next_token)
                .send()
                .await
                .with_context(|| format!("describing instances in {region}"))?;

            for reservation in response.reservations() {
                instances.extend(reservation.instances().iter().map(instance_view));
            }

            next_token = response.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }

        Ok(instances)
    }

    async fn tag_usage(&self, region: &str, instance_id: &str, value: &str) -> Result<()> {
        debug!(region, instance_id, value, "setting usage tag");

        let tag = aws_sdk_ec2::types::Tag::builder()
            .key(TAG_USAGE)
            .value(value)
            .build();

        self.ec2(region)
            .create_tags()
            .resources(instance_id)
            .tags(tag)
            .send()
            .await
            .with_context(|| format!("tagging instance {instance_id} in {region}"))?;

        Ok(())
    }
}

impl DatabaseApi for SdkApi {
    async fn list_db_instances(&self, region: &str) -> Result<Vec<DbInstance>> {
        debug!(region, "listing RDS instances");

        let client = self.rds(region);
        let mut instances = Vec::new();
        let mut marker = None;

        loop {
            let response = client
                .describe_db_instances()
                .set_marker(marker)
                .send()
                .await
                .with_context(|| format!("describing database instances in {region}"))?;

            for db in response.db_instances() {
                instances.push(DbInstance {
                    id: db.db_instance_identifier().unwrap_or_default().to_string(),
                    status: db.db_instance_status().unwrap_or_default().to_string(),
                    class: db.db_instance_class().unwrap_or_default().to_string(),
                });
            }

            marker = response.marker().map(str::to_string);
            if marker.is_none() {
                break;
            }
        }

        Ok(instances)
    }
}

impl StackApi for SdkApi {
    async fn list_stacks(&self, region: &str) -> Result<Vec<StackInfo>> {
        debug!(region, "listing CloudFormation stacks");

        let client = self.cloudformation(region);
        let mut stacks = Vec::new();
        let mut next_token = None;

        loop {
            let response = client
                .describe_stacks()
                .set_next_token(next_token)
                .send()
                .await
                .with_context(|| format!("describing stacks in {region}"))?;

            for stack in response.stacks() {
                stacks.push(StackInfo {
                    name: stack.stack_name().unwrap_or_default().to_string(),
                    status: stack
                        .stack_status()
                        .map(|status| status.as_str().to_string())
                        .unwrap_or_default(),
                });
            }

            next_token = response.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }

        Ok(stacks)
    }
}

/// Converts an SDK instance into the read view the rest of the agent uses.
fn instance_view(instance: &aws_sdk_ec2::types::Instance) -> Ec2Instance {
    let tags: HashMap<String, String> = instance
        .tags()
        .iter()
        .filter_map(|tag| {
            let key = tag.key()?.to_string();
            let value = tag.value().unwrap_or_default().to_string();
            Some((key, value))
        })
        .collect();

    Ec2Instance {
        id: instance.instance_id().unwrap_or_default().to_string(),
        state: instance
            .state()
            .and_then(|state| state.name())
            .map(|name| name.as_str().to_string())
            .unwrap_or_default(),
        instance_type: instance
            .instance_type()
            .map(|t| t.as_str().to_string())
            .unwrap_or_default(),
        virtualization_type: instance
            .virtualization_type()
            .map(|v| v.as_str().to_string())
            .unwrap_or_default(),
        key_name: instance.key_name().map(str::to_string),
        public_dns: instance
            .public_dns_name()
            .filter(|dns| !dns.is_empty())
            .map(str::to_string),
        launch_time: instance.launch_time().map(|time| time.secs()),
        tags,
    }
}
