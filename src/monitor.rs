use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use crate::aws::{
    ComputeApi, DatabaseApi, DbInstance, Ec2Instance, StackApi, REGION_ALL, SERVICE_REGIONS,
    STATE_PENDING, STATE_RUNNING, STATE_SHUTTING_DOWN, STATE_STOPPED, STATE_TERMINATED,
};
use crate::classify::{Classifier, TAG_OWNER, TAG_USAGE};
use crate::clock::PollClock;
use crate::measure::Measure;
use crate::pricing::{Platform, PriceTable};
use crate::sink::MeasureSink;

/// Metric group names, as the reporting side knows them.
pub mod groups {
    pub const CLOUD_FORMATION: &str = "Amazon Cloud Formation";
    pub const EC2_INSTANCE: &str = "Amazon EC2 Instance";
    pub const EC2_INSTANCE_COST: &str = "Amazon EC2 Instance Cost";
    pub const RDS_INSTANCE: &str = "Amazon RDS Instance";
    pub const RDS_INSTANCE_COST: &str = "Amazon RDS Instance Cost";
}

/// Measure names within the metric groups.
pub mod measures {
    pub const STACKS_ACTIVE: &str = "ActiveCount";

    pub const EC2_ACTIVE: &str = "EC2ActiveCount";
    pub const EC2_STOPPED: &str = "EC2CountStopped";
    pub const EC2_PENDING: &str = "EC2CountPending";
    pub const EC2_RUNNING: &str = "EC2CountRunning";
    pub const EC2_SHUTTING_DOWN: &str = "EC2CountShutting-down";
    pub const EC2_TERMINATED: &str = "EC2CountTerminated";

    pub const EC2_COST_OVERALL: &str = "CostOverall";

    pub const RDS_ACTIVE: &str = "RDSActiveCount";
    pub const RDS_BY_CLASS: &str = "RDSCountByClass";
    pub const RDS_COST_OVERALL: &str = "RDSCostOverall";
    pub const RDS_COST_BY_CLASS: &str = "RDSCostByClass";
}

// Dimension labels for dynamic measures.
pub const DIM_USAGE: &str = TAG_USAGE;
pub const DIM_OWNER: &str = TAG_OWNER;
pub const DIM_STATUS: &str = "Status";
pub const DIM_CLASS: &str = "Class";
pub const DIM_TYPE: &str = "Type";

/// Stack statuses with a registered per-status count measure.
const STACK_STATUSES: &[&str] = &[
    "CREATE_IN_PROGRESS",
    "CREATE_FAILED",
    "CREATE_COMPLETE",
    "ROLLBACK_IN_PROGRESS",
    "ROLLBACK_FAILED",
    "ROLLBACK_COMPLETE",
    "DELETE_IN_PROGRESS",
    "DELETE_FAILED",
];

/// Stack statuses excluded from the overall active count.
const INACTIVE_STACK_STATUSES: &[&str] = &[
    "CREATE_FAILED",
    "ROLLBACK_FAILED",
    "ROLLBACK_COMPLETE",
    "DELETE_FAILED",
];

/// Per-instance-type cost measures: measure name and the instance type it
/// covers. Types without an entry still show up in the by-type dimension of
/// the overall cost measure.
pub const EC2_TYPE_COST_MEASURES: &[(&str, &str)] = &[
    // Standard on-demand instances.
    ("CostM1Small", "m1.small"),
    ("CostM1Medium", "m1.medium"),
    ("CostM1Large", "m1.large"),
    ("CostM1XLarge", "m1.xlarge"),
    // Second generation standard on-demand instances.
    ("CostM3Medium", "m3.medium"),
    ("CostM3Large", "m3.large"),
    ("CostM3XLarge", "m3.xlarge"),
    ("CostM32XLarge", "m3.2xlarge"),
    // Micro on-demand instances.
    ("CostT1Micro", "t1.micro"),
    // High-memory on-demand instances.
    ("CostM2XLarge", "m2.xlarge"),
    ("CostM22XLarge", "m2.2xlarge"),
    ("CostM24XLarge", "m2.4xlarge"),
    ("CostCR18XLarge", "cr1.8xlarge"),
    // Compute optimized, previous generation.
    ("CostC1Medium", "c1.medium"),
    ("CostC1XLarge", "c1.xlarge"),
    // Compute optimized, current generation.
    ("CostC3Large", "c3.large"),
    ("CostC3XLarge", "c3.xlarge"),
    ("CostC32XLarge", "c3.2xlarge"),
    ("CostC34XLarge", "c3.4xlarge"),
    ("CostC38XLarge", "c3.8xlarge"),
    // GPU instances, current generation.
    ("CostG22XLarge", "g2.2xlarge"),
    // Cluster compute instances.
    ("CostCC14XLarge", "cc1.4xlarge"),
    ("CostCC28XLarge", "cc2.8xlarge"),
    // GPU instances, previous generation.
    ("CostCG14XLarge", "cg1.4xlarge"),
    // Storage optimized, current generation.
    ("CostI2XLarge", "i2.xlarge"),
    ("CostI22XLarge", "i2.2xlarge"),
    ("CostI24XLarge", "i2.4xlarge"),
    ("CostI28XLarge", "i2.8xlarge"),
    ("CostHS18XLarge", "hs1.8xlarge"),
    // Storage optimized, previous generation.
    ("CostHI14XLarge", "hi1.4xlarge"),
];

/// Canonical list of all (group, measure) pairs this monitor can emit.
/// Used to seed the sink registry.
pub fn measure_catalog() -> Vec<(String, String)> {
    let mut catalog = Vec::new();

    let mut push = |group: &str, name: String| catalog.push((group.to_string(), name));

    push(groups::CLOUD_FORMATION, measures::STACKS_ACTIVE.to_string());
    for status in STACK_STATUSES {
        push(groups::CLOUD_FORMATION, format!("Count_{status}"));
    }

    for name in [
        measures::EC2_ACTIVE,
        measures::EC2_STOPPED,
        measures::EC2_PENDING,
        measures::EC2_RUNNING,
        measures::EC2_SHUTTING_DOWN,
        measures::EC2_TERMINATED,
    ] {
        push(groups::EC2_INSTANCE, name.to_string());
    }

    push(
        groups::EC2_INSTANCE_COST,
        measures::EC2_COST_OVERALL.to_string(),
    );
    for (name, _) in EC2_TYPE_COST_MEASURES {
        push(groups::EC2_INSTANCE_COST, name.to_string());
    }

    push(groups::RDS_INSTANCE, measures::RDS_ACTIVE.to_string());
    push(groups::RDS_INSTANCE, measures::RDS_BY_CLASS.to_string());
    push(
        groups::RDS_INSTANCE_COST,
        measures::RDS_COST_OVERALL.to_string(),
    );
    push(
        groups::RDS_INSTANCE_COST,
        measures::RDS_COST_BY_CLASS.to_string(),
    );

    catalog
}

/// Maps an EC2 instance state to its per-status count measure.
fn ec2_status_measure(state: &str) -> Option<&'static str> {
    match state {
        STATE_STOPPED => Some(measures::EC2_STOPPED),
        STATE_PENDING => Some(measures::EC2_PENDING),
        STATE_RUNNING => Some(measures::EC2_RUNNING),
        STATE_SHUTTING_DOWN => Some(measures::EC2_SHUTTING_DOWN),
        STATE_TERMINATED => Some(measures::EC2_TERMINATED),
        _ => None,
    }
}

/// Which regions a poll cycle queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionFilter {
    All,
    One(String),
}

impl RegionFilter {
    /// Parses the configured region: the `All` sentinel, a readable region
    /// name or a raw region id.
    pub fn from_config(region: &str) -> Result<Self> {
        if region == REGION_ALL {
            return Ok(Self::All);
        }

        match crate::aws::region_id(region) {
            Some(id) => Ok(Self::One(id.to_string())),
            None => bail!(
                "configured region {region:?} was not found in the list of known regions: {:?}",
                crate::aws::REGION_NAMES
                    .iter()
                    .map(|(name, _)| *name)
                    .collect::<Vec<_>>(),
            ),
        }
    }

    /// Whether a region discovered via the API should be queried.
    pub fn includes(&self, region: &str) -> bool {
        match self {
            Self::All => true,
            Self::One(active) => active == region,
        }
    }

    /// Regions to fan out over for services resolved from the static table.
    pub fn service_regions(&self) -> Vec<String> {
        match self {
            Self::All => SERVICE_REGIONS.iter().map(|r| r.to_string()).collect(),
            Self::One(active) => vec![active.clone()],
        }
    }
}

/// Runs poll cycles against an account and reports the aggregated measures.
///
/// A cycle walks a fixed sequence of stages, each fetching one resource
/// kind and reporting its metric group before the next starts. A fetch
/// failure aborts the remainder of the cycle: measures already reported
/// stay reported, the clock is not persisted, and the caller decides when
/// to try again. Partial metrics beat silently wrong ones.
pub struct Monitor<C, D, S, K> {
    compute: C,
    database: D,
    stacks: S,
    sink: K,
    prices: PriceTable,
    classifier: Classifier,
    clock: PollClock,
    region: RegionFilter,
}

impl<C, D, S, K> Monitor<C, D, S, K>
where
    C: ComputeApi,
    D: DatabaseApi,
    S: StackApi,
    K: MeasureSink,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        compute: C,
        database: D,
        stacks: S,
        sink: K,
        prices: PriceTable,
        classifier: Classifier,
        clock: PollClock,
        region: RegionFilter,
    ) -> Self {
        Self {
            compute,
            database,
            stacks,
            sink,
            prices,
            classifier,
            clock,
            region,
        }
    }

    /// Runs one full poll cycle.
    pub async fn run_cycle(&mut self) -> Result<()> {
        info!(region = ?self.region, "executing account monitor poll cycle");

        // 1. Cloud formation stacks per status.
        self.measure_stacks().await?;

        // 2. EC2 instances per state, usage and owner.
        let instances = self.measure_instances().await?;

        // 3. Elapsed time since the previous cycle scales the cost measures.
        let factor = self.clock.advance();
        info!(factor, "adjusting costs for time since last poll");

        // 4. EC2 instance costs.
        self.measure_instance_costs(&instances, factor)?;

        // 5. RDS instances and their costs.
        let db_instances = self.measure_db_instances().await?;
        self.measure_db_costs(&db_instances, factor)?;

        // 6. The cycle completed, so the accrual window may close.
        self.clock.persist();

        Ok(())
    }

    async fn measure_stacks(&mut self) -> Result<()> {
        let mut active = Measure::new();
        let mut per_status: HashMap<String, Measure> = HashMap::new();

        for region in self.region.service_regions() {
            let stacks = self
                .stacks
                .list_stacks(&region)
                .await
                .with_context(|| format!("fetching cloud formation stacks in {region}"))?;

            debug!(%region, stacks = stacks.len(), "fetched cloud formation stacks");

            for stack in stacks {
                if !INACTIVE_STACK_STATUSES.contains(&stack.status.as_str()) {
                    active.increment();
                }

                per_status.entry(stack.status).or_default().increment();
            }
        }

        self.write_measure(groups::CLOUD_FORMATION, measures::STACKS_ACTIVE, &active);

        for (status, measure) in &per_status {
            self.write_measure(groups::CLOUD_FORMATION, &format!("Count_{status}"), measure);
        }

        Ok(())
    }

    async fn measure_instances(&mut self) -> Result<Vec<(String, Ec2Instance)>> {
        let regions = self
            .compute
            .list_regions()
            .await
            .context("fetching region list")?;

        let mut count = Measure::with_dimension(DIM_USAGE);
        let mut count_by_owner = Measure::with_dimension(DIM_OWNER);
        let mut per_status: HashMap<String, Measure> = HashMap::new();
        let mut all = Vec::new();

        for region in regions {
            if !self.region.includes(&region.name) {
                continue;
            }

            let instances = self
                .compute
                .list_instances(&region.name)
                .await
                .with_context(|| format!("fetching instances in {}", region.name))?;

            debug!(
                region = %region.name,
                instances = instances.len(),
                "fetched EC2 instances",
            );

            for instance in instances {
                let usage = self.classifier.usage(&instance.tags, instance.key_name.as_deref());
                let owner = self.classifier.owner(&instance.tags);

                // Stopped and terminated instances are excluded from the
                // overall count by definition.
                if instance.is_active() {
                    count.increment();
                    count.add_dimension(&usage, 1.0);

                    count_by_owner.increment();
                    count_by_owner.add_dimension(&owner, 1.0);
                }

                let status = per_status
                    .entry(instance.state.clone())
                    .or_insert_with(|| Measure::with_dimension(DIM_USAGE));
                status.increment();
                status.add_dimension(&usage, 1.0);

                all.push((region.name.clone(), instance));
            }
        }

        self.write_measure(groups::EC2_INSTANCE, measures::EC2_ACTIVE, &count);
        self.write_measure(groups::EC2_INSTANCE, measures::EC2_ACTIVE, &count_by_owner);

        for (state, measure) in &per_status {
            match ec2_status_measure(state) {
                Some(name) => self.write_measure(groups::EC2_INSTANCE, name, measure),
                None => warn!(
                    %state,
                    value = measure.value(),
                    "found unknown instance state, could not report its count",
                ),
            }
        }

        Ok(all)
    }

    fn measure_instance_costs(
        &mut self,
        instances: &[(String, Ec2Instance)],
        factor: f64,
    ) -> Result<()> {
        let mut overall = Measure::with_dimension(DIM_USAGE);
        let mut by_type = Measure::with_dimension(DIM_TYPE);
        let mut by_owner = Measure::with_dimension(DIM_OWNER);
        overall.set_adjustment_factor(factor);
        by_type.set_adjustment_factor(factor);
        by_owner.set_adjustment_factor(factor);

        let mut per_type: HashMap<String, Measure> = HashMap::new();

        for (region, instance) in instances {
            if !instance.is_active() {
                continue;
            }

            let platform = Platform::from_virtualization(&instance.virtualization_type);
            let cost = self
                .prices
                .instance_cost(region, &instance.instance_type, platform)?;

            let usage = self.classifier.usage(&instance.tags, instance.key_name.as_deref());
            let owner = self.classifier.owner(&instance.tags);

            overall.add(cost);
            overall.add_dimension(&usage, cost);

            by_type.add(cost);
            by_type.add_dimension(&instance.instance_type, cost);

            by_owner.add(cost);
            by_owner.add_dimension(&owner, cost);

            let type_measure = per_type
                .entry(instance.instance_type.clone())
                .or_insert_with(|| {
                    let mut measure = Measure::with_dimension(DIM_USAGE);
                    measure.set_adjustment_factor(factor);
                    measure
                });
            type_measure.add(cost);
            type_measure.add_dimension(&usage, cost);
        }

        self.write_measure(groups::EC2_INSTANCE_COST, measures::EC2_COST_OVERALL, &overall);
        self.write_measure(groups::EC2_INSTANCE_COST, measures::EC2_COST_OVERALL, &by_type);
        self.write_measure(groups::EC2_INSTANCE_COST, measures::EC2_COST_OVERALL, &by_owner);

        for (name, instance_type) in EC2_TYPE_COST_MEASURES {
            if let Some(measure) = per_type.get(*instance_type) {
                self.write_measure(groups::EC2_INSTANCE_COST, name, measure);
            }
        }

        Ok(())
    }

    async fn measure_db_instances(&mut self) -> Result<Vec<(String, DbInstance)>> {
        let mut count = Measure::with_dimension(DIM_STATUS);
        let mut by_class = Measure::with_dimension(DIM_CLASS);
        let mut all = Vec::new();

        for region in self.region.service_regions() {
            let instances = self
                .database
                .list_db_instances(&region)
                .await
                .with_context(|| format!("fetching database instances in {region}"))?;

            debug!(%region, instances = instances.len(), "fetched RDS instances");

            for instance in instances {
                count.increment();
                count.add_dimension(&instance.status, 1.0);

                by_class.increment();
                by_class.add_dimension(&instance.class, 1.0);

                all.push((region.clone(), instance));
            }
        }

        self.write_measure(groups::RDS_INSTANCE, measures::RDS_ACTIVE, &count);
        self.write_measure(groups::RDS_INSTANCE, measures::RDS_BY_CLASS, &by_class);

        Ok(all)
    }

    fn measure_db_costs(&mut self, instances: &[(String, DbInstance)], factor: f64) -> Result<()> {
        let mut overall = Measure::with_dimension(DIM_STATUS);
        let mut by_class = Measure::with_dimension(DIM_CLASS);
        overall.set_adjustment_factor(factor);
        by_class.set_adjustment_factor(factor);

        for (region, instance) in instances {
            let cost = self.prices.db_cost(region, &instance.class)?;

            overall.add(cost);
            overall.add_dimension(&instance.status, cost);

            by_class.add(cost);
            by_class.add_dimension(&instance.class, cost);
        }

        self.write_measure(groups::RDS_INSTANCE_COST, measures::RDS_COST_OVERALL, &overall);
        self.write_measure(
            groups::RDS_INSTANCE_COST,
            measures::RDS_COST_BY_CLASS,
            &by_class,
        );

        Ok(())
    }

    /// Hands one finished measure to the sink, or warns when nobody
    /// subscribed to it.
    fn write_measure(&self, group: &str, name: &str, measure: &Measure) {
        match self.sink.resolve(group, name) {
            Some(handle) => {
                debug!(
                    group,
                    name,
                    value = measure.value(),
                    dimension = measure.dimension(),
                    "recording measure",
                );

                if let Err(e) = self.sink.record(handle, measure) {
                    warn!(group, name, error = %e, "could not record measure");
                }
            }
            None => {
                warn!(
                    group,
                    name,
                    value = measure.value(),
                    "measure is not registered with the sink, dropping value",
                );
            }
        }
    }
}
