//! Cloud resource audit
//!
//! Consumes an inventory that has already been fetched from the provider
//! (instances, databases, functions, buckets) and accounts each resource
//! through the shared power model and converter.

use super::{ActivitySource, Footprint};
use crate::energy::SECONDS_PER_HOUR;
use crate::error::{ensure_non_negative, EngineError, Result};
use crate::factors::{EmissionFactorStore, FactorSource, FactorTable};
use crate::models::{
    ActivityCategory, AggregationStrategy, AuditResult, EfficiencyMetrics, PowerBreakdown,
    ResourceUtilization,
};
use crate::params::DeviceParams;
use crate::power::{check_cpu_percent, BYTES_PER_GB};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Managed databases draw more than the bare instance
pub const RDS_POWER_OVERHEAD: f64 = 1.2;
/// Managed databases cost more than the bare instance
pub const RDS_COST_MULTIPLIER: f64 = 1.5;
/// Watts per GB of configured function memory while executing
pub const LAMBDA_WATTS_PER_GB: f64 = 2.0;
/// Share of an hour a function is assumed to be executing
pub const LAMBDA_UTILIZATION: f64 = 0.1;
pub const LAMBDA_PRICE_PER_GB_SECOND: f64 = 0.0000166667;
pub const S3_WATTS_PER_TB: f64 = 0.5;
pub const S3_PRICE_PER_GB_MONTH: f64 = 0.023;
pub const HOURS_PER_MONTH: f64 = 720.0;
pub const DEFAULT_IDLE_CPU_THRESHOLD_PERCENT: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AwsService {
    Ec2,
    Rds,
    Lambda,
    S3,
}

impl AwsService {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ec2 => "ec2",
            Self::Rds => "rds",
            Self::Lambda => "lambda",
            Self::S3 => "s3",
        }
    }
}

impl fmt::Display for AwsService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_ec2_state() -> String {
    "running".to_string()
}

fn default_rds_status() -> String {
    "available".to_string()
}

/// One resource from a fetched inventory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "service", rename_all = "lowercase")]
pub enum CloudResource {
    Ec2 {
        id: String,
        instance_type: String,
        #[serde(default = "default_ec2_state")]
        state: String,
        /// Average CPU utilisation over the metrics window, when fetched
        #[serde(default, skip_serializing_if = "Option::is_none")]
        avg_cpu_percent: Option<f64>,
    },
    Rds {
        id: String,
        instance_class: String,
        #[serde(default)]
        engine: String,
        #[serde(default = "default_rds_status")]
        status: String,
    },
    Lambda {
        name: String,
        memory_mb: f64,
    },
    S3 {
        name: String,
        #[serde(default)]
        size_bytes: u64,
    },
}

impl CloudResource {
    pub fn ec2(id: impl Into<String>, instance_type: impl Into<String>) -> Self {
        Self::Ec2 {
            id: id.into(),
            instance_type: instance_type.into(),
            state: default_ec2_state(),
            avg_cpu_percent: None,
        }
    }

    pub fn rds(id: impl Into<String>, instance_class: impl Into<String>) -> Self {
        Self::Rds {
            id: id.into(),
            instance_class: instance_class.into(),
            engine: String::new(),
            status: default_rds_status(),
        }
    }

    pub fn lambda(name: impl Into<String>, memory_mb: f64) -> Self {
        Self::Lambda {
            name: name.into(),
            memory_mb,
        }
    }

    pub fn s3(name: impl Into<String>, size_bytes: u64) -> Self {
        Self::S3 {
            name: name.into(),
            size_bytes,
        }
    }

    pub fn service(&self) -> AwsService {
        match self {
            Self::Ec2 { .. } => AwsService::Ec2,
            Self::Rds { .. } => AwsService::Rds,
            Self::Lambda { .. } => AwsService::Lambda,
            Self::S3 { .. } => AwsService::S3,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Ec2 { id, .. } | Self::Rds { id, .. } => id,
            Self::Lambda { name, .. } | Self::S3 { name, .. } => name,
        }
    }

    /// Instance type, database class, memory size or bucket size as text
    pub fn kind(&self) -> String {
        match self {
            Self::Ec2 { instance_type, .. } => instance_type.clone(),
            Self::Rds { instance_class, .. } => instance_class.clone(),
            Self::Lambda { memory_mb, .. } => format!("{} MB", memory_mb),
            Self::S3 { size_bytes, .. } => format!("{:.2} GB", *size_bytes as f64 / BYTES_PER_GB),
        }
    }

    /// Stopped instances and unavailable databases draw nothing
    pub fn is_active(&self) -> bool {
        match self {
            Self::Ec2 { state, .. } => state.eq_ignore_ascii_case("running"),
            Self::Rds { status, .. } => status.eq_ignore_ascii_case("available"),
            Self::Lambda { .. } | Self::S3 { .. } => true,
        }
    }

    pub fn avg_cpu_percent(&self) -> Option<f64> {
        match self {
            Self::Ec2 { avg_cpu_percent, .. } => *avg_cpu_percent,
            _ => None,
        }
    }
}

/// Power lookup key for a database class (`db.m5.large` -> `m5.large`)
fn rds_instance_key(class: &str) -> &str {
    class.strip_prefix("db.").unwrap_or(class)
}

/// Rated power of a resource.
///
/// Compute resources land in the CPU term, storage in the disk term.
pub fn resource_power(resource: &CloudResource, store: &EmissionFactorStore) -> Result<PowerBreakdown> {
    let breakdown = match resource {
        CloudResource::Ec2 { instance_type, .. } => {
            let watts = store.lookup(FactorTable::InstancePower, instance_type)?;
            PowerBreakdown::new(watts, 0.0, 0.0, 0.0)
        }
        CloudResource::Rds { instance_class, .. } => {
            let watts = store.lookup(FactorTable::InstancePower, rds_instance_key(instance_class))?;
            PowerBreakdown::new(watts * RDS_POWER_OVERHEAD, 0.0, 0.0, 0.0)
        }
        CloudResource::Lambda { memory_mb, .. } => {
            let memory_gb = ensure_non_negative("memory_mb", *memory_mb)? / 1024.0;
            PowerBreakdown::new(memory_gb * LAMBDA_WATTS_PER_GB * LAMBDA_UTILIZATION, 0.0, 0.0, 0.0)
        }
        CloudResource::S3 { size_bytes, .. } => {
            let size_tb = *size_bytes as f64 / BYTES_PER_GB / 1024.0;
            PowerBreakdown::new(0.0, 0.0, size_tb * S3_WATTS_PER_TB, 0.0)
        }
    };
    Ok(breakdown)
}

/// Estimated on-demand cost of a resource per hour, USD
pub fn resource_hourly_cost(resource: &CloudResource, store: &EmissionFactorStore) -> Result<f64> {
    let cost = match resource {
        CloudResource::Ec2 { instance_type, .. } => store.lookup(FactorTable::InstanceCost, instance_type)?,
        CloudResource::Rds { instance_class, .. } => {
            store.lookup(FactorTable::InstanceCost, rds_instance_key(instance_class))? * RDS_COST_MULTIPLIER
        }
        CloudResource::Lambda { memory_mb, .. } => {
            let memory_gb = ensure_non_negative("memory_mb", *memory_mb)? / 1024.0;
            memory_gb * LAMBDA_PRICE_PER_GB_SECOND * SECONDS_PER_HOUR * LAMBDA_UTILIZATION
        }
        CloudResource::S3 { size_bytes, .. } => {
            *size_bytes as f64 / BYTES_PER_GB * S3_PRICE_PER_GB_MONTH / HOURS_PER_MONTH
        }
    };
    Ok(cost)
}

fn default_window_hours() -> f64 {
    1.0
}

/// Already-fetched resources of one region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudInventory {
    /// Empty when the fetcher did not record one; callers fill in a default
    #[serde(default)]
    pub region: String,
    #[serde(default = "default_window_hours")]
    pub window_hours: f64,
    #[serde(default)]
    pub resources: Vec<CloudResource>,
}

impl CloudInventory {
    pub fn new(region: impl Into<String>, resources: Vec<CloudResource>) -> Self {
        Self {
            region: region.into(),
            window_hours: default_window_hours(),
            resources,
        }
    }
}

/// Accounted figures for one active resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceFootprint {
    pub id: String,
    pub service: AwsService,
    pub kind: String,
    pub power_watts: f64,
    pub co2_kg_per_hour: f64,
    pub cost_usd_per_hour: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_cpu_percent: Option<f64>,
    pub idle: bool,
    /// Set when the power figure came from a fallback rather than the table
    pub estimated_power: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceTotals {
    pub resources: usize,
    pub power_watts: f64,
    pub co2_kg_per_hour: f64,
    pub cost_usd_per_hour: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwsAuditReport {
    pub region: String,
    pub carbon_intensity: f64,
    pub window_hours: f64,
    pub resources: Vec<ResourceFootprint>,
    pub services: BTreeMap<AwsService, ServiceTotals>,
    /// Stopped or unavailable resources left out of the totals
    pub inactive_resources: usize,
    pub total_co2_kg_per_hour: f64,
    pub total_cost_usd_per_hour: f64,
    pub result: AuditResult,
}

impl AwsAuditReport {
    pub fn idle_resource_ids(&self) -> Vec<&str> {
        self.resources
            .iter()
            .filter(|r| r.idle)
            .map(|r| r.id.as_str())
            .collect()
    }
}

/// Audits fetched inventories against one factor store
#[derive(Debug, Clone)]
pub struct AwsAuditor<'a> {
    store: &'a EmissionFactorStore,
    params: &'a DeviceParams,
    idle_cpu_threshold_percent: f64,
}

impl<'a> AwsAuditor<'a> {
    pub fn new(store: &'a EmissionFactorStore, params: &'a DeviceParams) -> Self {
        Self {
            store,
            params,
            idle_cpu_threshold_percent: DEFAULT_IDLE_CPU_THRESHOLD_PERCENT,
        }
    }

    pub fn with_idle_threshold(mut self, percent: f64) -> Self {
        self.idle_cpu_threshold_percent = percent;
        self
    }

    pub fn audit(&self, inventory: &CloudInventory) -> Result<AwsAuditReport> {
        let window_hours = ensure_non_negative("window_hours", inventory.window_hours)?;
        if !(0.0..=100.0).contains(&self.idle_cpu_threshold_percent) {
            return Err(EngineError::invalid_input(
                "idle_cpu_threshold_percent",
                self.idle_cpu_threshold_percent,
                "threshold must be within 0..=100",
            ));
        }
        let intensity = self
            .params
            .carbon_intensity_for(Some(&inventory.region), self.store);

        let mut resources = Vec::new();
        let mut services: BTreeMap<AwsService, ServiceTotals> = BTreeMap::new();
        let mut hourly = Footprint::default();
        let mut inactive = 0usize;

        for (index, resource) in inventory.resources.iter().enumerate() {
            let avg_cpu = resource
                .avg_cpu_percent()
                .map(|cpu| {
                    check_cpu_percent(Some(index), "avg_cpu_percent", cpu, self.params.clamp_cpu_percent)
                })
                .transpose()?;
            if !resource.is_active() {
                inactive += 1;
                continue;
            }

            let source = ActivitySource::AwsResource {
                resource,
                carbon_intensity: intensity,
            };
            let per_hour = source.footprint(self.store, SECONDS_PER_HOUR)?;
            let idle = avg_cpu
                .map(|cpu| cpu < self.idle_cpu_threshold_percent)
                .unwrap_or(false);

            let totals = services.entry(resource.service()).or_default();
            totals.resources += 1;
            totals.power_watts += per_hour.power.total_watts;
            totals.co2_kg_per_hour += per_hour.co2_kg;
            totals.cost_usd_per_hour += per_hour.cost_usd;
            hourly = hourly + per_hour;

            resources.push(ResourceFootprint {
                id: resource.id().to_string(),
                service: resource.service(),
                kind: resource.kind(),
                power_watts: per_hour.power.total_watts,
                co2_kg_per_hour: per_hour.co2_kg,
                cost_usd_per_hour: per_hour.cost_usd,
                avg_cpu_percent: avg_cpu,
                idle,
                estimated_power: self.power_is_estimated(resource)?,
            });
        }

        let idle_count = resources.iter().filter(|r| r.idle).count();
        let result = self.window_result(&resources, &services, hourly, window_hours, intensity, idle_count);

        debug!(
            region = %inventory.region,
            resources = resources.len(),
            inactive,
            idle = idle_count,
            co2_kg_per_hour = hourly.co2_kg,
            "Audited cloud inventory"
        );

        Ok(AwsAuditReport {
            region: inventory.region.clone(),
            carbon_intensity: intensity,
            window_hours,
            resources,
            services,
            inactive_resources: inactive,
            total_co2_kg_per_hour: hourly.co2_kg,
            total_cost_usd_per_hour: hourly.cost_usd,
            result,
        })
    }

    fn power_is_estimated(&self, resource: &CloudResource) -> Result<bool> {
        let key = match resource {
            CloudResource::Ec2 { instance_type, .. } => instance_type.as_str(),
            CloudResource::Rds { instance_class, .. } => rds_instance_key(instance_class),
            _ => return Ok(false),
        };
        let lookup = self.store.lookup_detailed(FactorTable::InstancePower, key)?;
        Ok(!matches!(lookup.source, FactorSource::Exact))
    }

    /// Scale hourly figures to the inventory window
    fn window_result(
        &self,
        resources: &[ResourceFootprint],
        services: &BTreeMap<AwsService, ServiceTotals>,
        hourly: Footprint,
        window_hours: f64,
        intensity: f64,
        idle_count: usize,
    ) -> AuditResult {
        if resources.is_empty() {
            let mut empty = AuditResult::empty(ActivityCategory::AwsResource, window_hours, intensity);
            empty.utilization.idle_resources = idle_count;
            return empty;
        }

        let measured: Vec<f64> = resources.iter().filter_map(|r| r.avg_cpu_percent).collect();
        let avg_cpu = if measured.is_empty() {
            0.0
        } else {
            measured.iter().sum::<f64>() / measured.len() as f64
        };

        let power = hourly.power;
        let total_co2 = hourly.co2_kg * window_hours;
        let ratio = |n: f64, d: f64| if d > 0.0 { n / d } else { 0.0 };

        AuditResult {
            category: ActivityCategory::AwsResource,
            no_data: false,
            total_co2_kg: total_co2,
            total_energy_kwh: hourly.energy_kwh * window_hours,
            duration_hours: window_hours,
            carbon_intensity: intensity,
            estimated_cost_usd: hourly.cost_usd * window_hours,
            avg_system_cpu_percent: avg_cpu,
            avg_script_cpu_percent: None,
            avg_memory_gb: 0.0,
            peak_memory_gb: 0.0,
            avg_script_memory_mb: None,
            total_disk_io_gb: 0.0,
            total_network_gb: None,
            power_breakdown: power,
            efficiency: EfficiencyMetrics {
                co2_per_cpu_percent: ratio(total_co2, avg_cpu),
                co2_per_gb_memory: 0.0,
                watts_per_cpu_percent: ratio(power.total_watts, avg_cpu),
            },
            utilization: ResourceUtilization {
                cpu_efficiency: None,
                memory_utilization_percent: None,
                power_distribution: power.distribution(),
                idle_resources: idle_count,
            },
            category_breakdown: services
                .iter()
                .map(|(service, totals)| (service.to_string(), totals.co2_kg_per_hour * window_hours))
                .collect(),
            samples_analyzed: resources.len(),
            strategy: AggregationStrategy::MeanUtilization,
        }
    }
}
