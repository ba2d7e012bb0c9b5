//! Core data models for the carbon accounting engine

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One reading from an external resource monitor.
///
/// Disk and network fields are cumulative counters (bytes since boot).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    /// Unix timestamp in seconds
    pub timestamp: f64,
    pub system_cpu_percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_cpu_percent: Option<f64>,
    pub memory_used_gb: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_memory_mb: Option<f64>,
    #[serde(default)]
    pub disk_read_bytes: u64,
    #[serde(default)]
    pub disk_write_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_bytes_sent: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_bytes_recv: Option<u64>,
}

impl ResourceSample {
    /// Sample with only system CPU and memory populated
    pub fn new(timestamp: f64, system_cpu_percent: f64, memory_used_gb: f64) -> Self {
        Self {
            timestamp,
            system_cpu_percent,
            script_cpu_percent: None,
            memory_used_gb,
            script_memory_mb: None,
            disk_read_bytes: 0,
            disk_write_bytes: 0,
            network_bytes_sent: None,
            network_bytes_recv: None,
        }
    }

    pub fn with_disk(mut self, read_bytes: u64, write_bytes: u64) -> Self {
        self.disk_read_bytes = read_bytes;
        self.disk_write_bytes = write_bytes;
        self
    }

    pub fn with_network(mut self, sent_bytes: u64, recv_bytes: u64) -> Self {
        self.network_bytes_sent = Some(sent_bytes);
        self.network_bytes_recv = Some(recv_bytes);
        self
    }

    pub fn with_script(mut self, cpu_percent: f64, memory_mb: f64) -> Self {
        self.script_cpu_percent = Some(cpu_percent);
        self.script_memory_mb = Some(memory_mb);
        self
    }

    pub fn has_network(&self) -> bool {
        self.network_bytes_sent.is_some() || self.network_bytes_recv.is_some()
    }
}

/// Watts attributed to each resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PowerBreakdown {
    pub cpu_watts: f64,
    pub memory_watts: f64,
    pub disk_watts: f64,
    pub network_watts: f64,
    pub total_watts: f64,
}

impl PowerBreakdown {
    pub fn new(cpu_watts: f64, memory_watts: f64, disk_watts: f64, network_watts: f64) -> Self {
        Self {
            cpu_watts,
            memory_watts,
            disk_watts,
            network_watts,
            total_watts: cpu_watts + memory_watts + disk_watts + network_watts,
        }
    }

    /// Each term as a percentage of the total (all zero when total is zero)
    pub fn distribution(&self) -> PowerDistribution {
        let share = |w: f64| {
            if self.total_watts > 0.0 {
                w / self.total_watts * 100.0
            } else {
                0.0
            }
        };
        PowerDistribution {
            cpu_percent: share(self.cpu_watts),
            memory_percent: share(self.memory_watts),
            disk_percent: share(self.disk_watts),
            network_percent: share(self.network_watts),
        }
    }
}

impl std::ops::Add for PowerBreakdown {
    type Output = PowerBreakdown;

    fn add(self, rhs: PowerBreakdown) -> PowerBreakdown {
        PowerBreakdown::new(
            self.cpu_watts + rhs.cpu_watts,
            self.memory_watts + rhs.memory_watts,
            self.disk_watts + rhs.disk_watts,
            self.network_watts + rhs.network_watts,
        )
    }
}

/// Share of total power per resource, in percent
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PowerDistribution {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub network_percent: f64,
}

/// Emissions normalised by utilisation
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyMetrics {
    pub co2_per_cpu_percent: f64,
    pub co2_per_gb_memory: f64,
    pub watts_per_cpu_percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUtilization {
    /// Script CPU as a percentage of system CPU, when script CPU was sampled
    pub cpu_efficiency: Option<f64>,
    /// Mean memory as a percentage of installed memory, when known
    pub memory_utilization_percent: Option<f64>,
    pub power_distribution: PowerDistribution,
    /// Resources observed below the idle threshold (cloud audits)
    #[serde(default)]
    pub idle_resources: usize,
}

/// Which activity family an audit covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityCategory {
    AwsResource,
    LocalProcess,
    PersonalItem,
}

impl ActivityCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwsResource => "aws_resource",
            Self::LocalProcess => "local_process",
            Self::PersonalItem => "personal_item",
        }
    }
}

impl fmt::Display for ActivityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How per-sample utilisation becomes power
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationStrategy {
    /// Mean CPU/memory over the window and first-to-last counter deltas,
    /// fed through the power model once
    #[default]
    MeanUtilization,
    /// Power computed per interval between consecutive samples and
    /// integrated over their timestamps
    PerSampleIntegration,
}

/// Outcome of one monitored session or one category audit.
///
/// Numeric fields keep full precision; rounding is a display concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditResult {
    pub category: ActivityCategory,
    /// Set when there was nothing to measure; all totals are zero
    pub no_data: bool,
    pub total_co2_kg: f64,
    pub total_energy_kwh: f64,
    pub duration_hours: f64,
    pub carbon_intensity: f64,
    #[serde(default)]
    pub estimated_cost_usd: f64,
    pub avg_system_cpu_percent: f64,
    pub avg_script_cpu_percent: Option<f64>,
    pub avg_memory_gb: f64,
    pub peak_memory_gb: f64,
    pub avg_script_memory_mb: Option<f64>,
    pub total_disk_io_gb: f64,
    pub total_network_gb: Option<f64>,
    pub power_breakdown: PowerBreakdown,
    pub efficiency: EfficiencyMetrics,
    pub utilization: ResourceUtilization,
    /// CO2 kg per sub-category (service, consumption group, ...)
    #[serde(default)]
    pub category_breakdown: BTreeMap<String, f64>,
    pub samples_analyzed: usize,
    #[serde(default)]
    pub strategy: AggregationStrategy,
}

impl AuditResult {
    /// Zero-valued result flagged as "no data"
    pub fn empty(category: ActivityCategory, duration_hours: f64, carbon_intensity: f64) -> Self {
        Self {
            category,
            no_data: true,
            total_co2_kg: 0.0,
            total_energy_kwh: 0.0,
            duration_hours,
            carbon_intensity,
            estimated_cost_usd: 0.0,
            avg_system_cpu_percent: 0.0,
            avg_script_cpu_percent: None,
            avg_memory_gb: 0.0,
            peak_memory_gb: 0.0,
            avg_script_memory_mb: None,
            total_disk_io_gb: 0.0,
            total_network_gb: None,
            power_breakdown: PowerBreakdown::default(),
            efficiency: EfficiencyMetrics::default(),
            utilization: ResourceUtilization::default(),
            category_breakdown: BTreeMap::new(),
            samples_analyzed: 0,
            strategy: AggregationStrategy::default(),
        }
    }

    /// CO2 per hour of observed window (zero for instantaneous audits)
    pub fn co2_kg_per_hour(&self) -> f64 {
        if self.duration_hours > 0.0 {
            self.total_co2_kg / self.duration_hours
        } else {
            0.0
        }
    }
}
