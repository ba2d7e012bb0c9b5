//! Device and category parameters consumed by the power model

use crate::error::{ensure_non_negative, EngineError, Result};
use crate::factors::{EmissionFactorStore, FactorTable, GLOBAL_CARBON_INTENSITY};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Typical desktop CPU TDP in watts
pub const DEFAULT_CPU_TDP_WATTS: f64 = 65.0;
pub const DEFAULT_MEMORY_POWER_PER_GB: f64 = 3.0;
pub const DEFAULT_DISK_POWER_PER_GB: f64 = 2.0;
pub const DEFAULT_DISK_POWER_CAP_WATTS: f64 = 10.0;
pub const DEFAULT_NETWORK_POWER_PER_GB: f64 = 0.1;
pub const DEFAULT_ELECTRICITY_COST_PER_KWH: f64 = 0.12;

/// Power model parameters for one device or resource category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceParams {
    pub cpu_tdp_watts: f64,
    pub memory_power_per_gb: f64,
    /// Watts per GB of disk I/O moved during the window
    pub disk_power_per_gb: f64,
    pub disk_power_cap_watts: f64,
    /// Watts per GB of network traffic during the window
    pub network_power_per_gb: f64,
    /// Default kg CO2 per kWh when no region applies
    pub carbon_intensity: f64,
    pub carbon_intensity_by_region: BTreeMap<String, f64>,
    pub electricity_cost_per_kwh: f64,
    /// Installed memory, enables memory utilisation reporting
    pub total_memory_gb: Option<f64>,
    /// Clamp CPU readings into 0..=100 instead of rejecting them
    pub clamp_cpu_percent: bool,
}

impl Default for DeviceParams {
    fn default() -> Self {
        Self {
            cpu_tdp_watts: DEFAULT_CPU_TDP_WATTS,
            memory_power_per_gb: DEFAULT_MEMORY_POWER_PER_GB,
            disk_power_per_gb: DEFAULT_DISK_POWER_PER_GB,
            disk_power_cap_watts: DEFAULT_DISK_POWER_CAP_WATTS,
            network_power_per_gb: DEFAULT_NETWORK_POWER_PER_GB,
            carbon_intensity: GLOBAL_CARBON_INTENSITY,
            carbon_intensity_by_region: BTreeMap::new(),
            electricity_cost_per_kwh: DEFAULT_ELECTRICITY_COST_PER_KWH,
            total_memory_gb: None,
            clamp_cpu_percent: false,
        }
    }
}

impl DeviceParams {
    pub fn with_tdp(mut self, watts: f64) -> Self {
        self.cpu_tdp_watts = watts;
        self
    }

    pub fn with_carbon_intensity(mut self, kg_per_kwh: f64) -> Self {
        self.carbon_intensity = kg_per_kwh;
        self
    }

    pub fn with_total_memory(mut self, gb: f64) -> Self {
        self.total_memory_gb = Some(gb);
        self
    }

    pub fn clamping(mut self) -> Self {
        self.clamp_cpu_percent = true;
        self
    }

    /// Reject negative or non-finite parameters
    pub fn validate(&self) -> Result<()> {
        ensure_non_negative("cpu_tdp_watts", self.cpu_tdp_watts)?;
        ensure_non_negative("memory_power_per_gb", self.memory_power_per_gb)?;
        ensure_non_negative("disk_power_per_gb", self.disk_power_per_gb)?;
        ensure_non_negative("disk_power_cap_watts", self.disk_power_cap_watts)?;
        ensure_non_negative("network_power_per_gb", self.network_power_per_gb)?;
        ensure_non_negative("carbon_intensity", self.carbon_intensity)?;
        ensure_non_negative("electricity_cost_per_kwh", self.electricity_cost_per_kwh)?;
        for (region, value) in &self.carbon_intensity_by_region {
            ensure_non_negative(&format!("carbon_intensity_by_region.{}", region), *value)?;
        }
        if let Some(total) = self.total_memory_gb {
            ensure_non_negative("total_memory_gb", total)?;
            if total == 0.0 {
                return Err(EngineError::invalid_input(
                    "total_memory_gb",
                    total,
                    "installed memory must be positive",
                ));
            }
        }
        Ok(())
    }

    /// Carbon intensity for `region`.
    ///
    /// Resolution order: this object's per-region map, the store's exact
    /// region entry, then `carbon_intensity`.
    pub fn carbon_intensity_for(&self, region: Option<&str>, store: &EmissionFactorStore) -> f64 {
        let Some(region) = region else {
            return self.carbon_intensity;
        };
        if let Some(v) = self.carbon_intensity_by_region.get(region) {
            return *v;
        }
        store
            .lookup_exact(FactorTable::RegionIntensity, region)
            .unwrap_or(self.carbon_intensity)
    }
}
