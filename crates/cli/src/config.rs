//! Configuration management for the CLI

use anyhow::{Context, Result};
use carbon_lib::{AggregationStrategy, DeviceParams, EmissionFactorStore, FactorOverrides};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Prefix for environment overrides, e.g. `CARBON_GUARD_DEVICE__CPU_TDP_WATTS=95`
const ENV_PREFIX: &str = "CARBON_GUARD";
const FILE_STEM: &str = "carbon-guard";
const EXTENSIONS: [&str; 3] = ["yaml", "toml", "json"];

/// Written by `carbon-guard config init`
pub const SAMPLE_CONFIG: &str = r#"# Carbon Guard configuration
#
# Every key is optional. Environment variables override this file, e.g.
#   CARBON_GUARD_DEVICE__CPU_TDP_WATTS=95

device:
  cpu_tdp_watts: 65.0
  memory_power_per_gb: 3.0
  disk_power_per_gb: 2.0
  disk_power_cap_watts: 10.0
  network_power_per_gb: 0.1
  carbon_intensity: 0.000475
  electricity_cost_per_kwh: 0.12
  clamp_cpu_percent: false
  carbon_intensity_by_region: {}

aws:
  default_region: us-east-1
  idle_cpu_threshold_percent: 10.0
  carbon_intensity_by_region: {}

local:
  aggregation: mean_utilization
  base_system_power_watts: 20.0

plan:
  executions_per_month: 100.0

data_directory: carbon_data
"#;

/// Cloud audit settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsSettings {
    /// Region used when an inventory file leaves it empty
    pub default_region: String,
    /// Extra per-region intensities, applied on top of `device`
    pub carbon_intensity_by_region: BTreeMap<String, f64>,
    pub idle_cpu_threshold_percent: f64,
}

impl Default for AwsSettings {
    fn default() -> Self {
        Self {
            default_region: "us-east-1".to_string(),
            carbon_intensity_by_region: BTreeMap::new(),
            idle_cpu_threshold_percent: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSettings {
    pub aggregation: AggregationStrategy,
    pub base_system_power_watts: f64,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            aggregation: AggregationStrategy::default(),
            base_system_power_watts: 20.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanSettings {
    /// How often the locally audited workload runs per month
    pub executions_per_month: f64,
}

impl Default for PlanSettings {
    fn default() -> Self {
        Self {
            executions_per_month: 100.0,
        }
    }
}

/// CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CarbonGuardConfig {
    pub device: DeviceParams,
    pub aws: AwsSettings,
    pub local: LocalSettings,
    pub plan: PlanSettings,
    pub factors: FactorOverrides,
    /// Where `--save` writes when no file name is given
    pub data_directory: PathBuf,
}

impl Default for CarbonGuardConfig {
    fn default() -> Self {
        Self {
            device: DeviceParams::default(),
            aws: AwsSettings::default(),
            local: LocalSettings::default(),
            plan: PlanSettings::default(),
            factors: FactorOverrides::default(),
            data_directory: PathBuf::from("carbon_data"),
        }
    }
}

impl CarbonGuardConfig {
    /// Load configuration from file and environment.
    ///
    /// An explicit path must exist; otherwise the first of
    /// `./carbon-guard.{yaml,toml,json}` and `~/.carbon-guard.*` is used.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        match explicit {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Config file not found: {}", path.display());
                }
                builder = builder.add_source(config::File::from(path));
            }
            None => {
                if let Some(path) = Self::discover() {
                    debug!(path = %path.display(), "Using config file");
                    builder = builder.add_source(config::File::from(path.as_path()));
                }
            }
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?;

        let config: Self = settings
            .try_deserialize()
            .context("Failed to parse configuration")?;
        config
            .device
            .validate()
            .context("Invalid device parameters in configuration")?;
        Ok(config)
    }

    fn discover() -> Option<PathBuf> {
        let local = EXTENSIONS
            .iter()
            .map(|ext| PathBuf::from(format!("{FILE_STEM}.{ext}")));
        let home = dirs_next::home_dir().into_iter().flat_map(|home| {
            EXTENSIONS
                .iter()
                .map(move |ext| home.join(format!(".{FILE_STEM}.{ext}")))
        });
        local.chain(home).find(|p| p.is_file())
    }

    /// Default tables with the configured overrides merged on top
    pub fn factor_store(&self) -> Result<EmissionFactorStore> {
        EmissionFactorStore::defaults()
            .with_overrides(&self.factors)
            .context("Invalid emission factor overrides")
    }

    /// Device parameters for cloud audits, with the aws region map applied
    pub fn aws_params(&self) -> DeviceParams {
        let mut params = self.device.clone();
        params.carbon_intensity_by_region.extend(
            self.aws
                .carbon_intensity_by_region
                .iter()
                .map(|(k, v)| (k.clone(), *v)),
        );
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = CarbonGuardConfig::default();
        assert_eq!(config.device.cpu_tdp_watts, 65.0);
        assert_eq!(config.aws.idle_cpu_threshold_percent, 10.0);
        assert_eq!(config.local.base_system_power_watts, 20.0);
        assert_eq!(config.plan.executions_per_month, 100.0);
        assert_eq!(config.data_directory, PathBuf::from("carbon_data"));
    }

    #[test]
    fn test_sample_config_loads() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(SAMPLE_CONFIG.as_bytes()).unwrap();

        let config = CarbonGuardConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.device.cpu_tdp_watts, 65.0);
        assert_eq!(config.aws.default_region, "us-east-1");
        assert_eq!(config.local.aggregation, AggregationStrategy::MeanUtilization);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[device]\ncpu_tdp_watts = 95.0").unwrap();

        let config = CarbonGuardConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.device.cpu_tdp_watts, 95.0);
        assert_eq!(config.device.memory_power_per_gb, 3.0);
        assert_eq!(config.plan.executions_per_month, 100.0);
    }

    #[test]
    fn test_invalid_device_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[device]\ncpu_tdp_watts = -1.0").unwrap();

        assert!(CarbonGuardConfig::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        assert!(CarbonGuardConfig::load(Some(Path::new("/nonexistent/carbon-guard.yaml"))).is_err());
    }

    #[test]
    fn test_aws_region_map_extends_device() {
        let mut config = CarbonGuardConfig::default();
        config.device.carbon_intensity_by_region.insert("us-east-1".into(), 0.0004);
        config.aws.carbon_intensity_by_region.insert("us-east-1".into(), 0.0003);
        config.aws.carbon_intensity_by_region.insert("eu-north-1".into(), 0.00001);

        let params = config.aws_params();
        assert_eq!(params.carbon_intensity_by_region["us-east-1"], 0.0003);
        assert_eq!(params.carbon_intensity_by_region["eu-north-1"], 0.00001);
    }

    #[test]
    fn test_factor_overrides_apply() {
        let mut config = CarbonGuardConfig::default();
        config
            .factors
            .tables
            .entry(carbon_lib::FactorTable::InstancePower)
            .or_default()
            .insert("m5.large".into(), 90.0);

        let store = config.factor_store().unwrap();
        assert_eq!(
            store.lookup(carbon_lib::FactorTable::InstancePower, "m5.large").unwrap(),
            90.0
        );
    }
}
