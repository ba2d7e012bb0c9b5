//! Power model
//!
//! Linear, table-driven approximation of device power draw: CPU scales with
//! utilisation against TDP, memory with resident GB, disk and network with
//! the bytes moved during the window. Each term stays inspectable so callers
//! can attribute emissions per resource.

use crate::error::{EngineError, Result};
use crate::models::PowerBreakdown;
use crate::params::DeviceParams;

pub const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Utilisation figures for one power computation
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PowerInput {
    /// 0..=100
    pub cpu_percent: f64,
    pub memory_gb: f64,
    /// Bytes read + written during the window
    pub disk_io_bytes: u64,
    /// Bytes sent + received during the window
    pub network_bytes: u64,
}

impl PowerInput {
    pub fn new(cpu_percent: f64, memory_gb: f64) -> Self {
        Self {
            cpu_percent,
            memory_gb,
            ..Default::default()
        }
    }

    pub fn with_io(mut self, disk_io_bytes: u64, network_bytes: u64) -> Self {
        self.disk_io_bytes = disk_io_bytes;
        self.network_bytes = network_bytes;
        self
    }
}

/// Validated power model bound to one parameter set
#[derive(Debug, Clone)]
pub struct PowerModel {
    params: DeviceParams,
}

impl PowerModel {
    pub fn new(params: DeviceParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &DeviceParams {
        &self.params
    }

    pub fn compute(&self, input: &PowerInput) -> Result<PowerBreakdown> {
        compute_power(input, &self.params)
    }
}

/// Convert one utilisation reading into a per-resource power breakdown
pub fn compute_power(input: &PowerInput, params: &DeviceParams) -> Result<PowerBreakdown> {
    let cpu_percent = check_cpu_percent(None, "cpu_percent", input.cpu_percent, params.clamp_cpu_percent)?;
    let memory_gb = check_memory_gb(None, "memory_gb", input.memory_gb)?;

    let cpu_watts = cpu_percent / 100.0 * params.cpu_tdp_watts;
    let memory_watts = memory_gb * params.memory_power_per_gb;
    let disk_watts = (bytes_to_gb(input.disk_io_bytes) * params.disk_power_per_gb)
        .min(params.disk_power_cap_watts);
    let network_watts = bytes_to_gb(input.network_bytes) * params.network_power_per_gb;

    Ok(PowerBreakdown::new(
        cpu_watts,
        memory_watts,
        disk_watts,
        network_watts,
    ))
}

/// Validate a CPU percentage, clamping into 0..=100 when `clamp` is set.
/// NaN is rejected either way.
pub fn check_cpu_percent(
    index: Option<usize>,
    field: &'static str,
    value: f64,
    clamp: bool,
) -> Result<f64> {
    if value.is_nan() {
        return Err(EngineError::invalid_sample(index, field, value, "not a number"));
    }
    if (0.0..=100.0).contains(&value) {
        return Ok(value);
    }
    if clamp {
        return Ok(value.clamp(0.0, 100.0));
    }
    Err(EngineError::invalid_sample(
        index,
        field,
        value,
        "cpu percent outside 0..=100",
    ))
}

pub fn check_memory_gb(index: Option<usize>, field: &'static str, value: f64) -> Result<f64> {
    if !value.is_finite() {
        return Err(EngineError::invalid_sample(index, field, value, "not a finite number"));
    }
    if value < 0.0 {
        return Err(EngineError::invalid_sample(index, field, value, "memory must not be negative"));
    }
    Ok(value)
}

/// Bytes moved between two readings of a cumulative counter.
/// A decrease means the counter was reset and counts as zero.
pub fn counter_delta(first: u64, last: u64) -> u64 {
    last.saturating_sub(first)
}

pub fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_GB
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn params() -> DeviceParams {
        DeviceParams::default()
    }

    #[test]
    fn test_reference_breakdown() {
        let input = PowerInput::new(50.0, 4.0).with_io(1_073_741_824, 0);
        let p = compute_power(&input, &params()).unwrap();
        assert_eq!(p.cpu_watts, 32.5);
        assert_eq!(p.memory_watts, 12.0);
        assert_eq!(p.disk_watts, 2.0);
        assert_eq!(p.network_watts, 0.0);
        assert_eq!(p.total_watts, 46.5);
    }

    #[test]
    fn test_disk_power_capped() {
        let input = PowerInput::new(0.0, 0.0).with_io(100 * 1_073_741_824, 0);
        let p = compute_power(&input, &params()).unwrap();
        assert_eq!(p.disk_watts, 10.0);
    }

    #[test]
    fn test_network_power() {
        let input = PowerInput::new(0.0, 0.0).with_io(0, 10 * 1_073_741_824);
        let p = compute_power(&input, &params()).unwrap();
        assert!((p.network_watts - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_out_of_range_cpu_rejected() {
        let input = PowerInput::new(120.0, 1.0);
        let err = compute_power(&input, &params()).unwrap_err();
        assert_eq!(err.kind(), "invalid_sample");
    }

    #[test]
    fn test_out_of_range_cpu_clamped_when_opted_in() {
        let input = PowerInput::new(120.0, 0.0);
        let p = compute_power(&input, &params().clamping()).unwrap();
        assert_eq!(p.cpu_watts, 65.0);

        let input = PowerInput::new(-5.0, 0.0);
        let p = compute_power(&input, &params().clamping()).unwrap();
        assert_eq!(p.cpu_watts, 0.0);
    }

    #[test]
    fn test_nan_cpu_rejected_even_when_clamping() {
        let input = PowerInput::new(f64::NAN, 0.0);
        assert!(compute_power(&input, &params().clamping()).is_err());
    }

    #[test]
    fn test_negative_memory_rejected() {
        let input = PowerInput::new(10.0, -1.0);
        assert!(compute_power(&input, &params()).is_err());
    }

    #[test]
    fn test_model_validates_params() {
        assert!(PowerModel::new(params().with_tdp(f64::NAN)).is_err());
        let model = PowerModel::new(params()).unwrap();
        assert_eq!(model.compute(&PowerInput::new(100.0, 0.0)).unwrap().total_watts, 65.0);
    }

    #[test]
    fn test_counter_reset_is_zero() {
        assert_eq!(counter_delta(500, 200), 0);
        assert_eq!(counter_delta(200, 500), 300);
    }

    proptest! {
        #[test]
        fn cpu_power_is_linear(cpu in 0.0f64..=50.0, k in 0.0f64..=2.0) {
            let base = compute_power(&PowerInput::new(cpu, 0.0), &params()).unwrap();
            let scaled = compute_power(&PowerInput::new(cpu * k, 0.0), &params()).unwrap();
            prop_assert!((scaled.cpu_watts - base.cpu_watts * k).abs() < 1e-9);
        }

        #[test]
        fn counter_delta_never_negative(first in any::<u64>(), last in any::<u64>()) {
            let d = counter_delta(first, last);
            prop_assert!(d <= last);
            prop_assert_eq!(counter_delta(first, last), d);
        }

        #[test]
        fn breakdown_total_matches_terms(cpu in 0.0f64..=100.0, mem in 0.0f64..512.0, disk in any::<u32>(), net in any::<u32>()) {
            let p = compute_power(&PowerInput::new(cpu, mem).with_io(disk as u64, net as u64), &params()).unwrap();
            let sum = p.cpu_watts + p.memory_watts + p.disk_watts + p.network_watts;
            prop_assert!((p.total_watts - sum).abs() < 1e-9);
        }
    }
}
