//! Metrics aggregation
//!
//! Turns an ordered sequence of resource samples into an [`AuditResult`]:
//! averages and peaks in a single pass, counter deltas between readings,
//! power through the power model, then energy and CO2 through the shared
//! converter.

#[cfg(test)]
mod tests;

use crate::energy::to_energy_co2;
use crate::error::{ensure_non_negative, EngineError, Result};
use crate::models::{
    ActivityCategory, AggregationStrategy, AuditResult, EfficiencyMetrics, PowerBreakdown,
    ResourceSample, ResourceUtilization,
};
use crate::params::DeviceParams;
use crate::power::{
    bytes_to_gb, check_cpu_percent, check_memory_gb, compute_power, counter_delta, PowerInput,
};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Aggregate samples with the default (mean utilisation) strategy
pub fn aggregate(
    samples: &[ResourceSample],
    duration_seconds: f64,
    carbon_intensity: f64,
    params: &DeviceParams,
) -> Result<AuditResult> {
    MetricsAggregator::new(params.clone())?.aggregate(samples, duration_seconds, carbon_intensity)
}

/// Configured aggregator for one device
#[derive(Debug, Clone)]
pub struct MetricsAggregator {
    params: DeviceParams,
    strategy: AggregationStrategy,
    category: ActivityCategory,
}

/// Validated per-sample utilisation, after optional CPU clamping
#[derive(Debug, Clone, Copy)]
struct CleanSample {
    timestamp: f64,
    cpu_percent: f64,
    memory_gb: f64,
}

/// Single-pass statistics over a session
#[derive(Debug, Default)]
struct SessionStats {
    cpu_sum: f64,
    script_cpu_sum: f64,
    script_cpu_count: usize,
    memory_sum: f64,
    memory_peak: f64,
    script_memory_sum: f64,
    script_memory_count: usize,
    network_seen: bool,
}

/// Power and measured volumes produced by a strategy
#[derive(Debug)]
struct StrategyOutput {
    power: PowerBreakdown,
    disk_io_bytes: u64,
    network_bytes: u64,
}

impl MetricsAggregator {
    pub fn new(params: DeviceParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            strategy: AggregationStrategy::default(),
            category: ActivityCategory::LocalProcess,
        })
    }

    pub fn with_strategy(mut self, strategy: AggregationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_category(mut self, category: ActivityCategory) -> Self {
        self.category = category;
        self
    }

    pub fn params(&self) -> &DeviceParams {
        &self.params
    }

    pub fn strategy(&self) -> AggregationStrategy {
        self.strategy
    }

    /// Aggregate an ordered session into an audit result.
    ///
    /// Empty input yields a zero-valued result with `no_data` set. Any
    /// invalid sample fails the whole call before a result is produced.
    pub fn aggregate(
        &self,
        samples: &[ResourceSample],
        duration_seconds: f64,
        carbon_intensity: f64,
    ) -> Result<AuditResult> {
        let duration_seconds = ensure_non_negative("duration_seconds", duration_seconds)?;
        let carbon_intensity = ensure_non_negative("carbon_intensity", carbon_intensity)?;
        let duration_hours = duration_seconds / 3600.0;

        if samples.is_empty() {
            debug!(category = %self.category, "No samples to aggregate");
            let mut result = AuditResult::empty(self.category, duration_hours, carbon_intensity);
            result.strategy = self.strategy;
            return Ok(result);
        }

        let (clean, stats) = self.validate_and_summarize(samples)?;
        let n = samples.len() as f64;

        let avg_cpu = stats.cpu_sum / n;
        let avg_memory = stats.memory_sum / n;
        let avg_script_cpu =
            (stats.script_cpu_count > 0).then(|| stats.script_cpu_sum / stats.script_cpu_count as f64);
        let avg_script_memory = (stats.script_memory_count > 0)
            .then(|| stats.script_memory_sum / stats.script_memory_count as f64);

        let output = match self.strategy {
            AggregationStrategy::MeanUtilization => self.mean_utilization(samples, avg_cpu, avg_memory)?,
            AggregationStrategy::PerSampleIntegration => {
                self.per_sample_integration(samples, &clean, avg_cpu, avg_memory)?
            }
        };
        let power = output.power;

        let converted = to_energy_co2(power.total_watts, duration_seconds, carbon_intensity)?;
        let co2 = converted.co2_kg;

        let efficiency = EfficiencyMetrics {
            co2_per_cpu_percent: ratio(co2, avg_cpu),
            co2_per_gb_memory: ratio(co2, avg_memory),
            watts_per_cpu_percent: ratio(power.total_watts, avg_cpu),
        };

        let distribution = power.distribution();
        let utilization = ResourceUtilization {
            cpu_efficiency: avg_script_cpu.map(|s| ratio(s, avg_cpu) * 100.0),
            memory_utilization_percent: self
                .params
                .total_memory_gb
                .map(|total| avg_memory / total * 100.0),
            power_distribution: distribution,
            idle_resources: 0,
        };

        let mut category_breakdown = BTreeMap::new();
        for (resource, share) in [
            ("cpu", distribution.cpu_percent),
            ("memory", distribution.memory_percent),
            ("disk", distribution.disk_percent),
            ("network", distribution.network_percent),
        ] {
            if share > 0.0 {
                category_breakdown.insert(resource.to_string(), co2 * share / 100.0);
            }
        }

        debug!(
            category = %self.category,
            strategy = ?self.strategy,
            samples = samples.len(),
            avg_cpu_percent = avg_cpu,
            total_watts = power.total_watts,
            co2_kg = co2,
            "Aggregated session"
        );

        Ok(AuditResult {
            category: self.category,
            no_data: false,
            total_co2_kg: co2,
            total_energy_kwh: converted.energy_kwh,
            duration_hours,
            carbon_intensity,
            estimated_cost_usd: converted.energy_kwh * self.params.electricity_cost_per_kwh,
            avg_system_cpu_percent: avg_cpu,
            avg_script_cpu_percent: avg_script_cpu,
            avg_memory_gb: avg_memory,
            peak_memory_gb: stats.memory_peak,
            avg_script_memory_mb: avg_script_memory,
            total_disk_io_gb: bytes_to_gb(output.disk_io_bytes),
            total_network_gb: stats.network_seen.then(|| bytes_to_gb(output.network_bytes)),
            power_breakdown: power,
            efficiency,
            utilization,
            category_breakdown,
            samples_analyzed: samples.len(),
            strategy: self.strategy,
        })
    }

    /// Validate every sample and gather sums and peaks in one pass
    fn validate_and_summarize(
        &self,
        samples: &[ResourceSample],
    ) -> Result<(Vec<CleanSample>, SessionStats)> {
        let clamp = self.params.clamp_cpu_percent;
        let mut stats = SessionStats::default();
        let mut clean = Vec::with_capacity(samples.len());
        let mut previous_ts = f64::NEG_INFINITY;

        for (i, s) in samples.iter().enumerate() {
            if !s.timestamp.is_finite() {
                return Err(EngineError::invalid_sample(
                    Some(i),
                    "timestamp",
                    s.timestamp,
                    "not a finite number",
                ));
            }
            if s.timestamp < previous_ts {
                return Err(EngineError::invalid_sample(
                    Some(i),
                    "timestamp",
                    s.timestamp,
                    "samples must be ordered by timestamp",
                ));
            }
            previous_ts = s.timestamp;

            let cpu = check_cpu_percent(Some(i), "system_cpu_percent", s.system_cpu_percent, clamp)?;
            let memory = check_memory_gb(Some(i), "memory_used_gb", s.memory_used_gb)?;

            if let Some(script_cpu) = s.script_cpu_percent {
                stats.script_cpu_sum +=
                    check_cpu_percent(Some(i), "script_cpu_percent", script_cpu, clamp)?;
                stats.script_cpu_count += 1;
            }
            if let Some(script_mb) = s.script_memory_mb {
                stats.script_memory_sum += check_memory_gb(Some(i), "script_memory_mb", script_mb)?;
                stats.script_memory_count += 1;
            }

            stats.cpu_sum += cpu;
            stats.memory_sum += memory;
            stats.memory_peak = stats.memory_peak.max(memory);
            stats.network_seen |= s.has_network();

            clean.push(CleanSample {
                timestamp: s.timestamp,
                cpu_percent: cpu,
                memory_gb: memory,
            });
        }

        Ok((clean, stats))
    }

    /// Window means and first-to-last deltas through the power model once
    fn mean_utilization(
        &self,
        samples: &[ResourceSample],
        avg_cpu: f64,
        avg_memory: f64,
    ) -> Result<StrategyOutput> {
        let (disk_io_bytes, network_bytes) = match (samples.first(), samples.last()) {
            (Some(first), Some(last)) => io_between(first, last),
            _ => (0, 0),
        };
        let input = PowerInput::new(avg_cpu, avg_memory).with_io(disk_io_bytes, network_bytes);
        Ok(StrategyOutput {
            power: compute_power(&input, &self.params)?,
            disk_io_bytes,
            network_bytes,
        })
    }

    /// Power per interval, time-weighted into an average breakdown.
    ///
    /// Sessions without a positive time span fall back to the mean strategy.
    fn per_sample_integration(
        &self,
        samples: &[ResourceSample],
        clean: &[CleanSample],
        avg_cpu: f64,
        avg_memory: f64,
    ) -> Result<StrategyOutput> {
        let span = match (clean.first(), clean.last()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => 0.0,
        };
        if span <= 0.0 {
            return self.mean_utilization(samples, avg_cpu, avg_memory);
        }

        let mut weighted = PowerBreakdown::default();
        let mut disk_total = 0u64;
        let mut network_total = 0u64;

        for (i, pair) in clean.windows(2).enumerate() {
            let dt = pair[1].timestamp - pair[0].timestamp;
            if dt <= 0.0 {
                continue;
            }
            let (disk, network) = io_between(&samples[i], &samples[i + 1]);
            disk_total = disk_total.saturating_add(disk);
            network_total = network_total.saturating_add(network);

            let input = PowerInput::new(
                (pair[0].cpu_percent + pair[1].cpu_percent) / 2.0,
                (pair[0].memory_gb + pair[1].memory_gb) / 2.0,
            )
            .with_io(disk, network);
            let p = compute_power(&input, &self.params)?;
            let w = dt / span;
            weighted = weighted
                + PowerBreakdown::new(
                    p.cpu_watts * w,
                    p.memory_watts * w,
                    p.disk_watts * w,
                    p.network_watts * w,
                );
        }

        Ok(StrategyOutput {
            power: weighted,
            disk_io_bytes: disk_total,
            network_bytes: network_total,
        })
    }
}

/// Which cumulative counters went backwards between two readings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct CounterResets {
    pub disk: bool,
    pub network: bool,
}

pub(crate) fn counter_resets(first: &ResourceSample, last: &ResourceSample) -> CounterResets {
    let went_back = |a: Option<u64>, b: Option<u64>| matches!((a, b), (Some(a), Some(b)) if b < a);
    CounterResets {
        disk: last.disk_read_bytes < first.disk_read_bytes
            || last.disk_write_bytes < first.disk_write_bytes,
        network: went_back(first.network_bytes_sent, last.network_bytes_sent)
            || went_back(first.network_bytes_recv, last.network_bytes_recv),
    }
}

/// Disk and network bytes moved between two readings.
/// Counters that went backwards contribute zero.
fn io_between(first: &ResourceSample, last: &ResourceSample) -> (u64, u64) {
    let resets = counter_resets(first, last);
    if resets.disk {
        warn!(
            first_ts = first.timestamp,
            last_ts = last.timestamp,
            "Disk counter reset detected, treating segment delta as zero"
        );
    }
    if resets.network {
        warn!(
            first_ts = first.timestamp,
            last_ts = last.timestamp,
            "Network counter reset detected, treating segment delta as zero"
        );
    }
    let disk = counter_delta(first.disk_read_bytes, last.disk_read_bytes)
        .saturating_add(counter_delta(first.disk_write_bytes, last.disk_write_bytes));

    let optional_delta = |a: Option<u64>, b: Option<u64>| match (a, b) {
        (Some(a), Some(b)) => counter_delta(a, b),
        _ => 0,
    };
    let network = optional_delta(first.network_bytes_sent, last.network_bytes_sent)
        .saturating_add(optional_delta(first.network_bytes_recv, last.network_bytes_recv));

    (disk, network)
}

/// Merge audits of one category that ran side by side (several regions,
/// several stages of one job) into a single result.
///
/// Totals, power terms, per-key breakdowns and idle counts add up, the
/// window is the longest input window and means are weighted by sample
/// count. No-data inputs are skipped; if every input is empty the first
/// one is returned unchanged, and a lone measured input is returned as is.
pub fn combine_results(results: &[AuditResult]) -> Result<AuditResult> {
    let first = results
        .first()
        .ok_or_else(|| EngineError::invalid_input("results", 0, "nothing to combine"))?;
    if let Some(other) = results.iter().find(|r| r.category != first.category) {
        return Err(EngineError::invalid_input(
            "category",
            other.category,
            "combined audits must share one category",
        ));
    }
    let measured: Vec<&AuditResult> = results.iter().filter(|r| !r.no_data).collect();
    match measured.as_slice() {
        [] => return Ok(first.clone()),
        [only] => return Ok((*only).clone()),
        _ => {}
    }

    let mut combined = AuditResult::empty(first.category, 0.0, 0.0);
    combined.no_data = false;
    combined.strategy = measured[0].strategy;
    let mut weights = 0.0;

    for r in &measured {
        combined.total_co2_kg += r.total_co2_kg;
        combined.total_energy_kwh += r.total_energy_kwh;
        combined.estimated_cost_usd += r.estimated_cost_usd;
        combined.duration_hours = combined.duration_hours.max(r.duration_hours);
        combined.total_disk_io_gb += r.total_disk_io_gb;
        combined.total_network_gb = match (combined.total_network_gb, r.total_network_gb) {
            (Some(a), Some(b)) => Some(a + b),
            (a, b) => a.or(b),
        };
        combined.peak_memory_gb = combined.peak_memory_gb.max(r.peak_memory_gb);
        combined.power_breakdown = combined.power_breakdown + r.power_breakdown;
        combined.utilization.idle_resources += r.utilization.idle_resources;
        combined.samples_analyzed += r.samples_analyzed;
        for (key, co2) in &r.category_breakdown {
            *combined.category_breakdown.entry(key.clone()).or_default() += co2;
        }

        let w = r.samples_analyzed.max(1) as f64;
        weights += w;
        combined.avg_system_cpu_percent += r.avg_system_cpu_percent * w;
        combined.avg_memory_gb += r.avg_memory_gb * w;
    }
    combined.avg_system_cpu_percent /= weights;
    combined.avg_memory_gb /= weights;

    // Energy-weighted grid intensity reproduces the summed CO2
    combined.carbon_intensity = if combined.total_energy_kwh > 0.0 {
        combined.total_co2_kg / combined.total_energy_kwh
    } else {
        measured[0].carbon_intensity
    };

    let power = combined.power_breakdown;
    combined.utilization.power_distribution = power.distribution();
    combined.efficiency = EfficiencyMetrics {
        co2_per_cpu_percent: ratio(combined.total_co2_kg, combined.avg_system_cpu_percent),
        co2_per_gb_memory: ratio(combined.total_co2_kg, combined.avg_memory_gb),
        watts_per_cpu_percent: ratio(power.total_watts, combined.avg_system_cpu_percent),
    };

    debug!(
        inputs = results.len(),
        measured = measured.len(),
        co2_kg = combined.total_co2_kg,
        "Combined audit results"
    );
    Ok(combined)
}

/// `numerator / denominator`, zero when the denominator is not positive
fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}
