use super::*;
use crate::power::BYTES_PER_GB;
use proptest::prelude::*;

const GB: u64 = 1_073_741_824;

fn reference_session() -> Vec<ResourceSample> {
    vec![
        ResourceSample::new(0.0, 40.0, 4.0).with_disk(0, 0),
        ResourceSample::new(60.0, 60.0, 4.0).with_disk(GB, 0),
    ]
}

fn aggregator() -> MetricsAggregator {
    MetricsAggregator::new(DeviceParams::default()).unwrap()
}

#[test]
fn test_reference_session() {
    let result = aggregate(&reference_session(), 60.0, 0.000475, &DeviceParams::default()).unwrap();

    assert!(!result.no_data);
    assert_eq!(result.samples_analyzed, 2);
    assert_eq!(result.avg_system_cpu_percent, 50.0);
    assert_eq!(result.power_breakdown.cpu_watts, 32.5);
    assert_eq!(result.power_breakdown.memory_watts, 12.0);
    assert_eq!(result.power_breakdown.disk_watts, 2.0);
    assert_eq!(result.power_breakdown.network_watts, 0.0);
    assert_eq!(result.power_breakdown.total_watts, 46.5);
    assert!((result.total_energy_kwh - 0.000775).abs() < 1e-15);
    assert!((result.total_co2_kg - 3.68125e-7).abs() < 1e-15);
    assert_eq!(result.total_disk_io_gb, 1.0);
    assert!(result.total_network_gb.is_none());
}

#[test]
fn test_empty_session_is_flagged_not_failed() {
    let result = aggregator().aggregate(&[], 60.0, 0.000475).unwrap();
    assert!(result.no_data);
    assert_eq!(result.total_co2_kg, 0.0);
    assert_eq!(result.samples_analyzed, 0);
    assert_eq!(result.duration_hours, 60.0 / 3600.0);
}

#[test]
fn test_single_sample_has_zero_deltas() {
    let samples = vec![ResourceSample::new(0.0, 20.0, 2.0)
        .with_disk(5 * GB, 5 * GB)
        .with_network(GB, GB)];
    let result = aggregator().aggregate(&samples, 30.0, 0.0005).unwrap();

    assert_eq!(result.total_disk_io_gb, 0.0);
    assert_eq!(result.total_network_gb, Some(0.0));
    assert_eq!(result.power_breakdown.disk_watts, 0.0);
    assert!((result.power_breakdown.cpu_watts - 13.0).abs() < 1e-9);
    assert_eq!(result.power_breakdown.memory_watts, 6.0);
}

#[test]
fn test_counter_reset_counts_as_zero() {
    let samples = vec![
        ResourceSample::new(0.0, 10.0, 1.0).with_disk(10 * GB, 0),
        ResourceSample::new(10.0, 10.0, 1.0).with_disk(GB, 0),
    ];
    let result = aggregator().aggregate(&samples, 10.0, 0.0005).unwrap();
    assert_eq!(result.total_disk_io_gb, 0.0);
    assert_eq!(result.power_breakdown.disk_watts, 0.0);
}

#[test]
fn test_network_counter_reset_is_detected_and_zeroed() {
    let first = ResourceSample::new(0.0, 10.0, 1.0).with_network(4 * GB, GB);
    let last = ResourceSample::new(10.0, 10.0, 1.0).with_network(GB, 2 * GB);

    let resets = counter_resets(&first, &last);
    assert!(resets.network);
    assert!(!resets.disk);

    let result = aggregator().aggregate(&[first, last], 10.0, 0.0005).unwrap();
    // sent went backwards, received moved 1 GB
    assert_eq!(result.total_network_gb, Some(1.0));
}

#[test]
fn test_missing_network_counters_are_not_a_reset() {
    let first = ResourceSample::new(0.0, 10.0, 1.0).with_network(4 * GB, GB);
    let last = ResourceSample::new(10.0, 10.0, 1.0).with_disk(GB, 0);
    assert_eq!(counter_resets(&first, &last), CounterResets::default());
}

#[test]
fn test_peak_and_mean_memory() {
    let samples = vec![
        ResourceSample::new(0.0, 10.0, 2.0),
        ResourceSample::new(1.0, 10.0, 6.0),
        ResourceSample::new(2.0, 10.0, 4.0),
    ];
    let result = aggregator().aggregate(&samples, 2.0, 0.0005).unwrap();
    assert_eq!(result.avg_memory_gb, 4.0);
    assert_eq!(result.peak_memory_gb, 6.0);
}

#[test]
fn test_optional_script_fields_absent_not_zero() {
    let result = aggregator().aggregate(&reference_session(), 60.0, 0.0005).unwrap();
    assert!(result.avg_script_cpu_percent.is_none());
    assert!(result.avg_script_memory_mb.is_none());
    assert!(result.utilization.cpu_efficiency.is_none());

    let samples = vec![
        ResourceSample::new(0.0, 50.0, 4.0).with_script(10.0, 200.0),
        ResourceSample::new(1.0, 50.0, 4.0),
        ResourceSample::new(2.0, 50.0, 4.0).with_script(30.0, 400.0),
    ];
    let result = aggregator().aggregate(&samples, 2.0, 0.0005).unwrap();
    assert_eq!(result.avg_script_cpu_percent, Some(20.0));
    assert_eq!(result.avg_script_memory_mb, Some(300.0));
    assert_eq!(result.utilization.cpu_efficiency, Some(40.0));
}

#[test]
fn test_network_delta_from_counters() {
    let samples = vec![
        ResourceSample::new(0.0, 0.0, 0.0).with_network(0, 0),
        ResourceSample::new(5.0, 0.0, 0.0).with_network(3 * GB, 7 * GB),
    ];
    let result = aggregator().aggregate(&samples, 5.0, 0.0005).unwrap();
    assert_eq!(result.total_network_gb, Some(10.0));
    assert!((result.power_breakdown.network_watts - 1.0).abs() < 1e-12);
    assert_eq!(result.utilization.power_distribution.network_percent, 100.0);
}

#[test]
fn test_efficiency_zero_when_idle() {
    let samples = vec![ResourceSample::new(0.0, 0.0, 0.0)];
    let result = aggregator().aggregate(&samples, 60.0, 0.0005).unwrap();
    assert_eq!(result.total_co2_kg, 0.0);
    assert_eq!(result.efficiency, EfficiencyMetrics::default());
    assert_eq!(result.utilization.power_distribution.cpu_percent, 0.0);
    assert!(result.category_breakdown.is_empty());
}

#[test]
fn test_efficiency_ratios() {
    let result = aggregator().aggregate(&reference_session(), 60.0, 0.000475).unwrap();
    assert!((result.efficiency.co2_per_cpu_percent - result.total_co2_kg / 50.0).abs() < 1e-18);
    assert!((result.efficiency.co2_per_gb_memory - result.total_co2_kg / 4.0).abs() < 1e-18);
    assert_eq!(result.efficiency.watts_per_cpu_percent, 46.5 / 50.0);
}

#[test]
fn test_distribution_and_breakdown_follow_power() {
    let result = aggregator().aggregate(&reference_session(), 60.0, 0.000475).unwrap();
    let d = result.utilization.power_distribution;
    assert!((d.cpu_percent + d.memory_percent + d.disk_percent + d.network_percent - 100.0).abs() < 1e-9);

    let attributed: f64 = result.category_breakdown.values().sum();
    assert!((attributed - result.total_co2_kg).abs() < 1e-15);
    assert!(!result.category_breakdown.contains_key("network"));
}

#[test]
fn test_memory_utilization_needs_installed_memory() {
    let agg = MetricsAggregator::new(DeviceParams::default().with_total_memory(16.0)).unwrap();
    let result = agg.aggregate(&reference_session(), 60.0, 0.0005).unwrap();
    assert_eq!(result.utilization.memory_utilization_percent, Some(25.0));
}

#[test]
fn test_invalid_sample_reports_index() {
    let samples = vec![
        ResourceSample::new(0.0, 10.0, 1.0),
        ResourceSample::new(1.0, 10.0, 1.0),
        ResourceSample::new(2.0, 140.0, 1.0),
    ];
    match aggregator().aggregate(&samples, 2.0, 0.0005) {
        Err(EngineError::InvalidSample { index, field, value, .. }) => {
            assert_eq!(index, Some(2));
            assert_eq!(field, "system_cpu_percent");
            assert_eq!(value, 140.0);
        }
        other => panic!("expected invalid sample, got {:?}", other),
    }
}

#[test]
fn test_out_of_range_cpu_clamped_when_opted_in() {
    let agg = MetricsAggregator::new(DeviceParams::default().clamping()).unwrap();
    let samples = vec![
        ResourceSample::new(0.0, 140.0, 0.0),
        ResourceSample::new(1.0, 60.0, 0.0),
    ];
    let result = agg.aggregate(&samples, 1.0, 0.0005).unwrap();
    assert_eq!(result.avg_system_cpu_percent, 80.0);
}

#[test]
fn test_unordered_timestamps_rejected() {
    let samples = vec![
        ResourceSample::new(10.0, 10.0, 1.0),
        ResourceSample::new(5.0, 10.0, 1.0),
    ];
    let err = aggregator().aggregate(&samples, 5.0, 0.0005).unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidSample { index: Some(1), field: "timestamp", .. }
    ));
}

#[test]
fn test_negative_memory_rejected() {
    let samples = vec![ResourceSample::new(0.0, 10.0, -1.0)];
    assert_eq!(
        aggregator().aggregate(&samples, 1.0, 0.0005).unwrap_err().kind(),
        "invalid_sample"
    );
}

#[test]
fn test_negative_duration_rejected_even_without_samples() {
    let err = aggregator().aggregate(&[], -1.0, 0.0005).unwrap_err();
    assert_eq!(err.kind(), "invalid_input");
}

#[test]
fn test_cost_uses_electricity_price() {
    let result = aggregator().aggregate(&reference_session(), 3600.0, 0.0005).unwrap();
    assert!((result.estimated_cost_usd - result.total_energy_kwh * 0.12).abs() < 1e-15);
}

#[test]
fn test_per_sample_matches_mean_for_two_samples() {
    let mean = aggregator().aggregate(&reference_session(), 60.0, 0.000475).unwrap();
    let integrated = aggregator()
        .with_strategy(AggregationStrategy::PerSampleIntegration)
        .aggregate(&reference_session(), 60.0, 0.000475)
        .unwrap();

    assert_eq!(integrated.strategy, AggregationStrategy::PerSampleIntegration);
    assert_eq!(integrated.power_breakdown, mean.power_breakdown);
    assert_eq!(integrated.total_co2_kg, mean.total_co2_kg);
}

#[test]
fn test_per_sample_weights_intervals_by_time() {
    // 10s at ~0% then 30s at ~100%
    let samples = vec![
        ResourceSample::new(0.0, 0.0, 0.0),
        ResourceSample::new(10.0, 0.0, 0.0),
        ResourceSample::new(40.0, 0.0, 0.0),
    ];
    let mut high = samples.clone();
    high[2].system_cpu_percent = 100.0;

    let result = aggregator()
        .with_strategy(AggregationStrategy::PerSampleIntegration)
        .aggregate(&high, 40.0, 0.0005)
        .unwrap();
    // second interval averages to 50% and carries 3/4 of the weight
    let expected = 0.75 * 0.5 * 65.0;
    assert!((result.power_breakdown.cpu_watts - expected).abs() < 1e-9);
}

#[test]
fn test_per_sample_resets_only_zero_their_segment() {
    let samples = vec![
        ResourceSample::new(0.0, 0.0, 0.0).with_disk(0, 0),
        ResourceSample::new(10.0, 0.0, 0.0).with_disk(GB, 0),
        ResourceSample::new(20.0, 0.0, 0.0).with_disk(0, 0),
        ResourceSample::new(30.0, 0.0, 0.0).with_disk(GB, 0),
    ];
    let mean = aggregator().aggregate(&samples, 30.0, 0.0005).unwrap();
    assert_eq!(mean.total_disk_io_gb, 1.0);

    let integrated = aggregator()
        .with_strategy(AggregationStrategy::PerSampleIntegration)
        .aggregate(&samples, 30.0, 0.0005)
        .unwrap();
    assert_eq!(integrated.total_disk_io_gb, 2.0);
}

#[test]
fn test_per_sample_without_time_span_falls_back() {
    let samples = vec![ResourceSample::new(5.0, 30.0, 1.0), ResourceSample::new(5.0, 50.0, 1.0)];
    let result = aggregator()
        .with_strategy(AggregationStrategy::PerSampleIntegration)
        .aggregate(&samples, 10.0, 0.0005)
        .unwrap();
    assert_eq!(result.power_breakdown.cpu_watts, 0.4 * 65.0);
}

#[test]
fn test_category_is_carried() {
    let result = aggregator()
        .with_category(ActivityCategory::AwsResource)
        .aggregate(&[], 0.0, 0.0)
        .unwrap();
    assert_eq!(result.category, ActivityCategory::AwsResource);
}

fn arb_session() -> impl Strategy<Value = Vec<ResourceSample>> {
    prop::collection::vec(
        (0.0f64..=100.0, 0.0f64..64.0, any::<u32>(), any::<u32>()),
        1..20,
    )
    .prop_map(|rows| {
        rows.into_iter()
            .enumerate()
            .map(|(i, (cpu, mem, disk, net))| {
                ResourceSample::new(i as f64, cpu, mem)
                    .with_disk(disk as u64, 0)
                    .with_network(net as u64, 0)
            })
            .collect()
    })
}

#[test]
fn test_combine_adds_side_by_side_results() {
    let a = aggregate(&reference_session(), 60.0, 0.000475, &DeviceParams::default()).unwrap();
    let quiet = vec![ResourceSample::new(0.0, 10.0, 1.0), ResourceSample::new(60.0, 10.0, 1.0)];
    let b = aggregate(&quiet, 120.0, 0.0002, &DeviceParams::default()).unwrap();
    let empty = AuditResult::empty(ActivityCategory::LocalProcess, 1.0, 0.0005);

    let combined = combine_results(&[a.clone(), empty, b.clone()]).unwrap();
    assert!(!combined.no_data);
    assert!((combined.total_co2_kg - (a.total_co2_kg + b.total_co2_kg)).abs() < 1e-18);
    assert_eq!(
        combined.power_breakdown.total_watts,
        a.power_breakdown.total_watts + b.power_breakdown.total_watts
    );
    assert_eq!(combined.duration_hours, b.duration_hours);
    assert_eq!(combined.samples_analyzed, 4);
    assert_eq!(combined.avg_system_cpu_percent, 30.0);
    assert_eq!(combined.peak_memory_gb, 4.0);
    let implied = combined.total_energy_kwh * combined.carbon_intensity;
    assert!((implied - combined.total_co2_kg).abs() < 1e-18);
}

#[test]
fn test_combine_sums_breakdowns_and_idle_counts() {
    let mut east = AuditResult::empty(ActivityCategory::AwsResource, 1.0, 0.0004);
    east.no_data = false;
    east.total_co2_kg = 2.0;
    east.category_breakdown.insert("ec2".into(), 2.0);
    east.utilization.idle_resources = 1;
    let mut west = east.clone();
    west.category_breakdown.insert("s3".into(), 0.5);
    west.utilization.idle_resources = 2;

    let combined = combine_results(&[east, west]).unwrap();
    assert_eq!(combined.category_breakdown["ec2"], 4.0);
    assert_eq!(combined.category_breakdown["s3"], 0.5);
    assert_eq!(combined.utilization.idle_resources, 3);
    assert_eq!(combined.co2_kg_per_hour(), 4.0);
}

#[test]
fn test_combine_rejects_mixed_or_missing_input() {
    assert_eq!(combine_results(&[]).unwrap_err().kind(), "invalid_input");

    let local = AuditResult::empty(ActivityCategory::LocalProcess, 1.0, 0.0005);
    let cloud = AuditResult::empty(ActivityCategory::AwsResource, 1.0, 0.0005);
    assert_eq!(combine_results(&[local.clone(), cloud]).unwrap_err().kind(), "invalid_input");

    // Only empty inputs stay flagged
    assert_eq!(combine_results(&[local.clone(), local.clone()]).unwrap(), local);
}

proptest! {
    #[test]
    fn deltas_never_negative(samples in arb_session()) {
        let result = aggregator().aggregate(&samples, 60.0, 0.0005).unwrap();
        prop_assert!(result.total_disk_io_gb >= 0.0);
        prop_assert!(result.total_network_gb.unwrap_or(0.0) >= 0.0);
        prop_assert!(result.power_breakdown.disk_watts >= 0.0);
        prop_assert!(result.power_breakdown.disk_watts <= 10.0);
    }

    #[test]
    fn single_sample_never_fails(cpu in 0.0f64..=100.0, mem in 0.0f64..64.0, disk in any::<u64>()) {
        let samples = vec![ResourceSample::new(0.0, cpu, mem).with_disk(disk, disk)];
        let result = aggregator().aggregate(&samples, 1.0, 0.0005).unwrap();
        prop_assert_eq!(result.total_disk_io_gb, 0.0);
        prop_assert_eq!(result.total_network_gb, None);
    }

    #[test]
    fn aggregation_is_deterministic(samples in arb_session()) {
        let a = aggregator().aggregate(&samples, 60.0, 0.0005).unwrap();
        let b = aggregator().aggregate(&samples, 60.0, 0.0005).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn integration_disk_total_covers_net_change(samples in arb_session()) {
        let integrated = aggregator()
            .with_strategy(AggregationStrategy::PerSampleIntegration)
            .aggregate(&samples, 60.0, 0.0005)
            .unwrap();
        let mean = aggregator().aggregate(&samples, 60.0, 0.0005).unwrap();
        prop_assert!(integrated.total_disk_io_gb * BYTES_PER_GB + 1.0 >= mean.total_disk_io_gb * BYTES_PER_GB);
    }
}
