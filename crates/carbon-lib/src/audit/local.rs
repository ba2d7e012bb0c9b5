//! Local process audit
//!
//! Sessions recorded by an external monitor are aggregated with the metrics
//! aggregator, using the session's region to pick a grid intensity.

use super::{Accounted, ActivitySource};
use crate::aggregator::MetricsAggregator;
use crate::energy::to_energy_co2;
use crate::error::{ensure_non_negative, EngineError, Result};
use crate::factors::EmissionFactorStore;
use crate::models::{ActivityCategory, AggregationStrategy, AuditResult, ResourceSample};
use crate::params::DeviceParams;
use crate::power::{compute_power, PowerInput};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Idle draw of the rest of the machine (board, fans, PSU losses)
pub const DEFAULT_BASE_SYSTEM_POWER_WATTS: f64 = 20.0;

/// Samples recorded while one process ran
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringSession {
    pub label: String,
    pub duration_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default)]
    pub samples: Vec<ResourceSample>,
}

impl MonitoringSession {
    pub fn new(label: impl Into<String>, duration_seconds: f64, samples: Vec<ResourceSample>) -> Self {
        Self {
            label: label.into(),
            duration_seconds,
            region: None,
            samples,
        }
    }

    pub fn in_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Seconds between the first and last sample, zero when fewer than two
    pub fn observed_span_seconds(&self) -> f64 {
        match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) => (last.timestamp - first.timestamp).max(0.0),
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub result: AuditResult,
}

/// Idle machine draw measured without the workload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineReport {
    pub duration_seconds: f64,
    pub avg_cpu_percent: f64,
    pub avg_memory_gb: f64,
    pub base_system_power_watts: f64,
    pub baseline_power_watts: f64,
    pub baseline_energy_kwh: f64,
    pub baseline_co2_kg: f64,
    pub samples_collected: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionFailure {
    pub label: String,
    pub kind: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionComparison {
    pub sessions: Vec<SessionReport>,
    pub failures: Vec<SessionFailure>,
    pub total_sessions: usize,
    pub successful_audits: usize,
    pub total_co2_kg: f64,
    /// Over every submitted session, failed ones counting as zero
    pub average_co2_per_session: f64,
}

impl SessionComparison {
    /// Highest emitter among the successful sessions
    pub fn highest(&self) -> Option<&SessionReport> {
        self.sessions
            .iter()
            .max_by(|a, b| a.result.total_co2_kg.total_cmp(&b.result.total_co2_kg))
    }
}

/// Audits local monitoring sessions
#[derive(Debug, Clone)]
pub struct LocalAuditor<'a> {
    store: &'a EmissionFactorStore,
    aggregator: MetricsAggregator,
    base_system_power_watts: f64,
}

impl<'a> LocalAuditor<'a> {
    pub fn new(store: &'a EmissionFactorStore, params: DeviceParams) -> Result<Self> {
        Ok(Self {
            store,
            aggregator: MetricsAggregator::new(params)?.with_category(ActivityCategory::LocalProcess),
            base_system_power_watts: DEFAULT_BASE_SYSTEM_POWER_WATTS,
        })
    }

    pub fn with_strategy(mut self, strategy: AggregationStrategy) -> Self {
        self.aggregator = self.aggregator.with_strategy(strategy);
        self
    }

    pub fn with_base_system_power(mut self, watts: f64) -> Self {
        self.base_system_power_watts = watts;
        self
    }

    pub fn params(&self) -> &DeviceParams {
        self.aggregator.params()
    }

    fn intensity_for(&self, session: &MonitoringSession) -> f64 {
        self.params()
            .carbon_intensity_for(session.region.as_deref(), self.store)
    }

    pub fn audit_session(&self, session: &MonitoringSession) -> Result<SessionReport> {
        let source = ActivitySource::LocalProcess {
            session,
            aggregator: &self.aggregator,
        };
        let result = match source.account(self.store, session.duration_seconds)? {
            Accounted::Session(result) => result,
            other => return Err(other.unexpected(ActivityCategory::LocalProcess)),
        };
        debug!(
            label = %session.label,
            samples = result.samples_analyzed,
            co2_kg = result.total_co2_kg,
            "Audited local session"
        );
        Ok(SessionReport {
            label: session.label.clone(),
            region: session.region.clone(),
            result,
        })
    }

    /// Idle-machine draw: mean CPU and memory power plus the base system power
    pub fn baseline(&self, session: &MonitoringSession) -> Result<BaselineReport> {
        if session.samples.is_empty() {
            return Err(EngineError::invalid_input(
                "samples",
                0,
                "baseline needs at least one sample",
            ));
        }
        let base = ensure_non_negative("base_system_power_watts", self.base_system_power_watts)?;

        // Validation and means come from a regular aggregation
        let aggregated = self.audit_session(session)?.result;
        let measured = compute_power(
            &PowerInput::new(aggregated.avg_system_cpu_percent, aggregated.avg_memory_gb),
            self.params(),
        )?;
        let power = measured.total_watts + base;
        let converted = to_energy_co2(power, session.duration_seconds, self.intensity_for(session))?;

        Ok(BaselineReport {
            duration_seconds: session.duration_seconds,
            avg_cpu_percent: aggregated.avg_system_cpu_percent,
            avg_memory_gb: aggregated.avg_memory_gb,
            base_system_power_watts: base,
            baseline_power_watts: power,
            baseline_energy_kwh: converted.energy_kwh,
            baseline_co2_kg: converted.co2_kg,
            samples_collected: session.samples.len(),
        })
    }

    /// Audit several sessions; one failing session does not stop the others
    pub fn compare_sessions(&self, sessions: &[MonitoringSession]) -> SessionComparison {
        let mut reports = Vec::new();
        let mut failures = Vec::new();

        for session in sessions {
            match self.audit_session(session) {
                Ok(report) => reports.push(report),
                Err(e) => {
                    warn!(label = %session.label, error = %e, "Session failed validation");
                    failures.push(SessionFailure {
                        label: session.label.clone(),
                        kind: e.kind().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let total_co2: f64 = reports.iter().map(|r| r.result.total_co2_kg).sum();
        let average = if sessions.is_empty() {
            0.0
        } else {
            total_co2 / sessions.len() as f64
        };

        SessionComparison {
            total_sessions: sessions.len(),
            successful_audits: reports.len(),
            sessions: reports,
            failures,
            total_co2_kg: total_co2,
            average_co2_per_session: average,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factors::GLOBAL_CARBON_INTENSITY;

    const GB: u64 = 1_073_741_824;

    fn session(label: &str) -> MonitoringSession {
        MonitoringSession::new(
            label,
            60.0,
            vec![
                ResourceSample::new(0.0, 40.0, 4.0),
                ResourceSample::new(60.0, 60.0, 4.0).with_disk(GB, 0),
            ],
        )
    }

    fn auditor(store: &EmissionFactorStore) -> LocalAuditor<'_> {
        LocalAuditor::new(store, DeviceParams::default()).unwrap()
    }

    #[test]
    fn test_session_uses_default_intensity_without_region() {
        let store = EmissionFactorStore::defaults();
        let report = auditor(&store).audit_session(&session("job")).unwrap();
        assert_eq!(report.result.carbon_intensity, GLOBAL_CARBON_INTENSITY);
        assert_eq!(report.result.power_breakdown.total_watts, 46.5);
        assert_eq!(report.result.category, ActivityCategory::LocalProcess);
    }

    #[test]
    fn test_session_region_resolves_intensity() {
        let store = EmissionFactorStore::defaults();
        let report = auditor(&store)
            .audit_session(&session("job").in_region("eu-central-1"))
            .unwrap();
        assert_eq!(report.result.carbon_intensity, 0.000338);
    }

    #[test]
    fn test_baseline_adds_base_power() {
        let store = EmissionFactorStore::defaults();
        let baseline = auditor(&store).baseline(&session("idle")).unwrap();
        // 32.5 W cpu + 12 W memory + 20 W base, no I/O term
        assert_eq!(baseline.baseline_power_watts, 64.5);
        assert_eq!(baseline.samples_collected, 2);
        let expected = 64.5 / 1000.0 * 60.0 / 3600.0;
        assert!((baseline.baseline_energy_kwh - expected).abs() < 1e-15);
    }

    #[test]
    fn test_baseline_rejects_empty_session() {
        let store = EmissionFactorStore::defaults();
        let empty = MonitoringSession::new("idle", 60.0, vec![]);
        let err = auditor(&store).baseline(&empty).unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }

    #[test]
    fn test_compare_keeps_failures() {
        let store = EmissionFactorStore::defaults();
        let bad = MonitoringSession::new("bad", 10.0, vec![ResourceSample::new(0.0, 250.0, 1.0)]);
        let comparison = auditor(&store).compare_sessions(&[session("a"), bad, session("b")]);

        assert_eq!(comparison.total_sessions, 3);
        assert_eq!(comparison.successful_audits, 2);
        assert_eq!(comparison.failures.len(), 1);
        assert_eq!(comparison.failures[0].label, "bad");
        assert_eq!(comparison.failures[0].kind, "invalid_sample");

        let single = comparison.sessions[0].result.total_co2_kg;
        assert!((comparison.total_co2_kg - 2.0 * single).abs() < 1e-18);
        assert!((comparison.average_co2_per_session - 2.0 * single / 3.0).abs() < 1e-18);
    }

    #[test]
    fn test_compare_empty_is_zero() {
        let store = EmissionFactorStore::defaults();
        let comparison = auditor(&store).compare_sessions(&[]);
        assert_eq!(comparison.average_co2_per_session, 0.0);
        assert!(comparison.highest().is_none());
    }

    #[test]
    fn test_highest_session() {
        let store = EmissionFactorStore::defaults();
        let mut heavy = session("heavy");
        heavy.duration_seconds = 600.0;
        let comparison = auditor(&store).compare_sessions(&[session("light"), heavy]);
        assert_eq!(comparison.highest().map(|r| r.label.as_str()), Some("heavy"));
    }

    #[test]
    fn test_strategy_is_reported() {
        let store = EmissionFactorStore::defaults();
        let report = auditor(&store)
            .with_strategy(AggregationStrategy::PerSampleIntegration)
            .audit_session(&session("job"))
            .unwrap();
        assert_eq!(report.result.strategy, AggregationStrategy::PerSampleIntegration);
    }

    #[test]
    fn test_observed_span() {
        assert_eq!(session("job").observed_span_seconds(), 60.0);
        assert_eq!(MonitoringSession::new("x", 1.0, vec![]).observed_span_seconds(), 0.0);
    }
}
