//! Observability infrastructure for the carbon engine
//!
//! Provides:
//! - Prometheus metrics (audits, samples, plans, Dockerfile optimisations, validation errors,
//!   aggregation latency)
//! - Structured logging with tracing
//!
//! Engine functions stay pure; callers record metrics and events around them.

use crate::dockerfile::OptimizationReport;
use crate::error::EngineError;
use crate::factors::{FactorLookup, FactorTable};
use crate::models::AuditResult;
use crate::plan::ReductionPlan;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for aggregation latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0,
];

/// Global metrics instance (registered once). `None` if registration failed.
static GLOBAL_METRICS: OnceLock<Option<EngineMetricsInner>> = OnceLock::new();

struct EngineMetricsInner {
    registry: Registry,
    audits_total: IntCounterVec,
    samples_processed_total: IntCounter,
    plans_generated_total: IntCounter,
    plan_target_missed_total: IntCounter,
    dockerfile_optimizations_total: IntCounterVec,
    validation_errors_total: IntCounterVec,
    aggregation_seconds: Histogram,
}

impl EngineMetricsInner {
    fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let audits_total = IntCounterVec::new(
            Opts::new("carbon_guard_audits_total", "Audits completed, by activity category"),
            &["category"],
        )?;
        let samples_processed_total = IntCounter::new(
            "carbon_guard_samples_processed_total",
            "Samples, resources or line items fed into audits",
        )?;
        let plans_generated_total = IntCounter::new(
            "carbon_guard_plans_generated_total",
            "Reduction plans generated",
        )?;
        let plan_target_missed_total = IntCounter::new(
            "carbon_guard_plan_target_missed_total",
            "Plans whose candidate pool could not reach the target",
        )?;
        let dockerfile_optimizations_total = IntCounterVec::new(
            Opts::new(
                "carbon_guard_dockerfile_optimizations_total",
                "Dockerfile optimisations proposed, by kind",
            ),
            &["kind"],
        )?;
        let validation_errors_total = IntCounterVec::new(
            Opts::new("carbon_guard_validation_errors_total", "Rejected inputs, by error kind"),
            &["kind"],
        )?;
        let aggregation_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "carbon_guard_aggregation_seconds",
                "Time spent aggregating one audit",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
        )?;

        registry.register(Box::new(audits_total.clone()))?;
        registry.register(Box::new(samples_processed_total.clone()))?;
        registry.register(Box::new(plans_generated_total.clone()))?;
        registry.register(Box::new(plan_target_missed_total.clone()))?;
        registry.register(Box::new(dockerfile_optimizations_total.clone()))?;
        registry.register(Box::new(validation_errors_total.clone()))?;
        registry.register(Box::new(aggregation_seconds.clone()))?;

        Ok(Self {
            registry,
            audits_total,
            samples_processed_total,
            plans_generated_total,
            plan_target_missed_total,
            dockerfile_optimizations_total,
            validation_errors_total,
            aggregation_seconds,
        })
    }
}

/// Engine metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct EngineMetrics {
    _private: (),
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(|| match EngineMetricsInner::new() {
            Ok(inner) => Some(inner),
            Err(e) => {
                warn!(error = %e, "Failed to register engine metrics, metrics disabled");
                None
            }
        });
        Self { _private: () }
    }

    fn inner(&self) -> Option<&EngineMetricsInner> {
        GLOBAL_METRICS.get().and_then(Option::as_ref)
    }

    /// Count a finished audit and the inputs it consumed
    pub fn record_audit(&self, result: &AuditResult) {
        if let Some(m) = self.inner() {
            m.audits_total
                .with_label_values(&[result.category.as_str()])
                .inc();
            m.samples_processed_total.inc_by(result.samples_analyzed as u64);
        }
    }

    pub fn observe_aggregation(&self, duration_secs: f64) {
        if let Some(m) = self.inner() {
            m.aggregation_seconds.observe(duration_secs);
        }
    }

    pub fn record_plan(&self, plan: &ReductionPlan) {
        if let Some(m) = self.inner() {
            m.plans_generated_total.inc();
            if !plan.target_met {
                m.plan_target_missed_total.inc();
            }
        }
    }

    pub fn record_dockerfile_report(&self, report: &OptimizationReport) {
        if let Some(m) = self.inner() {
            for optimization in &report.optimizations {
                m.dockerfile_optimizations_total
                    .with_label_values(&[optimization.kind.as_str()])
                    .inc();
            }
        }
    }

    pub fn record_validation_error(&self, error: &EngineError) {
        if let Some(m) = self.inner() {
            m.validation_errors_total
                .with_label_values(&[error.kind()])
                .inc();
        }
    }

    /// Text exposition of every engine metric
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let Some(m) = self.inner() else {
            return Ok(String::new());
        };
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&m.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Structured logger for engine events
///
/// Keeps one event shape per kind so log pipelines can filter on `event`.
#[derive(Clone)]
pub struct StructuredLogger {
    component: String,
}

impl StructuredLogger {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    pub fn log_startup(&self, version: &str, factors_version: &str) {
        info!(
            event = "cli_started",
            component = %self.component,
            version = %version,
            factors_version = %factors_version,
            "Carbon Guard started"
        );
    }

    pub fn log_audit(&self, label: &str, result: &AuditResult) {
        if result.no_data {
            warn!(
                event = "audit_completed",
                component = %self.component,
                label = %label,
                category = %result.category,
                no_data = true,
                "Audit found no activity"
            );
            return;
        }
        info!(
            event = "audit_completed",
            component = %self.component,
            label = %label,
            category = %result.category,
            co2_kg = result.total_co2_kg,
            energy_kwh = result.total_energy_kwh,
            cost_usd = result.estimated_cost_usd,
            samples = result.samples_analyzed,
            "Audit completed"
        );
    }

    pub fn log_plan(&self, plan: &ReductionPlan) {
        info!(
            event = "plan_generated",
            component = %self.component,
            plan_id = %plan.plan_id,
            focus = %plan.focus,
            target_percent = plan.target_reduction_percent,
            cumulative_percent = plan.cumulative_impact_percent,
            actions = plan.actions.len(),
            target_met = plan.target_met,
            pool_empty = plan.pool_empty,
            "Reduction plan generated"
        );
    }

    /// Only fallbacks are logged; exact hits are silent
    pub fn log_factor_lookup(&self, table: FactorTable, key: &str, lookup: &FactorLookup) {
        if lookup.is_fallback() {
            warn!(
                event = "factor_fallback",
                component = %self.component,
                table = %table,
                key = %key,
                value = lookup.value,
                source = ?lookup.source,
                "Emission factor resolved through fallback"
            );
        }
    }

    pub fn log_dockerfile_optimized(&self, path: &str, report: &OptimizationReport) {
        info!(
            event = "dockerfile_optimized",
            component = %self.component,
            path = %path,
            strategy = %report.strategy,
            layers = report.analysis.layer_count,
            issues = report.analysis.issues.len(),
            optimizations = report.optimizations.len(),
            reduction_percent = report.estimated_reduction_percent,
            "Dockerfile analysed"
        );
    }

    pub fn log_validation_failed(&self, input: &str, error: &EngineError) {
        warn!(
            event = "validation_failed",
            component = %self.component,
            input = %input,
            kind = error.kind(),
            error = %error,
            "Input rejected"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActivityCategory;
    use crate::plan::plan_from_candidates;

    #[test]
    fn test_engine_metrics_render() {
        // Global registry: other tests may have recorded too, so only check presence
        let metrics = EngineMetrics::new();
        let mut result = AuditResult::empty(ActivityCategory::LocalProcess, 1.0, 0.0005);
        result.samples_analyzed = 3;

        metrics.record_audit(&result);
        metrics.observe_aggregation(0.0002);
        metrics.record_plan(&plan_from_candidates(vec![], 10.0, 12).unwrap());
        metrics.record_validation_error(&EngineError::invalid_input("x", 1, "bad"));
        metrics.record_dockerfile_report(&crate::dockerfile::optimize(
            "FROM nginx:latest\nCOPY . /usr/share/nginx/html\n",
            Default::default(),
        ));

        let text = metrics.render().unwrap();
        assert!(text.contains("carbon_guard_audits_total{category=\"local_process\"}"));
        assert!(text.contains("carbon_guard_plan_target_missed_total"));
        assert!(text.contains("carbon_guard_validation_errors_total{kind=\"invalid_input\"}"));
        assert!(text.contains("carbon_guard_aggregation_seconds_bucket"));
        assert!(text.contains("carbon_guard_dockerfile_optimizations_total{kind=\"base_image\"}"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("cli");
        assert_eq!(logger.component, "cli");
    }
}
