//! Carbon accounting engine
//!
//! This crate provides the core functionality for:
//! - Emission factor tables with versioned overrides
//! - Power modelling from resource usage
//! - Energy and CO2 conversion
//! - Session aggregation and category audits
//! - Reduction plan generation
//! - Dockerfile analysis and optimisation
//! - Observability helpers

pub mod aggregator;
pub mod audit;
pub mod dockerfile;
pub mod energy;
pub mod error;
pub mod factors;
pub mod models;
pub mod observability;
pub mod params;
pub mod plan;
pub mod power;

pub use aggregator::{aggregate, combine_results, MetricsAggregator};
pub use audit::{Accounted, ActivitySource, Footprint};
pub use dockerfile::{OptimizationReport, OptimizationStrategy};
pub use energy::{to_energy_co2, EnergyCo2};
pub use error::{EngineError, Result};
pub use factors::{EmissionFactorStore, FactorOverrides, FactorTable};
pub use models::*;
pub use observability::{EngineMetrics, StructuredLogger};
pub use params::DeviceParams;
pub use plan::{
    generate_plan, plan_from_candidates, record_progress, CandidateAction, EffortTier, Focus,
    FocusArea, PlanProgress, ReductionAction, ReductionPlan, ReductionPlanner,
};
pub use power::{compute_power, PowerInput, PowerModel};
