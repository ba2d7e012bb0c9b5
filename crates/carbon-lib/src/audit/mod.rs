//! Category audits
//!
//! Cloud resources, local sessions and personal purchases all flow through
//! the same power model and converter. [`ActivitySource`] is the one place
//! where a category's inputs turn into a [`Footprint`].

pub mod aws;
pub mod local;
pub mod personal;

pub use aws::{AwsAuditReport, AwsAuditor, AwsService, CloudInventory, CloudResource, ResourceFootprint, ServiceTotals};
pub use local::{
    BaselineReport, LocalAuditor, MonitoringSession, SessionComparison, SessionFailure,
    SessionReport,
};
pub use personal::{
    CategoryFilter, Confidence, LineItem, MatchedItem, PersonalAuditReport, PersonalAuditor,
};

use crate::aggregator::MetricsAggregator;
use crate::energy::{to_energy_co2, EnergyCo2, SECONDS_PER_HOUR};
use crate::error::{EngineError, Result};
use crate::factors::EmissionFactorStore;
use crate::models::{ActivityCategory, AuditResult, PowerBreakdown};
use serde::{Deserialize, Serialize};

/// One activity to be accounted, tagged by category
#[derive(Debug, Clone, Copy)]
pub enum ActivitySource<'a> {
    /// A cloud resource on a grid of the given intensity
    AwsResource {
        resource: &'a CloudResource,
        carbon_intensity: f64,
    },
    /// A monitored session, aggregated with the caller's strategy
    LocalProcess {
        session: &'a MonitoringSession,
        aggregator: &'a MetricsAggregator,
    },
    PersonalItem(&'a LineItem),
}

/// Power, energy, emissions and cost of one activity over a window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Footprint {
    pub power: PowerBreakdown,
    pub energy_kwh: f64,
    pub co2_kg: f64,
    pub cost_usd: f64,
}

impl Footprint {
    fn from_power(power: PowerBreakdown, converted: EnergyCo2, cost_usd: f64) -> Self {
        Self {
            power,
            energy_kwh: converted.energy_kwh,
            co2_kg: converted.co2_kg,
            cost_usd,
        }
    }
}

impl std::ops::Add for Footprint {
    type Output = Footprint;

    fn add(self, rhs: Footprint) -> Footprint {
        Footprint {
            power: self.power + rhs.power,
            energy_kwh: self.energy_kwh + rhs.energy_kwh,
            co2_kg: self.co2_kg + rhs.co2_kg,
            cost_usd: self.cost_usd + rhs.cost_usd,
        }
    }
}

/// Category-specific outcome of accounting one activity
#[derive(Debug, Clone, PartialEq)]
pub enum Accounted {
    Cloud(Footprint),
    Session(AuditResult),
    Purchase {
        /// `None` when no category or emission factor applies
        matched: Option<MatchedItem>,
        price: f64,
    },
}

impl Accounted {
    pub fn category(&self) -> ActivityCategory {
        match self {
            Self::Cloud(_) => ActivityCategory::AwsResource,
            Self::Session(_) => ActivityCategory::LocalProcess,
            Self::Purchase { .. } => ActivityCategory::PersonalItem,
        }
    }

    /// Category mismatch as an input error, for callers expecting one shape
    pub(crate) fn unexpected(&self, expected: ActivityCategory) -> EngineError {
        EngineError::invalid_input("category", self.category(), expected.as_str())
    }

    pub fn footprint(&self) -> Footprint {
        match self {
            Self::Cloud(footprint) => *footprint,
            Self::Session(result) => Footprint {
                power: result.power_breakdown,
                energy_kwh: result.total_energy_kwh,
                co2_kg: result.total_co2_kg,
                cost_usd: result.estimated_cost_usd,
            },
            Self::Purchase { matched, price } => Footprint {
                co2_kg: matched.as_ref().map_or(0.0, |m| m.co2_kg),
                cost_usd: *price,
                ..Default::default()
            },
        }
    }
}

impl<'a> ActivitySource<'a> {
    pub fn category(&self) -> ActivityCategory {
        match self {
            Self::AwsResource { .. } => ActivityCategory::AwsResource,
            Self::LocalProcess { .. } => ActivityCategory::LocalProcess,
            Self::PersonalItem(_) => ActivityCategory::PersonalItem,
        }
    }

    /// Account the activity.
    ///
    /// `window_seconds` applies to cloud resources only: sessions carry
    /// their own duration and purchases are instantaneous.
    pub fn account(&self, store: &EmissionFactorStore, window_seconds: f64) -> Result<Accounted> {
        match *self {
            Self::AwsResource {
                resource,
                carbon_intensity,
            } => {
                let power = aws::resource_power(resource, store)?;
                let converted = to_energy_co2(power.total_watts, window_seconds, carbon_intensity)?;
                let cost = aws::resource_hourly_cost(resource, store)? * window_seconds / SECONDS_PER_HOUR;
                Ok(Accounted::Cloud(Footprint::from_power(power, converted, cost)))
            }
            Self::LocalProcess {
                session,
                aggregator,
            } => {
                let intensity = aggregator
                    .params()
                    .carbon_intensity_for(session.region.as_deref(), store);
                let result = aggregator.aggregate(&session.samples, session.duration_seconds, intensity)?;
                Ok(Accounted::Session(result))
            }
            Self::PersonalItem(item) => {
                let matched = match personal::categorize(&item.name) {
                    Some(category) => Some(personal::item_co2(item, category, store)?)
                        .filter(|m| m.emission_factor > 0.0),
                    None => None,
                };
                Ok(Accounted::Purchase {
                    matched,
                    price: item.price,
                })
            }
        }
    }

    pub fn footprint(&self, store: &EmissionFactorStore, window_seconds: f64) -> Result<Footprint> {
        Ok(self.account(store, window_seconds)?.footprint())
    }
}
