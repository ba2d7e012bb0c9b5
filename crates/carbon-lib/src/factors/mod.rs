//! Emission factor store
//!
//! Typed key→factor tables (grid intensity, instance power and price,
//! consumption emission factors) with per-table fallback rules. A store is
//! built once, optionally layered with overrides, and then shared read-only
//! (typically behind an `Arc`) across every engine call.

mod defaults;

pub use defaults::{
    DEFAULT_FACTORS_VERSION, DEFAULT_INSTANCE_COST_PER_HOUR, DEFAULT_INSTANCE_POWER_WATTS,
    DEFAULT_ITEM_UNIT_PRICE, GLOBAL_CARBON_INTENSITY, INSTANCE_SIZE_TIERS,
};

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Factor tables held by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorTable {
    /// kg CO2 per kWh by cloud region
    RegionIntensity,
    /// Watts by instance type
    InstancePower,
    /// USD per hour by instance type
    InstanceCost,
    /// kg CO2 per unit by consumption category
    ConsumptionItem,
    /// Price per unit by consumption category
    ItemUnitPrice,
    /// kg CO2 per activity unit (`car_km`, `beef_kg`, ...)
    ActivityEquivalent,
}

impl FactorTable {
    pub const ALL: [FactorTable; 6] = [
        FactorTable::RegionIntensity,
        FactorTable::InstancePower,
        FactorTable::InstanceCost,
        FactorTable::ConsumptionItem,
        FactorTable::ItemUnitPrice,
        FactorTable::ActivityEquivalent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RegionIntensity => "region_intensity",
            Self::InstancePower => "instance_power",
            Self::InstanceCost => "instance_cost",
            Self::ConsumptionItem => "consumption_item",
            Self::ItemUnitPrice => "item_unit_price",
            Self::ActivityEquivalent => "activity_equivalent",
        }
    }
}

impl fmt::Display for FactorTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FactorTable {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| EngineError::invalid_input("table", s, "unknown factor table"))
    }
}

/// What a table answers with when a key is missing
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fallback {
    /// Miss is an `UnknownFactor` error
    None,
    /// Miss returns a fixed value
    Value(f64),
    /// Miss returns the closest size tier in the same instance family,
    /// or `default` when the family is unknown
    NearestTier { default: f64 },
}

/// How a lookup was satisfied
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum FactorSource {
    Exact,
    NearestTier { matched_key: String },
    Default,
}

/// Lookup result with provenance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactorLookup {
    pub value: f64,
    #[serde(flatten)]
    pub source: FactorSource,
}

impl FactorLookup {
    pub fn is_fallback(&self) -> bool {
        self.source != FactorSource::Exact
    }
}

/// Caller-supplied overrides layered on top of a store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FactorOverrides {
    /// Version label for the merged store (defaults to `<base>+overrides`)
    #[serde(default)]
    pub version: Option<String>,
    /// Per-table entries; an override wins on key collision
    #[serde(default)]
    pub tables: BTreeMap<FactorTable, BTreeMap<String, f64>>,
    /// Per-table fallback replacement
    #[serde(default)]
    pub fallbacks: BTreeMap<FactorTable, f64>,
}

impl FactorOverrides {
    pub fn is_empty(&self) -> bool {
        self.tables.values().all(BTreeMap::is_empty) && self.fallbacks.is_empty()
    }
}

#[derive(Debug, Clone)]
struct TableData {
    entries: BTreeMap<String, f64>,
    fallback: Fallback,
}

/// Read-only emission factor store
#[derive(Debug, Clone)]
pub struct EmissionFactorStore {
    version: String,
    tables: BTreeMap<FactorTable, TableData>,
}

impl Default for EmissionFactorStore {
    fn default() -> Self {
        Self::defaults()
    }
}

impl EmissionFactorStore {
    /// Store populated with the built-in tables
    pub fn defaults() -> Self {
        let table = |rows: &[(&str, f64)], fallback| TableData {
            entries: rows.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            fallback,
        };

        let mut tables = BTreeMap::new();
        tables.insert(
            FactorTable::RegionIntensity,
            table(
                defaults::REGION_CARBON_INTENSITY,
                Fallback::Value(GLOBAL_CARBON_INTENSITY),
            ),
        );
        tables.insert(
            FactorTable::InstancePower,
            table(
                defaults::INSTANCE_POWER_WATTS,
                Fallback::NearestTier {
                    default: DEFAULT_INSTANCE_POWER_WATTS,
                },
            ),
        );
        tables.insert(
            FactorTable::InstanceCost,
            table(
                defaults::INSTANCE_COST_PER_HOUR,
                Fallback::NearestTier {
                    default: DEFAULT_INSTANCE_COST_PER_HOUR,
                },
            ),
        );
        tables.insert(
            FactorTable::ConsumptionItem,
            table(defaults::CONSUMPTION_EMISSION_FACTORS, Fallback::None),
        );
        tables.insert(
            FactorTable::ItemUnitPrice,
            table(
                defaults::ITEM_UNIT_PRICES,
                Fallback::Value(DEFAULT_ITEM_UNIT_PRICE),
            ),
        );
        tables.insert(
            FactorTable::ActivityEquivalent,
            table(defaults::ACTIVITY_EQUIVALENTS, Fallback::None),
        );

        Self {
            version: DEFAULT_FACTORS_VERSION.to_string(),
            tables,
        }
    }

    /// Build a store from raw tables, validating every value.
    ///
    /// Tables absent from `tables` are empty with no fallback.
    pub fn from_tables(
        version: impl Into<String>,
        tables: BTreeMap<FactorTable, BTreeMap<String, f64>>,
        fallbacks: BTreeMap<FactorTable, Fallback>,
    ) -> Result<Self> {
        let mut data = BTreeMap::new();
        for table in FactorTable::ALL {
            let entries = tables.get(&table).cloned().unwrap_or_default();
            validate_entries(table, &entries)?;
            let fallback = fallbacks.get(&table).copied().unwrap_or(Fallback::None);
            validate_fallback(table, fallback)?;
            data.insert(table, TableData { entries, fallback });
        }
        Ok(Self {
            version: version.into(),
            tables: data,
        })
    }

    /// Return a new store with `overrides` merged on top. `self` is untouched.
    pub fn with_overrides(&self, overrides: &FactorOverrides) -> Result<Self> {
        let mut merged = self.clone();

        for (table, entries) in &overrides.tables {
            validate_entries(*table, entries)?;
            let data = merged.table_mut(*table);
            for (key, value) in entries {
                data.entries.insert(key.clone(), *value);
            }
        }

        for (table, value) in &overrides.fallbacks {
            let data = merged.table_mut(*table);
            data.fallback = match data.fallback {
                Fallback::NearestTier { .. } => Fallback::NearestTier { default: *value },
                _ => Fallback::Value(*value),
            };
            validate_fallback(*table, data.fallback)?;
        }

        merged.version = match &overrides.version {
            Some(v) => v.clone(),
            None if overrides.is_empty() => self.version.clone(),
            None => format!("{}+overrides", self.version),
        };
        Ok(merged)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Look up a factor, applying the table's fallback on a miss
    pub fn lookup(&self, table: FactorTable, key: &str) -> Result<f64> {
        self.lookup_detailed(table, key).map(|l| l.value)
    }

    /// Look up a factor without applying any fallback
    pub fn lookup_exact(&self, table: FactorTable, key: &str) -> Option<f64> {
        self.tables
            .get(&table)
            .and_then(|t| t.entries.get(key))
            .copied()
    }

    /// Look up a factor and report how it was resolved
    pub fn lookup_detailed(&self, table: FactorTable, key: &str) -> Result<FactorLookup> {
        let unknown = || EngineError::UnknownFactor {
            table,
            key: key.to_string(),
        };
        let data = self.tables.get(&table).ok_or_else(unknown)?;

        if let Some(value) = data.entries.get(key) {
            return Ok(FactorLookup {
                value: *value,
                source: FactorSource::Exact,
            });
        }

        match data.fallback {
            Fallback::None => Err(unknown()),
            Fallback::Value(value) => {
                debug!(table = %table, key = %key, value, "Factor fallback to table default");
                Ok(FactorLookup {
                    value,
                    source: FactorSource::Default,
                })
            }
            Fallback::NearestTier { default } => match nearest_tier(&data.entries, key) {
                Some((matched_key, value)) => {
                    debug!(table = %table, key = %key, matched = %matched_key, value, "Factor fallback to nearest tier");
                    Ok(FactorLookup {
                        value,
                        source: FactorSource::NearestTier {
                            matched_key: matched_key.to_string(),
                        },
                    })
                }
                None => Ok(FactorLookup {
                    value: default,
                    source: FactorSource::Default,
                }),
            },
        }
    }

    /// All entries of a table in key order
    pub fn entries(&self, table: FactorTable) -> Vec<(&str, f64)> {
        self.tables
            .get(&table)
            .map(|t| t.entries.iter().map(|(k, v)| (k.as_str(), *v)).collect())
            .unwrap_or_default()
    }

    pub fn fallback(&self, table: FactorTable) -> Fallback {
        self.tables
            .get(&table)
            .map(|t| t.fallback)
            .unwrap_or(Fallback::None)
    }

    /// kg CO2 for `amount` of a common activity, e.g. (`car`, 12.0, `km`)
    pub fn estimate_co2_equivalent(&self, activity: &str, amount: f64, unit: &str) -> Result<f64> {
        crate::error::ensure_non_negative("amount", amount)?;
        let key = format!("{}_{}", activity, unit);
        Ok(amount * self.lookup(FactorTable::ActivityEquivalent, &key)?)
    }

    fn table_mut(&mut self, table: FactorTable) -> &mut TableData {
        self.tables.entry(table).or_insert_with(|| TableData {
            entries: BTreeMap::new(),
            fallback: Fallback::None,
        })
    }
}

fn validate_entries(table: FactorTable, entries: &BTreeMap<String, f64>) -> Result<()> {
    for (key, value) in entries {
        if key.trim().is_empty() {
            return Err(EngineError::invalid_input(
                format!("{}.<key>", table),
                "\"\"",
                "factor key must not be empty",
            ));
        }
        if !value.is_finite() || *value < 0.0 {
            return Err(EngineError::invalid_input(
                format!("{}.{}", table, key),
                value,
                "factor must be a finite non-negative number",
            ));
        }
    }
    Ok(())
}

fn validate_fallback(table: FactorTable, fallback: Fallback) -> Result<()> {
    let value = match fallback {
        Fallback::None => return Ok(()),
        Fallback::Value(v) | Fallback::NearestTier { default: v } => v,
    };
    if !value.is_finite() || value < 0.0 {
        return Err(EngineError::invalid_input(
            format!("{}.fallback", table),
            value,
            "fallback must be a finite non-negative number",
        ));
    }
    Ok(())
}

fn tier_rank(size: &str) -> Option<usize> {
    INSTANCE_SIZE_TIERS.iter().position(|t| *t == size)
}

/// Closest size tier of the same family (`m5.4xlarge` → `m5.2xlarge`).
/// Ties resolve to the smaller tier.
fn nearest_tier<'a>(entries: &'a BTreeMap<String, f64>, key: &str) -> Option<(&'a str, f64)> {
    let (family, size) = key.split_once('.')?;
    let wanted = tier_rank(size)?;

    entries
        .iter()
        .filter_map(|(k, v)| {
            let (f, s) = k.split_once('.')?;
            if f != family {
                return None;
            }
            let rank = tier_rank(s)?;
            Some((wanted.abs_diff(rank), rank, k.as_str(), *v))
        })
        .min_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)))
        .map(|(_, _, k, v)| (k, v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_region_lookup() {
        let store = EmissionFactorStore::defaults();
        let value = store
            .lookup(FactorTable::RegionIntensity, "eu-west-1")
            .unwrap();
        assert_eq!(value, 0.000316);
    }

    #[test]
    fn test_unknown_region_falls_back_to_global_average() {
        let store = EmissionFactorStore::defaults();
        let lookup = store
            .lookup_detailed(FactorTable::RegionIntensity, "mars-north-1")
            .unwrap();
        assert_eq!(lookup.value, GLOBAL_CARBON_INTENSITY);
        assert_eq!(lookup.source, FactorSource::Default);
        assert!(lookup.is_fallback());
    }

    #[test]
    fn test_nearest_tier_for_unknown_size() {
        let store = EmissionFactorStore::defaults();
        let lookup = store
            .lookup_detailed(FactorTable::InstancePower, "m5.4xlarge")
            .unwrap();
        assert_eq!(lookup.value, 320.0);
        assert_eq!(
            lookup.source,
            FactorSource::NearestTier {
                matched_key: "m5.2xlarge".to_string()
            }
        );
    }

    #[test]
    fn test_nearest_tier_prefers_smaller_on_tie() {
        // t3 has nano..medium; "t3.large" is one step from medium only
        let store = EmissionFactorStore::defaults();
        assert_eq!(
            store.lookup(FactorTable::InstancePower, "t3.large").unwrap(),
            40.0
        );

        let mut entries = BTreeMap::new();
        entries.insert("x1.small".to_string(), 1.0);
        entries.insert("x1.large".to_string(), 3.0);
        let (key, _) = nearest_tier(&entries, "x1.medium").unwrap();
        assert_eq!(key, "x1.small");
    }

    #[test]
    fn test_unknown_family_uses_default_power() {
        let store = EmissionFactorStore::defaults();
        let lookup = store
            .lookup_detailed(FactorTable::InstancePower, "z9.large")
            .unwrap();
        assert_eq!(lookup.value, DEFAULT_INSTANCE_POWER_WATTS);
        assert_eq!(lookup.source, FactorSource::Default);
    }

    #[test]
    fn test_consumption_miss_is_unknown_factor() {
        let store = EmissionFactorStore::defaults();
        let err = store
            .lookup(FactorTable::ConsumptionItem, "unobtainium")
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::UnknownFactor {
                table: FactorTable::ConsumptionItem,
                key: "unobtainium".to_string()
            }
        );
    }

    #[test]
    fn test_overrides_win_and_leave_base_untouched() {
        let base = EmissionFactorStore::defaults();
        let mut overrides = FactorOverrides::default();
        overrides
            .tables
            .entry(FactorTable::RegionIntensity)
            .or_default()
            .insert("us-east-1".to_string(), 0.0002);
        overrides
            .tables
            .entry(FactorTable::RegionIntensity)
            .or_default()
            .insert("local-grid".to_string(), 0.0001);

        let merged = base.with_overrides(&overrides).unwrap();
        assert_eq!(
            merged
                .lookup(FactorTable::RegionIntensity, "us-east-1")
                .unwrap(),
            0.0002
        );
        assert_eq!(
            merged
                .lookup(FactorTable::RegionIntensity, "local-grid")
                .unwrap(),
            0.0001
        );
        assert_eq!(
            base.lookup(FactorTable::RegionIntensity, "us-east-1").unwrap(),
            0.000415
        );
        assert_eq!(merged.version(), "2024.1+overrides");
    }

    #[test]
    fn test_fallback_override_on_strict_table() {
        let base = EmissionFactorStore::defaults();
        let mut overrides = FactorOverrides::default();
        overrides
            .fallbacks
            .insert(FactorTable::ConsumptionItem, 1.5);
        let merged = base.with_overrides(&overrides).unwrap();
        assert_eq!(
            merged
                .lookup(FactorTable::ConsumptionItem, "unobtainium")
                .unwrap(),
            1.5
        );
    }

    #[test]
    fn test_invalid_override_rejected() {
        let base = EmissionFactorStore::defaults();
        let mut overrides = FactorOverrides::default();
        overrides
            .tables
            .entry(FactorTable::InstancePower)
            .or_default()
            .insert("m5.large".to_string(), -3.0);
        let err = base.with_overrides(&overrides).unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }

    #[test]
    fn test_from_tables_validates() {
        let mut tables = BTreeMap::new();
        let mut rows = BTreeMap::new();
        rows.insert("a".to_string(), f64::NAN);
        tables.insert(FactorTable::ConsumptionItem, rows);
        assert!(EmissionFactorStore::from_tables("t", tables, BTreeMap::new()).is_err());
    }

    #[test]
    fn test_lookups_are_deterministic() {
        let store = EmissionFactorStore::defaults();
        let a = store.lookup_detailed(FactorTable::InstanceCost, "c5.9xlarge");
        let b = store.lookup_detailed(FactorTable::InstanceCost, "c5.9xlarge");
        assert_eq!(a, b);
    }

    #[test]
    fn test_activity_equivalent() {
        let store = EmissionFactorStore::defaults();
        let co2 = store.estimate_co2_equivalent("car", 100.0, "km").unwrap();
        assert!((co2 - 21.0).abs() < 1e-9);
        assert!(store.estimate_co2_equivalent("hoverboard", 1.0, "km").is_err());
    }

    #[test]
    fn test_table_from_str() {
        assert_eq!(
            "region-intensity".parse::<FactorTable>().unwrap(),
            FactorTable::RegionIntensity
        );
        assert!("nope".parse::<FactorTable>().is_err());
    }
}
