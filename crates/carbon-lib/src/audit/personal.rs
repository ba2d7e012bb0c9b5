//! Personal consumption audit
//!
//! Works on receipt line items that were already extracted upstream. Items
//! are matched to a consumption category by keyword, the paid price is turned
//! into an amount through a typical unit price, and the amount is multiplied
//! by the category's emission factor.

use super::{Accounted, ActivitySource};
use crate::error::{ensure_non_negative, EngineError, Result};
use crate::factors::{EmissionFactorStore, FactorTable};
use crate::models::{ActivityCategory, AuditResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Keywords per consumption category, checked in order; first hit wins
const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    ("meat_beef", &["beef", "steak", "ground beef", "hamburger", "roast beef"]),
    ("meat_pork", &["pork", "bacon", "ham", "sausage", "pork chop"]),
    ("meat_chicken", &["chicken", "poultry", "turkey", "chicken breast"]),
    ("meat_fish", &["fish", "salmon", "tuna", "cod", "shrimp", "seafood"]),
    ("dairy_milk", &["milk", "whole milk", "skim milk", "2% milk"]),
    ("dairy_cheese", &["cheese", "cheddar", "mozzarella", "swiss", "parmesan"]),
    ("dairy_yogurt", &["yogurt", "yoghurt", "greek yogurt"]),
    ("vegetables", &["vegetables", "lettuce", "tomato", "carrot", "broccoli", "spinach", "onion"]),
    ("fruits", &["apple", "banana", "orange", "grape", "strawberry", "fruit"]),
    ("grains", &["rice", "pasta", "cereal", "oats", "quinoa"]),
    ("bread", &["bread", "loaf", "bagel", "roll", "baguette"]),
    ("eggs", &["eggs", "egg"]),
    ("fuel_gasoline", &["gasoline", "gas", "unleaded", "premium"]),
    ("fuel_diesel", &["diesel"]),
    ("electricity", &["electric", "electricity", "power"]),
    ("clothing", &["shirt", "pants", "dress", "jacket", "shoes", "clothing"]),
    ("electronics", &["phone", "laptop", "tablet", "headphones", "charger"]),
    ("books", &["book", "magazine", "newspaper"]),
    ("household_items", &["detergent", "soap", "shampoo", "toothpaste"]),
    ("cosmetics", &["makeup", "lipstick", "foundation", "perfume"]),
];

fn default_quantity() -> f64 {
    1.0
}

/// One extracted receipt line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    #[serde(default = "default_quantity")]
    pub quantity: f64,
    pub price: f64,
}

impl LineItem {
    pub fn new(name: impl Into<String>, quantity: f64, price: f64) -> Self {
        Self {
            name: name.into(),
            quantity,
            price,
        }
    }
}

/// Consumption category for an item name, by case-insensitive keyword
pub fn categorize(name: &str) -> Option<&'static str> {
    let lower = name.to_lowercase();
    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(category, _)| *category)
}

/// Group of a category: the part before the first `_`
pub fn category_group(category: &str) -> &str {
    category.split('_').next().unwrap_or(category)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryFilter {
    #[default]
    All,
    Food,
    Transport,
    Energy,
    Goods,
}

impl CategoryFilter {
    fn groups(&self) -> &'static [&'static str] {
        match self {
            Self::All => &[],
            Self::Food => &["meat", "dairy", "vegetables", "fruits", "grains", "bread", "eggs"],
            Self::Transport => &["fuel", "public", "taxi"],
            Self::Energy => &["electricity", "natural"],
            Self::Goods => &["clothing", "electronics", "books", "household", "cosmetics", "cleaning"],
        }
    }

    pub fn matches(&self, category: &str) -> bool {
        match self {
            Self::All => true,
            _ => self.groups().contains(&category_group(category)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Food => "food",
            Self::Transport => "transport",
            Self::Energy => "energy",
            Self::Goods => "goods",
        }
    }
}

impl fmt::Display for CategoryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CategoryFilter {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "food" => Ok(Self::Food),
            "transport" => Ok(Self::Transport),
            "energy" => Ok(Self::Energy),
            "goods" => Ok(Self::Goods),
            other => Err(EngineError::invalid_input(
                "category_filter",
                other,
                "expected all, food, transport, energy or goods",
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    /// A receipt with nothing to match keeps the medium default
    pub fn from_match_rate(matched: usize, total: usize) -> Self {
        if total == 0 {
            return Self::Medium;
        }
        let rate = matched as f64 / total as f64;
        if rate > 0.8 {
            Self::High
        } else if rate > 0.5 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        })
    }
}

/// A line item with its estimated emissions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedItem {
    pub name: String,
    pub category: String,
    pub quantity: f64,
    pub price: f64,
    pub estimated_amount: f64,
    pub emission_factor: f64,
    pub co2_kg: f64,
}

/// Estimate one item's emissions for a known category.
///
/// amount = price / unit price × quantity, co2 = amount × factor.
pub fn item_co2(item: &LineItem, category: &str, store: &EmissionFactorStore) -> Result<MatchedItem> {
    let price = ensure_non_negative("price", item.price)?;
    let quantity = ensure_non_negative("quantity", item.quantity)?;
    let unit_price = store.lookup(FactorTable::ItemUnitPrice, category)?;
    if unit_price <= 0.0 {
        return Err(EngineError::invalid_input(
            format!("item_unit_price.{}", category),
            unit_price,
            "unit price must be positive",
        ));
    }
    let factor = store.lookup(FactorTable::ConsumptionItem, category)?;
    let amount = price / unit_price * quantity;

    Ok(MatchedItem {
        name: item.name.clone(),
        category: category.to_string(),
        quantity,
        price,
        estimated_amount: amount,
        emission_factor: factor,
        co2_kg: amount * factor,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalAuditReport {
    pub filter: CategoryFilter,
    pub items: Vec<MatchedItem>,
    pub unmatched_items: Vec<String>,
    /// Items whose category falls outside the filter
    pub filtered_out: usize,
    /// kg CO2 per category group (`meat`, `dairy`, `fuel`, ...)
    pub category_breakdown: BTreeMap<String, f64>,
    pub total_co2_kg: f64,
    pub match_rate: f64,
    pub confidence: Confidence,
    pub result: AuditResult,
}

/// Audits receipt line items against one factor store
#[derive(Debug, Clone)]
pub struct PersonalAuditor<'a> {
    store: &'a EmissionFactorStore,
    filter: CategoryFilter,
}

impl<'a> PersonalAuditor<'a> {
    pub fn new(store: &'a EmissionFactorStore) -> Self {
        Self {
            store,
            filter: CategoryFilter::All,
        }
    }

    pub fn with_filter(mut self, filter: CategoryFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn audit(&self, line_items: &[LineItem]) -> Result<PersonalAuditReport> {
        let mut items = Vec::new();
        let mut unmatched = Vec::new();
        let mut filtered_out = 0usize;
        let mut breakdown: BTreeMap<String, f64> = BTreeMap::new();
        let mut considered_cost = 0.0;

        for item in line_items {
            let category = categorize(&item.name);
            if let Some(category) = category {
                if !self.filter.matches(category) {
                    filtered_out += 1;
                    continue;
                }
            }
            considered_cost += ensure_non_negative("price", item.price)?;

            match ActivitySource::PersonalItem(item).account(self.store, 0.0)? {
                Accounted::Purchase {
                    matched: Some(matched),
                    ..
                } => {
                    *breakdown
                        .entry(category_group(&matched.category).to_string())
                        .or_default() += matched.co2_kg;
                    items.push(matched);
                }
                Accounted::Purchase { matched: None, .. } => unmatched.push(item.name.clone()),
                other => return Err(other.unexpected(ActivityCategory::PersonalItem)),
            }
        }

        let considered = items.len() + unmatched.len();
        let total_co2: f64 = items.iter().map(|i| i.co2_kg).sum();
        let match_rate = if considered > 0 {
            items.len() as f64 / considered as f64
        } else {
            0.0
        };
        let confidence = Confidence::from_match_rate(items.len(), considered);

        let mut result = AuditResult::empty(ActivityCategory::PersonalItem, 0.0, 0.0);
        if considered > 0 {
            result.no_data = false;
            result.total_co2_kg = total_co2;
            result.estimated_cost_usd = considered_cost;
            result.samples_analyzed = considered;
            result.category_breakdown = breakdown.clone();
        }

        debug!(
            items = line_items.len(),
            matched = items.len(),
            unmatched = unmatched.len(),
            filtered_out,
            co2_kg = total_co2,
            "Audited receipt items"
        );

        Ok(PersonalAuditReport {
            filter: self.filter,
            items,
            unmatched_items: unmatched,
            filtered_out,
            category_breakdown: breakdown,
            total_co2_kg: total_co2,
            match_rate,
            confidence,
            result,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audit(items: &[LineItem], filter: CategoryFilter) -> PersonalAuditReport {
        let store = EmissionFactorStore::defaults();
        PersonalAuditor::new(&store).with_filter(filter).audit(items).unwrap()
    }

    #[test]
    fn test_categorize_by_keyword() {
        assert_eq!(categorize("Organic Ground BEEF"), Some("meat_beef"));
        assert_eq!(categorize("Whole Milk 1L"), Some("dairy_milk"));
        assert_eq!(categorize("Unleaded 95"), Some("fuel_gasoline"));
        assert_eq!(categorize("gift card"), None);
    }

    #[test]
    fn test_first_keyword_table_entry_wins() {
        // "hamburger" is a beef keyword and also contains "ham"
        assert_eq!(categorize("hamburger buns"), Some("meat_beef"));
    }

    #[test]
    fn test_amount_from_price() {
        let store = EmissionFactorStore::defaults();
        let m = item_co2(&LineItem::new("beef", 2.0, 30.0), "meat_beef", &store).unwrap();
        assert_eq!(m.estimated_amount, 4.0);
        assert_eq!(m.co2_kg, 4.0 * 27.0);
    }

    #[test]
    fn test_unpriced_category_uses_default_unit_price() {
        let store = EmissionFactorStore::defaults();
        let m = item_co2(&LineItem::new("novel", 1.0, 20.0), "books", &store).unwrap();
        assert_eq!(m.estimated_amount, 2.0);
        assert!((m.co2_kg - 3.6).abs() < 1e-12);
    }

    #[test]
    fn test_negative_price_rejected() {
        let store = EmissionFactorStore::defaults();
        let err = PersonalAuditor::new(&store)
            .audit(&[LineItem::new("milk", 1.0, -3.0)])
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }

    #[test]
    fn test_receipt_breakdown_and_confidence() {
        let items = vec![
            LineItem::new("Beef steak", 1.0, 15.0),
            LineItem::new("Milk", 2.0, 3.0),
            LineItem::new("Cheddar", 1.0, 12.0),
            LineItem::new("Batteries", 1.0, 5.0),
        ];
        let report = audit(&items, CategoryFilter::All);

        assert_eq!(report.items.len(), 3);
        assert_eq!(report.unmatched_items, vec!["Batteries".to_string()]);
        assert_eq!(report.match_rate, 0.75);
        assert_eq!(report.confidence, Confidence::Medium);
        assert_eq!(report.category_breakdown["meat"], 27.0);
        assert!((report.category_breakdown["dairy"] - (4.0 * 3.2 + 13.5)).abs() < 1e-9);

        assert!(!report.result.no_data);
        assert_eq!(report.result.samples_analyzed, 4);
        assert_eq!(report.result.estimated_cost_usd, 35.0);
        assert_eq!(report.result.total_co2_kg, report.total_co2_kg);
        assert_eq!(report.result.total_energy_kwh, 0.0);
    }

    #[test]
    fn test_filter_excludes_other_groups() {
        let items = vec![
            LineItem::new("Beef steak", 1.0, 15.0),
            LineItem::new("Diesel", 10.0, 1.6),
            LineItem::new("mystery", 1.0, 1.0),
        ];
        let report = audit(&items, CategoryFilter::Transport);
        assert_eq!(report.filtered_out, 1);
        assert_eq!(report.items.len(), 1);
        assert_eq!(report.items[0].category, "fuel_diesel");
        assert_eq!(report.unmatched_items.len(), 1);
    }

    #[test]
    fn test_empty_receipt_is_no_data() {
        let report = audit(&[], CategoryFilter::All);
        assert!(report.result.no_data);
        assert_eq!(report.match_rate, 0.0);
        assert_eq!(report.confidence, Confidence::Medium);
    }

    #[test]
    fn test_confidence_thresholds() {
        assert_eq!(Confidence::from_match_rate(9, 10), Confidence::High);
        assert_eq!(Confidence::from_match_rate(8, 10), Confidence::Medium);
        assert_eq!(Confidence::from_match_rate(5, 10), Confidence::Low);
    }

    #[test]
    fn test_filter_parsing() {
        assert_eq!("Food".parse::<CategoryFilter>().unwrap(), CategoryFilter::Food);
        assert!("pets".parse::<CategoryFilter>().is_err());
        assert!(CategoryFilter::Energy.matches("natural_gas"));
        assert!(!CategoryFilter::Goods.matches("meat_beef"));
    }

    #[test]
    fn test_line_item_quantity_defaults_to_one() {
        let item: LineItem = serde_json::from_str(r#"{"name": "bread", "price": 3.0}"#).unwrap();
        assert_eq!(item.quantity, 1.0);
    }
}
