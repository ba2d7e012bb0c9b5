//! Emission factor inspection commands

use super::AppContext;
use crate::output::{print_header, print_json, print_table, print_warning, OutputFormat};
use anyhow::Result;
use carbon_lib::factors::{FactorLookup, FactorSource};
use carbon_lib::FactorTable;
use colored::Colorize;
use serde::Serialize;
use tabled::Tabled;

fn unit(table: FactorTable) -> &'static str {
    match table {
        FactorTable::RegionIntensity => "kg CO2/kWh",
        FactorTable::InstancePower => "W",
        FactorTable::InstanceCost => "USD/h",
        FactorTable::ConsumptionItem | FactorTable::ActivityEquivalent => "kg CO2/unit",
        FactorTable::ItemUnitPrice => "USD/unit",
    }
}

#[derive(Tabled, Serialize)]
struct FactorRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Value")]
    value: f64,
    #[tabled(rename = "Unit")]
    unit: &'static str,
}

#[derive(Serialize)]
struct TableListing {
    table: FactorTable,
    entries: Vec<FactorRow>,
}

/// List one table, or every table
pub fn list_factors(ctx: &AppContext, table: Option<FactorTable>) -> Result<()> {
    let tables = match table {
        Some(t) => vec![t],
        None => FactorTable::ALL.to_vec(),
    };
    let listings: Vec<TableListing> = tables
        .into_iter()
        .map(|table| TableListing {
            table,
            entries: ctx
                .store
                .entries(table)
                .into_iter()
                .map(|(key, value)| FactorRow {
                    key: key.to_string(),
                    value,
                    unit: unit(table),
                })
                .collect(),
        })
        .collect();

    match ctx.format {
        OutputFormat::Json => print_json(&listings)?,
        OutputFormat::Table => {
            println!("Factor version: {}", ctx.store.version().cyan());
            println!();
            for listing in &listings {
                print_header(listing.table.as_str());
                print_table(&listing.entries);
                println!();
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct LookupOutput<'a> {
    table: FactorTable,
    key: &'a str,
    unit: &'static str,
    #[serde(flatten)]
    lookup: &'a FactorLookup,
}

/// Resolve one key, showing which fallback (if any) answered
pub fn lookup_factor(ctx: &AppContext, table: FactorTable, key: &str) -> Result<()> {
    let lookup = ctx
        .store
        .lookup_detailed(table, key)
        .map_err(|e| ctx.reject(key, e))?;
    ctx.logger.log_factor_lookup(table, key, &lookup);

    match ctx.format {
        OutputFormat::Json => print_json(&LookupOutput {
            table,
            key,
            unit: unit(table),
            lookup: &lookup,
        })?,
        OutputFormat::Table => {
            println!("{} {} = {} {}", table, key.bold(), lookup.value, unit(table));
            match &lookup.source {
                FactorSource::Exact => {}
                FactorSource::NearestTier { matched_key } => {
                    print_warning(&format!("Not in table; using nearest size tier {}", matched_key))
                }
                FactorSource::Default => print_warning("Not in table; using the table default"),
            }
        }
    }
    Ok(())
}
