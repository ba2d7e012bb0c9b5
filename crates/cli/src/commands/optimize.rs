//! Dockerfile optimisation command

use super::AppContext;
use crate::output::{
    color_level, format_percent, print_header, print_info, print_json, print_success, print_table,
    print_warning, OutputFormat,
};
use anyhow::{Context, Result};
use carbon_lib::dockerfile::{self, Optimization, OptimizationReport, OptimizationStrategy};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tabled::Tabled;

#[derive(Debug, Args)]
pub struct OptimizeArgs {
    /// Dockerfile to analyse
    pub dockerfile: PathBuf,

    /// Where to write the optimised Dockerfile (default: <DOCKERFILE>.optimized)
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Optimisation group: size, layers, cache or all
    #[arg(long, short, default_value = "all")]
    pub strategy: OptimizationStrategy,

    /// Report only, write nothing
    #[arg(long)]
    pub dry_run: bool,

    #[arg(long, num_args = 0..=1, value_name = "FILE")]
    pub save: Option<Option<PathBuf>>,
}

#[derive(Tabled)]
struct OptimizationRow {
    #[tabled(rename = "Optimisation")]
    kind: String,
    #[tabled(rename = "Description")]
    description: String,
    #[tabled(rename = "Impact")]
    impact: String,
    #[tabled(rename = "CO2 Reduction")]
    reduction: String,
    #[tabled(rename = "Auto")]
    auto_apply: &'static str,
}

impl From<&Optimization> for OptimizationRow {
    fn from(o: &Optimization) -> Self {
        Self {
            kind: o.kind.to_string(),
            description: o.description.clone(),
            impact: color_level(&o.impact.to_string()),
            reduction: format_percent(o.co2_reduction_percent),
            auto_apply: if o.auto_apply { "yes" } else { "no" },
        }
    }
}

#[derive(Serialize)]
struct OptimizeOutput<'a> {
    dockerfile: &'a Path,
    #[serde(flatten)]
    report: &'a OptimizationReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    written_to: Option<&'a Path>,
}

fn default_output(dockerfile: &Path) -> PathBuf {
    let mut name = dockerfile.as_os_str().to_owned();
    name.push(".optimized");
    PathBuf::from(name)
}

pub fn optimize(ctx: &AppContext, args: &OptimizeArgs) -> Result<()> {
    let content = std::fs::read_to_string(&args.dockerfile)
        .with_context(|| format!("Failed to read {}", args.dockerfile.display()))?;

    let report = dockerfile::optimize(&content, args.strategy);
    ctx.metrics.record_dockerfile_report(&report);
    ctx.logger
        .log_dockerfile_optimized(&args.dockerfile.display().to_string(), &report);

    let automatic = report.optimizations.iter().any(|o| o.auto_apply);
    let written_to = if args.dry_run || !automatic {
        None
    } else {
        let path = args
            .output
            .clone()
            .unwrap_or_else(|| default_output(&args.dockerfile));
        let optimized = dockerfile::apply_optimizations(&content, &report.optimizations);
        std::fs::write(&path, optimized)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Some(path)
    };

    match ctx.format {
        OutputFormat::Json => print_json(&OptimizeOutput {
            dockerfile: &args.dockerfile,
            report: &report,
            written_to: written_to.as_deref(),
        })?,
        OutputFormat::Table => print_report(&args.dockerfile, &report, written_to.as_deref(), args.dry_run),
    }

    ctx.save(&args.save, "dockerfile_optimization", &report)
}

fn print_report(path: &Path, report: &OptimizationReport, written_to: Option<&Path>, dry_run: bool) {
    let analysis = &report.analysis;
    print_header(&format!("Dockerfile: {}", path.display()));
    println!("Strategy:           {}", report.strategy.to_string().cyan());
    println!("Base image:         {}", analysis.base_image.as_deref().unwrap_or("-"));
    println!("Instructions:       {}", analysis.instructions);
    println!("Layers:             {}", analysis.layer_count);
    println!("Estimated size:     {:.0} MB", analysis.estimated_size_mb);
    println!();

    if !analysis.issues.is_empty() {
        print_header("Issues");
        for issue in &analysis.issues {
            println!("  line {:>3}: {}", issue.line, issue.message);
        }
        println!();
    }

    if report.optimizations.is_empty() {
        print_success("No optimisations found for this strategy");
    } else {
        print_header("Optimisations");
        let rows: Vec<OptimizationRow> = report.optimizations.iter().map(Into::into).collect();
        print_table(&rows);
        println!();
        println!(
            "Estimated CO2 reduction: {}",
            format_percent(report.estimated_reduction_percent).green().bold()
        );
    }

    for opportunity in &analysis.opportunities {
        print_info(opportunity);
    }

    match written_to {
        Some(path) => print_success(&format!("Optimised Dockerfile written to {}", path.display())),
        None if dry_run => print_warning("Dry run: nothing written"),
        None => {}
    }
}
