//! Audit commands: local sessions, cloud inventories and receipts

use super::{read_json, AppContext};
use crate::output::{
    color_confidence, format_co2, format_currency, format_percent, print_header, print_info,
    print_json, print_table, print_warning, OutputFormat,
};
use anyhow::{Context, Result};
use carbon_lib::audit::{
    AwsAuditReport, AwsAuditor, BaselineReport, CategoryFilter, CloudInventory, LineItem,
    LocalAuditor, MonitoringSession, PersonalAuditReport, PersonalAuditor, SessionComparison,
    SessionReport,
};
use carbon_lib::{AggregationStrategy, AuditResult, ResourceSample};
use clap::{Args, ValueEnum};
use colored::Colorize;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tabled::Tabled;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StrategyArg {
    /// Mean utilisation over the session, one power evaluation
    Mean,
    /// Power per sample interval, integrated over timestamps
    PerSample,
}

impl From<StrategyArg> for AggregationStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Mean => AggregationStrategy::MeanUtilization,
            StrategyArg::PerSample => AggregationStrategy::PerSampleIntegration,
        }
    }
}

#[derive(Debug, Args)]
pub struct LocalArgs {
    /// Samples file(s): a JSON array of samples or a session object.
    /// Several files are compared side by side.
    #[arg(long, required = true, num_args = 1..)]
    pub samples: Vec<PathBuf>,

    /// Session duration in seconds (defaults to the file's, then the sampled span)
    #[arg(long)]
    pub duration: Option<f64>,

    /// Region used to pick the grid carbon intensity
    #[arg(long)]
    pub region: Option<String>,

    /// Aggregation strategy (overrides the configured one)
    #[arg(long, value_enum)]
    pub strategy: Option<StrategyArg>,

    /// Report the idle-machine baseline instead of the session footprint
    #[arg(long)]
    pub baseline: bool,

    /// Save results as JSON (timestamped file in the data directory if no FILE)
    #[arg(long, num_args = 0..=1, value_name = "FILE")]
    pub save: Option<Option<PathBuf>>,
}

#[derive(Debug, Args)]
pub struct AwsArgs {
    /// Inventory file(s) of already-fetched resources, audited concurrently
    #[arg(long, required = true, num_args = 1..)]
    pub inventory: Vec<PathBuf>,

    #[arg(long, num_args = 0..=1, value_name = "FILE")]
    pub save: Option<Option<PathBuf>>,
}

#[derive(Debug, Args)]
pub struct PersonalArgs {
    /// Extracted receipt line items (JSON array or `{"items": [...]}`)
    #[arg(long)]
    pub items: PathBuf,

    /// Category filter: food, transport, energy, goods or all
    #[arg(long, default_value = "all")]
    pub category: CategoryFilter,

    #[arg(long, num_args = 0..=1, value_name = "FILE")]
    pub save: Option<Option<PathBuf>>,
}

/// Accepted shapes of a samples file
#[derive(Deserialize)]
#[serde(untagged)]
enum SamplesFile {
    Session {
        label: Option<String>,
        duration_seconds: Option<f64>,
        region: Option<String>,
        samples: Vec<ResourceSample>,
    },
    Samples(Vec<ResourceSample>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ItemsFile {
    Receipt { items: Vec<LineItem> },
    Items(Vec<LineItem>),
}

fn load_session(path: &Path, args: &LocalArgs) -> Result<MonitoringSession> {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "session".to_string());

    let (label, file_duration, file_region, samples) = match read_json::<SamplesFile>(path)? {
        SamplesFile::Session {
            label,
            duration_seconds,
            region,
            samples,
        } => (label.unwrap_or(stem), duration_seconds, region, samples),
        SamplesFile::Samples(samples) => (stem, None, None, samples),
    };

    let mut session = MonitoringSession::new(label, 0.0, samples);
    session.duration_seconds = args
        .duration
        .or(file_duration)
        .unwrap_or_else(|| session.observed_span_seconds());
    session.region = args.region.clone().or(file_region);
    Ok(session)
}

/// Audit one or more local monitoring sessions
pub fn audit_local(ctx: &AppContext, args: &LocalArgs) -> Result<()> {
    let sessions = args
        .samples
        .iter()
        .map(|path| load_session(path, args))
        .collect::<Result<Vec<_>>>()?;

    let strategy = args
        .strategy
        .map(AggregationStrategy::from)
        .unwrap_or(ctx.config.local.aggregation);
    let auditor = LocalAuditor::new(&ctx.store, ctx.config.device.clone())
        .map_err(|e| ctx.reject("device", e))?
        .with_strategy(strategy)
        .with_base_system_power(ctx.config.local.base_system_power_watts);

    if args.baseline {
        let reports = sessions
            .iter()
            .map(|s| auditor.baseline(s).map_err(|e| ctx.reject(&s.label, e)))
            .collect::<Result<Vec<_>>>()?;
        match ctx.format {
            OutputFormat::Json => print_json(&reports)?,
            OutputFormat::Table => sessions
                .iter()
                .zip(&reports)
                .for_each(|(s, r)| print_baseline(&s.label, r)),
        }
        return ctx.save(&args.save, "local_baseline", &reports);
    }

    if let [session] = sessions.as_slice() {
        let started = Instant::now();
        let report = auditor
            .audit_session(session)
            .map_err(|e| ctx.reject(&session.label, e))?;
        ctx.metrics.observe_aggregation(started.elapsed().as_secs_f64());
        ctx.record_audit(&report.label, &report.result);

        match ctx.format {
            OutputFormat::Json => print_json(&report)?,
            OutputFormat::Table => print_session(&report),
        }
        return ctx.save(&args.save, "local_audit", &report);
    }

    let comparison = auditor.compare_sessions(&sessions);
    for report in &comparison.sessions {
        ctx.record_audit(&report.label, &report.result);
    }
    match ctx.format {
        OutputFormat::Json => print_json(&comparison)?,
        OutputFormat::Table => print_comparison(&comparison),
    }
    ctx.save(&args.save, "local_comparison", &comparison)
}

/// Audit cloud inventories, one blocking task per file
pub async fn audit_aws(ctx: &AppContext, args: &AwsArgs) -> Result<()> {
    let params = Arc::new(ctx.config.aws_params());
    let threshold = ctx.config.aws.idle_cpu_threshold_percent;

    let mut tasks = Vec::with_capacity(args.inventory.len());
    for path in &args.inventory {
        let mut inventory: CloudInventory = read_json(path)?;
        if inventory.region.is_empty() {
            inventory.region = ctx.config.aws.default_region.clone();
        }
        let store = Arc::clone(&ctx.store);
        let params = Arc::clone(&params);
        let task = tokio::task::spawn_blocking(move || {
            let started = Instant::now();
            AwsAuditor::new(&store, &params)
                .with_idle_threshold(threshold)
                .audit(&inventory)
                .map(|report| (report, started.elapsed()))
        });
        tasks.push((path.display().to_string(), task));
    }

    let mut reports = Vec::with_capacity(tasks.len());
    for (label, task) in tasks {
        let (report, elapsed) = task
            .await
            .context("Audit task failed")?
            .map_err(|e| ctx.reject(&label, e))?;
        ctx.metrics.observe_aggregation(elapsed.as_secs_f64());
        ctx.record_audit(&label, &report.result);
        reports.push(report);
    }

    match ctx.format {
        OutputFormat::Json => match reports.as_slice() {
            [single] => print_json(single)?,
            many => print_json(many)?,
        },
        OutputFormat::Table => reports.iter().for_each(print_aws),
    }
    match reports.as_slice() {
        [single] => ctx.save(&args.save, "aws_audit", single),
        many => ctx.save(&args.save, "aws_audit", many),
    }
}

/// Audit extracted receipt line items
pub fn audit_personal(ctx: &AppContext, args: &PersonalArgs) -> Result<()> {
    let items = match read_json::<ItemsFile>(&args.items)? {
        ItemsFile::Receipt { items } | ItemsFile::Items(items) => items,
    };

    let started = Instant::now();
    let report = PersonalAuditor::new(&ctx.store)
        .with_filter(args.category)
        .audit(&items)
        .map_err(|e| ctx.reject(&args.items.display().to_string(), e))?;
    ctx.metrics.observe_aggregation(started.elapsed().as_secs_f64());
    ctx.record_audit(&args.items.display().to_string(), &report.result);

    match ctx.format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => print_personal(&report),
    }
    ctx.save(&args.save, "personal_audit", &report)
}

#[derive(Tabled)]
struct PowerRow {
    #[tabled(rename = "Resource")]
    resource: &'static str,
    #[tabled(rename = "Power")]
    watts: String,
    #[tabled(rename = "Share")]
    share: String,
}

fn print_footprint(result: &AuditResult) {
    println!("CO2 Emissions:          {}", format_co2(result.total_co2_kg).green().bold());
    println!("Energy:                 {:.6} kWh", result.total_energy_kwh);
    println!("Estimated Cost:         {}", format_currency(result.estimated_cost_usd));
    println!("Carbon Intensity:       {:.6} kg/kWh", result.carbon_intensity);
    println!();
}

fn print_session(report: &SessionReport) {
    let result = &report.result;
    print_header(&format!("Local Audit: {}", report.label));
    if result.no_data {
        print_warning("No samples recorded, nothing to account");
        return;
    }

    println!("Duration:               {:.1} s", result.duration_hours * 3600.0);
    println!("Samples:                {}", result.samples_analyzed);
    println!("Avg System CPU:         {}", format_percent(result.avg_system_cpu_percent));
    if let Some(cpu) = result.avg_script_cpu_percent {
        println!("Avg Script CPU:         {}", format_percent(cpu));
    }
    println!(
        "Memory (avg / peak):    {:.2} / {:.2} GB",
        result.avg_memory_gb, result.peak_memory_gb
    );
    println!("Disk I/O:               {:.3} GB", result.total_disk_io_gb);
    match result.total_network_gb {
        Some(gb) => println!("Network:                {:.3} GB", gb),
        None => println!("Network:                {}", "not sampled".dimmed()),
    }
    println!();
    print_footprint(result);

    let power = &result.power_breakdown;
    let share = &result.utilization.power_distribution;
    let row = |resource, watts: f64, percent: f64| PowerRow {
        resource,
        watts: format!("{:.2} W", watts),
        share: format_percent(percent),
    };
    print_table(&[
        row("CPU", power.cpu_watts, share.cpu_percent),
        row("Memory", power.memory_watts, share.memory_percent),
        row("Disk", power.disk_watts, share.disk_percent),
        row("Network", power.network_watts, share.network_percent),
        row("Total", power.total_watts, 100.0),
    ]);
}

fn print_baseline(label: &str, report: &BaselineReport) {
    print_header(&format!("Baseline: {}", label));
    println!("Samples:                {}", report.samples_collected);
    println!("Avg CPU:                {}", format_percent(report.avg_cpu_percent));
    println!("Avg Memory:             {:.2} GB", report.avg_memory_gb);
    println!("Base System Power:      {:.1} W", report.base_system_power_watts);
    println!("Baseline Power:         {:.2} W", report.baseline_power_watts);
    println!("Baseline Energy:        {:.6} kWh", report.baseline_energy_kwh);
    println!("Baseline CO2:           {}", format_co2(report.baseline_co2_kg).green());
    println!();
}

#[derive(Tabled)]
struct SessionRow {
    #[tabled(rename = "Session")]
    label: String,
    #[tabled(rename = "CO2")]
    co2: String,
    #[tabled(rename = "Energy (kWh)")]
    energy: String,
    #[tabled(rename = "Power")]
    power: String,
    #[tabled(rename = "Samples")]
    samples: usize,
}

fn print_comparison(comparison: &SessionComparison) {
    print_header("Session Comparison");
    let rows: Vec<SessionRow> = comparison
        .sessions
        .iter()
        .map(|s| SessionRow {
            label: s.label.clone(),
            co2: format_co2(s.result.total_co2_kg),
            energy: format!("{:.6}", s.result.total_energy_kwh),
            power: format!("{:.2} W", s.result.power_breakdown.total_watts),
            samples: s.result.samples_analyzed,
        })
        .collect();
    print_table(&rows);

    println!(
        "Audited:                {}/{}",
        comparison.successful_audits, comparison.total_sessions
    );
    println!("Total CO2:              {}", format_co2(comparison.total_co2_kg).bold());
    println!("Average per Session:    {}", format_co2(comparison.average_co2_per_session));
    if let Some(top) = comparison.highest() {
        print_info(&format!("Highest emitter: {}", top.label));
    }
    for failure in &comparison.failures {
        print_warning(&format!("{}: {}", failure.label, failure.error));
    }
}

#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Power")]
    power: String,
    #[tabled(rename = "CO2/h")]
    co2: String,
    #[tabled(rename = "Cost/h")]
    cost: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "Idle")]
    idle: String,
}

fn print_aws(report: &AwsAuditReport) {
    print_header(&format!("AWS Audit: {}", report.region));
    if report.result.no_data {
        print_warning("No active resources in inventory");
        return;
    }

    let rows: Vec<ResourceRow> = report
        .resources
        .iter()
        .map(|r| ResourceRow {
            id: r.id.clone(),
            service: r.service.to_string(),
            kind: if r.estimated_power {
                format!("{} (est.)", r.kind)
            } else {
                r.kind.clone()
            },
            power: format!("{:.1} W", r.power_watts),
            co2: format_co2(r.co2_kg_per_hour),
            cost: format!("${:.4}", r.cost_usd_per_hour),
            cpu: r.avg_cpu_percent.map(format_percent).unwrap_or_else(|| "-".into()),
            idle: if r.idle { "yes".yellow().to_string() } else { "no".into() },
        })
        .collect();
    print_table(&rows);

    for (service, totals) in &report.services {
        println!(
            "{:<8} {:>3} resources  {:>12}/h  ${:.4}/h",
            service.to_string(),
            totals.resources,
            format_co2(totals.co2_kg_per_hour),
            totals.cost_usd_per_hour
        );
    }
    println!();
    println!("Hourly CO2:             {}", format_co2(report.total_co2_kg_per_hour).bold());
    println!("Hourly Cost:            ${:.4}", report.total_cost_usd_per_hour);
    println!("Window:                 {} h", report.window_hours);
    print_footprint(&report.result);

    if report.inactive_resources > 0 {
        print_info(&format!("{} stopped resources not counted", report.inactive_resources));
    }
    let idle = report.idle_resource_ids();
    if !idle.is_empty() {
        print_warning(&format!("Idle resources: {}", idle.join(", ")));
    }
}

#[derive(Tabled)]
struct ItemRow {
    #[tabled(rename = "Item")]
    name: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Qty")]
    quantity: String,
    #[tabled(rename = "Price")]
    price: String,
    #[tabled(rename = "CO2")]
    co2: String,
}

fn print_personal(report: &PersonalAuditReport) {
    print_header(&format!("Personal Audit ({})", report.filter));
    if report.result.no_data {
        print_warning("Receipt had no line items");
        return;
    }

    let rows: Vec<ItemRow> = report
        .items
        .iter()
        .map(|i| ItemRow {
            name: i.name.clone(),
            category: i.category.clone(),
            quantity: format!("{}", i.quantity),
            price: format_currency(i.price),
            co2: format_co2(i.co2_kg),
        })
        .collect();
    print_table(&rows);

    for (group, co2) in &report.category_breakdown {
        println!("{:<12} {}", group, format_co2(*co2));
    }
    println!();
    println!("Total CO2:              {}", format_co2(report.total_co2_kg).green().bold());
    println!("Match Rate:             {}", format_percent(report.match_rate * 100.0));
    println!("Confidence:             {}", color_confidence(&report.confidence.to_string()));
    if report.filtered_out > 0 {
        print_info(&format!("{} items outside the {} filter", report.filtered_out, report.filter));
    }
    if !report.unmatched_items.is_empty() {
        print_warning(&format!("Unmatched: {}", report.unmatched_items.join(", ")));
    }
}
