//! Reduction plan commands

use super::{read_json, AppContext};
use crate::output::{
    color_level, format_co2, format_currency, format_percent, print_header, print_info,
    print_json, print_success, print_table, print_warning, OutputFormat,
};
use anyhow::{Context, Result};
use carbon_lib::{
    combine_results, record_progress, AuditResult, EngineError, Focus, FocusArea, PlanProgress, ReductionPlan,
    ReductionPlanner,
};
use clap::Args;
use colored::Colorize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tabled::Tabled;
use thiserror::Error;

/// `AREA=FILE` argument pointing at a saved audit
#[derive(Debug, Clone)]
pub struct AuditInput {
    pub area: FocusArea,
    pub path: PathBuf,
}

#[derive(Debug, Error)]
pub enum AuditInputError {
    #[error("expected AREA=FILE, got '{0}'")]
    MissingSeparator(String),
    #[error("empty file path for area '{0}'")]
    EmptyPath(String),
    #[error(transparent)]
    Area(#[from] EngineError),
}

impl FromStr for AuditInput {
    type Err = AuditInputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (area, path) = s
            .split_once('=')
            .ok_or_else(|| AuditInputError::MissingSeparator(s.to_string()))?;
        if path.trim().is_empty() {
            return Err(AuditInputError::EmptyPath(area.to_string()));
        }
        Ok(Self {
            area: area.trim().parse()?,
            path: PathBuf::from(path.trim()),
        })
    }
}

/// `ID=PERCENT` measured reduction
#[derive(Debug, Clone)]
pub struct ActualReduction {
    pub id: String,
    pub percent: f64,
}

impl FromStr for ActualReduction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, value) = s
            .split_once('=')
            .ok_or_else(|| format!("expected ACTION_ID=PERCENT, got '{s}'"))?;
        let percent = value
            .trim()
            .parse()
            .map_err(|_| format!("'{value}' is not a number"))?;
        Ok(Self {
            id: id.trim().to_string(),
            percent,
        })
    }
}

#[derive(Debug, Args)]
pub struct PlanArgs {
    /// Saved audit per area, e.g. `aws=aws_audit.json` (repeatable).
    /// Files holding several reports (multiple inventories or sessions)
    /// are combined into one audit for the area.
    #[arg(long = "audit", required = true, value_name = "AREA=FILE")]
    pub audits: Vec<AuditInput>,

    /// Target reduction in percent
    #[arg(long, default_value_t = 20.0)]
    pub target: f64,

    /// Timeframe in months
    #[arg(long, default_value_t = 12)]
    pub timeframe: u32,

    /// Areas to draw actions from: all, infrastructure (aws), local or personal
    #[arg(long, default_value = "all")]
    pub focus: Focus,

    #[arg(long, num_args = 0..=1, value_name = "FILE")]
    pub save: Option<Option<PathBuf>>,
}

#[derive(Debug, Args)]
pub struct ProgressArgs {
    /// Saved plan file
    #[arg(long)]
    pub plan: PathBuf,

    /// Completed action ids
    #[arg(long, num_args = 1..)]
    pub completed: Vec<String>,

    /// Measured reduction per action, e.g. `caching=4.5` (repeatable)
    #[arg(long = "actual", value_name = "ACTION_ID=PERCENT")]
    pub actuals: Vec<ActualReduction>,

    #[arg(long, num_args = 0..=1, value_name = "FILE")]
    pub save: Option<Option<PathBuf>>,
}

/// Audit results inside a saved report: a single report, a bare result,
/// a session comparison or an array of reports
fn collect_results(value: serde_json::Value, out: &mut Vec<AuditResult>) -> serde_json::Result<()> {
    match value {
        serde_json::Value::Array(items) => {
            for item in items {
                collect_results(item, out)?;
            }
        }
        serde_json::Value::Object(mut map) if map.contains_key("result") => {
            out.push(serde_json::from_value(map.remove("result").unwrap_or_default())?);
        }
        serde_json::Value::Object(mut map) if map.contains_key("sessions") => {
            collect_results(map.remove("sessions").unwrap_or_default(), out)?;
        }
        other => out.push(serde_json::from_value(other)?),
    }
    Ok(())
}

/// One audit result per file; several reports in a file are combined
fn load_audit(path: &Path) -> Result<AuditResult> {
    let value: serde_json::Value = read_json(path)?;
    let mut results = Vec::new();
    collect_results(value, &mut results)
        .with_context(|| format!("{} does not contain an audit result", path.display()))?;
    combine_results(&results).with_context(|| format!("Cannot combine audits in {}", path.display()))
}

/// Generate a reduction plan from saved audits
pub fn generate(ctx: &AppContext, args: &PlanArgs) -> Result<()> {
    let mut audits = BTreeMap::new();
    for input in &args.audits {
        if audits.contains_key(&input.area) {
            anyhow::bail!("Audit for area '{}' given more than once", input.area);
        }
        audits.insert(input.area, load_audit(&input.path)?);
    }

    let plan = ReductionPlanner::new()
        .with_executions_per_month(ctx.config.plan.executions_per_month)
        .generate_plan(&audits, args.target, args.timeframe, args.focus)
        .map_err(|e| ctx.reject("plan", e))?;
    ctx.metrics.record_plan(&plan);
    ctx.logger.log_plan(&plan);

    match ctx.format {
        OutputFormat::Json => print_json(&plan)?,
        OutputFormat::Table => print_plan(&plan),
    }
    ctx.save(&args.save, "reduction_plan", &plan)
}

/// Record progress against a saved plan
pub fn progress(ctx: &AppContext, args: &ProgressArgs) -> Result<()> {
    let plan: ReductionPlan = read_json(&args.plan)?;
    let actuals: BTreeMap<String, f64> = args
        .actuals
        .iter()
        .map(|a| (a.id.clone(), a.percent))
        .collect();

    let progress = record_progress(&plan, &args.completed, &actuals)
        .map_err(|e| ctx.reject(&args.plan.display().to_string(), e))?;

    match ctx.format {
        OutputFormat::Json => print_json(&progress)?,
        OutputFormat::Table => print_progress(&plan, &progress),
    }
    ctx.save(&args.save, "plan_progress", &progress)
}

#[derive(Tabled)]
struct ActionRow {
    #[tabled(rename = "#")]
    priority: usize,
    #[tabled(rename = "Action")]
    title: String,
    #[tabled(rename = "Area")]
    area: String,
    #[tabled(rename = "Impact")]
    impact: String,
    #[tabled(rename = "Cost")]
    cost: String,
    #[tabled(rename = "Effort")]
    effort: String,
    #[tabled(rename = "Timeline")]
    timeline: String,
}

#[derive(Tabled)]
struct PhaseRow {
    #[tabled(rename = "Phase")]
    number: usize,
    #[tabled(rename = "Action")]
    title: String,
    #[tabled(rename = "Weeks")]
    weeks: String,
}

fn print_plan(plan: &ReductionPlan) {
    print_header("Carbon Reduction Plan");
    println!("Plan ID:                {}", plan.plan_id.cyan());
    println!("Target:                 {}", format_percent(plan.target_reduction_percent));
    println!("Timeframe:              {} months", plan.timeframe_months);
    println!("Focus:                  {}", plan.focus);
    println!(
        "Monthly Baseline:       {}",
        format_co2(plan.baseline.total_monthly_co2_kg)
    );
    println!();

    if plan.pool_empty {
        print_warning("No reduction actions apply to the supplied audits");
        return;
    }

    let rows: Vec<ActionRow> = plan
        .actions
        .iter()
        .map(|a| ActionRow {
            priority: a.priority,
            title: a.title.clone(),
            area: a.area.to_string(),
            impact: format_percent(a.impact_percent),
            cost: format_currency(a.cost),
            effort: color_level(&a.effort.to_string()),
            timeline: if a.exceeds_timeframe {
                format!("{} wk (!)", a.timeline_weeks).yellow().to_string()
            } else {
                format!("{} wk", a.timeline_weeks)
            },
        })
        .collect();
    print_table(&rows);

    let cumulative = format_percent(plan.cumulative_impact_percent);
    if plan.target_met {
        print_success(&format!("Target met: {} estimated reduction", cumulative));
    } else {
        print_warning(&format!(
            "Target not met: {} of {} reachable with {} candidates",
            cumulative,
            format_percent(plan.target_reduction_percent),
            plan.candidates_considered
        ));
    }
    let overrunning: Vec<&str> = plan.overrunning().map(|a| a.id.as_str()).collect();
    if !overrunning.is_empty() {
        print_info(&format!("Extends beyond timeframe: {}", overrunning.join(", ")));
    }
    println!();

    println!("{}", "Implementation Phases".bold());
    let phases: Vec<PhaseRow> = plan
        .phases
        .iter()
        .map(|p| PhaseRow {
            number: p.phase_number,
            title: p.title.clone(),
            weeks: format!("{}-{}", p.start_week, p.end_week),
        })
        .collect();
    print_table(&phases);

    if !plan.milestones.is_empty() {
        println!("{}", "Milestones".bold());
        for m in &plan.milestones {
            println!(
                "  week {:>3}  {:<22} {}",
                m.week,
                m.title,
                format_percent(m.expected_reduction_percent)
            );
        }
        println!();
    }

    println!("Total Cost:             {}", format_currency(plan.total_cost));
    println!("Avg Complexity:         {:.2}", plan.avg_complexity);
    println!(
        "Success Probability:    {}",
        format_percent(plan.success_probability * 100.0)
    );
}

fn print_progress(plan: &ReductionPlan, progress: &PlanProgress) {
    print_header(&format!("Progress: {}", progress.plan_id));
    println!(
        "Completed:              {}/{} ({})",
        progress.completed_actions.len(),
        plan.actions.len(),
        format_percent(progress.completion_rate * 100.0)
    );
    println!("Planned Reduction:      {}", format_percent(plan.cumulative_impact_percent));
    println!("Actual Reduction:       {}", format_percent(progress.total_actual_reduction));

    let variance = format_percent(progress.variance_from_plan);
    if progress.variance_from_plan >= 0.0 {
        println!("Variance:               {}", variance.green());
    } else {
        println!("Variance:               {}", variance.red());
    }
}
