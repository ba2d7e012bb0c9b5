//! Carbon Guard CLI
//!
//! A command-line tool for auditing the carbon footprint of local
//! workloads, cloud inventories and receipts, for planning reductions and
//! for slimming container images.

mod commands;
mod config;
mod output;

use anyhow::{Context, Result};
use carbon_lib::{EngineMetrics, FactorTable, StructuredLogger};
use clap::{Parser, Subcommand};
use commands::{audit, configure, factors, optimize, plan, AppContext};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const CLI_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Carbon Guard CLI
#[derive(Parser)]
#[command(name = "carbon-guard")]
#[command(author, version, about = "Carbon Guard: carbon accounting and reduction planning", long_about = None)]
pub struct Cli {
    /// Configuration file (default: ./carbon-guard.{yaml,toml,json}, then ~/.carbon-guard.*)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, default_value = "table", global = true)]
    pub format: output::OutputFormat,

    /// Enable verbose (debug) logging
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Write Prometheus metrics to this file after the command
    #[arg(long, global = true)]
    pub metrics_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Audit an activity source
    #[command(subcommand)]
    Audit(AuditCommands),

    /// Generate a reduction plan from saved audits
    Plan(plan::PlanArgs),

    /// Record progress against a saved plan
    Progress(plan::ProgressArgs),

    /// Analyse a Dockerfile and write an optimised copy
    Optimize(optimize::OptimizeArgs),

    /// Inspect emission factor tables
    #[command(subcommand)]
    Factors(FactorsCommands),

    /// Manage the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
pub enum AuditCommands {
    /// Audit monitored local process sessions
    Local(audit::LocalArgs),

    /// Audit already-fetched AWS resource inventories
    Aws(audit::AwsArgs),

    /// Audit extracted receipt line items
    Personal(audit::PersonalArgs),
}

#[derive(Subcommand)]
pub enum FactorsCommands {
    /// List factor tables
    List {
        /// Only this table (region_intensity, instance_power, instance_cost,
        /// consumption_item, item_unit_price, activity_equivalent)
        #[arg(long)]
        table: Option<FactorTable>,
    },

    /// Look up one factor, showing any fallback used
    Lookup {
        /// Table name
        table: FactorTable,
        /// Key within the table
        key: String,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Write a sample configuration file
    Init {
        /// Output path
        #[arg(long, short, default_value = "carbon-guard.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // stdout is reserved for command output
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

fn write_metrics(metrics: &EngineMetrics, path: &Path) -> Result<()> {
    let text = metrics.render().context("Failed to render metrics")?;
    std::fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    // Needs no valid configuration
    if let Commands::Config(ConfigCommands::Init { output, force }) = &cli.command {
        return configure::init(output, *force);
    }

    let config = config::CarbonGuardConfig::load(cli.config.as_deref())?;
    let store = Arc::new(config.factor_store()?);

    let logger = StructuredLogger::new("cli");
    logger.log_startup(CLI_VERSION, store.version());

    let ctx = AppContext {
        config,
        store,
        format: cli.format,
        metrics: EngineMetrics::new(),
        logger,
    };

    let outcome = match &cli.command {
        Commands::Audit(audit_cmd) => match audit_cmd {
            AuditCommands::Local(args) => audit::audit_local(&ctx, args),
            AuditCommands::Aws(args) => audit::audit_aws(&ctx, args).await,
            AuditCommands::Personal(args) => audit::audit_personal(&ctx, args),
        },
        Commands::Plan(args) => plan::generate(&ctx, args),
        Commands::Progress(args) => plan::progress(&ctx, args),
        Commands::Optimize(args) => optimize::optimize(&ctx, args),
        Commands::Factors(factors_cmd) => match factors_cmd {
            FactorsCommands::List { table } => factors::list_factors(&ctx, *table),
            FactorsCommands::Lookup { table, key } => factors::lookup_factor(&ctx, *table, key),
        },
        Commands::Config(ConfigCommands::Init { output, force }) => configure::init(output, *force),
    };

    // Failed runs still report their validation counters
    if let Some(path) = &cli.metrics_file {
        write_metrics(&ctx.metrics, path)?;
    }
    outcome
}
