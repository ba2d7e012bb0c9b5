//! CLI command implementations

pub mod audit;
pub mod configure;
pub mod factors;
pub mod optimize;
pub mod plan;

use crate::config::CarbonGuardConfig;
use crate::output::{print_success, save_json, OutputFormat};
use anyhow::{Context, Result};
use carbon_lib::{AuditResult, EmissionFactorStore, EngineError, EngineMetrics, StructuredLogger};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Everything a command needs, built once in `main`
pub struct AppContext {
    pub config: CarbonGuardConfig,
    pub store: Arc<EmissionFactorStore>,
    pub format: OutputFormat,
    pub metrics: EngineMetrics,
    pub logger: StructuredLogger,
}

impl AppContext {
    /// Log and count a rejected input, then hand it back as a CLI error
    pub fn reject(&self, input: &str, error: EngineError) -> anyhow::Error {
        self.logger.log_validation_failed(input, &error);
        self.metrics.record_validation_error(&error);
        anyhow::Error::new(error).context(format!("Rejected input: {input}"))
    }

    pub fn record_audit(&self, label: &str, result: &AuditResult) {
        self.metrics.record_audit(result);
        self.logger.log_audit(label, result);
    }

    /// Honour `--save [FILE]`; a bare flag writes a timestamped file under
    /// the data directory
    pub fn save<T: Serialize + ?Sized>(
        &self,
        target: &Option<Option<PathBuf>>,
        prefix: &str,
        value: &T,
    ) -> Result<()> {
        let Some(requested) = target else {
            return Ok(());
        };
        let path = match requested {
            Some(path) => path.clone(),
            None => self.config.data_directory.join(format!(
                "{}_{}.json",
                prefix,
                Utc::now().format("%Y%m%d_%H%M%S")
            )),
        };
        save_json(value, &path)?;
        match self.format {
            // keep stdout parseable
            OutputFormat::Json => info!(path = %path.display(), "Results saved"),
            OutputFormat::Table => print_success(&format!("Results saved to {}", path.display())),
        }
        Ok(())
    }
}

/// Read and parse a JSON input file
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}
