//! Configuration commands

use crate::config::SAMPLE_CONFIG;
use crate::output::print_success;
use anyhow::{Context, Result};
use std::path::Path;

/// Write the sample configuration file; refuses to overwrite unless forced
pub fn init(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            output.display()
        );
    }
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(output, SAMPLE_CONFIG)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    print_success(&format!("Configuration written to {}", output.display()));
    Ok(())
}
