//! Output formatting utilities

use anyhow::{Context, Result};
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use std::path::Path;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}

/// Print rows as a rounded table
pub fn print_table<T: Tabled>(rows: &[T]) {
    if rows.is_empty() {
        println!("{}", "No items found".yellow());
        return;
    }
    println!("{}", Table::new(rows).with(Style::rounded()));
}

/// Write a value as pretty JSON, creating parent directories
pub fn save_json<T: Serialize + ?Sized>(value: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(value).context("Failed to serialize results")?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

pub fn print_header(title: &str) {
    println!("{}", title.bold());
    println!("{}", "=".repeat(50));
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format a CO2 mass, switching to grams below one kilogram
pub fn format_co2(kg: f64) -> String {
    if kg == 0.0 {
        "0 kg".to_string()
    } else if kg.abs() < 0.001 {
        format!("{:.4} g", kg * 1000.0)
    } else if kg.abs() < 1.0 {
        format!("{:.2} g", kg * 1000.0)
    } else {
        format!("{:.2} kg", kg)
    }
}

/// Format currency
pub fn format_currency(amount: f64) -> String {
    if amount < 0.0 {
        format!("-${:.2}", -amount)
    } else {
        format!("${:.2}", amount)
    }
}

pub fn format_percent(value: f64) -> String {
    format!("{:.1}%", value)
}

/// Color a low/medium/high label
pub fn color_level(level: &str) -> String {
    match level.to_lowercase().as_str() {
        "low" => level.green().to_string(),
        "medium" => level.yellow().to_string(),
        "high" => level.red().to_string(),
        _ => level.to_string(),
    }
}

/// Color a confidence label (high is good)
pub fn color_confidence(level: &str) -> String {
    match level.to_lowercase().as_str() {
        "high" => level.green().to_string(),
        "medium" => level.yellow().to_string(),
        _ => level.red().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_co2() {
        assert_eq!(format_co2(0.0), "0 kg");
        assert_eq!(format_co2(0.0000003681), "0.0004 g");
        assert_eq!(format_co2(0.25), "250.00 g");
        assert_eq!(format_co2(12.345), "12.35 kg");
    }

    #[test]
    fn test_format_currency() {
        assert_eq!(format_currency(12.5), "$12.50");
        assert_eq!(format_currency(-100.0), "-$100.00");
    }

    #[test]
    fn test_save_json_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.json");
        save_json(&vec![1, 2, 3], &path).unwrap();

        let back: Vec<i32> = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(back, vec![1, 2, 3]);
    }
}
