//! Error types for the carbon accounting engine
//!
//! Every variant carries enough context (field, sample index, lookup key)
//! for a caller to build its own message. The engine never formats
//! user-facing text beyond the `Display` impls below.

use crate::factors::FactorTable;

/// Result alias used throughout the engine
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// A usage sample held an out-of-range or malformed value
    #[error("invalid sample{}: {field}={value} ({reason})", fmt_index(.index))]
    InvalidSample {
        index: Option<usize>,
        field: &'static str,
        value: f64,
        reason: &'static str,
    },

    /// A scalar input or parameter object was rejected
    #[error("invalid input: {field}={value} ({reason})")]
    InvalidInput {
        field: String,
        value: String,
        reason: &'static str,
    },

    /// Lookup miss with no configured fallback
    #[error("unknown factor '{key}' in table {table}")]
    UnknownFactor { table: FactorTable, key: String },
}

fn fmt_index(index: &Option<usize>) -> String {
    match index {
        Some(i) => format!(" #{}", i),
        None => String::new(),
    }
}

impl EngineError {
    pub fn invalid_input(
        field: impl Into<String>,
        value: impl ToString,
        reason: &'static str,
    ) -> Self {
        Self::InvalidInput {
            field: field.into(),
            value: value.to_string(),
            reason,
        }
    }

    pub fn invalid_sample(
        index: Option<usize>,
        field: &'static str,
        value: f64,
        reason: &'static str,
    ) -> Self {
        Self::InvalidSample {
            index,
            field,
            value,
            reason,
        }
    }

    /// Short machine-readable kind, used as a metrics label
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidSample { .. } => "invalid_sample",
            Self::InvalidInput { .. } => "invalid_input",
            Self::UnknownFactor { .. } => "unknown_factor",
        }
    }
}

/// Reject negative or non-finite scalar inputs
pub(crate) fn ensure_non_negative(field: &str, value: f64) -> Result<f64> {
    if !value.is_finite() {
        return Err(EngineError::invalid_input(field, value, "must be finite"));
    }
    if value < 0.0 {
        return Err(EngineError::invalid_input(field, value, "must not be negative"));
    }
    Ok(value)
}
