//! Engine error taxonomy.
//!
//! Only input-validity problems and analysis preconditions are errors.
//! Infeasible-but-valid outcomes are reported as data on the result types.

/// Errors produced by the trajectory and redistribution engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{field} must be finite, got {value}")]
    NonFinite { field: &'static str, value: f64 },

    #[error("{field} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("invalid rank ordering: {0}")]
    InvalidRanks(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot analyze an empty trajectory")]
    EmptyTrajectory,

    #[error("cannot analyze a trajectory with no historical data; at least one finalized cycle is required")]
    NoHistoricalData,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Reject NaN and infinities with an error naming the offending field.
pub fn ensure_finite(field: &'static str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EngineError::NonFinite { field, value })
    }
}

/// Reject values outside the closed interval `[min, max]`.
pub fn ensure_in_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<f64> {
    let value = ensure_finite(field, value)?;
    if value < min || value > max {
        return Err(EngineError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(value)
}
