//! Engine configuration.
//!
//! Every section has defaults, so an empty TOML document is a valid config.

use serde::{Deserialize, Serialize};

use crate::distribution::DEFAULT_TOLERANCE;
use crate::domain::{ensure_finite, EngineError, Result, TargetConfig};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub target: TargetConfig,
    pub dispatcher: DispatcherConfig,
    pub redistribution: RedistributionDefaults,
}

impl EngineConfig {
    /// Reject non-finite values, an unordered target band and a zero-width dispatcher.
    pub fn validate(&self) -> Result<()> {
        self.target.validate()?;
        if self.dispatcher.max_concurrent == 0 {
            return Err(EngineError::InvalidConfig(
                "dispatcher.max_concurrent must be at least 1".to_string(),
            ));
        }
        let tolerance = ensure_finite("redistribution.tolerance", self.redistribution.tolerance)?;
        if tolerance < 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "redistribution.tolerance must be non-negative, got {tolerance}"
            )));
        }
        Ok(())
    }
}

/// Bounded concurrency for dispatched computations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Maximum number of requests computing at once.
    pub max_concurrent: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { max_concurrent: 4 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedistributionDefaults {
    /// Allowed gap between requested and achieved average.
    pub tolerance: f64,
}

impl Default for RedistributionDefaults {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}
