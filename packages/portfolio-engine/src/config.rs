//! Engine configuration.
//!
//! Configuration is a JSON file. Missing fields take their defaults and a
//! missing file yields [`EngineConfig::default`].

use crate::optimizer::SolverOptions;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV_VAR: &str = "PORTFOLIO_ENGINE_CONFIG";

/// Settings shared by every engine operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Annual risk-free rate used by Sharpe ratios
    pub risk_free_rate: f64,
    /// VaR confidence level in `(0, 1)`
    pub confidence: f64,
    /// Return periods per year (252 for daily data)
    pub periods_per_year: f64,
    /// Default number of efficient frontier points
    pub frontier_points: usize,
    /// Optimizer limits
    pub solver: SolverOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.02,
            confidence: 0.95,
            periods_per_year: 252.0,
            frontier_points: 20,
            solver: SolverOptions::default(),
        }
    }
}

impl EngineConfig {
    /// Get the default configuration file path.
    pub fn default_path() -> PathBuf {
        if let Ok(path) = env::var(CONFIG_ENV_VAR) {
            return PathBuf::from(path);
        }

        directories::BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("portfolio-engine/config.json"))
            .unwrap_or_else(|| PathBuf::from("portfolio-engine.json"))
    }

    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::default_path())
    }

    /// Load and validate configuration from a specific path.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Reject out-of-range settings.
    pub fn validate(&self) -> Result<()> {
        if !self.risk_free_rate.is_finite() {
            return Err(Error::InvalidParameter(format!(
                "risk_free_rate must be finite, got {}",
                self.risk_free_rate
            )));
        }
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return Err(Error::InvalidParameter(format!(
                "confidence must be in (0, 1), got {}",
                self.confidence
            )));
        }
        if !(self.periods_per_year.is_finite() && self.periods_per_year > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "periods_per_year must be positive, got {}",
                self.periods_per_year
            )));
        }
        if self.solver.max_iterations == 0 {
            return Err(Error::InvalidParameter(
                "solver.max_iterations must be at least 1".to_string(),
            ));
        }
        if !(self.solver.tolerance.is_finite() && self.solver.tolerance > 0.0) {
            return Err(Error::InvalidParameter(format!(
                "solver.tolerance must be positive, got {}",
                self.solver.tolerance
            )));
        }
        Ok(())
    }
}
