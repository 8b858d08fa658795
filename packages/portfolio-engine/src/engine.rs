//! # Portfolio Engine
//!
//! Single entry point binding an [`EngineConfig`] to every analytics and
//! optimization operation, plus a one-call portfolio report.

use crate::config::EngineConfig;
use crate::optimizer::{self, FrontierPoint, OptimizedPortfolio, WeightBounds};
use crate::portfolio::{self, PerformanceSummary, PositionLedger};
use crate::returns::ReturnMatrix;
use crate::types::{PortfolioMetrics, Scenario};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Full risk report for a ledger against a return history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioReport {
    pub total_value: f64,
    /// Weight per held symbol
    pub weights: BTreeMap<String, f64>,
    pub metrics: PortfolioMetrics,
    /// Historical VaR at the configured confidence
    pub value_at_risk: f64,
    /// Gaussian VaR at the configured confidence
    pub parametric_value_at_risk: f64,
    /// Expected shortfall beyond the historical VaR
    pub conditional_value_at_risk: f64,
    pub sector_exposure: BTreeMap<String, f64>,
    /// Annualized expected return per scenario
    pub stress: BTreeMap<String, f64>,
    pub performance: PerformanceSummary,
}

/// Portfolio analytics bound to one configuration.
#[derive(Debug, Clone, Default)]
pub struct PortfolioEngine {
    config: EngineConfig,
}

impl PortfolioEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Annualized expected return, volatility and Sharpe ratio.
    pub fn portfolio_metrics(&self, weights: &[f64], returns: &ReturnMatrix) -> Result<PortfolioMetrics> {
        portfolio::portfolio_metrics(
            weights,
            returns,
            self.config.risk_free_rate,
            self.config.periods_per_year,
        )
    }

    /// Historical VaR at the configured confidence.
    pub fn value_at_risk(&self, weights: &[f64], returns: &ReturnMatrix) -> Result<f64> {
        portfolio::value_at_risk(weights, returns, self.config.confidence)
    }

    pub fn parametric_value_at_risk(&self, weights: &[f64], returns: &ReturnMatrix) -> Result<f64> {
        portfolio::parametric_value_at_risk(weights, returns, self.config.confidence)
    }

    pub fn conditional_value_at_risk(&self, weights: &[f64], returns: &ReturnMatrix) -> Result<f64> {
        portfolio::conditional_value_at_risk(weights, returns, self.config.confidence)
    }

    /// Realized performance of the weighted portfolio return series.
    pub fn performance(&self, weights: &[f64], returns: &ReturnMatrix) -> Result<PerformanceSummary> {
        let series = returns.portfolio_returns(weights)?;
        PerformanceSummary::from_returns(
            &series,
            self.config.risk_free_rate,
            self.config.periods_per_year,
        )
    }

    pub fn minimize_variance(
        &self,
        returns: &ReturnMatrix,
        target_return: Option<f64>,
        bounds: WeightBounds,
    ) -> Result<OptimizedPortfolio> {
        optimizer::minimize_variance(returns, target_return, bounds, &self.config)
    }

    /// Efficient frontier with `n_points` targets, or the configured default.
    pub fn efficient_frontier(
        &self,
        returns: &ReturnMatrix,
        n_points: Option<usize>,
        bounds: WeightBounds,
    ) -> Result<Vec<FrontierPoint>> {
        let n_points = n_points.unwrap_or(self.config.frontier_points);
        optimizer::efficient_frontier(returns, n_points, bounds, &self.config)
    }

    pub fn sector_exposure(
        &self,
        ledger: &PositionLedger,
        sectors: &BTreeMap<String, String>,
    ) -> BTreeMap<String, f64> {
        portfolio::sector_exposure(&ledger.weights(), sectors)
    }

    pub fn stress_test(
        &self,
        returns: &ReturnMatrix,
        weights: &[f64],
        scenarios: &[Scenario],
    ) -> Result<BTreeMap<String, f64>> {
        portfolio::stress_test(returns, weights, scenarios, self.config.periods_per_year)
    }

    /// Analyze a ledger against a return history.
    ///
    /// Every held symbol must have a column in `returns`; columns for symbols
    /// that are not held get weight zero.
    ///
    /// # Arguments
    ///
    /// * `ledger` - Current holdings
    /// * `returns` - Period returns covering every held symbol
    /// * `sectors` - Sector per symbol; unmapped symbols count as unknown
    /// * `scenarios` - Stress scenarios with unique names
    pub fn analyze(
        &self,
        ledger: &PositionLedger,
        returns: &ReturnMatrix,
        sectors: &BTreeMap<String, String>,
        scenarios: &[Scenario],
    ) -> Result<PortfolioReport> {
        self.config.validate()?;

        if let Some(missing) = ledger
            .positions()
            .find(|p| returns.index_of(&p.symbol).is_none())
        {
            return Err(Error::InsufficientData(format!(
                "no return history for held symbol {}",
                missing.symbol
            )));
        }

        let weights = ledger.aligned_weights(returns.symbols());
        tracing::debug!(
            positions = ledger.len(),
            periods = returns.n_periods(),
            scenarios = scenarios.len(),
            "analyzing portfolio"
        );

        Ok(PortfolioReport {
            total_value: ledger.total_value(),
            weights: ledger.weights(),
            metrics: self.portfolio_metrics(&weights, returns)?,
            value_at_risk: self.value_at_risk(&weights, returns)?,
            parametric_value_at_risk: self.parametric_value_at_risk(&weights, returns)?,
            conditional_value_at_risk: self.conditional_value_at_risk(&weights, returns)?,
            sector_exposure: self.sector_exposure(ledger, sectors),
            stress: self.stress_test(returns, &weights, scenarios)?,
            performance: self.performance(&weights, returns)?,
        })
    }
}
