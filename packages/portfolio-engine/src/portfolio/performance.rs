//! Realized performance of a portfolio return series.

use super::risk::{max_drawdown, MIN_VOLATILITY};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Historical performance summary of a portfolio return series.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceSummary {
    /// Compounded return over the whole sample
    pub total_return: f64,
    /// Geometric annualized return
    pub annualized_return: f64,
    /// Annualized sample standard deviation of period returns
    pub annualized_volatility: f64,
    /// `(annualized_return - risk_free_rate) / annualized_volatility`
    pub sharpe_ratio: f64,
    /// Maximum peak-to-trough decline as a positive fraction
    pub max_drawdown: f64,
    /// Number of periods in the sample
    pub periods: usize,
}

impl PerformanceSummary {
    /// Summarize a series of period returns.
    pub fn from_returns(returns: &[f64], risk_free_rate: f64, periods_per_year: f64) -> Result<Self> {
        if returns.len() < 2 {
            return Err(Error::InsufficientData(format!(
                "performance summary needs at least 2 returns, got {}",
                returns.len()
            )));
        }

        let n = returns.len() as f64;
        let total_return = cumulative_returns(returns).last().copied().unwrap_or(1.0) - 1.0;
        let annualized_return = annualize_return(total_return, returns.len(), periods_per_year);

        let mean = returns.iter().sum::<f64>() / n;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
        let annualized_volatility = (variance * periods_per_year).sqrt();

        let sharpe_ratio = if annualized_volatility > MIN_VOLATILITY {
            (annualized_return - risk_free_rate) / annualized_volatility
        } else {
            0.0
        };

        Ok(Self {
            total_return,
            annualized_return,
            annualized_volatility,
            sharpe_ratio,
            max_drawdown: max_drawdown(returns),
            periods: returns.len(),
        })
    }
}

/// Growth of one unit invested: `Π (1 + r)` after each period.
pub fn cumulative_returns(returns: &[f64]) -> Vec<f64> {
    returns
        .iter()
        .scan(1.0, |acc, r| {
            *acc *= 1.0 + r;
            Some(*acc)
        })
        .collect()
}

/// Annualize a compounded return earned over `periods` periods.
///
/// A total loss of 100% or more annualizes to `-1.0`.
pub fn annualize_return(total_return: f64, periods: usize, periods_per_year: f64) -> f64 {
    if periods == 0 {
        return 0.0;
    }
    if 1.0 + total_return <= 0.0 {
        return -1.0;
    }

    let years = periods as f64 / periods_per_year;
    (1.0 + total_return).powf(1.0 / years) - 1.0
}
