//! Portfolio risk metrics calculation.
//!
//! Provides annualized expected return, volatility and Sharpe ratio for a
//! weighted portfolio, plus historical, parametric and conditional VaR and
//! maximum drawdown.

use crate::returns::ReturnMatrix;
use crate::types::PortfolioMetrics;
use crate::{Error, Result};
use nalgebra::DVector;

/// Volatility at or below this is treated as zero when normalizing returns.
pub const MIN_VOLATILITY: f64 = 1e-12;

/// Portfolio volatility at or below this fraction of the most volatile
/// asset's is also treated as zero.
pub const RELATIVE_MIN_VOLATILITY: f64 = 1e-9;

/// Annualized expected return `Σ mean_i · w_i · periods_per_year`.
pub fn expected_return(weights: &[f64], returns: &ReturnMatrix, periods_per_year: f64) -> Result<f64> {
    returns.check_weights(weights)?;
    let means = returns.mean_returns();
    Ok(means.iter().zip(weights).map(|(m, w)| m * w).sum::<f64>() * periods_per_year)
}

/// Annualized volatility `sqrt(wᵀ (Σ · periods_per_year) w)` using the
/// sample covariance.
pub fn portfolio_volatility(
    weights: &[f64],
    returns: &ReturnMatrix,
    periods_per_year: f64,
) -> Result<f64> {
    returns.check_weights(weights)?;
    let cov = returns.covariance()? * periods_per_year;
    let w = DVector::from_column_slice(weights);
    let variance = w.dot(&(&cov * &w));

    // Rounding can push a zero variance slightly negative
    Ok(variance.max(0.0).sqrt())
}

/// Calculate expected return, volatility and Sharpe ratio for a portfolio.
///
/// # Arguments
///
/// * `weights` - Weight per return matrix column
/// * `returns` - Period returns (at least 2 rows)
/// * `risk_free_rate` - Annual risk-free rate (e.g., 0.02 for 2%)
/// * `periods_per_year` - Annualization factor (252 for daily data)
///
/// A zero-volatility portfolio has a Sharpe ratio of `0.0`. Volatility
/// counts as zero at or below [`MIN_VOLATILITY`] or below
/// [`RELATIVE_MIN_VOLATILITY`] times the largest asset volatility.
pub fn portfolio_metrics(
    weights: &[f64],
    returns: &ReturnMatrix,
    risk_free_rate: f64,
    periods_per_year: f64,
) -> Result<PortfolioMetrics> {
    let expected_return = expected_return(weights, returns, periods_per_year)?;
    let volatility = portfolio_volatility(weights, returns, periods_per_year)?;

    let largest_asset_volatility = (returns.covariance()?.diagonal() * periods_per_year)
        .iter()
        .fold(0.0_f64, |m, v| m.max(*v))
        .sqrt();
    let threshold = MIN_VOLATILITY.max(RELATIVE_MIN_VOLATILITY * largest_asset_volatility);

    let sharpe_ratio = if volatility > threshold {
        (expected_return - risk_free_rate) / volatility
    } else {
        0.0
    };

    Ok(PortfolioMetrics {
        expected_return,
        volatility,
        sharpe_ratio,
    })
}

/// Historical Value at Risk.
///
/// Returns the `(1 - confidence)` quantile of the realized portfolio return
/// series, interpolating linearly between order statistics. A loss threshold
/// is a negative number. Fewer than `1 / (1 - confidence)` observations give
/// a less stable estimate but are not an error.
pub fn value_at_risk(weights: &[f64], returns: &ReturnMatrix, confidence: f64) -> Result<f64> {
    check_confidence(confidence)?;
    let mut series = returns.portfolio_returns(weights)?;

    let recommended = (1.0 / (1.0 - confidence)).ceil() as usize;
    if series.len() < recommended {
        tracing::warn!(
            observations = series.len(),
            recommended,
            confidence,
            "VaR estimated from a short sample"
        );
    }

    series.sort_by(|a, b| a.total_cmp(b));
    Ok(quantile_sorted(&series, 1.0 - confidence))
}

/// Conditional VaR (expected shortfall): mean of the portfolio returns at or
/// below the historical VaR.
pub fn conditional_value_at_risk(
    weights: &[f64],
    returns: &ReturnMatrix,
    confidence: f64,
) -> Result<f64> {
    let var = value_at_risk(weights, returns, confidence)?;
    let series = returns.portfolio_returns(weights)?;

    let tail: Vec<f64> = series.iter().copied().filter(|r| *r <= var).collect();
    if tail.is_empty() {
        // Interpolated VaR below every observation only happens for n == 1
        return Ok(var);
    }
    Ok(tail.iter().sum::<f64>() / tail.len() as f64)
}

/// Parametric (Gaussian) VaR: `mean + z_(1-confidence) · std` of the
/// portfolio return series.
pub fn parametric_value_at_risk(
    weights: &[f64],
    returns: &ReturnMatrix,
    confidence: f64,
) -> Result<f64> {
    check_confidence(confidence)?;
    let series = returns.portfolio_returns(weights)?;
    if series.len() < 2 {
        return Err(Error::InsufficientData(
            "parametric VaR needs at least 2 observations".to_string(),
        ));
    }

    let n = series.len() as f64;
    let mean = series.iter().sum::<f64>() / n;
    let variance = series.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);

    Ok(mean + norm_ppf(1.0 - confidence) * variance.sqrt())
}

/// Calculate maximum drawdown from a series of returns.
///
/// Returns the maximum peak-to-trough decline as a decimal (e.g., 0.15 for 15% drawdown).
pub fn max_drawdown(returns: &[f64]) -> f64 {
    let mut cum = 1.0;
    let mut running_max = 1.0_f64;
    let mut max_drawdown = 0.0;

    for r in returns {
        cum *= 1.0 + r;
        running_max = running_max.max(cum);
        let drawdown = (running_max - cum) / running_max;
        if drawdown > max_drawdown {
            max_drawdown = drawdown;
        }
    }

    max_drawdown
}

fn check_confidence(confidence: f64) -> Result<()> {
    if !(confidence > 0.0 && confidence < 1.0) {
        return Err(Error::InvalidParameter(format!(
            "confidence must be in (0, 1), got {confidence}"
        )));
    }
    Ok(())
}

/// Linear-interpolation quantile of an ascending slice.
fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let h = (sorted.len() - 1) as f64 * q;
    let lo = h.floor() as usize;
    let frac = h - lo as f64;

    match sorted.get(lo + 1) {
        Some(&hi) => sorted[lo] + frac * (hi - sorted[lo]),
        None => sorted[lo],
    }
}

/// Inverse cumulative distribution function for standard normal distribution.
///
/// Uses Acklam's algorithm for high accuracy across the full range.
/// Source: https://web.archive.org/web/20151110174102/http://home.online.no/~pjacklam/notes/invnorm/
pub fn norm_ppf(p: f64) -> f64 {
    // Coefficients in rational approximations
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];

    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];

    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];

    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];

    const P_LOW: f64 = 0.02425;
    const P_HIGH: f64 = 1.0 - P_LOW;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= P_HIGH {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    }
}
