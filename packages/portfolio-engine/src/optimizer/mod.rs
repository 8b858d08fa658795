//! Mean-variance portfolio optimization.
//!
//! Minimum-variance allocations, optionally at a target annualized return,
//! and the efficient frontier traced by sweeping that target. The numerical
//! work is delegated to a [`ConstrainedMinimizer`]; [`AugmentedLagrangianSqp`]
//! is the default backend.

mod qp;
mod solver;

pub use solver::{
    AugmentedLagrangianSqp, ConstrainedMinimizer, LinearConstraints, Objective, Solution,
    SolverOptions, SolverStatus,
};

use crate::config::EngineConfig;
use crate::portfolio::portfolio_metrics;
use crate::returns::ReturnMatrix;
use crate::types::PortfolioMetrics;
use crate::{Error, Result};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Largest accepted constraint violation of an optimized weight vector.
pub const CONSTRAINT_TOLERANCE: f64 = 1e-6;

/// Weights this close to a bound are placed on it.
const BOUND_SNAP: f64 = 1e-8;

/// Per-asset weight bounds applied to every asset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightBounds {
    pub lower: f64,
    pub upper: f64,
}

impl Default for WeightBounds {
    /// Long-only, fully invested: `[0, 1]`.
    fn default() -> Self {
        Self {
            lower: 0.0,
            upper: 1.0,
        }
    }
}

impl WeightBounds {
    pub fn new(lower: f64, upper: f64) -> Result<Self> {
        let bounds = Self { lower, upper };
        bounds.validate()?;
        Ok(bounds)
    }

    pub fn validate(&self) -> Result<()> {
        if self.lower.is_nan() || self.upper.is_nan() || self.lower > self.upper {
            return Err(Error::InvalidParameter(format!(
                "weight bounds must satisfy lower <= upper, got [{}, {}]",
                self.lower, self.upper
            )));
        }
        Ok(())
    }
}

/// Portfolio variance `wᵀΣw` for an annualized covariance matrix `Σ`.
///
/// Shares its minimizer with the volatility `sqrt(wᵀΣw)` while staying
/// smooth at zero.
#[derive(Debug, Clone)]
pub struct PortfolioVariance {
    covariance: DMatrix<f64>,
}

impl PortfolioVariance {
    pub fn new(covariance: DMatrix<f64>) -> Self {
        Self { covariance }
    }
}

impl Objective for PortfolioVariance {
    fn value(&self, x: &DVector<f64>) -> f64 {
        x.dot(&(&self.covariance * x))
    }

    fn gradient(&self, x: &DVector<f64>) -> DVector<f64> {
        (&self.covariance * x) * 2.0
    }

    fn hessian(&self, _x: &DVector<f64>) -> DMatrix<f64> {
        &self.covariance * 2.0
    }
}

/// Result of a minimum-variance optimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizedPortfolio {
    /// Symbols in return matrix column order
    pub symbols: Vec<String>,
    /// Weight per symbol
    pub weights: Vec<f64>,
    pub metrics: PortfolioMetrics,
    /// Solver iterations used
    pub iterations: usize,
}

/// One point of the efficient frontier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontierPoint {
    pub target_return: f64,
    pub volatility: f64,
    pub weights: Vec<f64>,
}

/// Minimum-variance weights using the default solver configured in `config`.
///
/// # Arguments
///
/// * `returns` - Period returns (at least 2 rows)
/// * `target_return` - Optional annualized return the portfolio must earn
/// * `bounds` - Bounds applied to every weight
/// * `config` - Annualization, risk-free rate and solver limits
pub fn minimize_variance(
    returns: &ReturnMatrix,
    target_return: Option<f64>,
    bounds: WeightBounds,
    config: &EngineConfig,
) -> Result<OptimizedPortfolio> {
    let solver = AugmentedLagrangianSqp::new(config.solver.clone());
    minimize_variance_with(&solver, returns, target_return, bounds, config)
}

/// Minimum-variance weights using the given minimizer.
///
/// Weights sum to 1 within [`CONSTRAINT_TOLERANCE`], respect `bounds` and,
/// when `target_return` is set, earn that annualized expected return.
pub fn minimize_variance_with<M>(
    minimizer: &M,
    returns: &ReturnMatrix,
    target_return: Option<f64>,
    bounds: WeightBounds,
    config: &EngineConfig,
) -> Result<OptimizedPortfolio>
where
    M: ConstrainedMinimizer + ?Sized,
{
    bounds.validate()?;
    if let Some(target) = target_return {
        if !target.is_finite() {
            return Err(Error::InvalidParameter(format!(
                "target return must be finite, got {target}"
            )));
        }
    }

    let n = returns.n_assets();
    let periods_per_year = config.periods_per_year;
    let covariance = returns.covariance()? * periods_per_year;
    let means = returns.mean_returns() * periods_per_year;

    if n == 1 {
        return single_asset(returns, means[0], target_return, bounds, config);
    }

    let constraints = match target_return {
        Some(target) => LinearConstraints::new(
            DMatrix::from_fn(2, n, |row, j| if row == 0 { 1.0 } else { means[j] }),
            DVector::from_vec(vec![1.0, target]),
        ),
        None => LinearConstraints::new(DMatrix::from_element(1, n, 1.0), DVector::from_element(1, 1.0)),
    };

    debug!(assets = n, target = ?target_return, "minimizing portfolio variance");
    let solution = minimizer.minimize(
        &PortfolioVariance::new(covariance),
        &constraints,
        &vec![(bounds.lower, bounds.upper); n],
        &DVector::from_element(n, 1.0 / n as f64),
    );

    let iterations = solution.iterations;
    let weights = snap_to_bounds(accept(solution)?, bounds);
    debug!(iterations, "portfolio variance minimized");

    let metrics = portfolio_metrics(&weights, returns, config.risk_free_rate, periods_per_year)?;
    Ok(OptimizedPortfolio {
        symbols: returns.symbols().to_vec(),
        weights,
        metrics,
        iterations,
    })
}

/// Map a solver outcome to weights or the matching error.
fn accept(solution: Solution) -> Result<Vec<f64>> {
    match solution.status {
        SolverStatus::Converged if solution.constraint_violation <= CONSTRAINT_TOLERANCE => {
            Ok(solution.x.iter().copied().collect())
        }
        SolverStatus::Converged => Err(Error::OptimizationDiverged {
            status: SolverStatus::Infeasible,
            weights: solution.x.iter().copied().collect(),
            violation: solution.constraint_violation,
        }),
        SolverStatus::IterationLimit | SolverStatus::TimeLimit => Err(Error::OptimizationTimeout {
            iterations: solution.iterations,
            elapsed: solution.elapsed,
        }),
        status => Err(Error::OptimizationDiverged {
            status,
            weights: solution.x.iter().copied().collect(),
            violation: solution.constraint_violation,
        }),
    }
}

/// Move weights within [`BOUND_SNAP`] of a bound onto it and spread the
/// resulting change in the total over the interior weights.
fn snap_to_bounds(mut weights: Vec<f64>, bounds: WeightBounds) -> Vec<f64> {
    let mut interior = Vec::new();
    for (i, w) in weights.iter_mut().enumerate() {
        *w = w.clamp(bounds.lower, bounds.upper);
        if *w - bounds.lower <= BOUND_SNAP {
            *w = bounds.lower;
        } else if bounds.upper - *w <= BOUND_SNAP {
            *w = bounds.upper;
        } else {
            interior.push(i);
        }
    }

    let deficit = 1.0 - weights.iter().sum::<f64>();
    if !interior.is_empty() && deficit != 0.0 {
        let share = deficit / interior.len() as f64;
        for i in interior {
            weights[i] = (weights[i] + share).clamp(bounds.lower, bounds.upper);
        }
    }
    weights
}

fn single_asset(
    returns: &ReturnMatrix,
    mean: f64,
    target_return: Option<f64>,
    bounds: WeightBounds,
    config: &EngineConfig,
) -> Result<OptimizedPortfolio> {
    let bound_gap = (bounds.lower - 1.0).max(1.0 - bounds.upper).max(0.0);
    let target_gap = target_return.map_or(0.0, |target| (mean - target).abs());
    let violation = bound_gap.max(target_gap);
    if violation > CONSTRAINT_TOLERANCE {
        return Err(Error::OptimizationDiverged {
            status: SolverStatus::Infeasible,
            weights: vec![1.0],
            violation,
        });
    }

    let weights = vec![1.0];
    let metrics = portfolio_metrics(&weights, returns, config.risk_free_rate, config.periods_per_year)?;
    Ok(OptimizedPortfolio {
        symbols: returns.symbols().to_vec(),
        weights,
        metrics,
        iterations: 0,
    })
}

/// Trace the efficient frontier.
///
/// Targets are `n_points` annualized returns spaced evenly from the lowest to
/// the highest per-asset mean. Each target is optimized independently on the
/// rayon pool; points whose optimization diverges or times out are omitted.
/// Points are returned in ascending target order.
pub fn efficient_frontier(
    returns: &ReturnMatrix,
    n_points: usize,
    bounds: WeightBounds,
    config: &EngineConfig,
) -> Result<Vec<FrontierPoint>> {
    bounds.validate()?;
    returns.covariance()?;
    if n_points == 0 {
        return Ok(Vec::new());
    }

    let means = returns.mean_returns() * config.periods_per_year;
    let lowest = means.min();
    let highest = means.max();
    let targets: Vec<f64> = (0..n_points)
        .map(|i| match i {
            0 => lowest,
            i if i == n_points - 1 => highest,
            i => lowest + (highest - lowest) * i as f64 / (n_points - 1) as f64,
        })
        .collect();

    let results: Vec<Result<FrontierPoint>> = targets
        .par_iter()
        .map(|&target| {
            minimize_variance(returns, Some(target), bounds, config).map(|portfolio| FrontierPoint {
                target_return: target,
                volatility: portfolio.metrics.volatility,
                weights: portfolio.weights,
            })
        })
        .collect();

    let mut points = Vec::with_capacity(n_points);
    for (target, result) in targets.iter().zip(results) {
        match result {
            Ok(point) => points.push(point),
            Err(err @ (Error::OptimizationDiverged { .. } | Error::OptimizationTimeout { .. })) => {
                warn!(target, error = %err, "omitting efficient frontier point");
            }
            Err(err) => return Err(err),
        }
    }

    debug!(requested = n_points, computed = points.len(), "efficient frontier traced");
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn three_assets() -> ReturnMatrix {
        ReturnMatrix::new(
            vec!["BOND".into(), "VALUE".into(), "GROWTH".into()],
            &[
                vec![0.0010, 0.0040, 0.0150],
                vec![0.0005, -0.0030, -0.0100],
                vec![0.0012, 0.0060, 0.0200],
                vec![0.0002, -0.0010, -0.0080],
                vec![0.0008, 0.0050, 0.0120],
                vec![0.0004, -0.0020, -0.0050],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_weights_sum_to_one_within_bounds() {
        let returns = three_assets();
        let result =
            minimize_variance(&returns, None, WeightBounds::default(), &EngineConfig::default())
                .unwrap();

        let total: f64 = result.weights.iter().sum();
        assert!((total - 1.0).abs() <= CONSTRAINT_TOLERANCE);
        assert!(result.weights.iter().all(|w| (-1e-9..=1.0 + 1e-9).contains(w)));
        assert_eq!(result.symbols, returns.symbols());
    }

    #[test]
    fn test_minimum_variance_beats_equal_weights() {
        let returns = three_assets();
        let config = EngineConfig::default();
        let result = minimize_variance(&returns, None, WeightBounds::default(), &config).unwrap();

        let equal = portfolio_metrics(&[1.0 / 3.0; 3], &returns, 0.02, 252.0).unwrap();
        assert!(result.metrics.volatility <= equal.volatility);
    }

    #[test]
    fn test_symmetric_uncorrelated_assets_split_evenly() {
        // Equal means and variances, zero sample covariance
        let returns = ReturnMatrix::new(
            vec!["A".into(), "B".into()],
            &[
                vec![0.01, 0.01],
                vec![-0.01, 0.01],
                vec![0.01, -0.01],
                vec![-0.01, -0.01],
            ],
        )
        .unwrap();

        let result =
            minimize_variance(&returns, None, WeightBounds::default(), &EngineConfig::default())
                .unwrap();
        assert_abs_diff_eq!(result.weights[0], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(result.weights[1], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_single_asset() {
        let returns = ReturnMatrix::new(
            vec!["SPY".into()],
            &[vec![0.01], vec![-0.02], vec![0.015], vec![0.005]],
        )
        .unwrap();

        let result =
            minimize_variance(&returns, None, WeightBounds::default(), &EngineConfig::default())
                .unwrap();
        assert_eq!(result.weights, vec![1.0]);

        let column = returns.column(0).unwrap();
        let mean = column.iter().sum::<f64>() / 4.0;
        let variance = column.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / 3.0;
        assert_abs_diff_eq!(result.metrics.volatility, (variance * 252.0).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_single_asset_excluded_by_bounds() {
        let returns = ReturnMatrix::new(vec!["SPY".into()], &[vec![0.01], vec![-0.02]]).unwrap();
        let bounds = WeightBounds::new(0.0, 0.5).unwrap();

        let result = minimize_variance(&returns, None, bounds, &EngineConfig::default());
        assert!(matches!(
            result,
            Err(Error::OptimizationDiverged {
                status: SolverStatus::Infeasible,
                ..
            })
        ));
    }

    #[test]
    fn test_target_return_is_met() {
        let returns = three_assets();
        let config = EngineConfig::default();
        let means = returns.mean_returns() * config.periods_per_year;
        let target = 0.5 * (means.min() + means.max());

        let result =
            minimize_variance(&returns, Some(target), WeightBounds::default(), &config).unwrap();
        assert_abs_diff_eq!(result.metrics.expected_return, target, epsilon = 1e-6);
    }

    #[test]
    fn test_unreachable_target_diverges() {
        let returns = three_assets();
        let config = EngineConfig::default();
        let means = returns.mean_returns() * config.periods_per_year;

        let result = minimize_variance(
            &returns,
            Some(means.max() + 1.0),
            WeightBounds::default(),
            &config,
        );
        match result {
            Err(Error::OptimizationDiverged {
                status,
                weights,
                violation,
            }) => {
                assert_eq!(status, SolverStatus::Infeasible);
                assert_eq!(weights.len(), 3);
                assert!(violation > CONSTRAINT_TOLERANCE);
            }
            other => panic!("expected divergence, got {other:?}"),
        }
    }

    #[test]
    fn test_bounds_that_cannot_sum_to_one() {
        let bounds = WeightBounds::new(0.0, 0.2).unwrap();
        let result = minimize_variance(&three_assets(), None, bounds, &EngineConfig::default());
        assert!(matches!(result, Err(Error::OptimizationDiverged { .. })));
    }

    #[test]
    fn test_invalid_inputs() {
        let returns = three_assets();
        let config = EngineConfig::default();

        assert!(WeightBounds::new(0.6, 0.4).is_err());
        assert!(matches!(
            minimize_variance(&returns, Some(f64::NAN), WeightBounds::default(), &config),
            Err(Error::InvalidParameter(_))
        ));

        let short = ReturnMatrix::new(vec!["A".into(), "B".into()], &[vec![0.01, 0.02]]).unwrap();
        assert!(matches!(
            minimize_variance(&short, None, WeightBounds::default(), &config),
            Err(Error::InsufficientData(_))
        ));
    }

    #[test]
    fn test_time_limit_reports_timeout() {
        let mut config = EngineConfig::default();
        config.solver.time_limit_ms = Some(0);

        let result = minimize_variance(&three_assets(), None, WeightBounds::default(), &config);
        assert!(matches!(result, Err(Error::OptimizationTimeout { .. })));
    }

    #[test]
    fn test_deterministic() {
        let returns = three_assets();
        let config = EngineConfig::default();

        let first = minimize_variance(&returns, None, WeightBounds::default(), &config).unwrap();
        let second = minimize_variance(&returns, None, WeightBounds::default(), &config).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_efficient_frontier() {
        let returns = three_assets();
        let config = EngineConfig::default();
        let points = efficient_frontier(&returns, 5, WeightBounds::default(), &config).unwrap();

        assert_eq!(points.len(), 5);
        assert!(points
            .windows(2)
            .all(|pair| pair[0].target_return < pair[1].target_return));

        let means = returns.mean_returns() * config.periods_per_year;
        assert_eq!(points[0].target_return, means.min());
        assert_eq!(points[4].target_return, means.max());

        for point in &points {
            let total: f64 = point.weights.iter().sum();
            assert!((total - 1.0).abs() <= CONSTRAINT_TOLERANCE);
        }

        let min_index = points
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.volatility.total_cmp(&b.1.volatility))
            .map(|(i, _)| i)
            .unwrap();
        for pair in points[min_index..].windows(2) {
            assert!(pair[1].volatility >= pair[0].volatility - 1e-7);
        }
    }

    #[test]
    fn test_efficient_frontier_edge_sizes() {
        let returns = three_assets();
        let config = EngineConfig::default();

        assert!(efficient_frontier(&returns, 0, WeightBounds::default(), &config)
            .unwrap()
            .is_empty());

        let single = efficient_frontier(&returns, 1, WeightBounds::default(), &config).unwrap();
        assert_eq!(single.len(), 1);
        let means = returns.mean_returns() * config.periods_per_year;
        assert_eq!(single[0].target_return, means.min());
    }

    #[test]
    fn test_efficient_frontier_omits_timed_out_points() {
        let mut config = EngineConfig::default();
        config.solver.time_limit_ms = Some(0);

        let points =
            efficient_frontier(&three_assets(), 4, WeightBounds::default(), &config).unwrap();
        assert!(points.is_empty());
    }

    /// Deterministic one-factor model: drift, beta times a market draw and
    /// idiosyncratic noise from a xorshift generator.
    fn factor_model(n_assets: usize, n_periods: usize) -> ReturnMatrix {
        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut noise = || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 11) as f64 / (1u64 << 53) as f64 - 0.5
        };

        let symbols = (0..n_assets).map(|j| format!("A{j:02}")).collect();
        let rows: Vec<Vec<f64>> = (0..n_periods)
            .map(|_| {
                let market = 0.02 * noise();
                (0..n_assets)
                    .map(|j| {
                        let drift = 0.0001 + 0.00003 * j as f64;
                        let beta = 0.5 + j as f64 / n_assets as f64;
                        drift + beta * market + 0.01 * noise()
                    })
                    .collect()
            })
            .collect();
        ReturnMatrix::new(symbols, &rows).unwrap()
    }

    fn constant_pair() -> ReturnMatrix {
        ReturnMatrix::new(vec!["A".into(), "B".into()], &vec![vec![0.001, 0.002]; 5]).unwrap()
    }

    #[test]
    fn test_large_universe_frontier_is_complete() {
        let returns = factor_model(50, 250);
        let config = EngineConfig::default();

        let points = efficient_frontier(&returns, 10, WeightBounds::default(), &config).unwrap();
        assert_eq!(points.len(), 10);
        for point in &points {
            let total: f64 = point.weights.iter().sum();
            assert!((total - 1.0).abs() <= CONSTRAINT_TOLERANCE);
            assert!(point.weights.iter().all(|w| (0.0..=1.0).contains(w)));

            let earned = portfolio_metrics(&point.weights, &returns, 0.02, 252.0)
                .unwrap()
                .expected_return;
            assert_abs_diff_eq!(earned, point.target_return, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_highest_mean_target_holds_only_best_asset() {
        let returns = factor_model(50, 250);
        let config = EngineConfig::default();
        let means = returns.mean_returns() * config.periods_per_year;
        let best = means.argmax().0;

        let result =
            minimize_variance(&returns, Some(means.max()), WeightBounds::default(), &config)
                .unwrap();
        assert_abs_diff_eq!(result.weights[best], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_zero_covariance_with_target() {
        // Flat returns leave (0.75, 0.25) as the only portfolio earning 0.315
        let returns = constant_pair();
        let result = minimize_variance(
            &returns,
            Some(0.315),
            WeightBounds::default(),
            &EngineConfig::default(),
        )
        .unwrap();

        assert_abs_diff_eq!(result.weights[0], 0.75, epsilon = 1e-9);
        assert_abs_diff_eq!(result.weights[1], 0.25, epsilon = 1e-9);
        assert_eq!(result.metrics.sharpe_ratio, 0.0);

        let points =
            efficient_frontier(&returns, 5, WeightBounds::default(), &EngineConfig::default())
                .unwrap();
        assert_eq!(points.len(), 5);
    }

    #[test]
    fn test_cash_like_asset_takes_full_weight() {
        let returns = ReturnMatrix::new(
            vec!["CASH".into(), "RISKY".into()],
            &[
                vec![0.0001, 0.010],
                vec![0.0001, -0.008],
                vec![0.0001, 0.010],
                vec![0.0001, -0.008],
                vec![0.0001, 0.010],
                vec![0.0001, -0.008],
            ],
        )
        .unwrap();

        let result =
            minimize_variance(&returns, None, WeightBounds::default(), &EngineConfig::default())
                .unwrap();
        assert_eq!(result.weights, vec![1.0, 0.0]);
        assert_eq!(result.metrics.sharpe_ratio, 0.0);
    }

    #[test]
    fn test_snap_to_bounds() {
        let bounds = WeightBounds::default();
        assert_eq!(snap_to_bounds(vec![0.99999999998, 1.1e-11], bounds), vec![1.0, 0.0]);

        let snapped = snap_to_bounds(vec![0.3, 0.7 - 2e-9, 1e-9], bounds);
        assert_eq!(snapped[2], 0.0);
        assert_abs_diff_eq!(snapped.iter().sum::<f64>(), 1.0, epsilon = 1e-15);
        assert_abs_diff_eq!(snapped[0], 0.3 + 1e-9, epsilon = 1e-15);
    }

    #[test]
    fn test_solver_outcomes_map_to_errors() {
        let solution = |status| Solution {
            x: DVector::from_vec(vec![0.5, 0.5]),
            status,
            iterations: 7,
            objective: 0.0,
            constraint_violation: 0.0,
            elapsed: std::time::Duration::ZERO,
        };

        assert!(matches!(
            accept(solution(SolverStatus::IterationLimit)),
            Err(Error::OptimizationTimeout { iterations: 7, .. })
        ));
        assert!(matches!(
            accept(solution(SolverStatus::TimeLimit)),
            Err(Error::OptimizationTimeout { .. })
        ));
        assert!(matches!(
            accept(solution(SolverStatus::NumericalFailure)),
            Err(Error::OptimizationDiverged {
                status: SolverStatus::NumericalFailure,
                ..
            })
        ));
    }

    #[test]
    fn test_iteration_budget_reports_timeout() {
        let mut config = EngineConfig::default();
        config.solver.max_iterations = 1;

        let result = minimize_variance(&three_assets(), None, WeightBounds::default(), &config);
        assert!(matches!(
            result,
            Err(Error::OptimizationTimeout { iterations: 1, .. })
        ));
    }
}
