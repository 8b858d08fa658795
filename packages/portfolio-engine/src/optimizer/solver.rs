//! Constrained minimization capability and its default backend.
//!
//! The backend minimizes a smooth objective subject to linear equalities and
//! per-variable bounds. A bound-constrained least-squares phase first finds a
//! point satisfying the equalities. Each iteration then takes a Newton step on
//! the augmented Lagrangian of the equalities, solving the bound-constrained
//! quadratic model with the active-set method in [`super::qp`], and updates
//! the multipliers. The penalty grows whenever feasibility stalls.

use super::qp::{self, max_abs, BoxQp, QpFailure};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

/// Residual above which the equalities are declared unreachable.
const FEASIBILITY_TOL: f64 = 1e-8;

/// Initial penalty relative to the Hessian-to-constraint scale ratio.
const INITIAL_PENALTY: f64 = 10.0;

/// Largest penalty relative to the Hessian-to-constraint scale ratio.
const MAX_PENALTY: f64 = 1e10;

/// Required residual reduction per iteration before the penalty grows.
const PENALTY_PROGRESS: f64 = 0.25;

/// Smallest Hessian scale relative to the constraint scale. Keeps the `1/ρ`
/// block of the subproblem from swamping the constraint rows when the
/// Hessian is tiny or zero.
const HESSIAN_FLOOR: f64 = 1.0;

/// Relative diagonal shift of the Hessian in the quadratic model.
const REGULARIZATION: f64 = 1e-12;

/// Relative merit increase accepted as rounding in the line search.
const MERIT_ROUNDING: f64 = 1e-14;

/// Sufficient-decrease constant of the backtracking line search.
const ARMIJO: f64 = 1e-4;

/// Smallest line-search step.
const MIN_STEP: f64 = 1e-10;

/// A twice-differentiable objective function.
pub trait Objective: Sync {
    /// Objective value at `x`.
    fn value(&self, x: &DVector<f64>) -> f64;

    /// Gradient at `x`.
    fn gradient(&self, x: &DVector<f64>) -> DVector<f64>;

    /// Hessian at `x`.
    fn hessian(&self, x: &DVector<f64>) -> DMatrix<f64>;
}

/// Linear equality constraints `A x = b`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearConstraints {
    matrix: DMatrix<f64>,
    rhs: DVector<f64>,
}

impl LinearConstraints {
    /// Constraints with one row of `matrix` per entry of `rhs`.
    pub fn new(matrix: DMatrix<f64>, rhs: DVector<f64>) -> Self {
        Self { matrix, rhs }
    }

    /// No constraints over `n` variables.
    pub fn none(n: usize) -> Self {
        Self {
            matrix: DMatrix::zeros(0, n),
            rhs: DVector::zeros(0),
        }
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    pub fn rhs(&self) -> &DVector<f64> {
        &self.rhs
    }

    pub fn len(&self) -> usize {
        self.rhs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rhs.is_empty()
    }

    /// Largest absolute residual `|A x - b|` over all rows.
    pub fn residual(&self, x: &DVector<f64>) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        max_abs(&(&self.matrix * x - &self.rhs))
    }

    fn is_well_formed(&self, n: usize) -> bool {
        self.matrix.ncols() == n
            && self.matrix.nrows() == self.rhs.len()
            && self.matrix.iter().chain(self.rhs.iter()).all(|v| v.is_finite())
    }
}

/// Iteration and wall-clock limits of a minimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// Maximum number of outer iterations
    pub max_iterations: usize,
    /// Relative tolerance for both step size and constraint residual
    pub tolerance: f64,
    /// Optional wall-clock limit in milliseconds
    pub time_limit_ms: Option<u64>,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            tolerance: 1e-9,
            time_limit_ms: None,
        }
    }
}

impl SolverOptions {
    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit_ms.map(Duration::from_millis)
    }
}

/// Outcome of a minimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverStatus {
    Converged,
    IterationLimit,
    TimeLimit,
    Infeasible,
    NumericalFailure,
    InvalidProblem,
}

impl fmt::Display for SolverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SolverStatus::Converged => "converged",
            SolverStatus::IterationLimit => "iteration limit reached",
            SolverStatus::TimeLimit => "time limit reached",
            SolverStatus::Infeasible => "infeasible",
            SolverStatus::NumericalFailure => "numerical failure",
            SolverStatus::InvalidProblem => "invalid problem",
        };
        f.write_str(text)
    }
}

impl From<QpFailure> for SolverStatus {
    fn from(failure: QpFailure) -> Self {
        match failure {
            QpFailure::TimeLimit => SolverStatus::TimeLimit,
            QpFailure::IterationLimit | QpFailure::Singular => SolverStatus::NumericalFailure,
        }
    }
}

/// Final iterate of a minimization.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub x: DVector<f64>,
    pub status: SolverStatus,
    pub iterations: usize,
    pub objective: f64,
    /// Largest equality residual or bound excess at `x`
    pub constraint_violation: f64,
    pub elapsed: Duration,
}

/// Minimizes an [`Objective`] under linear equalities and variable bounds.
pub trait ConstrainedMinimizer: Sync {
    /// # Arguments
    /// * `objective` - Function to minimize
    /// * `constraints` - Equalities `A x = b`
    /// * `bounds` - `(lower, upper)` per variable
    /// * `initial_guess` - Starting point, clipped to the bounds
    fn minimize(
        &self,
        objective: &dyn Objective,
        constraints: &LinearConstraints,
        bounds: &[(f64, f64)],
        initial_guess: &DVector<f64>,
    ) -> Solution;
}

/// Wall-clock budget shared by the solver and its subproblems.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Budget {
    started: Instant,
    limit: Option<Duration>,
}

impl Budget {
    pub(crate) fn start(limit: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    pub(crate) fn expired(&self) -> bool {
        self.limit
            .is_some_and(|limit| self.started.elapsed() >= limit)
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Augmented-Lagrangian sequential quadratic programming.
#[derive(Debug, Clone, Default)]
pub struct AugmentedLagrangianSqp {
    options: SolverOptions,
}

impl AugmentedLagrangianSqp {
    pub fn new(options: SolverOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }
}

impl ConstrainedMinimizer for AugmentedLagrangianSqp {
    fn minimize(
        &self,
        objective: &dyn Objective,
        constraints: &LinearConstraints,
        bounds: &[(f64, f64)],
        initial_guess: &DVector<f64>,
    ) -> Solution {
        let budget = Budget::start(self.options.time_limit());
        let n = initial_guess.len();

        let bounds_valid = bounds
            .iter()
            .all(|&(lo, hi)| !lo.is_nan() && !hi.is_nan() && lo <= hi);
        if n == 0
            || bounds.len() != n
            || !bounds_valid
            || !constraints.is_well_formed(n)
            || initial_guess.iter().any(|v| !v.is_finite())
        {
            return Solution {
                x: initial_guess.clone(),
                status: SolverStatus::InvalidProblem,
                iterations: 0,
                objective: f64::NAN,
                constraint_violation: f64::INFINITY,
                elapsed: budget.elapsed(),
            };
        }

        let lower = DVector::from_iterator(n, bounds.iter().map(|b| b.0));
        let upper = DVector::from_iterator(n, bounds.iter().map(|b| b.1));
        let finish = |x: DVector<f64>, status: SolverStatus, iterations: usize| {
            let bound_excess = (0..n)
                .map(|i| (lower[i] - x[i]).max(x[i] - upper[i]).max(0.0))
                .fold(0.0, f64::max);
            Solution {
                objective: objective.value(&x),
                constraint_violation: constraints.residual(&x).max(bound_excess),
                x,
                status,
                iterations,
                elapsed: budget.elapsed(),
            }
        };

        let a = &constraints.matrix;
        let b = &constraints.rhs;
        let tolerance = self.options.tolerance;
        let residual_tol = tolerance * (1.0 + max_abs(b));

        let mut x = qp::clamp(initial_guess, &lower, &upper);

        // Feasibility phase: minimize |A x - b|^2 over the bounds
        if constraints.residual(&x) > residual_tol {
            let zero_h = DMatrix::zeros(n, n);
            let zero_c = DVector::zeros(n);
            let phase_one = BoxQp {
                h: &zero_h,
                c: &zero_c,
                a,
                b,
                rho: 1.0,
                lower: &lower,
                upper: &upper,
            };
            match qp::solve_box_qp(&phase_one, &x, &budget) {
                Ok(point) => x = point,
                Err(failure) => return finish(x, failure.into(), 0),
            }
            let residual = constraints.residual(&x);
            if residual > FEASIBILITY_TOL * (1.0 + max_abs(b)) {
                debug!(residual, "equality constraints unreachable within bounds");
                return finish(x, SolverStatus::Infeasible, 0);
            }
        }

        let constraint_scale = (0..n)
            .map(|j| a.column(j).norm_squared())
            .fold(0.0, f64::max)
            .max(f64::EPSILON);
        let hessian_scale = max_abs(&objective.hessian(&x).diagonal())
            .max(HESSIAN_FLOOR * constraint_scale);
        let mut rho = INITIAL_PENALTY * hessian_scale / constraint_scale;
        let max_rho = MAX_PENALTY * hessian_scale / constraint_scale;

        let mut lambda = DVector::zeros(constraints.len());
        let mut residual = constraints.residual(&x);

        for iteration in 1..=self.options.max_iterations {
            if budget.expired() {
                return finish(x, SolverStatus::TimeLimit, iteration - 1);
            }

            let gradient = objective.gradient(&x);
            let hessian = objective.hessian(&x);
            let mut hessian = (&hessian + hessian.transpose()) * 0.5;
            let shift = REGULARIZATION * max_abs(&hessian.diagonal());
            for i in 0..n {
                hessian[(i, i)] += shift;
            }
            let linear = &gradient - &hessian * &x + a.transpose() * &lambda;

            let model = BoxQp {
                h: &hessian,
                c: &linear,
                a,
                b,
                rho,
                lower: &lower,
                upper: &upper,
            };
            let target = match qp::solve_box_qp(&model, &x, &budget) {
                Ok(y) => y,
                Err(failure) => return finish(x, failure.into(), iteration),
            };
            let step = &target - &x;

            let merit = |p: &DVector<f64>| {
                let r = a * p - b;
                objective.value(p) + lambda.dot(&r) + 0.5 * rho * r.norm_squared()
            };
            let current = merit(&x);
            let slack = MERIT_ROUNDING * (1.0 + current.abs());
            let slope = (&gradient + a.transpose() * (&lambda + (a * &x - b) * rho))
                .dot(&step)
                .min(0.0);
            let mut alpha = 1.0;
            while alpha > MIN_STEP
                && merit(&(&x + &step * alpha)) > current + ARMIJO * alpha * slope + slack
            {
                alpha *= 0.5;
            }
            x = qp::clamp(&(&x + &step * alpha), &lower, &upper);

            let r = a * &x - b;
            let new_residual = max_abs(&r);
            lambda += &r * rho;
            if new_residual > residual_tol && new_residual > PENALTY_PROGRESS * residual {
                rho = (rho * 10.0).min(max_rho);
            }
            residual = new_residual;

            let moved = alpha * max_abs(&step);
            if moved <= tolerance * (1.0 + max_abs(&x)) && residual <= residual_tol {
                debug!(iterations = iteration, residual, "solver converged");
                return finish(x, SolverStatus::Converged, iteration);
            }
        }

        debug!(
            iterations = self.options.max_iterations,
            residual, "solver reached iteration limit"
        );
        finish(x, SolverStatus::IterationLimit, self.options.max_iterations)
    }
}
