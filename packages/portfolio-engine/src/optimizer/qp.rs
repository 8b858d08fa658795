//! Primal active-set solver for bound-constrained convex quadratic programs
//! with an optional quadratic penalty on linear equalities:
//!
//! ```text
//! minimize  ½ xᵀHx + cᵀx + ρ/2 ‖Ax − b‖²   subject to  lower ≤ x ≤ upper
//! ```
//!
//! `H` must be symmetric positive semidefinite. Variables are either free or
//! held at one of their bounds; each iteration solves the unconstrained
//! problem over the free variables and steps towards it until a bound blocks.
//!
//! The free-variable problem is solved in saddle-point form
//!
//! ```text
//! [ H_FF   A_Fᵀ  ] [x_F]   [ −(c_F + H_FB x_B) ]
//! [ A_F   −I/ρ   ] [ ν ] = [   b − A_B x_B     ]
//! ```
//!
//! whose conditioning does not degrade as `ρ` grows.

use super::solver::Budget;
use nalgebra::{DMatrix, DVector};

/// Relative size of a step treated as zero.
const STEP_TOL: f64 = 1e-13;

/// Relative size of a bound multiplier treated as zero.
const MULTIPLIER_TOL: f64 = 1e-11;

/// Relative cutoff for singular values in least-squares solves.
const RCOND: f64 = 1e-14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QpFailure {
    IterationLimit,
    TimeLimit,
    Singular,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    Lower,
    Upper,
}

/// A penalized box-constrained quadratic program.
pub(crate) struct BoxQp<'a> {
    pub h: &'a DMatrix<f64>,
    pub c: &'a DVector<f64>,
    /// Penalized equality rows; may have zero rows
    pub a: &'a DMatrix<f64>,
    pub b: &'a DVector<f64>,
    pub rho: f64,
    pub lower: &'a DVector<f64>,
    pub upper: &'a DVector<f64>,
}

impl BoxQp<'_> {
    fn gradient(&self, x: &DVector<f64>) -> DVector<f64> {
        let mut gradient = self.h * x + self.c;
        if self.has_penalty() {
            gradient += self.a.transpose() * ((self.a * x - self.b) * self.rho);
        }
        gradient
    }

    fn has_penalty(&self) -> bool {
        self.a.nrows() > 0 && self.rho > 0.0
    }

    fn at_bound(&self, x: &DVector<f64>, i: usize) -> Option<Bound> {
        if x[i] <= self.lower[i] {
            Some(Bound::Lower)
        } else if x[i] >= self.upper[i] {
            Some(Bound::Upper)
        } else {
            None
        }
    }

    fn bound_value(&self, i: usize, side: Bound) -> f64 {
        match side {
            Bound::Lower => self.lower[i],
            Bound::Upper => self.upper[i],
        }
    }
}

/// Minimize `problem` over its box starting from `start`.
pub(crate) fn solve_box_qp(
    problem: &BoxQp<'_>,
    start: &DVector<f64>,
    budget: &Budget,
) -> Result<DVector<f64>, QpFailure> {
    let n = start.len();
    let mut x = clamp(start, problem.lower, problem.upper);
    let mut working: Vec<Option<Bound>> = (0..n).map(|i| problem.at_bound(&x, i)).collect();

    // Bounds re-entered without any movement after their release; held until x moves
    let mut locked = vec![false; n];

    let max_iterations = 50 * (n + 10);
    for _ in 0..max_iterations {
        if budget.expired() {
            return Err(QpFailure::TimeLimit);
        }

        let free: Vec<usize> = (0..n).filter(|&i| working[i].is_none()).collect();
        let target = minimize_over_free(problem, &x, &free)?;

        let scale = 1.0 + max_abs(&x);
        let mut direction = DVector::zeros(n);
        for (k, &i) in free.iter().enumerate() {
            direction[i] = target[k] - x[i];
        }

        if max_abs(&direction) <= STEP_TOL * scale {
            match first_wrong_sign_bound(problem, &x, &working, &locked) {
                Some(i) => {
                    working[i] = None;
                    continue;
                }
                None => return Ok(x),
            }
        }

        // Longest feasible step along the direction, blocking at the first bound hit
        let mut alpha = 1.0;
        let mut blocking = None;
        for &i in &free {
            let d = direction[i];
            if d.abs() <= STEP_TOL * scale {
                continue;
            }
            let side = if d < 0.0 { Bound::Lower } else { Bound::Upper };
            let t = ((problem.bound_value(i, side) - x[i]) / d).max(0.0);
            if t < alpha {
                alpha = t;
                blocking = Some((i, side));
            }
        }

        if let Some((i, side)) = blocking {
            if alpha * max_abs(&direction) <= STEP_TOL * scale {
                x[i] = problem.bound_value(i, side);
                working[i] = Some(side);
                locked[i] = true;
                continue;
            }
        }

        locked.fill(false);
        for &i in &free {
            x[i] = (x[i] + alpha * direction[i]).clamp(problem.lower[i], problem.upper[i]);
        }
        if let Some((i, side)) = blocking {
            x[i] = problem.bound_value(i, side);
            working[i] = Some(side);
        }
        for &i in &free {
            if working[i].is_none() && direction[i] != 0.0 {
                working[i] = problem.at_bound(&x, i);
            }
        }
    }

    Err(QpFailure::IterationLimit)
}

/// Unconstrained minimizer over the free variables with the rest held fixed.
fn minimize_over_free(
    problem: &BoxQp<'_>,
    x: &DVector<f64>,
    free: &[usize],
) -> Result<DVector<f64>, QpFailure> {
    let f = free.len();
    if f == 0 {
        return Ok(DVector::zeros(0));
    }

    let mut fixed = x.clone();
    for &i in free {
        fixed[i] = 0.0;
    }
    let h_fixed = problem.h * &fixed;

    let m = if problem.has_penalty() { problem.a.nrows() } else { 0 };
    let mut kkt = DMatrix::zeros(f + m, f + m);
    let mut rhs = DVector::zeros(f + m);

    for (r, &i) in free.iter().enumerate() {
        for (s, &j) in free.iter().enumerate() {
            kkt[(r, s)] = problem.h[(i, j)];
        }
        rhs[r] = -(problem.c[i] + h_fixed[i]);
    }

    if m > 0 {
        let remaining = problem.b - problem.a * &fixed;
        for k in 0..m {
            for (r, &i) in free.iter().enumerate() {
                kkt[(r, f + k)] = problem.a[(k, i)];
                kkt[(f + k, r)] = problem.a[(k, i)];
            }
            kkt[(f + k, f + k)] = -1.0 / problem.rho;
            rhs[f + k] = remaining[k];
        }
    }

    let solution = least_squares(kkt, &rhs)?;
    Ok(solution.rows(0, f).into_owned())
}

/// Smallest-index unlocked bound whose multiplier says the objective
/// decreases by moving off it.
fn first_wrong_sign_bound(
    problem: &BoxQp<'_>,
    x: &DVector<f64>,
    working: &[Option<Bound>],
    locked: &[bool],
) -> Option<usize> {
    let gradient = problem.gradient(x);
    let tol = MULTIPLIER_TOL * (1.0 + max_abs(&gradient));

    working.iter().enumerate().find_map(|(i, side)| {
        if locked[i] || problem.lower[i] == problem.upper[i] {
            return None;
        }
        match side {
            Some(Bound::Lower) if gradient[i] < -tol => Some(i),
            Some(Bound::Upper) if gradient[i] > tol => Some(i),
            _ => None,
        }
    })
}

/// Minimum-norm least-squares solution of `matrix · x = rhs`.
fn least_squares(
    matrix: DMatrix<f64>,
    rhs: &DVector<f64>,
) -> Result<DVector<f64>, QpFailure> {
    let svd = matrix.svd(true, true);
    let largest = svd.singular_values.iter().fold(0.0_f64, |m, s| m.max(*s));
    if !largest.is_finite() {
        return Err(QpFailure::Singular);
    }
    svd.solve(rhs, largest * RCOND).map_err(|_| QpFailure::Singular)
}

pub(crate) fn clamp(x: &DVector<f64>, lower: &DVector<f64>, upper: &DVector<f64>) -> DVector<f64> {
    DVector::from_fn(x.len(), |i, _| x[i].clamp(lower[i], upper[i]))
}

pub(crate) fn max_abs(v: &DVector<f64>) -> f64 {
    v.iter().fold(0.0, |m, x| m.max(x.abs()))
}
