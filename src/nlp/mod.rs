//! Nonlinear programming engine
//!
//! A primal-dual interior-point solver for problems of the form
//!
//! ```text
//! min f(x)   s.t.   c(x) = 0,   l <= x <= u
//! ```
//!
//! Problems are written once against the [`Scalar`] trait and the engine
//! obtains exact first and second derivatives from a [`DerivativeBackend`],
//! so the model and cost code never sees which numeric type it runs on.

pub mod autodiff;
pub mod interior_point;

use nalgebra::DVector;
use num_dual::DualNum;
use serde::{Deserialize, Serialize};

use crate::common::error::{MpcError, MpcResult};

pub use autodiff::{DerivativeBackend, FirstOrder, ForwardDual, Seeding};
pub use interior_point::InteriorPoint;

/// Bounds at or beyond this magnitude are treated as "no limit"
pub const INFINITE_BOUND: f64 = 1.0e19;

/// Numeric type a problem can be evaluated on: plain `f64` or any of the
/// dual number types used for differentiation.
pub trait Scalar: DualNum<f64> + Copy {}

impl<T: DualNum<f64> + Copy> Scalar for T {}

/// A smooth equality- and bound-constrained nonlinear program
pub trait NlpProblem {
    /// Length of the decision vector
    fn num_variables(&self) -> usize;

    /// Number of equality constraints
    fn num_constraints(&self) -> usize;

    /// Lower and upper variable bounds; use `±INFINITE_BOUND` for no limit
    fn bounds(&self) -> (DVector<f64>, DVector<f64>);

    /// Objective value
    fn objective<S: Scalar>(&self, x: &[S]) -> S;

    /// Equality constraint residuals, written into `out`
    fn constraints<S: Scalar>(&self, x: &[S], out: &mut [S]);

    /// `(row, col)` entries of the constraint Jacobian that may be non-zero.
    /// Must cover every variable each constraint reads. Defaults to dense.
    fn jacobian_structure(&self) -> Vec<(usize, usize)> {
        let (m, n) = (self.num_constraints(), self.num_variables());
        (0..m).flat_map(|r| (0..n).map(move |c| (r, c))).collect()
    }

    /// Lower-triangular `(row, col)` entries of the Lagrangian Hessian that
    /// may be non-zero. Defaults to the dense lower triangle.
    fn hessian_structure(&self) -> Vec<(usize, usize)> {
        let n = self.num_variables();
        (0..n).flat_map(|i| (0..=i).map(move |j| (i, j))).collect()
    }

    /// Lower-triangular entries of the objective Hessian alone. Defaults to
    /// [`NlpProblem::hessian_structure`].
    fn objective_hessian_structure(&self) -> Vec<(usize, usize)> {
        self.hessian_structure()
    }
}

/// Objective and constraint values at `x`, without derivatives
pub fn evaluate<P: NlpProblem>(problem: &P, x: &DVector<f64>) -> (f64, DVector<f64>) {
    let f = problem.objective(x.as_slice());
    let mut c = DVector::zeros(problem.num_constraints());
    problem.constraints(x.as_slice(), c.as_mut_slice());
    (f, c)
}

/// Termination status of the interior-point iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// KKT conditions met to the requested tolerance
    Converged,
    /// Progress stalled at a point meeting the looser acceptable tolerance
    Acceptable,
    /// Iteration budget exhausted
    IterationLimit,
    /// Wall-clock budget exhausted
    TimeLimit,
    /// Line search could not reduce the constraint violation
    Infeasible,
    /// NaN/Inf, unrecoverable factorisation or line-search breakdown
    NumericalFailure,
}

impl SolveStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, SolveStatus::Converged | SolveStatus::Acceptable)
    }
}

/// Result of one NLP solve
#[derive(Debug, Clone)]
pub struct NlpSolution {
    pub x: DVector<f64>,
    /// Equality constraint multipliers
    pub lambda: DVector<f64>,
    pub objective: f64,
    /// Infinity norm of the constraint residuals
    pub constraint_violation: f64,
    /// Scaled infinity norm of the Lagrangian gradient
    pub dual_infeasibility: f64,
    pub iterations: usize,
    pub status: SolveStatus,
}

/// Options of the interior-point engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// Iteration budget
    pub max_iterations: usize,

    /// Wall-clock budget per solve.
    ///
    /// Units: seconds. `None` disables the limit.
    pub max_cpu_time: Option<f64>,

    /// Scaled KKT tolerance for dual infeasibility and complementarity
    pub tolerance: f64,

    /// Absolute tolerance on the constraint residuals
    pub constraint_tolerance: f64,

    /// Looser tolerance accepted when the iteration cannot make progress
    pub acceptable_tolerance: f64,

    /// Constraint residual accepted together with `acceptable_tolerance`
    pub acceptable_constraint_tolerance: f64,

    /// Initial barrier parameter
    pub mu_init: f64,

    /// Relative distance the starting point is pushed inside its bounds
    pub bound_push: f64,

    /// Maximum number of backtracking steps per iteration
    pub max_line_search_steps: usize,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            max_cpu_time: Some(0.5),
            tolerance: 1e-6,
            constraint_tolerance: 1e-8,
            acceptable_tolerance: 1e-4,
            acceptable_constraint_tolerance: 1e-7,
            mu_init: 0.1,
            bound_push: 1e-2,
            max_line_search_steps: 40,
        }
    }
}

impl SolverOptions {
    /// Same options with the wall-clock budget removed
    pub fn without_time_limit(mut self) -> Self {
        self.max_cpu_time = None;
        self
    }

    pub fn validate(&self) -> MpcResult<()> {
        let positive = [
            ("tolerance", self.tolerance),
            ("constraint_tolerance", self.constraint_tolerance),
            ("acceptable_tolerance", self.acceptable_tolerance),
            ("acceptable_constraint_tolerance", self.acceptable_constraint_tolerance),
            ("mu_init", self.mu_init),
        ];
        for (name, value) in positive.iter() {
            if !(value.is_finite() && *value > 0.0) {
                return Err(MpcError::ConfigurationError(format!(
                    "solver option `{}` must be positive, got {}",
                    name, value
                )));
            }
        }
        if self.acceptable_tolerance < self.tolerance
            || self.acceptable_constraint_tolerance < self.constraint_tolerance
        {
            return Err(MpcError::ConfigurationError(
                "acceptable tolerances must not be tighter than the convergence tolerances"
                    .to_string(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(MpcError::ConfigurationError(
                "solver option `max_iterations` must be at least 1".to_string(),
            ));
        }
        if self.max_line_search_steps == 0 {
            return Err(MpcError::ConfigurationError(
                "solver option `max_line_search_steps` must be at least 1".to_string(),
            ));
        }
        if !(self.bound_push > 0.0 && self.bound_push < 0.5) {
            return Err(MpcError::ConfigurationError(format!(
                "solver option `bound_push` must lie in (0, 0.5), got {}",
                self.bound_push
            )));
        }
        if let Some(t) = self.max_cpu_time {
            if !(t.is_finite() && t > 0.0) {
                return Err(MpcError::ConfigurationError(format!(
                    "solver option `max_cpu_time` must be positive, got {}",
                    t
                )));
            }
        }
        Ok(())
    }
}
