//! Primal-dual interior-point method
//!
//! Bound constraints are handled with a logarithmic barrier whose parameter
//! `mu` is driven to zero with the monotone Fiacco-McCormick rule. Each
//! iteration solves the regularised KKT system
//!
//! ```text
//! [ W + Sigma + dw I    J^T  ] [ dx      ]     [ grad phi + J^T lambda ]
//! [ J                 -dc I  ] [ dlambda ] = - [ c                     ]
//! ```
//!
//! where `W` is the exact Lagrangian Hessian and `Sigma` the primal-dual
//! barrier term. Steps are globalised with a backtracking line search on the
//! l1 exact-penalty merit function, with one second-order correction when
//! the full step is rejected.

use std::time::{Duration, Instant};

use log::{debug, trace};
use nalgebra::{linalg::LU, DMatrix, DVector, Dyn};

use super::autodiff::{DerivativeBackend, FirstOrder, ForwardDual, Seeding};
use super::{evaluate, NlpProblem, NlpSolution, SolveStatus, SolverOptions, INFINITE_BOUND};

// Barrier update
const KAPPA_EPSILON: f64 = 10.0;
const KAPPA_MU: f64 = 0.2;
const THETA_MU: f64 = 1.5;
const TAU_MIN: f64 = 0.99;

// Optimality error scaling
const S_MAX: f64 = 100.0;

// Dual safeguard
const KAPPA_SIGMA: f64 = 1e10;

// Line search
const ARMIJO_ETA: f64 = 1e-4;
const ALPHA_MIN: f64 = 1e-14;

// Hessian regularisation
const DELTA_W_INIT: f64 = 1e-4;
const DELTA_W_MIN: f64 = 1e-20;
const DELTA_W_MAX: f64 = 1e40;
const DELTA_C: f64 = 1e-8;
const CURVATURE_MIN: f64 = 1e-12;

/// Interior-point NLP engine
#[derive(Debug, Clone)]
pub struct InteriorPoint<B = ForwardDual> {
    options: SolverOptions,
    backend: B,
}

impl InteriorPoint<ForwardDual> {
    pub fn new(options: SolverOptions) -> Self {
        Self::with_backend(options, ForwardDual)
    }
}

impl<B: DerivativeBackend> InteriorPoint<B> {
    pub fn with_backend(options: SolverOptions, backend: B) -> Self {
        Self { options, backend }
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    /// Solve `problem` starting from `x0`.
    ///
    /// Never panics on numerical trouble: the outcome is reported through
    /// [`NlpSolution::status`] together with the last iterate.
    pub fn solve<P: NlpProblem>(&self, problem: &P, x0: &DVector<f64>) -> NlpSolution {
        let opts = &self.options;
        let start = Instant::now();
        let time_limit = opts.max_cpu_time.map(Duration::from_secs_f64);

        let m = problem.num_constraints();
        let (lower, upper) = problem.bounds();
        let bounds = Bounds::new(lower, upper);
        let seeding = Seeding::new(problem);
        trace!(
            "derivative passes per iteration: {} first order, {} second order",
            seeding.jacobian_passes(),
            seeding.hessian_passes()
        );

        let mut x = bounds.push_inside(x0, opts.bound_push);
        let mut lambda = DVector::zeros(m);
        let mut z_l = bounds.lower_mask();
        let mut z_u = bounds.upper_mask();

        let mut mu = opts.mu_init;
        let mu_min = opts.tolerance / 10.0;
        let mut nu: f64 = 1.0;
        let mut delta_w_last = 0.0;
        let mut iter = 0;

        loop {
            let fo = self.backend.first_order(problem, &seeding, &x);
            if !fo.is_finite() {
                return finish(x, lambda, &fo, f64::NAN, iter, SolveStatus::NumericalFailure);
            }

            let s_l = bounds.lower_slack(&x);
            let s_u = bounds.upper_slack(&x);
            let err = OptimalityError::new(&fo, &lambda, &z_l, &z_u, &s_l, &s_u, &bounds);

            if err.dual <= opts.tolerance
                && err.primal <= opts.constraint_tolerance
                && err.complementarity(0.0) <= opts.tolerance
            {
                debug!("interior point converged after {} iterations", iter);
                return finish(x, lambda, &fo, err.dual, iter, SolveStatus::Converged);
            }

            let out_of_budget = if iter >= opts.max_iterations {
                Some(SolveStatus::IterationLimit)
            } else if time_limit.map_or(false, |limit| start.elapsed() >= limit) {
                Some(SolveStatus::TimeLimit)
            } else {
                None
            };
            if let Some(status) = out_of_budget {
                let status = if err.is_acceptable(opts) { SolveStatus::Acceptable } else { status };
                debug!("interior point stopped with {:?} after {} iterations", status, iter);
                return finish(x, lambda, &fo, err.dual, iter, status);
            }

            while mu > mu_min && err.barrier_error(mu) <= KAPPA_EPSILON * mu {
                mu = mu_min.max((KAPPA_MU * mu).min(mu.powf(THETA_MU)));
            }
            let tau = TAU_MIN.max(1.0 - mu);

            let hess = self.backend.lagrangian_hessian(problem, &seeding, &x, 1.0, &lambda);
            if hess.iter().any(|v| !v.is_finite()) {
                return finish(x, lambda, &fo, err.dual, iter, SolveStatus::NumericalFailure);
            }

            let sigma = bounds.sigma(&z_l, &z_u, &s_l, &s_u);
            let grad_phi = bounds.barrier_gradient(&fo.gradient, &s_l, &s_u, mu);
            let dual_rhs = -(&grad_phi + fo.jacobian.transpose() * &lambda);

            let kkt = match Kkt::factorize(&hess, &sigma, &fo.jacobian, &dual_rhs, &fo.constraints, &mut delta_w_last) {
                Some(kkt) => kkt,
                None => {
                    debug!("KKT system could not be regularised at iteration {}", iter);
                    return finish(x, lambda, &fo, err.dual, iter, SolveStatus::NumericalFailure);
                }
            };

            // Penalty parameter of the merit function must dominate the multipliers
            let lambda_trial = &lambda + &kkt.dlambda;
            nu = nu.max(inf_norm(&lambda_trial) + 1.0);

            let phi0 = bounds.barrier_objective(fo.objective, &s_l, &s_u, mu) + nu * l1_norm(&fo.constraints);
            let dphi = (grad_phi.dot(&kkt.dx) - nu * l1_norm(&fo.constraints)).min(0.0);
            let armijo = |phi: f64, alpha: f64| {
                phi <= phi0 + ARMIJO_ETA * alpha * dphi + 10.0 * f64::EPSILON * phi0.abs()
            };
            let merit = |x_trial: &DVector<f64>| -> f64 {
                let (f, c) = evaluate(problem, x_trial);
                let phi = bounds.barrier_objective(
                    f,
                    &bounds.lower_slack(x_trial),
                    &bounds.upper_slack(x_trial),
                    mu,
                ) + nu * l1_norm(&c);
                if phi.is_finite() { phi } else { f64::INFINITY }
            };

            let alpha_max = bounds.fraction_to_boundary(&s_l, &s_u, &kkt.dx, tau);
            let mut alpha = alpha_max;
            let mut step: Option<(DVector<f64>, DVector<f64>, f64)> = None;

            for trial in 0..opts.max_line_search_steps {
                if alpha < ALPHA_MIN {
                    break;
                }
                let x_trial = &x + &kkt.dx * alpha;
                if armijo(merit(&x_trial), alpha) {
                    step = Some((kkt.dx.clone(), kkt.dlambda.clone(), alpha));
                    break;
                }

                if trial == 0 {
                    // Second-order correction against the Maratos effect
                    let (_, c_trial) = evaluate(problem, &x_trial);
                    let c_soc = &fo.constraints * alpha + c_trial;
                    if let Some((dx_soc, dlambda_soc)) = kkt.resolve(&dual_rhs, &c_soc) {
                        let alpha_soc = bounds.fraction_to_boundary(&s_l, &s_u, &dx_soc, tau);
                        let x_soc = &x + &dx_soc * alpha_soc;
                        if armijo(merit(&x_soc), alpha) {
                            trace!("second-order correction accepted at iteration {}", iter);
                            step = Some((dx_soc, dlambda_soc, alpha_soc));
                            break;
                        }
                    }
                }

                alpha *= 0.5;
            }

            let (dx, dlambda, alpha) = match step {
                Some(s) => s,
                None => {
                    let status = if err.is_acceptable(opts) {
                        SolveStatus::Acceptable
                    } else if err.primal > opts.acceptable_constraint_tolerance {
                        SolveStatus::Infeasible
                    } else {
                        SolveStatus::NumericalFailure
                    };
                    debug!("line search failed at iteration {}: {:?}", iter, status);
                    return finish(x, lambda, &fo, err.dual, iter, status);
                }
            };

            let (dz_l, dz_u) = bounds.dual_step(&z_l, &z_u, &s_l, &s_u, &dx, mu);
            let alpha_z = fraction_to_zero(&z_l, &dz_l, tau).min(fraction_to_zero(&z_u, &dz_u, tau));

            x += &dx * alpha;
            lambda += &dlambda * alpha;
            z_l += &dz_l * alpha_z;
            z_u += &dz_u * alpha_z;
            bounds.safeguard_duals(&mut z_l, &mut z_u, &x, mu);

            trace!(
                "ipm iter {:3} f={:+.6e} inf_pr={:.2e} inf_du={:.2e} mu={:.1e} alpha={:.2e} reg={:.1e}",
                iter, fo.objective, err.primal, err.dual, mu, alpha, kkt.delta_w
            );

            if x.iter().any(|v| !v.is_finite()) {
                return finish(x, lambda, &fo, err.dual, iter + 1, SolveStatus::NumericalFailure);
            }
            iter += 1;
        }
    }
}

fn finish(
    x: DVector<f64>,
    lambda: DVector<f64>,
    fo: &FirstOrder,
    dual: f64,
    iterations: usize,
    status: SolveStatus,
) -> NlpSolution {
    NlpSolution {
        x,
        lambda,
        objective: fo.objective,
        constraint_violation: inf_norm(&fo.constraints),
        dual_infeasibility: dual,
        iterations,
        status,
    }
}

/// NaN entries make the norm NaN
fn inf_norm(v: &DVector<f64>) -> f64 {
    v.iter().fold(0.0f64, |acc, x| {
        if acc.is_nan() || x.is_nan() { f64::NAN } else { acc.max(x.abs()) }
    })
}

fn l1_norm(v: &DVector<f64>) -> f64 {
    v.iter().map(|x| x.abs()).sum()
}

/// Largest step in (0, 1] keeping `z + alpha dz >= (1 - tau) z`
fn fraction_to_zero(z: &DVector<f64>, dz: &DVector<f64>, tau: f64) -> f64 {
    z.iter()
        .zip(dz.iter())
        .filter(|(&zi, &dzi)| zi > 0.0 && dzi < 0.0)
        .fold(1.0f64, |alpha, (&zi, &dzi)| alpha.min(-tau * zi / dzi))
}

/// Finite variable bounds and the barrier quantities derived from them
#[derive(Debug, Clone)]
struct Bounds {
    lower: DVector<f64>,
    upper: DVector<f64>,
    has_lower: Vec<bool>,
    has_upper: Vec<bool>,
}

impl Bounds {
    fn new(lower: DVector<f64>, upper: DVector<f64>) -> Self {
        let has_lower = lower.iter().map(|&l| l > -INFINITE_BOUND).collect();
        let has_upper = upper.iter().map(|&u| u < INFINITE_BOUND).collect();
        Self { lower, upper, has_lower, has_upper }
    }

    fn count(&self) -> usize {
        self.has_lower.iter().chain(self.has_upper.iter()).filter(|&&b| b).count()
    }

    fn lower_mask(&self) -> DVector<f64> {
        DVector::from_iterator(self.has_lower.len(), self.has_lower.iter().map(|&b| if b { 1.0 } else { 0.0 }))
    }

    fn upper_mask(&self) -> DVector<f64> {
        DVector::from_iterator(self.has_upper.len(), self.has_upper.iter().map(|&b| if b { 1.0 } else { 0.0 }))
    }

    /// Move `x0` strictly inside the bounds
    fn push_inside(&self, x0: &DVector<f64>, push: f64) -> DVector<f64> {
        DVector::from_fn(x0.len(), |i, _| {
            let (l, u) = (self.lower[i], self.upper[i]);
            let mut xi = x0[i];
            match (self.has_lower[i], self.has_upper[i]) {
                (true, true) => {
                    let width = u - l;
                    let p_l = (push * l.abs().max(1.0)).min(push * width);
                    let p_u = (push * u.abs().max(1.0)).min(push * width);
                    xi = xi.max(l + p_l).min(u - p_u);
                }
                (true, false) => xi = xi.max(l + push * l.abs().max(1.0)),
                (false, true) => xi = xi.min(u - push * u.abs().max(1.0)),
                (false, false) => {}
            }
            xi
        })
    }

    fn lower_slack(&self, x: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(x.len(), |i, _| if self.has_lower[i] { x[i] - self.lower[i] } else { 0.0 })
    }

    fn upper_slack(&self, x: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(x.len(), |i, _| if self.has_upper[i] { self.upper[i] - x[i] } else { 0.0 })
    }

    fn sigma(&self, z_l: &DVector<f64>, z_u: &DVector<f64>, s_l: &DVector<f64>, s_u: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(z_l.len(), |i, _| {
            let mut s = 0.0;
            if self.has_lower[i] {
                s += z_l[i] / s_l[i];
            }
            if self.has_upper[i] {
                s += z_u[i] / s_u[i];
            }
            s
        })
    }

    fn barrier_gradient(&self, grad: &DVector<f64>, s_l: &DVector<f64>, s_u: &DVector<f64>, mu: f64) -> DVector<f64> {
        DVector::from_fn(grad.len(), |i, _| {
            let mut g = grad[i];
            if self.has_lower[i] {
                g -= mu / s_l[i];
            }
            if self.has_upper[i] {
                g += mu / s_u[i];
            }
            g
        })
    }

    fn barrier_objective(&self, f: f64, s_l: &DVector<f64>, s_u: &DVector<f64>, mu: f64) -> f64 {
        let mut phi = f;
        for i in 0..s_l.len() {
            if self.has_lower[i] {
                phi -= mu * s_l[i].ln();
            }
            if self.has_upper[i] {
                phi -= mu * s_u[i].ln();
            }
        }
        phi
    }

    fn fraction_to_boundary(&self, s_l: &DVector<f64>, s_u: &DVector<f64>, dx: &DVector<f64>, tau: f64) -> f64 {
        let mut alpha: f64 = 1.0;
        for i in 0..dx.len() {
            if self.has_lower[i] && dx[i] < 0.0 {
                alpha = alpha.min(-tau * s_l[i] / dx[i]);
            }
            if self.has_upper[i] && dx[i] > 0.0 {
                alpha = alpha.min(tau * s_u[i] / dx[i]);
            }
        }
        alpha
    }

    fn dual_step(
        &self,
        z_l: &DVector<f64>,
        z_u: &DVector<f64>,
        s_l: &DVector<f64>,
        s_u: &DVector<f64>,
        dx: &DVector<f64>,
        mu: f64,
    ) -> (DVector<f64>, DVector<f64>) {
        let n = dx.len();
        let dz_l = DVector::from_fn(n, |i, _| {
            if self.has_lower[i] { mu / s_l[i] - z_l[i] - z_l[i] / s_l[i] * dx[i] } else { 0.0 }
        });
        let dz_u = DVector::from_fn(n, |i, _| {
            if self.has_upper[i] { mu / s_u[i] - z_u[i] + z_u[i] / s_u[i] * dx[i] } else { 0.0 }
        });
        (dz_l, dz_u)
    }

    /// Keep the bound multipliers within a factor of their primal-dual
    /// estimate `mu / s`
    fn safeguard_duals(&self, z_l: &mut DVector<f64>, z_u: &mut DVector<f64>, x: &DVector<f64>, mu: f64) {
        let s_l = self.lower_slack(x);
        let s_u = self.upper_slack(x);
        for i in 0..x.len() {
            if self.has_lower[i] {
                z_l[i] = z_l[i].max(mu / (KAPPA_SIGMA * s_l[i])).min(KAPPA_SIGMA * mu / s_l[i]);
            }
            if self.has_upper[i] {
                z_u[i] = z_u[i].max(mu / (KAPPA_SIGMA * s_u[i])).min(KAPPA_SIGMA * mu / s_u[i]);
            }
        }
    }
}

/// Scaled components of the KKT error at one iterate
struct OptimalityError {
    dual: f64,
    primal: f64,
    compl_scale: f64,
    products: Vec<f64>,
}

impl OptimalityError {
    fn new(
        fo: &FirstOrder,
        lambda: &DVector<f64>,
        z_l: &DVector<f64>,
        z_u: &DVector<f64>,
        s_l: &DVector<f64>,
        s_u: &DVector<f64>,
        bounds: &Bounds,
    ) -> Self {
        let residual = &fo.gradient + fo.jacobian.transpose() * lambda - z_l + z_u;

        let n_bounds = bounds.count();
        let z_sum = l1_norm(z_l) + l1_norm(z_u);
        let denom_d = (lambda.len() + n_bounds).max(1) as f64;
        let s_d = S_MAX.max((l1_norm(lambda) + z_sum) / denom_d) / S_MAX;
        let s_c = S_MAX.max(z_sum / n_bounds.max(1) as f64) / S_MAX;

        let mut products = Vec::with_capacity(n_bounds);
        for i in 0..s_l.len() {
            if bounds.has_lower[i] {
                products.push(s_l[i] * z_l[i]);
            }
            if bounds.has_upper[i] {
                products.push(s_u[i] * z_u[i]);
            }
        }

        Self {
            dual: inf_norm(&residual) / s_d,
            primal: inf_norm(&fo.constraints),
            compl_scale: s_c,
            products,
        }
    }

    fn complementarity(&self, mu: f64) -> f64 {
        self.products.iter().fold(0.0f64, |acc, p| acc.max((p - mu).abs())) / self.compl_scale
    }

    fn barrier_error(&self, mu: f64) -> f64 {
        self.dual.max(self.primal).max(self.complementarity(mu))
    }

    fn is_acceptable(&self, opts: &SolverOptions) -> bool {
        self.dual <= opts.acceptable_tolerance
            && self.primal <= opts.acceptable_constraint_tolerance
            && self.complementarity(0.0) <= opts.acceptable_tolerance
    }
}

/// Factorised, inertia-corrected KKT matrix and the Newton step it yields
struct Kkt {
    lu: LU<f64, Dyn, Dyn>,
    n: usize,
    dx: DVector<f64>,
    dlambda: DVector<f64>,
    delta_w: f64,
}

impl Kkt {
    /// Factorise and solve, increasing the primal regularisation until the
    /// step has positive curvature.
    fn factorize(
        hess: &DMatrix<f64>,
        sigma: &DVector<f64>,
        jac: &DMatrix<f64>,
        dual_rhs: &DVector<f64>,
        constraints: &DVector<f64>,
        delta_w_last: &mut f64,
    ) -> Option<Self> {
        let n = hess.nrows();
        let m = jac.nrows();
        let mut delta_w: f64 = 0.0;
        let mut delta_c: f64 = 0.0;

        loop {
            let mut mat = DMatrix::zeros(n + m, n + m);
            mat.view_mut((0, 0), (n, n)).copy_from(hess);
            for i in 0..n {
                mat[(i, i)] += sigma[i] + delta_w;
            }
            mat.view_mut((n, 0), (m, n)).copy_from(jac);
            mat.view_mut((0, n), (n, m)).copy_from(&jac.transpose());
            for i in 0..m {
                mat[(n + i, n + i)] = -delta_c;
            }

            let lu = mat.lu();
            let rhs = stack(dual_rhs, &(-constraints));
            match lu.solve(&rhs).filter(|sol| sol.iter().all(|v| v.is_finite())) {
                Some(sol) => {
                    let dx = sol.rows(0, n).into_owned();
                    let w_dx = hess * &dx + sigma.component_mul(&dx) + &dx * delta_w;
                    let curvature = dx.dot(&w_dx);
                    if curvature >= CURVATURE_MIN * dx.norm_squared() {
                        if delta_w > 0.0 {
                            *delta_w_last = delta_w;
                        }
                        let dlambda = sol.rows(n, m).into_owned();
                        return Some(Self { lu, n, dx, dlambda, delta_w });
                    }
                }
                None => {
                    // Rank-deficient constraint Jacobian
                    delta_c = DELTA_C;
                }
            }

            delta_w = if delta_w == 0.0 {
                if *delta_w_last == 0.0 {
                    DELTA_W_INIT
                } else {
                    DELTA_W_MIN.max(*delta_w_last / 3.0)
                }
            } else if *delta_w_last == 0.0 {
                delta_w * 100.0
            } else {
                delta_w * 8.0
            };
            if delta_w > DELTA_W_MAX {
                return None;
            }
        }
    }

    /// Solve with the stored factorisation for another constraint residual
    fn resolve(&self, dual_rhs: &DVector<f64>, constraints: &DVector<f64>) -> Option<(DVector<f64>, DVector<f64>)> {
        let rhs = stack(dual_rhs, &(-constraints));
        let sol = self.lu.solve(&rhs)?;
        if sol.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let m = sol.len() - self.n;
        Some((sol.rows(0, self.n).into_owned(), sol.rows(self.n, m).into_owned()))
    }
}

fn stack(top: &DVector<f64>, bottom: &DVector<f64>) -> DVector<f64> {
    DVector::from_iterator(top.len() + bottom.len(), top.iter().chain(bottom.iter()).copied())
}
