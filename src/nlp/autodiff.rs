//! Exact derivatives through forward-mode automatic differentiation
//!
//! Columns of the constraint Jacobian that touch disjoint rows share one
//! dual-number pass. The constraint part of the Lagrangian Hessian is read
//! row by row from hyper-dual passes seeded with pairs of those column
//! groups, and the objective part takes one hyper-dual pass of the
//! objective alone per entry of its declared structure.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use itertools::iproduct;
use nalgebra::{DMatrix, DVector};
use num_dual::{Dual64, HyperDual64};

use super::{evaluate, NlpProblem};

/// Objective and constraint values with their first derivatives
#[derive(Debug, Clone)]
pub struct FirstOrder {
    pub objective: f64,
    pub gradient: DVector<f64>,
    pub constraints: DVector<f64>,
    /// `m x n` constraint Jacobian
    pub jacobian: DMatrix<f64>,
}

impl FirstOrder {
    pub fn is_finite(&self) -> bool {
        self.objective.is_finite()
            && self.gradient.iter().all(|v| v.is_finite())
            && self.constraints.iter().all(|v| v.is_finite())
            && self.jacobian.iter().all(|v| v.is_finite())
    }
}

/// Columns seeded together in one first-order pass
#[derive(Debug, Clone, Default)]
struct ColumnGroup {
    columns: Vec<usize>,
    /// `(row, col)` Jacobian entries the pass recovers
    entries: Vec<(usize, usize)>,
}

/// Hyper-dual pass with `eps1` on one column group and `eps2` on another
#[derive(Debug, Clone)]
struct HessianPass {
    first: usize,
    second: usize,
    /// `(row, i, j)`, `i >= j`: entry `(i, j)` of the Hessian of constraint `row`
    entries: Vec<(usize, usize, usize)>,
}

/// Seed groups of the derivative passes, built once per solve from the
/// sparsity a problem declares
#[derive(Debug, Clone)]
pub struct Seeding {
    column_groups: Vec<ColumnGroup>,
    objective_entries: Vec<(usize, usize)>,
    hessian_passes: Vec<HessianPass>,
}

impl Seeding {
    pub fn new<P: NlpProblem>(problem: &P) -> Self {
        Self::from_structure(
            problem.num_variables(),
            problem.num_constraints(),
            &problem.jacobian_structure(),
            &problem.hessian_structure(),
            &problem.objective_hessian_structure(),
        )
    }

    /// Seeding that ignores the declared sparsity: every column on its own
    /// and every Hessian entry evaluated.
    pub fn dense<P: NlpProblem>(problem: &P) -> Self {
        let n = problem.num_variables();
        let m = problem.num_constraints();
        let jacobian: Vec<(usize, usize)> = iproduct!(0..m, 0..n).collect();
        let triangle = lower_triangle(n);
        Self::from_structure(n, m, &jacobian, &triangle, &triangle)
    }

    fn from_structure(
        n: usize,
        m: usize,
        jacobian: &[(usize, usize)],
        lagrangian: &[(usize, usize)],
        objective: &[(usize, usize)],
    ) -> Self {
        let mut rows_of = vec![Vec::new(); n];
        for &(row, col) in jacobian {
            rows_of[col].push(row);
        }
        for rows in rows_of.iter_mut() {
            rows.sort_unstable();
            rows.dedup();
        }

        // First fit: a column joins the first group whose rows it does not touch
        let mut group_of = vec![0; n];
        let mut occupied: Vec<Vec<bool>> = Vec::new();
        for (col, rows) in rows_of.iter().enumerate() {
            let k = match occupied.iter().position(|occ| rows.iter().all(|&r| !occ[r])) {
                Some(k) => k,
                None => {
                    occupied.push(vec![false; m]);
                    occupied.len() - 1
                }
            };
            for &r in rows {
                occupied[k][r] = true;
            }
            group_of[col] = k;
        }

        let mut column_groups = vec![ColumnGroup::default(); occupied.len()];
        let mut cols_of = vec![Vec::new(); m];
        for (col, rows) in rows_of.iter().enumerate() {
            let group = &mut column_groups[group_of[col]];
            group.columns.push(col);
            for &r in rows {
                group.entries.push((r, col));
                cols_of[r].push(col);
            }
        }

        // Each row touches at most one column of a group, so the pass
        // seeded with groups (p, q) yields that row's entry for its unique
        // column pair.
        let lagrangian: HashSet<(usize, usize)> = lagrangian.iter().map(|&(i, j)| lower(i, j)).collect();
        let mut passes: BTreeMap<(usize, usize), Vec<(usize, usize, usize)>> = BTreeMap::new();
        for (row, cols) in cols_of.iter().enumerate() {
            for (&a, &b) in iproduct!(cols.iter(), cols.iter()) {
                if a < b || !lagrangian.contains(&(a, b)) {
                    continue;
                }
                let (ga, gb) = (group_of[a], group_of[b]);
                passes
                    .entry((ga.min(gb), ga.max(gb)))
                    .or_default()
                    .push((row, a, b));
            }
        }

        let objective_entries = objective
            .iter()
            .map(|&(i, j)| lower(i, j))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        Self {
            column_groups,
            objective_entries,
            hessian_passes: passes
                .into_iter()
                .map(|((first, second), entries)| HessianPass { first, second, entries })
                .collect(),
        }
    }

    /// Constraint evaluations on dual numbers per Jacobian
    pub fn jacobian_passes(&self) -> usize {
        self.column_groups.len()
    }

    /// Constraint evaluations on hyper-dual numbers per Hessian
    pub fn hessian_passes(&self) -> usize {
        self.hessian_passes.len()
    }
}

fn lower(i: usize, j: usize) -> (usize, usize) {
    (i.max(j), i.min(j))
}

fn lower_triangle(n: usize) -> Vec<(usize, usize)> {
    (0..n).flat_map(|i| (0..=i).map(move |j| (i, j))).collect()
}

/// Source of exact derivatives for the interior-point engine
pub trait DerivativeBackend {
    /// Values, gradient and Jacobian at `x`
    fn first_order<P: NlpProblem>(&self, problem: &P, seeding: &Seeding, x: &DVector<f64>) -> FirstOrder;

    /// Hessian of `obj_factor * f(x) + lambda^T c(x)` over the entries of
    /// `seeding`, mirrored to the upper triangle.
    fn lagrangian_hessian<P: NlpProblem>(
        &self,
        problem: &P,
        seeding: &Seeding,
        x: &DVector<f64>,
        obj_factor: f64,
        lambda: &DVector<f64>,
    ) -> DMatrix<f64>;
}

/// Forward-mode backend built on `num_dual`
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardDual;

impl DerivativeBackend for ForwardDual {
    fn first_order<P: NlpProblem>(&self, problem: &P, seeding: &Seeding, x: &DVector<f64>) -> FirstOrder {
        let n = problem.num_variables();
        let m = problem.num_constraints();
        let (objective, constraints) = evaluate(problem, x);

        let mut xd: Vec<Dual64> = x.iter().map(|&v| Dual64::from(v)).collect();

        let mut gradient = DVector::zeros(n);
        for k in 0..n {
            xd[k].eps = 1.0;
            gradient[k] = problem.objective(&xd).eps;
            xd[k].eps = 0.0;
        }

        let mut jacobian = DMatrix::zeros(m, n);
        let mut cd = vec![Dual64::from(0.0); m];
        for group in seeding.column_groups.iter() {
            for &c in group.columns.iter() {
                xd[c].eps = 1.0;
            }
            problem.constraints(&xd, &mut cd);
            for &c in group.columns.iter() {
                xd[c].eps = 0.0;
            }
            for &(r, c) in group.entries.iter() {
                jacobian[(r, c)] = cd[r].eps;
            }
        }

        FirstOrder {
            objective,
            gradient,
            constraints,
            jacobian,
        }
    }

    fn lagrangian_hessian<P: NlpProblem>(
        &self,
        problem: &P,
        seeding: &Seeding,
        x: &DVector<f64>,
        obj_factor: f64,
        lambda: &DVector<f64>,
    ) -> DMatrix<f64> {
        let n = problem.num_variables();
        let mut hess = DMatrix::zeros(n, n);
        let mut add = |i: usize, j: usize, h: f64| {
            hess[(i, j)] += h;
            if i != j {
                hess[(j, i)] += h;
            }
        };

        let mut xh: Vec<HyperDual64> = x.iter().map(|&v| HyperDual64::from(v)).collect();

        for &(i, j) in seeding.objective_entries.iter() {
            xh[i].eps1 = 1.0;
            xh[j].eps2 = 1.0;
            let h = problem.objective(&xh).eps1eps2;
            xh[i].eps1 = 0.0;
            xh[j].eps2 = 0.0;
            add(i, j, obj_factor * h);
        }

        let groups = &seeding.column_groups;
        let mut ch = vec![HyperDual64::from(0.0); problem.num_constraints()];
        for pass in seeding.hessian_passes.iter() {
            for &c in groups[pass.first].columns.iter() {
                xh[c].eps1 = 1.0;
            }
            for &c in groups[pass.second].columns.iter() {
                xh[c].eps2 = 1.0;
            }
            problem.constraints(&xh, &mut ch);
            for &c in groups[pass.first].columns.iter() {
                xh[c].eps1 = 0.0;
            }
            for &c in groups[pass.second].columns.iter() {
                xh[c].eps2 = 0.0;
            }
            for &(r, i, j) in pass.entries.iter() {
                add(i, j, lambda[r] * ch[r].eps1eps2);
            }
        }

        hess
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlp::{Scalar, INFINITE_BOUND};
    use approx::assert_abs_diff_eq;

    /// f = x0^2 x1 + sin(x1),  c = [x0 x1 - 2, x0^3 + x1]
    struct Smooth;

    impl NlpProblem for Smooth {
        fn num_variables(&self) -> usize {
            2
        }

        fn num_constraints(&self) -> usize {
            2
        }

        fn bounds(&self) -> (DVector<f64>, DVector<f64>) {
            (
                DVector::from_element(2, -INFINITE_BOUND),
                DVector::from_element(2, INFINITE_BOUND),
            )
        }

        fn objective<S: Scalar>(&self, x: &[S]) -> S {
            x[0] * x[0] * x[1] + x[1].sin()
        }

        fn constraints<S: Scalar>(&self, x: &[S], out: &mut [S]) {
            out[0] = x[0] * x[1] - 2.0;
            out[1] = x[0].powi(3) + x[1];
        }
    }

    /// Chain of constraints `c_k = x_k x_{k+1}^2 - sin(x_k)` with a
    /// separable quartic objective
    struct Chain;

    impl NlpProblem for Chain {
        fn num_variables(&self) -> usize {
            6
        }

        fn num_constraints(&self) -> usize {
            5
        }

        fn bounds(&self) -> (DVector<f64>, DVector<f64>) {
            (
                DVector::from_element(6, -INFINITE_BOUND),
                DVector::from_element(6, INFINITE_BOUND),
            )
        }

        fn objective<S: Scalar>(&self, x: &[S]) -> S {
            x.iter().fold(S::from(0.0), |acc, &v| acc + v.powi(4))
        }

        fn constraints<S: Scalar>(&self, x: &[S], out: &mut [S]) {
            for k in 0..5 {
                out[k] = x[k] * x[k + 1] * x[k + 1] - x[k].sin();
            }
        }

        fn jacobian_structure(&self) -> Vec<(usize, usize)> {
            (0..5).flat_map(|k| vec![(k, k), (k, k + 1)]).collect()
        }

        fn hessian_structure(&self) -> Vec<(usize, usize)> {
            let mut s: Vec<(usize, usize)> = (0..6).map(|k| (k, k)).collect();
            s.extend((0..5).map(|k| (k + 1, k)));
            s
        }

        fn objective_hessian_structure(&self) -> Vec<(usize, usize)> {
            (0..6).map(|k| (k, k)).collect()
        }
    }

    #[test]
    fn test_first_order_matches_analytic() {
        let x = DVector::from_vec(vec![1.5, -0.7]);
        let fo = ForwardDual.first_order(&Smooth, &Seeding::new(&Smooth), &x);
        let (a, b) = (x[0], x[1]);

        assert_abs_diff_eq!(fo.objective, a * a * b + b.sin(), epsilon = 1e-12);
        assert_abs_diff_eq!(fo.gradient[0], 2.0 * a * b, epsilon = 1e-12);
        assert_abs_diff_eq!(fo.gradient[1], a * a + b.cos(), epsilon = 1e-12);

        assert_abs_diff_eq!(fo.constraints[0], a * b - 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(fo.jacobian[(0, 0)], b, epsilon = 1e-12);
        assert_abs_diff_eq!(fo.jacobian[(0, 1)], a, epsilon = 1e-12);
        assert_abs_diff_eq!(fo.jacobian[(1, 0)], 3.0 * a * a, epsilon = 1e-12);
        assert_abs_diff_eq!(fo.jacobian[(1, 1)], 1.0, epsilon = 1e-12);
        assert!(fo.is_finite());
    }

    #[test]
    fn test_lagrangian_hessian_matches_analytic() {
        let x = DVector::from_vec(vec![1.5, -0.7]);
        let lambda = DVector::from_vec(vec![0.3, -2.0]);
        let h = ForwardDual.lagrangian_hessian(&Smooth, &Seeding::new(&Smooth), &x, 2.0, &lambda);
        let (a, b) = (x[0], x[1]);

        // 2 * d2f + 0.3 * d2c0 - 2.0 * d2c1
        let h00 = 2.0 * (2.0 * b) - 2.0 * (6.0 * a);
        let h01 = 2.0 * (2.0 * a) + 0.3;
        let h11 = 2.0 * (-b.sin());

        assert_abs_diff_eq!(h[(0, 0)], h00, epsilon = 1e-10);
        assert_abs_diff_eq!(h[(0, 1)], h01, epsilon = 1e-10);
        assert_abs_diff_eq!(h[(1, 0)], h01, epsilon = 1e-10);
        assert_abs_diff_eq!(h[(1, 1)], h11, epsilon = 1e-10);
    }

    #[test]
    fn test_dense_problem_gets_one_column_per_pass() {
        let seeding = Seeding::new(&Smooth);
        assert_eq!(seeding.jacobian_passes(), 2);
        // (0, 0), (1, 0) and (1, 1)
        assert_eq!(seeding.hessian_passes(), 3);
    }

    #[test]
    fn test_chain_columns_are_grouped() {
        let seeding = Seeding::new(&Chain);
        assert_eq!(seeding.jacobian_passes(), 2);
        assert_eq!(seeding.hessian_passes(), 3);

        let dense = Seeding::dense(&Chain);
        assert_eq!(dense.jacobian_passes(), 6);
        assert!(dense.hessian_passes() > seeding.hessian_passes());
    }

    #[test]
    fn test_grouped_derivatives_match_dense() {
        let x = DVector::from_vec(vec![0.3, -1.2, 0.8, 2.0, -0.4, 1.1]);
        let lambda = DVector::from_vec(vec![1.0, -0.5, 2.0, 0.25, -3.0]);
        let grouped = Seeding::new(&Chain);
        let dense = Seeding::dense(&Chain);

        let a = ForwardDual.first_order(&Chain, &grouped, &x);
        let b = ForwardDual.first_order(&Chain, &dense, &x);
        assert_abs_diff_eq!(a.gradient, b.gradient, epsilon = 1e-12);
        assert_abs_diff_eq!(a.jacobian, b.jacobian, epsilon = 1e-12);
        assert_abs_diff_eq!(a.constraints, b.constraints, epsilon = 1e-12);

        let ha = ForwardDual.lagrangian_hessian(&Chain, &grouped, &x, 0.5, &lambda);
        let hb = ForwardDual.lagrangian_hessian(&Chain, &dense, &x, 0.5, &lambda);
        assert_abs_diff_eq!(ha, hb, epsilon = 1e-10);

        // d2c_1 / dx_1 dx_2 = 2 x_2
        assert_abs_diff_eq!(ha[(2, 1)], lambda[1] * 2.0 * x[2], epsilon = 1e-12);
    }

    #[test]
    fn test_hessian_respects_structure() {
        struct DiagonalOnly;

        impl NlpProblem for DiagonalOnly {
            fn num_variables(&self) -> usize {
                Smooth.num_variables()
            }

            fn num_constraints(&self) -> usize {
                0
            }

            fn bounds(&self) -> (DVector<f64>, DVector<f64>) {
                Smooth.bounds()
            }

            fn objective<S: Scalar>(&self, x: &[S]) -> S {
                Smooth.objective(x)
            }

            fn constraints<S: Scalar>(&self, _x: &[S], _out: &mut [S]) {}

            fn hessian_structure(&self) -> Vec<(usize, usize)> {
                vec![(1, 1)]
            }
        }

        let x = DVector::from_vec(vec![1.0, 1.0]);
        let seeding = Seeding::new(&DiagonalOnly);
        let h = ForwardDual.lagrangian_hessian(&DiagonalOnly, &seeding, &x, 1.0, &DVector::zeros(0));
        assert_eq!(h[(0, 0)], 0.0);
        assert_eq!(h[(1, 0)], 0.0);
        assert_abs_diff_eq!(h[(1, 1)], -(1.0f64).sin(), epsilon = 1e-12);
    }
}
