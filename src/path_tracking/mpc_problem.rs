//! Horizon tracking problem in NLP form
//!
//! Assembles the cost, the initial-state pin, the dynamics constraints and
//! the variable bounds over the decision vector described by [`Layout`].

use itertools::{iproduct, Itertools};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use super::kinematic_bicycle::KinematicBicycle;
use super::layout::{ActuationField, Layout, StateField};
use super::mpc_cost::tracking_cost;
use super::nmpc::HorizonConfig;
use crate::common::error::{MpcError, MpcResult};
use crate::common::{Actuation, MotionModel, PathCoefficients, VehicleState};
use crate::nlp::{NlpProblem, Scalar, INFINITE_BOUND};

/// Symmetric actuation limits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuationBounds {
    /// Steering magnitude limit.
    ///
    /// Units: radians. Default 25 degrees.
    pub max_steer: f64,

    /// Acceleration magnitude limit
    pub max_accel: f64,
}

impl Default for ActuationBounds {
    fn default() -> Self {
        Self {
            max_steer: 0.436332,
            max_accel: 1.0,
        }
    }
}

impl ActuationBounds {
    pub fn validate(&self) -> MpcResult<()> {
        if !(self.max_steer.is_finite() && self.max_steer > 0.0) {
            return Err(MpcError::ConfigurationError(format!(
                "steering bound must be positive, got {}",
                self.max_steer
            )));
        }
        if !(self.max_accel.is_finite() && self.max_accel > 0.0) {
            return Err(MpcError::ConfigurationError(format!(
                "acceleration bound must be positive, got {}",
                self.max_accel
            )));
        }
        Ok(())
    }

    pub fn clamp(&self, actuation: &Actuation) -> Actuation {
        Actuation::new(
            actuation.steer.clamp(-self.max_steer, self.max_steer),
            actuation.accel.clamp(-self.max_accel, self.max_accel),
        )
    }
}

/// One cycle's optimisation problem: the horizon configuration bound to the
/// measured state and the reference path
pub struct TrackingProblem<'a> {
    config: &'a HorizonConfig,
    layout: Layout,
    model: KinematicBicycle,
    initial: [f64; 6],
    path: &'a PathCoefficients,
}

impl<'a> TrackingProblem<'a> {
    pub fn new(config: &'a HorizonConfig, initial: &VehicleState, path: &'a PathCoefficients) -> Self {
        Self {
            config,
            layout: Layout::new(config.steps),
            model: config.model(),
            initial: initial.to_array(),
            path,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Dynamically feasible starting point: `guess` (or zero actuation)
    /// rolled out from the initial state.
    pub fn initial_guess(&self, guess: Option<&[Actuation]>) -> DVector<f64> {
        let bounds = &self.config.bounds;
        let actuations: Vec<Actuation> = match guess {
            Some(g) => g.iter().map(|a| bounds.clamp(a)).collect(),
            None => vec![Actuation::zero(); self.layout.transitions()],
        };
        let states = self
            .model
            .on_path(self.path)
            .rollout(&VehicleState::from_array(self.initial), &actuations, self.config.dt);

        let mut x = DVector::zeros(self.layout.num_variables());
        for (t, s) in states.iter().enumerate() {
            for (i, v) in self.layout.state_indices(t).zip(s.to_array().iter()) {
                x[i] = *v;
            }
        }
        for (t, a) in actuations.iter().enumerate() {
            let [steer, accel] = self.layout.actuation_indices(t);
            x[steer] = a.steer;
            x[accel] = a.accel;
        }
        x
    }
}

impl<'a> NlpProblem for TrackingProblem<'a> {
    fn num_variables(&self) -> usize {
        self.layout.num_variables()
    }

    fn num_constraints(&self) -> usize {
        self.layout.num_constraints()
    }

    fn bounds(&self) -> (DVector<f64>, DVector<f64>) {
        let n = self.layout.num_variables();
        let mut lower = DVector::from_element(n, -INFINITE_BOUND);
        let mut upper = DVector::from_element(n, INFINITE_BOUND);
        let b = &self.config.bounds;
        for t in 0..self.layout.transitions() {
            let steer = self.layout.actuation_offset(t, ActuationField::Steer);
            let accel = self.layout.actuation_offset(t, ActuationField::Accel);
            lower[steer] = -b.max_steer;
            upper[steer] = b.max_steer;
            lower[accel] = -b.max_accel;
            upper[accel] = b.max_accel;
        }
        (lower, upper)
    }

    fn objective<S: Scalar>(&self, x: &[S]) -> S {
        tracking_cost(&self.layout, &self.config.weights, self.config.ref_speed, x)
    }

    fn constraints<S: Scalar>(&self, x: &[S], out: &mut [S]) {
        let dim = Layout::STATE_DIM;
        let s0 = self.layout.state(x, 0);
        for i in 0..dim {
            out[i] = s0[i] - self.initial[i];
        }

        for t in 1..self.layout.steps() {
            let prev = self.layout.state(x, t - 1);
            let (steer, accel) = self.layout.actuation(x, t - 1);
            let predicted = self.model.step(&prev, steer, accel, self.config.dt, self.path);
            let current = self.layout.state(x, t);
            for i in 0..dim {
                out[dim * t + i] = predicted[i] - current[i];
            }
        }
    }

    /// Pin rows read their own state entry; dynamics rows into `t` read the
    /// whole stage `t - 1` and their own entry of state `t`.
    fn jacobian_structure(&self) -> Vec<(usize, usize)> {
        let l = &self.layout;
        let dim = Layout::STATE_DIM;
        let mut entries: Vec<(usize, usize)> = l.state_indices(0).enumerate().collect();

        for t in 1..l.steps() {
            let mut stage: Vec<usize> = l.state_indices(t - 1).collect();
            stage.extend_from_slice(&l.actuation_indices(t - 1));
            for (i, own) in l.state_indices(t).enumerate() {
                let row = dim * t + i;
                entries.extend(stage.iter().map(|&col| (row, col)));
                entries.push((row, own));
            }
        }
        entries
    }

    /// Squared error and actuation terms, plus the rate coupling of
    /// consecutive actuations
    fn objective_hessian_structure(&self) -> Vec<(usize, usize)> {
        let l = &self.layout;
        let mut entries = Vec::new();
        for t in 0..l.steps() {
            entries.extend(
                [StateField::V, StateField::Cte, StateField::Epsi]
                    .iter()
                    .map(|&f| l.state_offset(t, f))
                    .map(|i| (i, i)),
            );
        }
        for t in 0..l.transitions() {
            entries.extend(l.actuation_indices(t).iter().map(|&i| (i, i)));
        }
        for t in 1..l.transitions() {
            let current = l.actuation_indices(t);
            let previous = l.actuation_indices(t - 1);
            entries.extend(current.iter().copied().zip(previous.iter().copied()));
        }
        entries
    }

    /// Dense block over each stage's state and actuation, plus the coupling
    /// of consecutive actuations through the rate terms.
    fn hessian_structure(&self) -> Vec<(usize, usize)> {
        let l = &self.layout;
        let mut entries = Vec::new();

        for t in 0..l.steps() {
            let mut stage: Vec<usize> = l.state_indices(t).collect();
            if t < l.transitions() {
                stage.extend_from_slice(&l.actuation_indices(t));
            }
            entries.extend(stage.iter().map(|&i| (i, i)));
            entries.extend(
                stage
                    .iter()
                    .tuple_combinations()
                    .map(|(&a, &b)| (a.max(b), a.min(b))),
            );
        }

        for t in 1..l.transitions() {
            let current = l.actuation_indices(t);
            let previous = l.actuation_indices(t - 1);
            entries.extend(iproduct!(current.iter().copied(), previous.iter().copied()));
        }

        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlp::{evaluate, DerivativeBackend, ForwardDual, Seeding};
    use std::collections::HashSet;

    fn config(steps: usize) -> HorizonConfig {
        HorizonConfig {
            steps,
            ..HorizonConfig::default()
        }
    }

    #[test]
    fn test_bounds_layout() {
        let cfg = config(4);
        let path = PathCoefficients::flat();
        let p = TrackingProblem::new(&cfg, &VehicleState::default(), &path);
        let (lower, upper) = p.bounds();
        let l = p.layout();

        for t in 0..4 {
            for i in l.state_indices(t) {
                assert_eq!(lower[i], -INFINITE_BOUND);
                assert_eq!(upper[i], INFINITE_BOUND);
            }
        }
        for t in 0..3 {
            let [s, a] = l.actuation_indices(t);
            assert_eq!(upper[s], cfg.bounds.max_steer);
            assert_eq!(lower[s], -cfg.bounds.max_steer);
            assert_eq!(upper[a], cfg.bounds.max_accel);
        }
    }

    #[test]
    fn test_initial_guess_is_feasible() {
        let cfg = config(8);
        let path = PathCoefficients::new(vec![1.0, 0.1, -0.01]).unwrap();
        let state = VehicleState::new(0.0, 0.0, 0.0, 15.0, -1.0, -0.1);
        let p = TrackingProblem::new(&cfg, &state, &path);

        let guess = vec![Actuation::new(0.05, 0.5); 7];
        for x0 in [p.initial_guess(None), p.initial_guess(Some(guess.as_slice()))].iter() {
            let (_, c) = evaluate(&p, x0);
            assert!(c.iter().all(|v| v.abs() < 1e-12));
        }
    }

    #[test]
    fn test_warm_start_is_clamped() {
        let cfg = config(3);
        let path = PathCoefficients::flat();
        let p = TrackingProblem::new(&cfg, &VehicleState::default(), &path);
        let guess = [Actuation::new(2.0, -5.0), Actuation::zero()];
        let x0 = p.initial_guess(Some(&guess[..]));
        let (steer, accel) = p.layout().actuation(x0.as_slice(), 0);
        assert_eq!(steer, cfg.bounds.max_steer);
        assert_eq!(accel, -cfg.bounds.max_accel);
    }

    #[test]
    fn test_constraint_residual_indices() {
        let cfg = config(3);
        let path = PathCoefficients::flat();
        let state = VehicleState::new(0.0, 0.0, 0.0, 10.0, 0.0, 0.0);
        let p = TrackingProblem::new(&cfg, &state, &path);
        let mut x = p.initial_guess(None);

        // Perturb the pinned x and the y of state 2
        x[p.layout().state_offset(0, StateField::X)] += 0.5;
        x[p.layout().state_offset(2, StateField::Y)] += 0.25;
        let (_, c) = evaluate(&p, &x);
        assert_eq!(c.len(), 18);
        assert!((c[0] - 0.5).abs() < 1e-12);
        // Shifted x0 propagates into the t = 1 block
        assert!((c[6] - 0.5).abs() < 1e-12);
        assert!((c[13] + 0.25).abs() < 1e-12);
    }

    fn generic_point(p: &TrackingProblem) -> DVector<f64> {
        let guess = vec![Actuation::new(0.1, 0.2); p.layout().transitions()];
        let mut x = p.initial_guess(Some(guess.as_slice()));
        for (k, v) in x.iter_mut().enumerate() {
            *v += 0.01 * k as f64;
        }
        x
    }

    #[test]
    fn test_structures_cover_nonzeros() {
        let cfg = HorizonConfig {
            steps: 4,
            error_model: crate::path_tracking::ErrorModel::PathRelative,
            ..HorizonConfig::default()
        };
        let path = PathCoefficients::new(vec![0.2, 0.1, 0.05, -0.01]).unwrap();
        let state = VehicleState::new(0.0, 0.3, 0.1, 12.0, 0.1, 0.05);
        let p = TrackingProblem::new(&cfg, &state, &path);

        let structure = p.hessian_structure();
        let set: HashSet<(usize, usize)> = structure.iter().copied().collect();
        assert_eq!(set.len(), structure.len());
        assert!(structure.iter().all(|&(i, j)| i >= j));
        assert!(p.objective_hessian_structure().iter().all(|e| set.contains(e)));

        // Grouped derivatives agree with the ones that ignore the structure
        let x = generic_point(&p);
        let lambda = DVector::from_fn(p.num_constraints(), |i, _| 0.3 + 0.1 * i as f64);
        let grouped = Seeding::new(&p);
        let dense = Seeding::dense(&p);

        let a = ForwardDual.first_order(&p, &grouped, &x);
        let b = ForwardDual.first_order(&p, &dense, &x);
        for (u, v) in a.jacobian.iter().zip(b.jacobian.iter()) {
            assert!((u - v).abs() <= 1e-9 * v.abs().max(1.0), "jacobian {} vs {}", u, v);
        }
        for (u, v) in a.gradient.iter().zip(b.gradient.iter()) {
            assert!((u - v).abs() <= 1e-9 * v.abs().max(1.0), "gradient {} vs {}", u, v);
        }

        let ha = ForwardDual.lagrangian_hessian(&p, &grouped, &x, 1.0, &lambda);
        let hb = ForwardDual.lagrangian_hessian(&p, &dense, &x, 1.0, &lambda);
        let n = p.num_variables();
        for i in 0..n {
            for j in 0..=i {
                if hb[(i, j)].abs() > 1e-12 {
                    assert!(set.contains(&(i, j)), "missing entry ({}, {})", i, j);
                }
                assert!(
                    (ha[(i, j)] - hb[(i, j)]).abs() <= 1e-8 * hb[(i, j)].abs().max(1.0),
                    "entry ({}, {}): {} vs {}",
                    i,
                    j,
                    ha[(i, j)],
                    hb[(i, j)]
                );
            }
        }
    }

    #[test]
    fn test_derivative_passes_do_not_grow_with_horizon() {
        let path = PathCoefficients::new(vec![0.5, 0.1, 0.01]).unwrap();
        let state = VehicleState::new(0.0, 0.0, 0.0, 10.0, -0.5, -0.1);
        let passes = |steps: usize| {
            let cfg = config(steps);
            let p = TrackingProblem::new(&cfg, &state, &path);
            let seeding = Seeding::new(&p);
            (seeding.jacobian_passes(), seeding.hessian_passes())
        };

        let (jac, hess) = passes(25);
        assert_eq!(passes(10), (jac, hess));
        // Six state groups per stage parity, one group per actuation channel
        assert_eq!(jac, 14);
        assert!(hess < 100, "{} second-order passes", hess);
    }
}
