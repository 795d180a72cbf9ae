//! Kinematic bicycle model with tracking-error propagation
//!
//! One step of the model maps `(x, y, psi, v, cte, epsi)` and the actuation
//! `(steer, accel)` at `t` to the state at `t + 1`. The step is written
//! against [`Scalar`] so the same code runs on plain floats, on the dual
//! numbers of the gradient pass, and on the hyper-dual numbers of the
//! Hessian pass.

use serde::{Deserialize, Serialize};

use crate::common::{Actuation, MotionModel, PathCoefficients, VehicleState};
use crate::nlp::Scalar;

/// How the tracking errors evolve along the horizon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorModel {
    /// `cte` and `epsi` integrate their own previous value
    #[default]
    Decoupled,
    /// `cte` and `epsi` are re-derived from the reference polynomial at each
    /// step before integration
    PathRelative,
}

/// Kinematic bicycle with front-axle distance `lf`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KinematicBicycle {
    /// Distance from the centre of mass to the front axle [m]
    pub lf: f64,
    pub error_model: ErrorModel,
}

impl KinematicBicycle {
    pub fn new(lf: f64, error_model: ErrorModel) -> Self {
        Self { lf, error_model }
    }

    /// Advance one step of length `dt`.
    ///
    /// `path` is only read by [`ErrorModel::PathRelative`].
    pub fn step<S: Scalar>(
        &self,
        state: &[S; 6],
        steer: S,
        accel: S,
        dt: f64,
        path: &PathCoefficients,
    ) -> [S; 6] {
        let [x, y, psi, v, cte, epsi] = *state;
        let yaw_rate = v * steer / self.lf;

        let (cte_base, epsi_base) = match self.error_model {
            ErrorModel::Decoupled => (cte, epsi),
            ErrorModel::PathRelative => (y - path.eval(x), psi - path.slope(x).atan()),
        };

        [
            x + v * psi.cos() * dt,
            y + v * psi.sin() * dt,
            psi + yaw_rate * dt,
            v + accel * dt,
            cte_base + v * epsi.sin() * dt,
            epsi_base + yaw_rate * dt,
        ]
    }

    /// Plain-float step on the typed state
    pub fn step_state(
        &self,
        state: &VehicleState,
        actuation: &Actuation,
        dt: f64,
        path: &PathCoefficients,
    ) -> VehicleState {
        VehicleState::from_array(self.step(&state.to_array(), actuation.steer, actuation.accel, dt, path))
    }

    /// Bind the model to a reference path so it can be used as a
    /// [`MotionModel`]
    pub fn on_path<'a>(&'a self, path: &'a PathCoefficients) -> PathBoundBicycle<'a> {
        PathBoundBicycle { model: self, path }
    }
}

/// [`KinematicBicycle`] together with the path it tracks
#[derive(Debug, Clone, Copy)]
pub struct PathBoundBicycle<'a> {
    model: &'a KinematicBicycle,
    path: &'a PathCoefficients,
}

impl<'a> MotionModel for PathBoundBicycle<'a> {
    type State = VehicleState;
    type Control = Actuation;

    fn propagate(&self, state: &VehicleState, control: &Actuation, dt: f64) -> VehicleState {
        self.model.step_state(state, control, dt, self.path)
    }
}
