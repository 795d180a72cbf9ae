//! Nonlinear model predictive controller
//!
//! Builds the horizon problem for one control cycle, hands it to the
//! interior-point engine and extracts the first actuation together with the
//! predicted trajectory.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::kinematic_bicycle::{ErrorModel, KinematicBicycle};
use super::mpc_cost::CostWeights;
use super::mpc_problem::{ActuationBounds, TrackingProblem};
use crate::common::error::{MpcError, MpcResult};
use crate::common::{Actuation, ControlCommand, PathCoefficients, Point2D, VehicleState};
use crate::nlp::{InteriorPoint, NlpProblem, NlpSolution, SolveStatus, SolverOptions};

/// Horizon configuration, fixed at start-up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HorizonConfig {
    /// Number of predicted states, including the current one
    pub steps: usize,

    /// Step length.
    ///
    /// Units: seconds
    pub dt: f64,

    /// Speed the cost pulls towards
    pub ref_speed: f64,

    /// Distance from the centre of mass to the front axle.
    ///
    /// Units: meters
    pub lf: f64,

    pub weights: CostWeights,

    pub bounds: ActuationBounds,

    pub error_model: ErrorModel,
}

impl Default for HorizonConfig {
    fn default() -> Self {
        Self {
            steps: 10,
            dt: 0.1,
            ref_speed: 40.0,
            lf: 2.67,
            weights: CostWeights::default(),
            bounds: ActuationBounds::default(),
            error_model: ErrorModel::default(),
        }
    }
}

impl HorizonConfig {
    pub fn validate(&self) -> MpcResult<()> {
        if self.steps < 2 {
            return Err(MpcError::ConfigurationError(format!(
                "horizon needs at least 2 steps, got {}",
                self.steps
            )));
        }
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(MpcError::ConfigurationError(format!(
                "step length must be positive, got {}",
                self.dt
            )));
        }
        if !(self.lf.is_finite() && self.lf > 0.0) {
            return Err(MpcError::ConfigurationError(format!(
                "front axle distance must be positive, got {}",
                self.lf
            )));
        }
        if !self.ref_speed.is_finite() {
            return Err(MpcError::ConfigurationError(format!(
                "reference speed must be finite, got {}",
                self.ref_speed
            )));
        }
        self.weights.validate()?;
        self.bounds.validate()
    }

    pub fn model(&self) -> KinematicBicycle {
        KinematicBicycle::new(self.lf, self.error_model)
    }
}

/// Outcome of one successful solve
#[derive(Debug, Clone)]
pub struct MpcSolution {
    /// First steering angle of the plan.
    ///
    /// Units: radians
    pub steering_angle: f64,

    /// First steering angle normalised by the steering bound, in `[-1, 1]`
    pub steering: f64,

    /// First acceleration of the plan
    pub throttle: f64,

    /// Predicted positions for `t = 1 .. N-1`
    pub trajectory: Vec<Point2D>,

    /// Solved states for `t = 0 .. N-1`
    pub states: Vec<VehicleState>,

    /// Solved actuations for `t = 0 .. N-2`
    pub actuations: Vec<Actuation>,

    /// Optimal cost
    pub cost: f64,

    pub iterations: usize,

    pub status: SolveStatus,
}

impl MpcSolution {
    /// Command to send to the vehicle, both channels in `[-1, 1]`
    pub fn command(&self) -> ControlCommand {
        ControlCommand::new(self.steering.clamp(-1.0, 1.0), self.throttle.clamp(-1.0, 1.0))
    }
}

/// Solve one control cycle from a zero-actuation initial guess.
///
/// The configuration and options are validated on every call; use
/// [`MpcSolver`] to validate once.
pub fn solve(
    config: &HorizonConfig,
    options: &SolverOptions,
    state: &VehicleState,
    coeffs: &PathCoefficients,
) -> MpcResult<MpcSolution> {
    solve_with_guess(config, options, state, coeffs, None)
}

/// Solve one control cycle, optionally warm-started from an actuation
/// sequence of length `N - 1`.
pub fn solve_with_guess(
    config: &HorizonConfig,
    options: &SolverOptions,
    state: &VehicleState,
    coeffs: &PathCoefficients,
    guess: Option<&[Actuation]>,
) -> MpcResult<MpcSolution> {
    config.validate()?;
    options.validate()?;
    solve_validated(config, &InteriorPoint::new(options.clone()), state, coeffs, guess)
}

fn solve_validated(
    config: &HorizonConfig,
    engine: &InteriorPoint,
    state: &VehicleState,
    coeffs: &PathCoefficients,
    guess: Option<&[Actuation]>,
) -> MpcResult<MpcSolution> {
    state.validate()?;
    if let Some(g) = guess {
        if g.len() != config.steps - 1 {
            return Err(MpcError::InputError(format!(
                "warm start must hold {} actuations, got {}",
                config.steps - 1,
                g.len()
            )));
        }
        if g.iter().any(|a| !(a.steer.is_finite() && a.accel.is_finite())) {
            return Err(MpcError::InputError("warm start contains non-finite actuations".to_string()));
        }
    }

    let problem = TrackingProblem::new(config, state, coeffs);
    let x0 = problem.initial_guess(guess);
    let sol = engine.solve(&problem, &x0);

    debug!(
        "mpc solve: status={:?} iterations={} cost={:.4e} violation={:.2e}",
        sol.status, sol.iterations, sol.objective, sol.constraint_violation
    );

    check_status(&sol)?;

    if sol.x.iter().any(|v| !v.is_finite()) || !sol.objective.is_finite() {
        return Err(MpcError::NumericalError("solution contains non-finite values".to_string()));
    }

    let layout = problem.layout();
    let x = sol.x.as_slice();
    let states: Vec<VehicleState> = (0..layout.steps())
        .map(|t| VehicleState::from_array(layout.state(x, t)))
        .collect();
    let actuations: Vec<Actuation> = (0..layout.transitions())
        .map(|t| {
            let (steer, accel) = layout.actuation(x, t);
            Actuation::new(steer, accel)
        })
        .collect();
    let first = actuations.first().copied().unwrap_or_else(Actuation::zero);

    Ok(MpcSolution {
        steering_angle: first.steer,
        steering: first.steer / config.bounds.max_steer,
        throttle: first.accel,
        trajectory: states.iter().skip(1).map(|s| s.position()).collect(),
        states,
        actuations,
        cost: sol.objective,
        iterations: sol.iterations,
        status: sol.status,
    })
}

/// Error for an engine outcome that carries no usable plan
fn check_status(sol: &NlpSolution) -> MpcResult<()> {
    match sol.status {
        SolveStatus::Converged | SolveStatus::Acceptable => Ok(()),
        SolveStatus::NumericalFailure => {
            warn!("mpc solve failed numerically after {} iterations", sol.iterations);
            let residuals = if sol.constraint_violation.is_finite() {
                format!("violation {:.2e}", sol.constraint_violation)
            } else {
                "non-finite residuals".to_string()
            };
            Err(MpcError::NumericalError(format!(
                "interior point broke down after {} iterations ({})",
                sol.iterations, residuals
            )))
        }
        status => {
            warn!("mpc solve did not converge: {:?} after {} iterations", status, sol.iterations);
            Err(MpcError::ConvergenceError {
                status,
                iterations: sol.iterations,
            })
        }
    }
}

/// Controller holding a validated configuration and its solver
#[derive(Debug, Clone)]
pub struct MpcSolver {
    config: HorizonConfig,
    engine: InteriorPoint,
}

impl MpcSolver {
    pub fn new(config: HorizonConfig, options: SolverOptions) -> MpcResult<Self> {
        config.validate()?;
        options.validate()?;
        Ok(Self {
            config,
            engine: InteriorPoint::new(options),
        })
    }

    pub fn config(&self) -> &HorizonConfig {
        &self.config
    }

    pub fn options(&self) -> &SolverOptions {
        self.engine.options()
    }

    /// Number of decision variables and constraints of one cycle's problem
    pub fn problem_size(&self) -> (usize, usize) {
        let path = PathCoefficients::flat();
        let problem = TrackingProblem::new(&self.config, &VehicleState::default(), &path);
        (problem.num_variables(), problem.num_constraints())
    }

    pub fn solve(&self, state: &VehicleState, coeffs: &PathCoefficients) -> MpcResult<MpcSolution> {
        solve_validated(&self.config, &self.engine, state, coeffs, None)
    }

    pub fn solve_with_guess(
        &self,
        state: &VehicleState,
        coeffs: &PathCoefficients,
        guess: Option<&[Actuation]>,
    ) -> MpcResult<MpcSolution> {
        solve_validated(&self.config, &self.engine, state, coeffs, guess)
    }
}
