//! Caller-side MPC tracker
//!
//! Wraps [`MpcSolver`] with the per-cycle pre-processing (frame shift, curve
//! fit, latency compensation), optional warm starting and the policy applied
//! when a solve fails.

use log::warn;
use serde::{Deserialize, Serialize};

use super::nmpc::{MpcSolution, MpcSolver};
use crate::common::error::{MpcError, MpcResult};
use crate::common::{Actuation, ControlCommand, Controller, Path2D, PathCoefficients, Point2D, State2D};
use crate::preprocess::{fit_path, to_vehicle_frame, LatencyCompensator, MAX_ORDER};

/// What to send when the solver fails to produce a command
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Propagate the error to the caller
    Reject,
    /// Repeat the last successful command
    HoldPrevious,
    /// Straighten the wheels and apply the given throttle
    SafeStop { throttle: f64 },
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        FallbackPolicy::Reject
    }
}

/// Tracker parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerParams {
    /// Reuse the previous actuation plan, shifted by one step, as the
    /// initial guess
    pub warm_start: bool,

    pub fallback: FallbackPolicy,

    /// Delay between computing a command and it acting on the vehicle.
    ///
    /// Units: seconds
    pub latency: f64,

    /// Highest order of the reference polynomial
    pub fit_order: usize,

    /// Spacing of the displayed reference line.
    ///
    /// Units: meters
    pub reference_spacing: f64,

    /// Number of displayed reference points
    pub reference_points: usize,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            warm_start: false,
            fallback: FallbackPolicy::default(),
            latency: 0.1,
            fit_order: MAX_ORDER,
            reference_spacing: 2.5,
            reference_points: 25,
        }
    }
}

impl TrackerParams {
    pub fn validate(&self) -> MpcResult<()> {
        if self.fit_order > MAX_ORDER {
            return Err(MpcError::ConfigurationError(format!(
                "fit order must be at most {}, got {}",
                MAX_ORDER, self.fit_order
            )));
        }
        if !(self.reference_spacing.is_finite() && self.reference_spacing > 0.0) {
            return Err(MpcError::ConfigurationError(format!(
                "reference spacing must be positive, got {}",
                self.reference_spacing
            )));
        }
        if let FallbackPolicy::SafeStop { throttle } = self.fallback {
            if !(-1.0..=1.0).contains(&throttle) {
                return Err(MpcError::ConfigurationError(format!(
                    "safe-stop throttle must lie in [-1, 1], got {}",
                    throttle
                )));
            }
        }
        Ok(())
    }
}

/// Result of one tracker cycle
#[derive(Debug, Clone)]
pub struct TrackerOutput {
    pub command: ControlCommand,
    /// Predicted positions, vehicle frame
    pub predicted: Vec<Point2D>,
    /// Fitted reference line, vehicle frame
    pub reference: Vec<Point2D>,
    pub coeffs: PathCoefficients,
    /// `None` when the command came from the fallback policy
    pub solution: Option<MpcSolution>,
}

impl TrackerOutput {
    pub fn is_fallback(&self) -> bool {
        self.solution.is_none()
    }
}

/// MPC controller driven by world-frame telemetry and waypoints
#[derive(Debug, Clone)]
pub struct MpcTracker {
    solver: MpcSolver,
    params: TrackerParams,
    compensator: LatencyCompensator,
    last_command: Option<ControlCommand>,
    last_plan: Option<Vec<Actuation>>,
}

impl MpcTracker {
    pub fn new(solver: MpcSolver, params: TrackerParams) -> MpcResult<Self> {
        params.validate()?;
        let compensator = LatencyCompensator::new(params.latency, solver.config().model())?;
        Ok(Self {
            solver,
            params,
            compensator,
            last_command: None,
            last_plan: None,
        })
    }

    pub fn solver(&self) -> &MpcSolver {
        &self.solver
    }

    pub fn params(&self) -> &TrackerParams {
        &self.params
    }

    pub fn last_command(&self) -> Option<ControlCommand> {
        self.last_command
    }

    /// Previous plan advanced by one step, the last actuation repeated
    fn shifted_plan(&self) -> Option<Vec<Actuation>> {
        let plan = self.last_plan.as_ref()?;
        let last = *plan.last()?;
        Some(plan.iter().skip(1).copied().chain(std::iter::once(last)).collect())
    }

    fn step(&mut self, pose: &State2D, waypoints: &Path2D) -> MpcResult<TrackerOutput> {
        let local = to_vehicle_frame(&waypoints.points, pose);
        let coeffs = fit_path(&local, self.params.fit_order)?;
        let reference = coeffs.sample(self.params.reference_spacing, self.params.reference_points);

        let max_steer = self.solver.config().bounds.max_steer;
        let applied = self
            .last_command
            .map(|c| c.to_actuation(max_steer))
            .unwrap_or_else(Actuation::zero);
        let state = self.compensator.compensate(pose.v, &coeffs, &applied);

        let guess = if self.params.warm_start { self.shifted_plan() } else { None };
        let result = self.solver.solve_with_guess(&state, &coeffs, guess.as_deref());

        match result {
            Ok(solution) => {
                let command = solution.command();
                self.last_command = Some(command);
                self.last_plan = Some(solution.actuations.clone());
                Ok(TrackerOutput {
                    command,
                    predicted: solution.trajectory.clone(),
                    reference,
                    coeffs,
                    solution: Some(solution),
                })
            }
            Err(e) if e.is_solve_failure() => {
                self.last_plan = None;
                let command = match self.params.fallback {
                    FallbackPolicy::Reject => return Err(e),
                    FallbackPolicy::HoldPrevious => self.last_command.unwrap_or_default(),
                    FallbackPolicy::SafeStop { throttle } => ControlCommand::new(0.0, throttle),
                };
                warn!("{}; falling back to {:?}", e, command);
                self.last_command = Some(command);
                Ok(TrackerOutput {
                    command,
                    predicted: Vec::new(),
                    reference,
                    coeffs,
                    solution: None,
                })
            }
            Err(e) => Err(e),
        }
    }
}

impl Controller for MpcTracker {
    type State = State2D;
    type Reference = Path2D;
    type Output = MpcResult<TrackerOutput>;

    fn compute(&mut self, state: &State2D, reference: &Path2D) -> MpcResult<TrackerOutput> {
        self.step(state, reference)
    }

    fn reset(&mut self) {
        self.last_command = None;
        self.last_plan = None;
    }
}
