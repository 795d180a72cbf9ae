//! mpc_controller - receding-horizon trajectory controller for a
//! kinematic-bicycle vehicle
//!
//! Each control cycle turns a vehicle-frame state and a cubic reference
//! path into a steering/throttle command and a predicted trajectory by
//! solving a nonlinear program with an interior-point method and exact
//! automatic-differentiation derivatives.

// Core modules
pub mod common;
pub mod nlp;
pub mod path_tracking;

// Harness modules
pub mod config;
pub mod preprocess;
pub mod simulation;
pub mod utils;

// Re-export common types for convenience
pub use common::{Actuation, ControlCommand, PathCoefficients, Point2D, State2D, VehicleState};
pub use common::{Controller, MotionModel};
pub use common::{MpcError, MpcResult};
pub use path_tracking::{solve, HorizonConfig, MpcSolution, MpcSolver, MpcTracker};
pub use nlp::{SolveStatus, SolverOptions};
