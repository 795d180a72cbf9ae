// Path tracking with nonlinear model predictive control

pub mod layout;
pub mod kinematic_bicycle;
pub mod mpc_cost;
pub mod mpc_problem;
pub mod nmpc;
pub mod tracker;

pub use layout::{ActuationField, Layout, StateField};
pub use kinematic_bicycle::{ErrorModel, KinematicBicycle, PathBoundBicycle};
pub use mpc_cost::{tracking_cost, CostWeights};
pub use mpc_problem::{ActuationBounds, TrackingProblem};
pub use nmpc::{solve, solve_with_guess, HorizonConfig, MpcSolution, MpcSolver};
pub use tracker::{FallbackPolicy, MpcTracker, TrackerOutput, TrackerParams};
