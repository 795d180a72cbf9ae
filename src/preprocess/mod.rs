//! Per-cycle pre-processing ahead of the solver
//!
//! Turns world-frame telemetry into the solver inputs: waypoints are moved
//! into the vehicle frame, fitted with a low-order polynomial, and the
//! vehicle state is predicted forward by the actuation latency.

pub mod frame;
pub mod latency;
pub mod polyfit;

pub use frame::{to_vehicle_frame, to_world_frame};
pub use latency::LatencyCompensator;
pub use polyfit::{fit_path, polyfit, MAX_ORDER};
