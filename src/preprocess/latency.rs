//! Actuation latency compensation

use crate::common::error::{MpcError, MpcResult};
use crate::common::{Actuation, PathCoefficients, VehicleState};
use crate::path_tracking::KinematicBicycle;

/// Predicts where the vehicle will be when the next command takes effect
#[derive(Debug, Clone, Copy)]
pub struct LatencyCompensator {
    latency: f64,
    model: KinematicBicycle,
}

impl LatencyCompensator {
    /// `latency` in seconds; zero disables the prediction
    pub fn new(latency: f64, model: KinematicBicycle) -> MpcResult<Self> {
        if !(latency.is_finite() && latency >= 0.0) {
            return Err(MpcError::ConfigurationError(format!(
                "latency must be finite and non-negative, got {}",
                latency
            )));
        }
        Ok(Self { latency, model })
    }

    pub fn latency(&self) -> f64 {
        self.latency
    }

    /// Vehicle-frame state at the origin with tracking errors measured
    /// against `path`
    pub fn current_state(speed: f64, path: &PathCoefficients) -> VehicleState {
        VehicleState::new(0.0, 0.0, 0.0, speed, -path.eval(0.0), -path.slope(0.0).atan())
    }

    /// Current state advanced by the latency under the actuation still
    /// being applied
    pub fn compensate(&self, speed: f64, path: &PathCoefficients, applied: &Actuation) -> VehicleState {
        let state = Self::current_state(speed, path);
        if self.latency == 0.0 {
            return state;
        }
        self.model.step_state(&state, applied, self.latency, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path_tracking::ErrorModel;
    use approx::assert_abs_diff_eq;

    fn model() -> KinematicBicycle {
        KinematicBicycle::new(2.67, ErrorModel::Decoupled)
    }

    #[test]
    fn test_current_state_errors() {
        let path = PathCoefficients::new(vec![1.5, 0.2]).unwrap();
        let s = LatencyCompensator::current_state(10.0, &path);
        assert_eq!(s.cte, -1.5);
        assert_abs_diff_eq!(s.epsi, -(0.2f64).atan(), epsilon = 1e-12);
    }

    #[test]
    fn test_zero_latency_is_identity() {
        let c = LatencyCompensator::new(0.0, model()).unwrap();
        let path = PathCoefficients::flat();
        let s = c.compensate(12.0, &path, &Actuation::new(0.3, 1.0));
        assert_eq!(s, VehicleState::new(0.0, 0.0, 0.0, 12.0, 0.0, 0.0));
    }

    #[test]
    fn test_prediction() {
        let c = LatencyCompensator::new(0.1, model()).unwrap();
        let path = PathCoefficients::flat();
        let s = c.compensate(20.0, &path, &Actuation::new(0.1, 0.5));
        assert_abs_diff_eq!(s.x, 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(s.v, 20.05, epsilon = 1e-12);
        assert_abs_diff_eq!(s.psi, 20.0 / 2.67 * 0.1 * 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_rejects_negative_latency() {
        assert!(LatencyCompensator::new(-0.1, model()).is_err());
    }
}
