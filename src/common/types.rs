//! Common types used throughout mpc_controller

use std::convert::TryFrom;

use serde::{Deserialize, Serialize};

use crate::common::error::{MpcError, MpcResult};
use crate::nlp::Scalar;

/// 2D point representation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn origin() -> Self {
        Self { x: 0.0, y: 0.0 }
    }

    pub fn distance(&self, other: &Point2D) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// World-frame vehicle pose and speed, as reported by telemetry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct State2D {
    pub x: f64,
    pub y: f64,
    pub yaw: f64,
    pub v: f64,
}

impl State2D {
    pub fn new(x: f64, y: f64, yaw: f64, v: f64) -> Self {
        Self { x, y, yaw, v }
    }

    pub fn position(&self) -> Point2D {
        Point2D::new(self.x, self.y)
    }
}

/// Path represented as a sequence of 2D points
#[derive(Debug, Clone, Default)]
pub struct Path2D {
    pub points: Vec<Point2D>,
}

impl Path2D {
    pub fn new() -> Self {
        Self { points: Vec::new() }
    }

    pub fn from_points(points: Vec<Point2D>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn x_coords(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.x).collect()
    }

    pub fn y_coords(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.y).collect()
    }
}

/// Vehicle-frame MPC state `(x, y, psi, v, cte, epsi)`.
///
/// `cte` is the lateral offset of the vehicle from the reference path
/// (positive when the vehicle is left of the path) and `epsi` the heading
/// relative to the path tangent.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VehicleState {
    pub x: f64,
    pub y: f64,
    pub psi: f64,
    pub v: f64,
    pub cte: f64,
    pub epsi: f64,
}

impl VehicleState {
    /// Number of state components
    pub const DIM: usize = 6;

    pub fn new(x: f64, y: f64, psi: f64, v: f64, cte: f64, epsi: f64) -> Self {
        Self { x, y, psi, v, cte, epsi }
    }

    /// Build a state from an ordered slice, rejecting wrong sizes and
    /// non-finite values.
    pub fn from_slice(values: &[f64]) -> MpcResult<Self> {
        if values.len() != Self::DIM {
            return Err(MpcError::InputError(format!(
                "vehicle state must have {} components, got {}",
                Self::DIM,
                values.len()
            )));
        }
        let state = Self::new(values[0], values[1], values[2], values[3], values[4], values[5]);
        state.validate()?;
        Ok(state)
    }

    pub fn to_array(&self) -> [f64; 6] {
        [self.x, self.y, self.psi, self.v, self.cte, self.epsi]
    }

    pub fn from_array(a: [f64; 6]) -> Self {
        Self::new(a[0], a[1], a[2], a[3], a[4], a[5])
    }

    pub fn position(&self) -> Point2D {
        Point2D::new(self.x, self.y)
    }

    /// Reject NaN and infinite components
    pub fn validate(&self) -> MpcResult<()> {
        const NAMES: [&str; 6] = ["x", "y", "psi", "v", "cte", "epsi"];
        for (name, value) in NAMES.iter().zip(self.to_array().iter()) {
            if !value.is_finite() {
                return Err(MpcError::InputError(format!(
                    "vehicle state component `{}` is not finite ({})",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

impl TryFrom<&[f64]> for VehicleState {
    type Error = MpcError;

    fn try_from(values: &[f64]) -> MpcResult<Self> {
        Self::from_slice(values)
    }
}

impl From<[f64; 6]> for VehicleState {
    fn from(a: [f64; 6]) -> Self {
        Self::from_array(a)
    }
}

/// Reference path `y = c0 + c1 x + c2 x^2 + c3 x^3` in the vehicle frame
#[derive(Debug, Clone, PartialEq)]
pub struct PathCoefficients {
    coeffs: Vec<f64>,
}

impl PathCoefficients {
    /// Highest supported number of coefficients (cubic)
    pub const MAX_LEN: usize = 4;

    pub fn new(coeffs: Vec<f64>) -> MpcResult<Self> {
        if coeffs.is_empty() || coeffs.len() > Self::MAX_LEN {
            return Err(MpcError::InputError(format!(
                "path must have 1 to {} coefficients, got {}",
                Self::MAX_LEN,
                coeffs.len()
            )));
        }
        if let Some(i) = coeffs.iter().position(|c| !c.is_finite()) {
            return Err(MpcError::InputError(format!(
                "path coefficient c{} is not finite ({})",
                i, coeffs[i]
            )));
        }
        Ok(Self { coeffs })
    }

    /// The straight reference `y = 0`
    pub fn flat() -> Self {
        Self { coeffs: vec![0.0] }
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.coeffs
    }

    pub fn len(&self) -> usize {
        self.coeffs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coeffs.is_empty()
    }

    pub fn degree(&self) -> usize {
        self.coeffs.len() - 1
    }

    /// Evaluate the polynomial at `x` (Horner's scheme)
    pub fn eval<S: Scalar>(&self, x: S) -> S {
        let mut iter = self.coeffs.iter().rev();
        let mut acc = S::from(*iter.next().unwrap_or(&0.0));
        for &c in iter {
            acc = acc * x + c;
        }
        acc
    }

    /// First derivative `dy/dx` at `x`
    pub fn slope<S: Scalar>(&self, x: S) -> S {
        let mut acc = S::from(0.0);
        for (i, &c) in self.coeffs.iter().enumerate().skip(1).rev() {
            acc = acc * x + c * i as f64;
        }
        acc
    }

    /// Sample the path at `count` points spaced `spacing` apart along x
    pub fn sample(&self, spacing: f64, count: usize) -> Vec<Point2D> {
        (0..count)
            .map(|i| {
                let x = spacing * i as f64;
                Point2D::new(x, self.eval(x))
            })
            .collect()
    }
}

impl TryFrom<&[f64]> for PathCoefficients {
    type Error = MpcError;

    fn try_from(values: &[f64]) -> MpcResult<Self> {
        Self::new(values.to_vec())
    }
}

/// Raw actuation pair at one horizon step
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Actuation {
    /// Steering angle [rad], positive turns left
    pub steer: f64,
    /// Acceleration / throttle
    pub accel: f64,
}

impl Actuation {
    pub fn new(steer: f64, accel: f64) -> Self {
        Self { steer, accel }
    }

    pub fn zero() -> Self {
        Self { steer: 0.0, accel: 0.0 }
    }
}

/// Command relayed to the vehicle: both channels in `[-1, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ControlCommand {
    pub steering: f64,
    pub throttle: f64,
}

impl ControlCommand {
    pub fn new(steering: f64, throttle: f64) -> Self {
        Self { steering, throttle }
    }

    /// Convert back to a raw actuation given the steering bound
    pub fn to_actuation(&self, max_steer: f64) -> Actuation {
        Actuation::new(self.steering * max_steer, self.throttle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_dual::Dual64;

    #[test]
    fn test_point2d_distance() {
        let p1 = Point2D::new(0.0, 0.0);
        let p2 = Point2D::new(3.0, 4.0);
        assert!((p1.distance(&p2) - 5.0).abs() < 1e-10);
    }

    #[test]
    fn test_vehicle_state_from_slice() {
        let s = VehicleState::from_slice(&[1.0, 2.0, 0.1, 10.0, 0.5, -0.2]).unwrap();
        assert_eq!(s.to_array(), [1.0, 2.0, 0.1, 10.0, 0.5, -0.2]);

        assert!(matches!(
            VehicleState::from_slice(&[0.0; 5]),
            Err(MpcError::InputError(_))
        ));
        assert!(matches!(
            VehicleState::try_from(&[0.0, 0.0, 0.0, f64::NAN, 0.0, 0.0][..]),
            Err(MpcError::InputError(_))
        ));
    }

    #[test]
    fn test_path_coefficients_validation() {
        assert!(PathCoefficients::new(vec![]).is_err());
        assert!(PathCoefficients::new(vec![0.0; 5]).is_err());
        assert!(PathCoefficients::new(vec![0.0, f64::INFINITY]).is_err());
        assert_eq!(PathCoefficients::new(vec![1.0, 2.0]).unwrap().degree(), 1);
    }

    #[test]
    fn test_path_eval_and_slope() {
        let p = PathCoefficients::new(vec![1.0, -2.0, 0.5, 0.1]).unwrap();
        let x = 2.0;
        let y = 1.0 - 2.0 * x + 0.5 * x * x + 0.1 * x * x * x;
        let dy = -2.0 + 1.0 * x + 0.3 * x * x;
        assert!((p.eval(x) - y).abs() < 1e-12);
        assert!((p.slope(x) - dy).abs() < 1e-12);

        // Dual evaluation carries the exact slope
        let d = p.eval(Dual64::new(x, 1.0));
        assert!((d.eps - dy).abs() < 1e-12);
    }

    #[test]
    fn test_path_sample() {
        let p = PathCoefficients::new(vec![0.0, 1.0]).unwrap();
        let pts = p.sample(2.5, 25);
        assert_eq!(pts.len(), 25);
        assert!((pts[4].x - 10.0).abs() < 1e-12);
        assert!((pts[4].y - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_command_roundtrip() {
        let cmd = ControlCommand::new(-0.5, 0.3);
        let act = cmd.to_actuation(0.4);
        assert!((act.steer + 0.2).abs() < 1e-12);
        assert_eq!(act.accel, 0.3);
    }
}
