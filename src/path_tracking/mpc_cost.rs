//! Tracking cost over the horizon

use serde::{Deserialize, Serialize};

use super::layout::Layout;
use crate::common::error::{MpcError, MpcResult};
use crate::nlp::Scalar;

/// Weights of the tracking cost.
///
/// ```text
/// J = sum_t  w_cte cte_t^2 + w_epsi epsi_t^2 + w_speed (v_t - v_ref)^2
///   + sum_t  w_steer steer_t^2 + w_accel accel_t^2
///   + sum_t  w_steer_rate (steer_{t+1} - steer_t)^2 + w_accel_rate (accel_{t+1} - accel_t)^2
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostWeights {
    /// Cross-track error
    pub cte: f64,
    /// Heading error
    pub epsi: f64,
    /// Deviation from the reference speed
    pub speed: f64,
    /// Steering magnitude
    pub steer: f64,
    /// Acceleration magnitude
    pub accel: f64,
    /// Change of steering between consecutive steps
    pub steer_rate: f64,
    /// Change of acceleration between consecutive steps
    pub accel_rate: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            cte: 2000.0,
            epsi: 2000.0,
            speed: 1.0,
            steer: 5.0,
            accel: 5.0,
            steer_rate: 200.0,
            accel_rate: 10.0,
        }
    }
}

impl CostWeights {
    fn named(&self) -> [(&'static str, f64); 7] {
        [
            ("cte", self.cte),
            ("epsi", self.epsi),
            ("speed", self.speed),
            ("steer", self.steer),
            ("accel", self.accel),
            ("steer_rate", self.steer_rate),
            ("accel_rate", self.accel_rate),
        ]
    }

    pub fn validate(&self) -> MpcResult<()> {
        for (name, w) in self.named().iter() {
            if !(w.is_finite() && *w >= 0.0) {
                return Err(MpcError::ConfigurationError(format!(
                    "cost weight `{}` must be finite and non-negative, got {}",
                    name, w
                )));
            }
        }
        Ok(())
    }
}

/// Evaluate the tracking cost of decision vector `x`
pub fn tracking_cost<S: Scalar>(layout: &Layout, weights: &CostWeights, ref_speed: f64, x: &[S]) -> S {
    let mut cost = S::from(0.0);

    for t in 0..layout.steps() {
        let [_, _, _, v, cte, epsi] = layout.state(x, t);
        let dv = v - ref_speed;
        cost += cte * cte * weights.cte + epsi * epsi * weights.epsi + dv * dv * weights.speed;
    }

    for t in 0..layout.transitions() {
        let (steer, accel) = layout.actuation(x, t);
        cost += steer * steer * weights.steer + accel * accel * weights.accel;
    }

    for t in 1..layout.transitions() {
        let (steer0, accel0) = layout.actuation(x, t - 1);
        let (steer1, accel1) = layout.actuation(x, t);
        let ds = steer1 - steer0;
        let da = accel1 - accel0;
        cost += ds * ds * weights.steer_rate + da * da * weights.accel_rate;
    }

    cost
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path_tracking::layout::{ActuationField, StateField};
    use approx::assert_relative_eq;

    #[test]
    fn test_zero_at_reference() {
        let layout = Layout::new(5);
        let mut x = vec![0.0; layout.num_variables()];
        for t in 0..5 {
            x[layout.state_offset(t, StateField::V)] = 40.0;
        }
        let cost = tracking_cost(&layout, &CostWeights::default(), 40.0, &x);
        assert_eq!(cost, 0.0);
    }

    #[test]
    fn test_term_by_term() {
        let layout = Layout::new(3);
        let w = CostWeights::default();
        let mut x = vec![0.0; layout.num_variables()];
        x[layout.state_offset(0, StateField::Cte)] = 0.5;
        x[layout.state_offset(2, StateField::Epsi)] = -0.1;
        x[layout.state_offset(1, StateField::V)] = 2.0;
        x[layout.actuation_offset(0, ActuationField::Steer)] = 0.2;
        x[layout.actuation_offset(1, ActuationField::Steer)] = -0.1;
        x[layout.actuation_offset(1, ActuationField::Accel)] = 1.0;

        let expected = w.cte * 0.25
            + w.epsi * 0.01
            // v_ref = 0: only the non-zero speed contributes
            + w.speed * 4.0
            + w.steer * (0.04 + 0.01)
            + w.accel * 1.0
            + w.steer_rate * 0.09
            + w.accel_rate * 1.0;
        let cost = tracking_cost(&layout, &w, 0.0, &x);
        assert_relative_eq!(cost, expected, epsilon = 1e-9);
    }

    #[test]
    fn test_two_step_horizon_has_no_rate_terms() {
        let layout = Layout::new(2);
        let w = CostWeights {
            steer: 0.0,
            accel: 0.0,
            ..CostWeights::default()
        };
        let mut x = vec![0.0; layout.num_variables()];
        x[layout.actuation_offset(0, ActuationField::Steer)] = 0.3;
        assert_eq!(tracking_cost(&layout, &w, 0.0, &x), 0.0);
    }

    #[test]
    fn test_invalid_weights() {
        let w = CostWeights {
            steer_rate: -1.0,
            ..CostWeights::default()
        };
        assert!(matches!(w.validate(), Err(MpcError::ConfigurationError(_))));
        let w = CostWeights {
            cte: f64::NAN,
            ..CostWeights::default()
        };
        assert!(w.validate().is_err());
        assert!(CostWeights::default().validate().is_ok());
    }
}
