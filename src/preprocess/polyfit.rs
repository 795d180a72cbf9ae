//! Least-squares polynomial fit of the reference waypoints

use nalgebra::{DMatrix, DVector};

use crate::common::error::{MpcError, MpcResult};
use crate::common::{PathCoefficients, Point2D};

/// Highest polynomial order the solver accepts
pub const MAX_ORDER: usize = PathCoefficients::MAX_LEN - 1;

/// Fit `y = c0 + c1 x + ... + c_order x^order` to the samples.
///
/// Needs strictly more samples than `order`.
pub fn polyfit(xs: &[f64], ys: &[f64], order: usize) -> MpcResult<PathCoefficients> {
    if xs.len() != ys.len() {
        return Err(MpcError::InputError(format!(
            "polyfit needs as many x as y samples ({} vs {})",
            xs.len(),
            ys.len()
        )));
    }
    if order > MAX_ORDER {
        return Err(MpcError::InputError(format!(
            "polynomial order {} exceeds the maximum of {}",
            order, MAX_ORDER
        )));
    }
    if xs.len() <= order {
        return Err(MpcError::InputError(format!(
            "order {} fit needs more than {} samples, got {}",
            order,
            order,
            xs.len()
        )));
    }
    if xs.iter().chain(ys.iter()).any(|v| !v.is_finite()) {
        return Err(MpcError::InputError("polyfit samples must be finite".to_string()));
    }

    let vandermonde = DMatrix::from_fn(xs.len(), order + 1, |i, j| xs[i].powi(j as i32));
    let rhs = DVector::from_column_slice(ys);
    let coeffs = vandermonde
        .svd(true, true)
        .solve(&rhs, 1e-12)
        .map_err(|e| MpcError::NumericalError(format!("polyfit failed: {}", e)))?;

    PathCoefficients::new(coeffs.iter().copied().collect())
}

/// Fit vehicle-frame waypoints with the highest order their count allows,
/// up to `max_order`.
pub fn fit_path(points: &[Point2D], max_order: usize) -> MpcResult<PathCoefficients> {
    if points.is_empty() {
        return Err(MpcError::InputError("no waypoints to fit".to_string()));
    }
    let order = max_order.min(points.len() - 1);
    let xs: Vec<f64> = points.iter().map(|p| p.x).collect();
    let ys: Vec<f64> = points.iter().map(|p| p.y).collect();
    polyfit(&xs, &ys, order)
}
