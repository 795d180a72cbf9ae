//! Reference track and waypoint windows

use serde::{Deserialize, Serialize};

use crate::common::error::{MpcError, MpcResult};
use crate::common::{Path2D, Point2D};

/// Shape of the generated track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackParams {
    /// Length along x.
    ///
    /// Units: meters
    pub length: f64,

    /// Lateral amplitude of the sine road.
    ///
    /// Units: meters
    pub amplitude: f64,

    /// Units: meters
    pub wavelength: f64,

    /// Distance between waypoints along x.
    ///
    /// Units: meters
    pub spacing: f64,
}

impl Default for TrackParams {
    fn default() -> Self {
        Self {
            length: 600.0,
            amplitude: 8.0,
            wavelength: 200.0,
            spacing: 5.0,
        }
    }
}

/// Open polyline of world-frame waypoints
#[derive(Debug, Clone)]
pub struct Track {
    waypoints: Vec<Point2D>,
}

impl Track {
    pub fn from_points(waypoints: Vec<Point2D>) -> MpcResult<Self> {
        if waypoints.len() < 2 {
            return Err(MpcError::InputError(format!(
                "track needs at least 2 waypoints, got {}",
                waypoints.len()
            )));
        }
        Ok(Self { waypoints })
    }

    /// `y = A sin(2 pi x / wavelength)` sampled every `spacing`
    pub fn sine(params: &TrackParams) -> MpcResult<Self> {
        if !(params.spacing > 0.0 && params.wavelength > 0.0 && params.length > params.spacing) {
            return Err(MpcError::ConfigurationError(format!("invalid track shape: {:?}", params)));
        }
        let count = (params.length / params.spacing).floor() as usize + 1;
        let k = 2.0 * std::f64::consts::PI / params.wavelength;
        let points = (0..count)
            .map(|i| {
                let x = i as f64 * params.spacing;
                Point2D::new(x, params.amplitude * (k * x).sin())
            })
            .collect();
        Self::from_points(points)
    }

    pub fn waypoints(&self) -> &[Point2D] {
        &self.waypoints
    }

    pub fn to_path(&self) -> Path2D {
        Path2D::from_points(self.waypoints.clone())
    }

    /// Index of the waypoint closest to `p`
    pub fn nearest(&self, p: &Point2D) -> usize {
        self.waypoints
            .iter()
            .enumerate()
            .map(|(i, w)| (i, w.distance(p)))
            .fold((0, f64::INFINITY), |best, cur| if cur.1 < best.1 { cur } else { best })
            .0
    }

    /// `count` consecutive waypoints starting at the one nearest `p`,
    /// shifted back at the end of the track so the window stays full
    pub fn window(&self, p: &Point2D, count: usize) -> Path2D {
        let count = count.min(self.waypoints.len());
        let start = self.nearest(p).min(self.waypoints.len() - count);
        Path2D::from_points(self.waypoints[start..start + count].to_vec())
    }

    /// True once `p` has passed the last waypoint
    pub fn is_finished(&self, p: &Point2D) -> bool {
        self.nearest(p) + 1 >= self.waypoints.len()
    }

    /// Signed distance from `p` to the nearest track segment, positive
    /// when `p` lies left of the direction of travel
    pub fn lateral_error(&self, p: &Point2D) -> f64 {
        let (distance, side) = self
            .waypoints
            .windows(2)
            .map(|seg| {
                let (a, b) = (seg[0], seg[1]);
                let (ex, ey) = (b.x - a.x, b.y - a.y);
                let len2 = ex * ex + ey * ey;
                let s = (((p.x - a.x) * ex + (p.y - a.y) * ey) / len2).clamp(0.0, 1.0);
                let foot = Point2D::new(a.x + s * ex, a.y + s * ey);
                let cross = ex * (p.y - a.y) - ey * (p.x - a.x);
                (foot.distance(p), cross.signum())
            })
            .fold((f64::INFINITY, 1.0), |best, cur| if cur.0 < best.0 { cur } else { best });
        distance * side
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn straight() -> Track {
        Track::from_points((0..11).map(|i| Point2D::new(i as f64 * 10.0, 0.0)).collect()).unwrap()
    }

    #[test]
    fn test_sine_track() {
        let t = Track::sine(&TrackParams::default()).unwrap();
        assert_eq!(t.waypoints().len(), 121);
        assert_abs_diff_eq!(t.waypoints()[10].y, 8.0, epsilon = 1e-9);
        assert!(Track::sine(&TrackParams { spacing: 0.0, ..TrackParams::default() }).is_err());
    }

    #[test]
    fn test_window() {
        let t = straight();
        let w = t.window(&Point2D::new(21.0, 3.0), 6);
        assert_eq!(w.len(), 6);
        assert_eq!(w.points[0].x, 20.0);

        // Near the end the window slides back
        let w = t.window(&Point2D::new(99.0, 0.0), 6);
        assert_eq!(w.points[0].x, 50.0);
        assert!(t.is_finished(&Point2D::new(101.0, 0.0)));
    }

    #[test]
    fn test_lateral_error_sign() {
        let t = straight();
        assert_abs_diff_eq!(t.lateral_error(&Point2D::new(35.0, 2.0)), 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(t.lateral_error(&Point2D::new(35.0, -1.5)), -1.5, epsilon = 1e-12);
    }

    #[test]
    fn test_too_short() {
        assert!(Track::from_points(vec![Point2D::origin()]).is_err());
    }
}
