//! World <-> vehicle frame transforms

use crate::common::{Point2D, State2D};

/// Express world-frame `waypoints` in the frame of `pose`: origin at the
/// vehicle, x axis along its heading.
pub fn to_vehicle_frame(waypoints: &[Point2D], pose: &State2D) -> Vec<Point2D> {
    let (sin, cos) = pose.yaw.sin_cos();
    waypoints
        .iter()
        .map(|p| {
            let dx = p.x - pose.x;
            let dy = p.y - pose.y;
            Point2D::new(dx * cos + dy * sin, -dx * sin + dy * cos)
        })
        .collect()
}

/// Inverse of [`to_vehicle_frame`]
pub fn to_world_frame(points: &[Point2D], pose: &State2D) -> Vec<Point2D> {
    let (sin, cos) = pose.yaw.sin_cos();
    points
        .iter()
        .map(|p| Point2D::new(pose.x + p.x * cos - p.y * sin, pose.y + p.x * sin + p.y * cos))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_point_ahead_lies_on_x_axis() {
        let pose = State2D::new(10.0, 5.0, FRAC_PI_2, 0.0);
        let local = to_vehicle_frame(&[Point2D::new(10.0, 8.0), Point2D::new(7.0, 5.0)], &pose);
        assert_abs_diff_eq!(local[0].x, 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(local[0].y, 0.0, epsilon = 1e-12);
        // West of a north-facing vehicle is to its left
        assert_abs_diff_eq!(local[1].x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(local[1].y, 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_inverse() {
        let pose = State2D::new(-3.0, 2.0, 0.7, 12.0);
        let world = vec![Point2D::new(1.0, 1.0), Point2D::new(-4.0, 6.5)];
        let back = to_world_frame(&to_vehicle_frame(&world, &pose), &pose);
        for (a, b) in world.iter().zip(back.iter()) {
            assert_abs_diff_eq!(a.x, b.x, epsilon = 1e-12);
            assert_abs_diff_eq!(a.y, b.y, epsilon = 1e-12);
        }
    }
}
