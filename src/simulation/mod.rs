//! Closed-loop simulation harness
//!
//! Drives an [`MpcTracker`] against a world-frame plant: every cycle the
//! (optionally noisy) telemetry and the nearest waypoints are handed to the
//! tracker, its command is sent to the plant with the configured latency,
//! and the plant is advanced by one cycle period.

pub mod plant;
pub mod track;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::common::error::{MpcError, MpcResult};
use crate::common::{ControlCommand, Controller, Point2D, State2D};
use crate::path_tracking::MpcTracker;
use crate::preprocess::to_world_frame;

pub use plant::Plant;
pub use track::{Track, TrackParams};

/// Standard deviations of the telemetry noise; all zero disables it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseParams {
    /// Units: meters
    pub position: f64,
    /// Units: radians
    pub yaw: f64,
    pub speed: f64,
    pub seed: u64,
}

impl Default for NoiseParams {
    fn default() -> Self {
        Self {
            position: 0.0,
            yaw: 0.0,
            speed: 0.0,
            seed: 42,
        }
    }
}

/// Simulation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationParams {
    /// Number of control cycles to run
    pub cycles: usize,

    /// Time between control cycles.
    ///
    /// Units: seconds
    pub period: f64,

    /// Plant integration step.
    ///
    /// Units: seconds
    pub substep: f64,

    /// Actuation delay of the plant.
    ///
    /// Units: seconds
    pub latency: f64,

    /// Number of waypoints handed to the tracker each cycle
    pub window: usize,

    /// Lateral offset of the start position from the first waypoint.
    ///
    /// Units: meters
    pub initial_offset: f64,

    pub initial_speed: f64,

    pub track: TrackParams,

    pub noise: NoiseParams,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            cycles: 150,
            period: 0.1,
            substep: 0.01,
            latency: 0.1,
            window: 6,
            initial_offset: 2.0,
            initial_speed: 10.0,
            track: TrackParams::default(),
            noise: NoiseParams::default(),
        }
    }
}

impl SimulationParams {
    pub fn validate(&self) -> MpcResult<()> {
        if !(self.period > 0.0 && self.substep > 0.0 && self.substep <= self.period) {
            return Err(MpcError::ConfigurationError(format!(
                "simulation needs 0 < substep <= period, got substep {} and period {}",
                self.substep, self.period
            )));
        }
        if !(self.latency.is_finite() && self.latency >= 0.0) {
            return Err(MpcError::ConfigurationError(format!(
                "plant latency must be non-negative, got {}",
                self.latency
            )));
        }
        if self.window < 2 {
            return Err(MpcError::ConfigurationError(format!(
                "waypoint window needs at least 2 points, got {}",
                self.window
            )));
        }
        let noise = &self.noise;
        if [noise.position, noise.yaw, noise.speed].iter().any(|s| !(s.is_finite() && *s >= 0.0)) {
            return Err(MpcError::ConfigurationError(
                "noise standard deviations must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Record of one cycle
#[derive(Debug, Clone)]
pub struct CycleRecord {
    pub time: f64,
    /// True plant state at the start of the cycle
    pub state: State2D,
    pub command: ControlCommand,
    /// Signed distance to the track
    pub cross_track: f64,
    /// Predicted positions, world frame
    pub predicted: Vec<Point2D>,
    pub fallback: bool,
}

/// Everything recorded during a run
#[derive(Debug, Clone, Default)]
pub struct History {
    pub cycles: Vec<CycleRecord>,
}

impl History {
    pub fn driven_path(&self) -> Vec<Point2D> {
        self.cycles.iter().map(|c| c.state.position()).collect()
    }

    pub fn fallback_count(&self) -> usize {
        self.cycles.iter().filter(|c| c.fallback).count()
    }

    /// Root mean square of the cross-track error
    pub fn rms_cross_track(&self) -> f64 {
        if self.cycles.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.cycles.iter().map(|c| c.cross_track.powi(2)).sum();
        (sum / self.cycles.len() as f64).sqrt()
    }

    /// Last non-empty predicted horizon
    pub fn last_prediction(&self) -> Option<&[Point2D]> {
        self.cycles
            .iter()
            .rev()
            .find(|c| !c.predicted.is_empty())
            .map(|c| c.predicted.as_slice())
    }
}

/// Gaussian telemetry noise
struct TelemetryNoise {
    rng: StdRng,
    position: Option<Normal<f64>>,
    yaw: Option<Normal<f64>>,
    speed: Option<Normal<f64>>,
}

impl TelemetryNoise {
    fn new(params: &NoiseParams) -> MpcResult<Self> {
        let normal = |std: f64| -> MpcResult<Option<Normal<f64>>> {
            if std == 0.0 {
                return Ok(None);
            }
            Normal::new(0.0, std)
                .map(Some)
                .map_err(|e| MpcError::ConfigurationError(format!("invalid noise: {}", e)))
        };
        Ok(Self {
            rng: StdRng::seed_from_u64(params.seed),
            position: normal(params.position)?,
            yaw: normal(params.yaw)?,
            speed: normal(params.speed)?,
        })
    }

    fn sample(dist: &Option<Normal<f64>>, rng: &mut StdRng) -> f64 {
        dist.as_ref().map_or(0.0, |d| d.sample(rng))
    }

    fn corrupt(&mut self, s: &State2D) -> State2D {
        State2D::new(
            s.x + Self::sample(&self.position, &mut self.rng),
            s.y + Self::sample(&self.position, &mut self.rng),
            s.yaw + Self::sample(&self.yaw, &mut self.rng),
            s.v + Self::sample(&self.speed, &mut self.rng),
        )
    }
}

/// Closed-loop run of a tracker on a track
pub struct Simulation {
    params: SimulationParams,
    track: Track,
    plant: Plant,
    tracker: MpcTracker,
    noise: TelemetryNoise,
}

impl Simulation {
    pub fn new(params: SimulationParams, track: Track, tracker: MpcTracker) -> MpcResult<Self> {
        params.validate()?;

        // Start on the first waypoint, heading along the first segment,
        // offset to the left
        let w = track.waypoints();
        let yaw = (w[1].y - w[0].y).atan2(w[1].x - w[0].x);
        let initial = State2D::new(
            w[0].x - params.initial_offset * yaw.sin(),
            w[0].y + params.initial_offset * yaw.cos(),
            yaw,
            params.initial_speed,
        );

        let config = tracker.solver().config();
        let plant = Plant::new(
            initial,
            config.lf,
            config.bounds.max_steer,
            params.latency,
            params.substep,
        );
        let noise = TelemetryNoise::new(&params.noise)?;

        Ok(Self {
            params,
            track,
            plant,
            tracker,
            noise,
        })
    }

    pub fn track(&self) -> &Track {
        &self.track
    }

    /// Run until the cycle budget is spent or the end of the track is
    /// reached. Errors the tracker does not absorb abort the run.
    pub fn run(&mut self) -> MpcResult<History> {
        let mut history = History::default();
        info!(
            "Starting simulation: {} cycles, period {} s, latency {} s",
            self.params.cycles, self.params.period, self.params.latency
        );

        for cycle in 0..self.params.cycles {
            let truth = *self.plant.state();
            if self.track.is_finished(&truth.position()) {
                info!("End of track reached after {} cycles", cycle);
                break;
            }

            let telemetry = self.noise.corrupt(&truth);
            let window = self.track.window(&telemetry.position(), self.params.window);
            let output = self.tracker.compute(&telemetry, &window)?;

            let cross_track = self.track.lateral_error(&truth.position());
            if output.is_fallback() {
                warn!("Cycle {}: fallback command {:?}", cycle, output.command);
            }
            debug!(
                "Cycle {}: cte {:+.3} m, v {:.2}, steering {:+.3}, throttle {:+.3}",
                cycle, cross_track, truth.v, output.command.steering, output.command.throttle
            );

            history.cycles.push(CycleRecord {
                time: self.plant.time(),
                state: truth,
                command: output.command,
                cross_track,
                predicted: to_world_frame(&output.predicted, &telemetry),
                fallback: output.is_fallback(),
            });

            self.plant.send(&output.command);
            self.plant.advance(self.params.period);
        }

        info!(
            "Simulation finished: {} cycles, RMS cross-track {:.3} m, {} fallbacks",
            history.cycles.len(),
            history.rms_cross_track(),
            history.fallback_count()
        );
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlp::SolverOptions;
    use crate::path_tracking::{HorizonConfig, MpcSolver, TrackerParams};

    fn tracker(ref_speed: f64) -> MpcTracker {
        let config = HorizonConfig {
            ref_speed,
            ..HorizonConfig::default()
        };
        let solver = MpcSolver::new(config, SolverOptions::default().without_time_limit()).unwrap();
        MpcTracker::new(solver, TrackerParams::default()).unwrap()
    }

    #[test]
    fn test_converges_onto_track() {
        let params = SimulationParams {
            cycles: 40,
            initial_offset: 2.0,
            initial_speed: 10.0,
            ..SimulationParams::default()
        };
        let track = Track::sine(&params.track).unwrap();
        let mut sim = Simulation::new(params, track, tracker(15.0)).unwrap();
        let history = sim.run().unwrap();

        assert_eq!(history.cycles.len(), 40);
        assert_eq!(history.fallback_count(), 0);
        let first = history.cycles[0].cross_track.abs();
        let last = history.cycles[39].cross_track.abs();
        assert!(first > 1.5);
        assert!(last < 0.5 * first, "cross-track went from {} to {}", first, last);
        assert!(history.last_prediction().is_some());
    }

    #[test]
    fn test_noisy_run_is_reproducible() {
        let params = SimulationParams {
            cycles: 10,
            noise: NoiseParams {
                position: 0.05,
                yaw: 0.005,
                speed: 0.1,
                seed: 3,
            },
            ..SimulationParams::default()
        };
        let track = Track::sine(&params.track).unwrap();
        let a = Simulation::new(params.clone(), track.clone(), tracker(15.0))
            .unwrap()
            .run()
            .unwrap();
        let b = Simulation::new(params, track, tracker(15.0)).unwrap().run().unwrap();
        for (ca, cb) in a.cycles.iter().zip(b.cycles.iter()) {
            assert_eq!(ca.state, cb.state);
        }
    }

    #[test]
    fn test_invalid_params() {
        let params = SimulationParams {
            substep: 0.5,
            ..SimulationParams::default()
        };
        assert!(params.validate().is_err());
        let params = SimulationParams {
            noise: NoiseParams {
                speed: -1.0,
                ..NoiseParams::default()
            },
            ..SimulationParams::default()
        };
        assert!(params.validate().is_err());
    }
}
