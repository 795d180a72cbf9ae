//! World-frame vehicle with delayed actuation

use std::collections::VecDeque;

use crate::common::{Actuation, ControlCommand, State2D};

/// Kinematic bicycle integrated in the world frame. Commands take effect
/// `latency` seconds after they are sent.
#[derive(Debug, Clone)]
pub struct Plant {
    state: State2D,
    lf: f64,
    max_steer: f64,
    latency: f64,
    substep: f64,
    time: f64,
    active: Actuation,
    pending: VecDeque<(f64, Actuation)>,
}

impl Plant {
    pub fn new(initial: State2D, lf: f64, max_steer: f64, latency: f64, substep: f64) -> Self {
        Self {
            state: initial,
            lf,
            max_steer,
            latency,
            substep,
            time: 0.0,
            active: Actuation::zero(),
            pending: VecDeque::new(),
        }
    }

    pub fn state(&self) -> &State2D {
        &self.state
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// Queue a command; it acts after the latency has elapsed
    pub fn send(&mut self, command: &ControlCommand) {
        let actuation = command.to_actuation(self.max_steer);
        self.pending.push_back((self.time + self.latency, actuation));
    }

    /// Integrate for `duration` seconds
    pub fn advance(&mut self, duration: f64) {
        let end = self.time + duration;
        while self.time < end - 1e-12 {
            while let Some(&(at, actuation)) = self.pending.front() {
                if at > self.time + 1e-12 {
                    break;
                }
                self.active = actuation;
                self.pending.pop_front();
            }

            let h = self.substep.min(end - self.time);
            let s = &mut self.state;
            let (steer, accel) = (self.active.steer, self.active.accel);
            s.x += s.v * s.yaw.cos() * h;
            s.y += s.v * s.yaw.sin() * h;
            s.yaw += s.v / self.lf * steer * h;
            s.v += accel * h;
            self.time += h;
        }
    }
}
