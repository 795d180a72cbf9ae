//! Controller parameter file
//!
//! All sections are optional; missing entries take their documented
//! defaults. See `params/mpc.toml` for a complete file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::error::MpcResult;
use crate::common::params;
use crate::nlp::SolverOptions;
use crate::path_tracking::{HorizonConfig, MpcSolver, MpcTracker, TrackerParams};
use crate::simulation::SimulationParams;

/// Top-level parameters of the controller and its simulation harness
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerParams {
    pub horizon: HorizonConfig,
    pub solver: SolverOptions,
    pub tracker: TrackerParams,
    pub simulation: SimulationParams,
}

impl ControllerParams {
    /// Load and validate a parameter file
    pub fn load<P: AsRef<Path>>(path: P) -> MpcResult<Self> {
        let p: Self = params::load(path)?;
        p.validate()?;
        Ok(p)
    }

    /// Parse and validate parameters from a TOML string
    pub fn from_toml(s: &str) -> MpcResult<Self> {
        let p: Self = params::from_str(s)?;
        p.validate()?;
        Ok(p)
    }

    pub fn validate(&self) -> MpcResult<()> {
        self.horizon.validate()?;
        self.solver.validate()?;
        self.tracker.validate()?;
        self.simulation.validate()
    }

    /// Build the tracker described by these parameters
    pub fn build_tracker(&self) -> MpcResult<MpcTracker> {
        let solver = MpcSolver::new(self.horizon.clone(), self.solver.clone())?;
        MpcTracker::new(solver, self.tracker.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::error::MpcError;
    use crate::path_tracking::{ErrorModel, FallbackPolicy};

    #[test]
    fn test_empty_file_gives_defaults() {
        let p = ControllerParams::from_toml("").unwrap();
        assert_eq!(p, ControllerParams::default());
        assert_eq!(p.horizon.steps, 10);
        assert_eq!(p.solver.max_cpu_time, Some(0.5));
    }

    #[test]
    fn test_partial_sections() {
        let p = ControllerParams::from_toml(
            r#"
            [horizon]
            steps = 15
            error_model = "path_relative"

            [horizon.weights]
            cte = 500.0

            [solver]
            max_iterations = 50

            [tracker]
            warm_start = true
            fallback = { kind = "safe_stop", throttle = -0.2 }
            "#,
        )
        .unwrap();
        assert_eq!(p.horizon.steps, 15);
        assert_eq!(p.horizon.error_model, ErrorModel::PathRelative);
        assert_eq!(p.horizon.weights.cte, 500.0);
        assert_eq!(p.horizon.weights.epsi, 2000.0);
        assert_eq!(p.solver.max_iterations, 50);
        assert!(p.tracker.warm_start);
        assert_eq!(p.tracker.fallback, FallbackPolicy::SafeStop { throttle: -0.2 });
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let res = ControllerParams::from_toml("[horizon]\nsteps = 1\n");
        assert!(matches!(res, Err(MpcError::ConfigurationError(_))));

        let res = ControllerParams::from_toml("[horizon]\nsteps = \"ten\"\n");
        assert!(matches!(res, Err(MpcError::ParamsError(_))));
    }

    #[test]
    fn test_shipped_params_file() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/params/mpc.toml");
        let p = ControllerParams::load(path).unwrap();
        assert!(p.build_tracker().is_ok());
    }
}
