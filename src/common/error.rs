//! Error types for mpc_controller

use thiserror::Error;

use crate::common::params::LoadError;
use crate::nlp::SolveStatus;

/// Main error type for the controller
#[derive(Debug, Error)]
pub enum MpcError {
    /// Vehicle state or path coefficients are malformed
    #[error("Input error: {0}")]
    InputError(String),

    /// Horizon or solver configuration is invalid
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The NLP engine stopped without reaching its tolerance
    #[error("Convergence error: solver stopped with status {status:?} after {iterations} iterations")]
    ConvergenceError {
        status: SolveStatus,
        iterations: usize,
    },

    /// NaN/Inf during evaluation, or an unrecoverable linear algebra failure
    #[error("Numerical error: {0}")]
    NumericalError(String),

    /// Parameter file could not be loaded
    #[error(transparent)]
    ParamsError(#[from] LoadError),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Visualization error
    #[error("Visualization error: {0}")]
    VisualizationError(String),
}

impl MpcError {
    /// True for failures of the optimisation itself, as opposed to rejected
    /// inputs or configuration.
    pub fn is_solve_failure(&self) -> bool {
        matches!(
            self,
            MpcError::ConvergenceError { .. } | MpcError::NumericalError(_)
        )
    }
}

/// Result type alias for controller operations
pub type MpcResult<T> = Result<T, MpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MpcError::InputError("state has 5 components".to_string());
        assert_eq!(format!("{}", err), "Input error: state has 5 components");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: MpcError = io_err.into();
        assert!(matches!(err, MpcError::IoError(_)));
    }

    #[test]
    fn test_solve_failure_classification() {
        let conv = MpcError::ConvergenceError {
            status: SolveStatus::IterationLimit,
            iterations: 100,
        };
        assert!(conv.is_solve_failure());
        assert!(MpcError::NumericalError("nan".to_string()).is_solve_failure());
        assert!(!MpcError::ConfigurationError("dt".to_string()).is_solve_failure());
    }
}
