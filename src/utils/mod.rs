//! Utility modules for mpc_controller

pub mod logger;
pub mod visualization;

pub use logger::{logger_init, LevelFilter, LoggerInitError};
pub use visualization::{colors, PathStyle, PointStyle, Visualizer};
