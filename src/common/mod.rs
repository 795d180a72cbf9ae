//! Common types, traits, and error definitions for mpc_controller
//!
//! This module provides the foundational building blocks shared by the
//! solver core and the pre-processing / simulation harness.

pub mod types;
pub mod traits;
pub mod error;
pub mod params;

pub use types::*;
pub use traits::*;
pub use error::*;
