//! # Squat-Core
//!
//! Core types and utilities for the squat form analysis system: the body
//! landmark vocabulary produced by the external pose estimator, the shared
//! error type, and the planar joint geometry every other crate builds on.

pub mod error;
pub mod geometry;
pub mod types;

pub use error::{Error, Result};
pub use geometry::*;
pub use types::*;
