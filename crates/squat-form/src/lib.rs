//! # Squat-Form
//!
//! Squat form analysis over a stream of body landmarks.
//!
//! ## Pipeline
//!
//! Each frame flows strictly downwards:
//!
//! 1. **Analyzer** - checks camera alignment, picks the body side facing the
//!    camera and measures torso lean, knee-vertical and shin lean angles
//! 2. **Classifier** - bins the knee-vertical angle (NORMAL / TRANSITION /
//!    PASS) and evaluates the form-fault predicates, debounced over frames
//! 3. **State machine** - advances STANDING / TRANSITION / BOTTOM, counts
//!    reps and improper reps, and tracks inactivity
//!
//! ## Profiles
//!
//! Thresholds come from a closed set of [`ThresholdProfile`]s (`beginner`,
//! `pro`) that differ only in numeric leniency.

pub mod analyzer;
pub mod classifier;
pub mod machine;
pub mod profile;
pub mod synthetic;

pub use analyzer::*;
pub use classifier::*;
pub use machine::*;
pub use profile::*;
