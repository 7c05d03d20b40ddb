//! Error types for the squat analysis system.

use thiserror::Error;

use crate::types::BodyLandmark;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown difficulty profile: {0}")]
    Config(String),

    #[error("Degenerate landmark geometry: {0}")]
    Geometry(String),

    #[error("Landmark {landmark} below confidence floor: {visibility:.2}")]
    LowConfidence {
        landmark: BodyLandmark,
        visibility: f32,
    },

    #[error("Overlay rendering failed: {0}")]
    Render(String),

    #[error("Pose estimation error: {0}")]
    PoseEstimation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Session closed")]
    SessionClosed,
}

impl Error {
    /// Whether this error only spoils the current frame.
    ///
    /// Everything except a bad profile selection is recovered locally by
    /// skipping the frame's state update.
    pub fn is_frame_local(&self) -> bool {
        !matches!(self, Error::Config(_) | Error::SessionClosed)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
