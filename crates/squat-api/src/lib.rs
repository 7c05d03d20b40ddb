//! # Squat-API
//!
//! WebSocket and HTTP transport for real-time squat analysis, built on Axum.
//!
//! ## Endpoints
//!
//! - `GET /live-feed` - WebSocket. The first text message names the
//!   difficulty (`beginner` or `pro`); each binary message is a frame
//!   envelope and is answered with the annotated JPEG followed by the JSON
//!   feedback payload
//! - `POST /api/v1/upload-frame?difficulty=` - analyse one frame envelope;
//!   the feedback payload comes back in the `x-squat-feedback` header
//! - `GET /api/v1/rep-events` - WebSocket stream of completed reps
//! - `GET /api/v1/health` - Health check

pub mod config;
pub mod envelope;
pub mod server;
pub mod state;

pub use config::*;
pub use envelope::*;
pub use server::*;
pub use state::*;
