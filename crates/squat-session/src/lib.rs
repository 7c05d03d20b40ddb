//! # Squat-Session
//!
//! Per-connection squat analysis sessions.
//!
//! A session owns exactly one rep state machine and processes frames strictly
//! in order. Sessions share nothing except the pose estimator, which is an
//! injected capability.
//!
//! ## Frame flow
//!
//! 1. **Codec**: decode the incoming image bytes
//! 2. **Estimator**: landmarks from the client, or from the shared model
//! 3. **Driver**: optional mirroring, landmark analysis, state machine step
//! 4. **Renderer**: counters, state, faults and skeleton drawn on a copy
//! 5. **Codec**: encode the annotated frame for the transport
//!
//! The [`worker`] module runs this flow on one tokio task per connection and
//! broadcasts a [`RepEvent`] for every completed rep.

pub mod codec;
pub mod driver;
pub mod estimator;
mod font;
pub mod handshake;
pub mod renderer;
pub mod worker;

pub use codec::*;
pub use driver::*;
pub use estimator::*;
pub use handshake::*;
pub use renderer::*;
pub use worker::*;
