//! Shared application state.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use squat_session::{FrameCodec, JpegCodec, PoseEstimator, RepEvent};

use crate::config::ApiConfig;

/// State shared by every handler. Sessions themselves are not stored here;
/// each one lives on its connection's task.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ApiConfig>,
    pub codec: Arc<dyn FrameCodec>,
    pub estimator: Option<Arc<dyn PoseEstimator>>,
    pub events: broadcast::Sender<RepEvent>,
    active_sessions: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(config: ApiConfig, estimator: Option<Arc<dyn PoseEstimator>>) -> Self {
        let (events, _) = broadcast::channel(config.events.capacity.max(1));
        let codec: Arc<dyn FrameCodec> = Arc::new(JpegCodec::new(config.session.jpeg_quality));

        Self {
            config: Arc::new(config),
            codec,
            estimator,
            events,
            active_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Count a live session until the guard drops
    pub fn track_session(&self) -> SessionGuard {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
        SessionGuard {
            counter: self.active_sessions.clone(),
        }
    }
}

pub struct SessionGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_guard_counts() {
        let state = AppState::new(ApiConfig::default(), None);
        assert_eq!(state.active_sessions(), 0);

        let a = state.track_session();
        let b = state.clone().track_session();
        assert_eq!(state.active_sessions(), 2);

        drop(a);
        assert_eq!(state.active_sessions(), 1);
        drop(b);
        assert_eq!(state.active_sessions(), 0);
    }
}
