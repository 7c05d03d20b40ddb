//! One task per live connection.
//!
//! Frames are processed strictly in submission order by a single tokio task
//! that exclusively owns the session's [`SessionDriver`]. Cancelling the
//! session abandons the frame in flight before its state is committed.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use squat_core::{Error, Pose, Result, SessionId, Timestamp};
use squat_form::{RepCompleted, SquatState};

use crate::driver::{FrameOutput, PreparedFrame, SessionDriver};
use crate::estimator::PoseEstimator;

/// One frame submitted to a session
#[derive(Debug, Clone)]
pub struct FrameRequest {
    /// Encoded image bytes
    pub image: Vec<u8>,
    /// Landmarks supplied by the client. When absent the session's
    /// estimator is asked; without one the frame has no pose.
    pub landmarks: Option<Pose>,
    pub timestamp: Timestamp,
}

/// Rep completion broadcast to downstream consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepEvent {
    pub session_id: SessionId,
    #[serde(flatten)]
    pub rep: RepCompleted,
}

pub type FrameResult = Result<FrameOutput>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub frames_processed: u64,
    pub frames_failed: u64,
    pub frames_discarded: u64,
    pub rep_count: u32,
    pub improper_rep_count: u32,
    pub final_state: SquatState,
    pub cancelled: bool,
}

impl SessionSummary {
    fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            frames_processed: 0,
            frames_failed: 0,
            frames_discarded: 0,
            rep_count: 0,
            improper_rep_count: 0,
            final_state: SquatState::Standing,
            cancelled: false,
        }
    }
}

/// Control side of a running session
pub struct SessionHandle {
    id: SessionId,
    frames: mpsc::Sender<FrameRequest>,
    cancel: CancellationToken,
    task: JoinHandle<SessionSummary>,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Queue a frame, waiting for room
    pub async fn submit(&self, frame: FrameRequest) -> Result<()> {
        self.frames.send(frame).await.map_err(|_| Error::SessionClosed)
    }

    /// Queue a frame without waiting. Returns `false` if the frame was
    /// dropped because the session is still busy with earlier frames.
    pub fn try_submit(&self, frame: FrameRequest) -> Result<bool> {
        match self.frames.try_send(frame) {
            Ok(()) => Ok(true),
            Err(mpsc::error::TrySendError::Full(_)) => Ok(false),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::SessionClosed),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Close the input and wait for queued frames to drain.
    ///
    /// The output receiver must be drained or dropped, otherwise the worker
    /// blocks on a full output queue.
    pub async fn finish(self) -> Result<SessionSummary> {
        drop(self.frames);
        self.task.await.map_err(|_| Error::SessionClosed)
    }

    /// Cancel and wait; the frame in flight is discarded
    pub async fn abort(self) -> Result<SessionSummary> {
        self.cancel.cancel();
        self.finish().await
    }
}

/// Run CPU-bound frame work on the blocking pool
async fn run_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Render(format!("frame worker join failed: {e}")))?
}

/// Analyse one request against the driver without committing it.
///
/// Decoding and the analyse/render/encode pass run on the blocking pool
/// against a snapshot of the driver; estimation stays async in between.
async fn prepare_request(
    driver: &SessionDriver,
    estimator: Option<&dyn PoseEstimator>,
    request: FrameRequest,
) -> Result<PreparedFrame> {
    let FrameRequest {
        image,
        landmarks,
        timestamp,
    } = request;

    let codec = driver.codec();
    let (raw, frame) = run_blocking(move || {
        let frame = codec.decode(&image)?;
        Ok((image, frame))
    })
    .await?;
    let frame = Arc::new(frame);

    let landmarks = match (landmarks, estimator) {
        (Some(pose), _) => Some(pose),
        (None, Some(estimator)) => estimator.estimate(Arc::clone(&frame)).await?,
        (None, None) => None,
    };

    let snapshot = driver.clone();
    run_blocking(move || Ok(snapshot.prepare(&raw, &frame, landmarks, timestamp))).await
}

/// Process a single frame outside of a worker (one-shot uploads)
pub async fn run_frame(
    driver: &mut SessionDriver,
    estimator: Option<&dyn PoseEstimator>,
    request: FrameRequest,
) -> FrameResult {
    let prepared = prepare_request(driver, estimator, request).await?;
    Ok(driver.commit(prepared))
}

/// Start the worker task for one connection
pub fn spawn_session(
    mut driver: SessionDriver,
    estimator: Option<Arc<dyn PoseEstimator>>,
    events: broadcast::Sender<RepEvent>,
    queue: usize,
) -> (SessionHandle, mpsc::Receiver<FrameResult>) {
    let queue = queue.max(1);
    let (frame_tx, mut frame_rx) = mpsc::channel::<FrameRequest>(queue);
    let (out_tx, out_rx) = mpsc::channel::<FrameResult>(queue);
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let id = driver.id();

    info!(session = %id, difficulty = %driver.profile().difficulty, "Session started");

    let task = tokio::spawn(async move {
        let mut summary = SessionSummary::new(id);

        loop {
            let request = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    summary.cancelled = true;
                    break;
                }
                request = frame_rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            let prepared = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    summary.cancelled = true;
                    summary.frames_discarded += 1;
                    break;
                }
                prepared = prepare_request(&driver, estimator.as_deref(), request) => prepared,
            };

            let result = match prepared {
                Ok(_) if token.is_cancelled() => {
                    summary.cancelled = true;
                    summary.frames_discarded += 1;
                    break;
                }
                Ok(prepared) => {
                    let output = driver.commit(prepared);
                    summary.frames_processed += 1;
                    if let Some(rep) = &output.rep {
                        // No subscribers is fine
                        let _ = events.send(RepEvent {
                            session_id: id,
                            rep: rep.clone(),
                        });
                    }
                    Ok(output)
                }
                Err(e) => {
                    summary.frames_failed += 1;
                    if e.is_frame_local() {
                        debug!(session = %id, error = %e, "Frame skipped");
                    } else {
                        warn!(session = %id, error = %e, "Frame failed");
                    }
                    Err(e)
                }
            };

            if out_tx.send(result).await.is_err() {
                debug!(session = %id, "Output receiver dropped");
                break;
            }
        }

        let state = driver.state();
        summary.rep_count = state.rep_count;
        summary.improper_rep_count = state.improper_rep_count;
        summary.final_state = state.current_state;

        info!(
            session = %id,
            frames = summary.frames_processed,
            reps = summary.rep_count,
            improper = summary.improper_rep_count,
            cancelled = summary.cancelled,
            "Session stopped"
        );
        summary
    });

    let handle = SessionHandle {
        id,
        frames: frame_tx,
        cancel,
        task,
    };
    (handle, out_rx)
}
