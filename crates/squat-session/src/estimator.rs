//! Pose estimator capability.
//!
//! The model itself is a black box. Sessions only need "image in, optional
//! landmark set out"; `None` means no subject was found, which is an expected
//! outcome and never an error.

use std::sync::Arc;

use async_trait::async_trait;
use image::RgbImage;
use parking_lot::Mutex;

use squat_core::{Error, Pose, Result};

/// Trait for pose estimation backends shared across sessions
#[async_trait]
pub trait PoseEstimator: Send + Sync {
    /// Backend identifier for logs
    fn name(&self) -> &str;

    /// Estimate landmarks for one decoded frame
    async fn estimate(&self, frame: Arc<RgbImage>) -> Result<Option<Pose>>;
}

/// A model that needs exclusive access for each inference call
pub trait PoseModel: Send {
    fn name(&self) -> &str;

    fn infer(&mut self, frame: &RgbImage) -> Result<Option<Pose>>;
}

/// Shares a single non-thread-safe model by serializing calls.
///
/// Inference runs on the blocking pool so a slow model never holds up the
/// runtime threads serving other sessions.
pub struct SerializedEstimator<M> {
    name: String,
    model: Arc<Mutex<M>>,
}

impl<M: PoseModel> SerializedEstimator<M> {
    pub fn new(model: M) -> Self {
        Self {
            name: model.name().to_string(),
            model: Arc::new(Mutex::new(model)),
        }
    }
}

#[async_trait]
impl<M: PoseModel + 'static> PoseEstimator for SerializedEstimator<M> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn estimate(&self, frame: Arc<RgbImage>) -> Result<Option<Pose>> {
        let model = Arc::clone(&self.model);

        tokio::task::spawn_blocking(move || model.lock().infer(&frame))
            .await
            .map_err(|e| Error::PoseEstimation(format!("{}: inference task failed: {e}", self.name)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use squat_form::synthetic::SquatPose;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingModel {
        calls: Arc<AtomicU32>,
    }

    impl PoseModel for CountingModel {
        fn name(&self) -> &str {
            "counting"
        }

        fn infer(&mut self, frame: &RgbImage) -> Result<Option<Pose>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Dark frames have nobody in them
            if frame.get_pixel(0, 0).0[0] < 10 {
                Ok(None)
            } else {
                Ok(Some(SquatPose::standing().build()))
            }
        }
    }

    struct PanickingModel;

    impl PoseModel for PanickingModel {
        fn name(&self) -> &str {
            "panicking"
        }

        fn infer(&mut self, _frame: &RgbImage) -> Result<Option<Pose>> {
            panic!("model crashed");
        }
    }

    #[tokio::test]
    async fn test_serialized_estimator_shares_one_model() {
        let calls = Arc::new(AtomicU32::new(0));
        let estimator = Arc::new(SerializedEstimator::new(CountingModel {
            calls: calls.clone(),
        }));
        assert_eq!(estimator.name(), "counting");

        let lit = Arc::new(RgbImage::from_pixel(8, 8, image::Rgb([200, 200, 200])));
        let dark = Arc::new(RgbImage::from_pixel(8, 8, image::Rgb([0, 0, 0])));

        let mut tasks = Vec::new();
        for i in 0..8 {
            let estimator = estimator.clone();
            let frame = if i % 2 == 0 { lit.clone() } else { dark.clone() };
            tasks.push(tokio::spawn(async move { estimator.estimate(frame).await }));
        }

        let mut found = 0;
        for task in tasks {
            if task.await.unwrap().unwrap().is_some() {
                found += 1;
            }
        }
        assert_eq!(found, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_model_panic_surfaces_as_estimation_error() {
        let estimator = SerializedEstimator::new(PanickingModel);
        let frame = Arc::new(RgbImage::new(8, 8));

        let first = estimator.estimate(frame.clone()).await;
        assert!(matches!(first, Err(Error::PoseEstimation(_))));

        // The model stays usable for the next frame
        let second = estimator.estimate(frame).await;
        assert!(matches!(second, Err(Error::PoseEstimation(msg)) if msg.starts_with("panicking")));
    }
}
