//! Per-connection session driver.
//!
//! The driver owns one [`RepStateMachine`] and turns "raw frame bytes plus
//! optional landmarks" into an encoded, annotated frame and a feedback
//! payload. Processing is split into [`SessionDriver::prepare`], which works
//! on a copy of the machine, and [`SessionDriver::commit`], which installs
//! it, so a frame abandoned in between leaves no trace.

use std::borrow::Cow;
use std::sync::Arc;

use image::{imageops, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use squat_core::{Pose, Result, SessionId, Timestamp};
use squat_form::{
    analyze_pose, select_profile, FrameAnalysis, Observation, RepCompleted, RepStateMachine,
    SessionState, SquatState, ThresholdProfile,
};

use crate::codec::FrameCodec;
use crate::renderer::{
    displayed_faults, feedback_lines, FeedbackRenderer, FrameView, RenderOptions,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Flip frames horizontally before analysis (webcam selfie view)
    pub mirror: bool,
    pub show_angles: bool,
}

/// Per-frame feedback sent back to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackPayload {
    pub state: SquatState,
    pub rep_count: u32,
    pub improper_rep_count: u32,
    pub active_faults: Vec<String>,
    pub inactive: bool,
    pub messages: Vec<String>,
}

impl FeedbackPayload {
    fn new(state: &SessionState, analysis: &FrameAnalysis, messages: Vec<String>) -> Self {
        Self {
            state: state.current_state,
            rep_count: state.rep_count,
            improper_rep_count: state.improper_rep_count,
            active_faults: displayed_faults(analysis)
                .iter()
                .map(|f| f.as_str().to_string())
                .collect(),
            inactive: analysis.inactive,
            messages,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FrameOutput {
    /// Encoded frame; the raw input when no overlay could be drawn
    pub image: Vec<u8>,
    pub annotated: bool,
    pub feedback: FeedbackPayload,
    pub rep_delta: u32,
    pub rep: Option<RepCompleted>,
}

/// Result of a frame that has been analysed but not yet committed
#[derive(Debug, Clone)]
pub struct PreparedFrame {
    machine: RepStateMachine,
    output: FrameOutput,
}

impl PreparedFrame {
    pub fn output(&self) -> &FrameOutput {
        &self.output
    }
}

/// Cloning yields a snapshot that can be moved onto a blocking thread;
/// only [`SessionDriver::commit`] on the original advances the session.
#[derive(Clone)]
pub struct SessionDriver {
    id: SessionId,
    machine: RepStateMachine,
    config: SessionConfig,
    renderer: FeedbackRenderer,
    codec: Arc<dyn FrameCodec>,
}

impl SessionDriver {
    /// Start a session for a named difficulty; unknown names are a config error
    pub fn new(difficulty: &str, config: SessionConfig, codec: Arc<dyn FrameCodec>) -> Result<Self> {
        let profile = select_profile(difficulty)?;
        Ok(Self::with_profile(profile, config, codec))
    }

    pub fn with_profile(
        profile: ThresholdProfile,
        config: SessionConfig,
        codec: Arc<dyn FrameCodec>,
    ) -> Self {
        let renderer = FeedbackRenderer::new(RenderOptions {
            show_angles: config.show_angles,
            ..RenderOptions::default()
        });

        Self {
            id: SessionId::new(),
            machine: RepStateMachine::new(profile),
            config,
            renderer,
            codec,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn profile(&self) -> &ThresholdProfile {
        self.machine.profile()
    }

    pub fn state(&self) -> &SessionState {
        self.machine.state()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn codec(&self) -> Arc<dyn FrameCodec> {
        Arc::clone(&self.codec)
    }

    pub fn decode(&self, raw: &[u8]) -> Result<RgbImage> {
        self.codec.decode(raw)
    }

    /// Analyse and render one frame against a copy of the session state
    pub fn prepare(
        &self,
        raw: &[u8],
        frame: &RgbImage,
        landmarks: Option<Pose>,
        now: Timestamp,
    ) -> PreparedFrame {
        let mut machine = self.machine.clone();

        let (frame, pose) = if self.config.mirror {
            let width = frame.width() as f64;
            (
                Cow::Owned(imageops::flip_horizontal(frame)),
                landmarks.map(|pose| pose.mirrored(width)),
            )
        } else {
            (Cow::Borrowed(frame), landmarks)
        };

        let observation = match &pose {
            Some(pose) if !pose.is_empty() => analyze_pose(pose, machine.profile()),
            _ => Observation::NoPose,
        };
        let analysis = machine.step(observation, now);

        let (image, annotated, messages) =
            self.annotate(raw, &frame, machine.state(), &analysis, pose.as_ref());

        let rep_delta = machine.state().rep_count - self.machine.state().rep_count;
        let output = FrameOutput {
            image,
            annotated,
            feedback: FeedbackPayload::new(machine.state(), &analysis, messages),
            rep_delta,
            rep: analysis.rep,
        };

        PreparedFrame { machine, output }
    }

    pub fn commit(&mut self, prepared: PreparedFrame) -> FrameOutput {
        self.machine = prepared.machine;
        prepared.output
    }

    /// Decode, analyse, render and commit one frame
    pub fn process_frame(
        &mut self,
        raw: &[u8],
        landmarks: Option<Pose>,
        now: Timestamp,
    ) -> Result<FrameOutput> {
        let frame = self.decode(raw)?;
        let prepared = self.prepare(raw, &frame, landmarks, now);
        Ok(self.commit(prepared))
    }

    fn annotate(
        &self,
        raw: &[u8],
        frame: &RgbImage,
        state: &SessionState,
        analysis: &FrameAnalysis,
        pose: Option<&Pose>,
    ) -> (Vec<u8>, bool, Vec<String>) {
        let show_angles = self.renderer.options().show_angles;

        if analysis.observation == Observation::NoPose {
            debug!(session = %self.id, "No pose in frame");
            let image = if self.config.mirror {
                self.codec.encode(frame).unwrap_or_else(|e| {
                    warn!(session = %self.id, error = %e, "Frame encode failed");
                    raw.to_vec()
                })
            } else {
                raw.to_vec()
            };
            return (image, false, feedback_lines(state, analysis, show_angles));
        }

        let view = FrameView {
            state,
            analysis,
            pose,
        };
        let rendered = self
            .renderer
            .render(frame, &view)
            .and_then(|r| self.codec.encode(&r.image).map(|image| (image, r.messages)));

        match rendered {
            Ok((image, messages)) => (image, true, messages),
            Err(e) => {
                warn!(session = %self.id, error = %e, "Overlay failed, returning raw frame");
                (raw.to_vec(), false, feedback_lines(state, analysis, show_angles))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JpegCodec;
    use squat_core::Error;
    use squat_form::synthetic::SquatPose;

    struct BrokenEncoder;

    impl FrameCodec for BrokenEncoder {
        fn decode(&self, raw: &[u8]) -> Result<RgbImage> {
            JpegCodec::default().decode(raw)
        }

        fn encode(&self, _frame: &RgbImage) -> Result<Vec<u8>> {
            Err(Error::Render("encoder offline".into()))
        }

        fn content_type(&self) -> &'static str {
            "image/jpeg"
        }
    }

    fn jpeg() -> Vec<u8> {
        let frame = RgbImage::from_pixel(400, 480, image::Rgb([80, 80, 80]));
        JpegCodec::default().encode(&frame).unwrap()
    }

    fn driver(mirror: bool) -> SessionDriver {
        let config = SessionConfig {
            mirror,
            show_angles: false,
        };
        SessionDriver::new("beginner", config, Arc::new(JpegCodec::default())).unwrap()
    }

    fn at(frame: i64) -> Timestamp {
        Timestamp::from_millis(frame * 33)
    }

    #[test]
    fn test_unknown_difficulty_is_config_error() {
        let result = SessionDriver::new("expert", SessionConfig::default(), Arc::new(JpegCodec::default()));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_full_rep_through_driver() {
        let mut driver = driver(false);
        let raw = jpeg();
        let mut reps = 0;

        for (i, knee) in [5.0, 50.0, 85.0, 50.0, 5.0].into_iter().enumerate() {
            let pose = SquatPose::standing().knee_vertical(knee).build();
            let out = driver.process_frame(&raw, Some(pose), at(i as i64)).unwrap();
            assert!(out.annotated);
            reps += out.rep_delta;
            if i == 4 {
                let rep = out.rep.unwrap();
                assert!(!rep.faulted);
                assert_eq!(out.feedback.rep_count, 1);
                assert_eq!(out.feedback.state, SquatState::Standing);
            }
        }

        assert_eq!(reps, 1);
        assert_eq!(driver.state().rep_count, 1);
        assert_eq!(driver.state().improper_rep_count, 0);
    }

    #[test]
    fn test_no_pose_returns_raw_frame() {
        let mut driver = driver(false);
        let raw = jpeg();

        let out = driver.process_frame(&raw, None, at(0)).unwrap();
        assert!(!out.annotated);
        assert_eq!(out.image, raw);
        assert!(out.feedback.messages.iter().any(|m| m == "NO POSE DETECTED"));

        let out = driver.process_frame(&raw, Some(Pose::new()), at(1)).unwrap();
        assert_eq!(out.image, raw);
        assert_eq!(out.rep_delta, 0);
    }

    #[test]
    fn test_mirrored_session_matches_plain() {
        let mut plain = driver(false);
        let mut mirrored = driver(true);
        let raw = jpeg();

        for (i, knee) in [5.0, 50.0, 85.0, 50.0, 5.0].into_iter().enumerate() {
            let pose = SquatPose::standing().knee_vertical(knee).shin_lean(20.0).build();
            let flipped = pose.mirrored(400.0);
            let a = plain.process_frame(&raw, Some(pose), at(i as i64)).unwrap();
            let b = mirrored.process_frame(&raw, Some(flipped), at(i as i64)).unwrap();
            assert_eq!(a.feedback, b.feedback);
        }
        assert_eq!(mirrored.state().rep_count, 1);
    }

    #[test]
    fn test_render_failure_returns_raw_frame() {
        let mut driver = SessionDriver::new(
            "pro",
            SessionConfig::default(),
            Arc::new(BrokenEncoder),
        )
        .unwrap();
        let raw = jpeg();

        let pose = SquatPose::standing().knee_vertical(50.0).build();
        let out = driver.process_frame(&raw, Some(pose), at(0)).unwrap();
        assert!(!out.annotated);
        assert_eq!(out.image, raw);
        assert_eq!(out.feedback.state, SquatState::Transition);
        assert_eq!(driver.state().current_state, SquatState::Transition);
    }

    #[test]
    fn test_bad_bytes_leave_state_untouched() {
        let mut driver = driver(false);
        let before = driver.state().clone();

        let result = driver.process_frame(b"not an image", None, at(0));
        assert!(matches!(result, Err(Error::Render(_))));
        assert_eq!(driver.state(), &before);
    }

    #[test]
    fn test_prepare_without_commit_is_discarded() {
        let mut driver = driver(false);
        let raw = jpeg();
        let frame = driver.decode(&raw).unwrap();

        let pose = SquatPose::standing().knee_vertical(50.0).build();
        let prepared = driver.prepare(&raw, &frame, Some(pose.clone()), at(0));
        assert_eq!(prepared.output().feedback.state, SquatState::Transition);
        drop(prepared);
        assert_eq!(driver.state().current_state, SquatState::Standing);

        let prepared = driver.prepare(&raw, &frame, Some(pose), at(1));
        driver.commit(prepared);
        assert_eq!(driver.state().current_state, SquatState::Transition);
        assert!(driver.state().inactive_since.is_some());
    }
}
