//! Synthetic side-on squat poses.
//!
//! Builds landmark sets from target joint angles so the analysis can be
//! exercised without video or a pose model. The subject faces +x, the near
//! (left) side sits slightly in front of the far side.

use squat_core::{BodyLandmark, Landmark, Pose, Position2D, Side};

const THIGH: f64 = 100.0;
const SHIN: f64 = 100.0;
const TORSO: f64 = 140.0;
const FAR_SIDE_SHIFT: f64 = 4.0;

#[derive(Debug, Clone)]
pub struct SquatPose {
    ankle: Position2D,
    knee_vertical: f64,
    torso_lean: f64,
    shin_lean: f64,
    facing_camera: bool,
    leg_visibility: [f32; 2],
    visibility: f32,
}

impl SquatPose {
    /// Upright stance, side-on to the camera
    pub fn standing() -> Self {
        Self {
            ankle: Position2D::new(200.0, 400.0),
            knee_vertical: 5.0,
            torso_lean: 20.0,
            shin_lean: 5.0,
            facing_camera: false,
            leg_visibility: [0.95, 0.95],
            visibility: 0.95,
        }
    }

    pub fn knee_vertical(mut self, degrees: f64) -> Self {
        self.knee_vertical = degrees;
        self
    }

    pub fn torso_lean(mut self, degrees: f64) -> Self {
        self.torso_lean = degrees;
        self
    }

    pub fn shin_lean(mut self, degrees: f64) -> Self {
        self.shin_lean = degrees;
        self
    }

    /// Spread the shoulders as if the subject turned towards the camera
    pub fn facing_camera(mut self) -> Self {
        self.facing_camera = true;
        self
    }

    /// Visibility of one side's hip, knee, ankle and foot
    pub fn leg_visibility(mut self, side: Side, visibility: f32) -> Self {
        self.leg_visibility[side_index(side)] = visibility;
        self
    }

    pub fn build(&self) -> Pose {
        let (s, k, t) = (
            self.shin_lean.to_radians(),
            self.knee_vertical.to_radians(),
            self.torso_lean.to_radians(),
        );

        let ankle = self.ankle;
        let foot = Position2D::new(ankle.x + 35.0, ankle.y + 8.0);
        let knee = Position2D::new(ankle.x + SHIN * s.sin(), ankle.y - SHIN * s.cos());
        let hip = Position2D::new(knee.x - THIGH * k.sin(), knee.y - THIGH * k.cos());
        let shoulder = Position2D::new(hip.x + TORSO * t.sin(), hip.y - TORSO * t.cos());

        let mut pose = Pose::new();
        for side in [Side::Left, Side::Right] {
            let shift = match side {
                Side::Left => 0.0,
                Side::Right => FAR_SIDE_SHIFT,
            };
            let at = |p: Position2D| Position2D::new(p.x + shift, p.y);
            let legs = self.leg_visibility[side_index(side)];

            pose.insert(Landmark::new(BodyLandmark::hip(side), at(hip), legs));
            pose.insert(Landmark::new(BodyLandmark::knee(side), at(knee), legs));
            pose.insert(Landmark::new(BodyLandmark::ankle(side), at(ankle), legs));
            pose.insert(Landmark::new(BodyLandmark::foot(side), at(foot), legs));
        }

        let (left_shoulder, right_shoulder, nose) = if self.facing_camera {
            (
                Position2D::new(shoulder.x - 45.0, shoulder.y),
                Position2D::new(shoulder.x + 45.0, shoulder.y),
                Position2D::new(shoulder.x, shoulder.y - 40.0),
            )
        } else {
            (
                shoulder,
                Position2D::new(shoulder.x + FAR_SIDE_SHIFT, shoulder.y),
                Position2D::new(shoulder.x + 15.0, shoulder.y - 40.0),
            )
        };
        pose.insert(Landmark::new(BodyLandmark::LeftShoulder, left_shoulder, self.visibility));
        pose.insert(Landmark::new(BodyLandmark::RightShoulder, right_shoulder, self.visibility));
        pose.insert(Landmark::new(BodyLandmark::Nose, nose, self.visibility));

        pose
    }
}

fn side_index(side: Side) -> usize {
    match side {
        Side::Left => 0,
        Side::Right => 1,
    }
}
