//! Landmark analysis: turns one frame's pose into an [`Observation`].
//!
//! The camera alignment check runs first and short-circuits everything else.
//! The body side whose shoulder-to-foot extent is larger (the side facing
//! the camera) is measured; if any of its landmarks is unusable the other
//! side is tried before the frame is given up as unmeasurable.
//!
//! Torso and shin leans are signed against the direction the subject faces,
//! so a backward lean never reads as a forward one.

use squat_core::{
    camera_offset_angle, vertical_angle, BodyLandmark, Error, Landmark, Pose, Result, Side,
    MIN_VISIBILITY,
};

use crate::classifier::JointAngles;
use crate::machine::Observation;
use crate::profile::ThresholdProfile;

fn require(pose: &Pose, kind: BodyLandmark) -> Result<&Landmark> {
    // An absent landmark is treated as zero confidence
    pose.get(kind).ok_or_else(|| Error::LowConfidence {
        landmark: kind,
        visibility: 0.0,
    })
}

/// Alignment estimate for the whole frame
pub fn camera_offset(pose: &Pose) -> Result<f64> {
    camera_offset_angle(
        require(pose, BodyLandmark::LeftShoulder)?,
        require(pose, BodyLandmark::RightShoulder)?,
        require(pose, BodyLandmark::Nose)?,
    )
}

fn vertical_extent(pose: &Pose, side: Side) -> Option<f64> {
    let shoulder = pose.get(BodyLandmark::shoulder(side))?;
    let lowest = pose
        .get(BodyLandmark::foot(side))
        .or_else(|| pose.get(BodyLandmark::ankle(side)))?;
    Some((lowest.position.y - shoulder.position.y).abs())
}

fn min_visibility(pose: &Pose, side: Side) -> f32 {
    [
        BodyLandmark::shoulder(side),
        BodyLandmark::hip(side),
        BodyLandmark::knee(side),
        BodyLandmark::ankle(side),
    ]
    .iter()
    .map(|kind| pose.get(*kind).map_or(0.0, |lm| lm.visibility))
    .fold(f32::INFINITY, f32::min)
}

/// The side facing the camera, by shoulder-to-foot extent then visibility
pub fn primary_side(pose: &Pose) -> Side {
    let left = vertical_extent(pose, Side::Left).unwrap_or(0.0);
    let right = vertical_extent(pose, Side::Right).unwrap_or(0.0);

    if (left - right).abs() > f64::EPSILON {
        return if left > right { Side::Left } else { Side::Right };
    }
    if min_visibility(pose, Side::Right) > min_visibility(pose, Side::Left) {
        Side::Right
    } else {
        Side::Left
    }
}

/// Direction the subject faces along x, `1.0` or `-1.0`.
///
/// Toes point forward, so the foot's offset from the ankle decides, with the
/// nose ahead of the shoulder as the fallback. Without either, +x is assumed.
pub fn facing_direction(pose: &Pose, side: Side) -> f64 {
    let offset = |tip: BodyLandmark, base: BodyLandmark| {
        let (tip, base) = (pose.get(tip)?, pose.get(base)?);
        let dx = tip.position.x - base.position.x;
        let visible = tip.visibility >= MIN_VISIBILITY && base.visibility >= MIN_VISIBILITY;
        (visible && dx.abs() > f64::EPSILON).then(|| dx.signum())
    };

    offset(BodyLandmark::foot(side), BodyLandmark::ankle(side))
        .or_else(|| offset(BodyLandmark::Nose, BodyLandmark::shoulder(side)))
        .unwrap_or(1.0)
}

/// Lean of `bottom→top` from vertical, negative when `top` is behind `bottom`
fn signed_lean(bottom: &Landmark, top: &Landmark, facing: f64) -> Result<f64> {
    let angle = vertical_angle(bottom, top)?;
    let ahead = (top.position.x - bottom.position.x) * facing;
    Ok(if ahead < 0.0 { -angle } else { angle })
}

/// Joint angles of one body side
pub fn side_angles(pose: &Pose, side: Side, camera_offset: f64) -> Result<JointAngles> {
    let shoulder = require(pose, BodyLandmark::shoulder(side))?;
    let hip = require(pose, BodyLandmark::hip(side))?;
    let knee = require(pose, BodyLandmark::knee(side))?;
    let ankle = require(pose, BodyLandmark::ankle(side))?;
    let facing = facing_direction(pose, side);

    Ok(JointAngles {
        side,
        torso_lean: signed_lean(hip, shoulder, facing)?,
        knee_vertical: vertical_angle(knee, hip)?,
        shin_lean: signed_lean(ankle, knee, facing)?,
        camera_offset,
    })
}

/// Analyse one frame's landmarks against a profile
pub fn analyze_pose(pose: &Pose, profile: &ThresholdProfile) -> Observation {
    let offset_angle = match camera_offset(pose) {
        Ok(angle) => angle,
        Err(e) => {
            tracing::debug!("Camera alignment unavailable: {}", e);
            return Observation::Unmeasurable;
        }
    };

    if offset_angle > profile.offset_tolerance {
        return Observation::Misaligned { offset_angle };
    }

    let side = primary_side(pose);
    let measured = side_angles(pose, side, offset_angle).or_else(|e| {
        tracing::debug!(?side, "Falling back to opposite side: {}", e);
        side_angles(pose, side.opposite(), offset_angle)
    });

    match measured {
        Ok(angles) => Observation::Measured(angles),
        Err(e) => {
            tracing::debug!("No usable body side: {}", e);
            Observation::Unmeasurable
        }
    }
}
