//! Planar joint geometry.
//!
//! All angles are in degrees. Frame coordinates follow image convention, so
//! "up" is the negative y direction. Every function takes [`Landmark`]s and
//! fails closed: a landmark below [`MIN_VISIBILITY`] yields
//! [`Error::LowConfidence`], and coincident points yield [`Error::Geometry`]
//! instead of a NaN.

use nalgebra::{Point2, Vector2};

use crate::error::{Error, Result};
use crate::types::Landmark;

/// Visibility floor below which a landmark is unusable
pub const MIN_VISIBILITY: f32 = 0.5;

const DEGENERATE_LENGTH: f64 = 1e-9;

fn usable(landmark: &Landmark) -> Result<Point2<f64>> {
    if landmark.visibility < MIN_VISIBILITY || landmark.visibility.is_nan() {
        return Err(Error::LowConfidence {
            landmark: landmark.kind,
            visibility: landmark.visibility,
        });
    }
    Ok(landmark.position.to_nalgebra())
}

/// Angle between two vectors in degrees, in [0, 180]
pub fn angle_between(v1: &Vector2<f64>, v2: &Vector2<f64>) -> Result<f64> {
    let norms = v1.norm() * v2.norm();
    if !norms.is_finite() || v1.norm() < DEGENERATE_LENGTH || v2.norm() < DEGENERATE_LENGTH {
        return Err(Error::Geometry(format!(
            "zero-length vector ({:.3}, {:.3}) / ({:.3}, {:.3})",
            v1.x, v1.y, v2.x, v2.y
        )));
    }
    let cos_theta = (v1.dot(v2) / norms).clamp(-1.0, 1.0);
    Ok(cos_theta.acos().to_degrees())
}

/// Angle at vertex `b` formed by the rays `b→a` and `b→c`
pub fn joint_angle(a: &Landmark, b: &Landmark, c: &Landmark) -> Result<f64> {
    let (pa, pb, pc) = (usable(a)?, usable(b)?, usable(c)?);
    angle_between(&(pa - pb), &(pc - pb))
}

/// Angle between the segment `a→b` and the upward vertical
///
/// A segment pointing straight up reads 0, horizontal reads 90. The result
/// depends only on |dx|, so it is invariant under horizontal mirroring.
pub fn vertical_angle(a: &Landmark, b: &Landmark) -> Result<f64> {
    let (pa, pb) = (usable(a)?, usable(b)?);
    angle_between(&(pb - pa), &Vector2::new(0.0, -1.0))
}

/// Camera alignment estimate: the angle at the nose subtended by the shoulders
///
/// Small when the subject stands side-on (shoulders overlap in the image),
/// large when they face the camera.
pub fn camera_offset_angle(
    shoulder_left: &Landmark,
    shoulder_right: &Landmark,
    nose: &Landmark,
) -> Result<f64> {
    joint_angle(shoulder_left, nose, shoulder_right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BodyLandmark, Position2D};

    fn lm(kind: BodyLandmark, x: f64, y: f64) -> Landmark {
        Landmark::new(kind, Position2D::new(x, y), 0.9)
    }

    #[test]
    fn test_joint_angle_right_angle() {
        let a = lm(BodyLandmark::LeftHip, 0.0, -1.0);
        let b = lm(BodyLandmark::LeftKnee, 0.0, 0.0);
        let c = lm(BodyLandmark::LeftAnkle, 1.0, 0.0);
        assert!((joint_angle(&a, &b, &c).unwrap() - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_joint_angle_straight_and_folded() {
        let a = lm(BodyLandmark::LeftHip, -1.0, 0.0);
        let b = lm(BodyLandmark::LeftKnee, 0.0, 0.0);
        let c = lm(BodyLandmark::LeftAnkle, 2.0, 0.0);
        assert!((joint_angle(&a, &b, &c).unwrap() - 180.0).abs() < 1e-9);

        let c = lm(BodyLandmark::LeftAnkle, -3.0, 0.0);
        assert!(joint_angle(&a, &b, &c).unwrap().abs() < 1e-9);
    }

    #[test]
    fn test_coincident_points_are_geometry_errors() {
        let a = lm(BodyLandmark::LeftHip, 5.0, 5.0);
        let b = lm(BodyLandmark::LeftKnee, 5.0, 5.0);
        let c = lm(BodyLandmark::LeftAnkle, 9.0, 5.0);
        assert!(matches!(joint_angle(&a, &b, &c), Err(Error::Geometry(_))));
        assert!(matches!(vertical_angle(&a, &b), Err(Error::Geometry(_))));
    }

    #[test]
    fn test_low_visibility_fails_closed() {
        let a = lm(BodyLandmark::LeftKnee, 0.0, 0.0);
        let mut b = lm(BodyLandmark::LeftHip, 0.0, -10.0);
        b.visibility = 0.3;
        match vertical_angle(&a, &b) {
            Err(Error::LowConfidence { landmark, .. }) => assert_eq!(landmark, BodyLandmark::LeftHip),
            other => panic!("expected LowConfidence, got {:?}", other),
        }
    }

    #[test]
    fn test_vertical_angle() {
        let knee = lm(BodyLandmark::LeftKnee, 100.0, 300.0);
        let hip_above = lm(BodyLandmark::LeftHip, 100.0, 200.0);
        let hip_level = lm(BodyLandmark::LeftHip, 0.0, 300.0);
        let hip_diag = lm(BodyLandmark::LeftHip, 0.0, 200.0);

        assert!(vertical_angle(&knee, &hip_above).unwrap().abs() < 1e-9);
        assert!((vertical_angle(&knee, &hip_level).unwrap() - 90.0).abs() < 1e-9);
        assert!((vertical_angle(&knee, &hip_diag).unwrap() - 45.0).abs() < 1e-9);

        let mirrored = (knee.mirrored(640.0), hip_diag.mirrored(640.0));
        assert!((vertical_angle(&mirrored.0, &mirrored.1).unwrap() - 45.0).abs() < 1e-9);
    }

    #[test]
    fn test_camera_offset_side_on_vs_facing() {
        let nose = lm(BodyLandmark::Nose, 100.0, 70.0);
        let side_l = lm(BodyLandmark::LeftShoulder, 88.0, 100.0);
        let side_r = lm(BodyLandmark::RightShoulder, 92.0, 100.0);
        let side_on = camera_offset_angle(&side_l, &side_r, &nose).unwrap();
        assert!(side_on < 10.0);

        let face_l = lm(BodyLandmark::LeftShoulder, 60.0, 100.0);
        let face_r = lm(BodyLandmark::RightShoulder, 140.0, 100.0);
        let facing = camera_offset_angle(&face_l, &face_r, &nose).unwrap();
        assert!(facing > 100.0);
    }
}
