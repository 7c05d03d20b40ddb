//! Threshold profiles selecting analysis strictness.
//!
//! Profiles form a closed set. Both share one structure and differ only in
//! numeric leniency: `pro` has narrower acceptable bands and a shorter
//! fault debounce.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use squat_core::{Error, Result};

/// Difficulty level requested by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[default]
    Beginner,
    Pro,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Beginner => "beginner",
            Difficulty::Pro => "pro",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "beginner" => Ok(Difficulty::Beginner),
            "pro" => Ok(Difficulty::Pro),
            other => Err(Error::Config(other.to_string())),
        }
    }
}

/// Inclusive angle range in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AngleRange {
    pub min: f64,
    pub max: f64,
}

impl AngleRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, angle: f64) -> bool {
        angle >= self.min && angle <= self.max
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }
}

/// Knee-vertical angle bins driving the rep state machine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PostureBins {
    pub normal: AngleRange,
    pub transition: AngleRange,
    pub pass: AngleRange,
}

/// Named set of angle ranges and timing constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdProfile {
    pub difficulty: Difficulty,
    /// Hip-knee segment versus vertical
    pub knee_bins: PostureBins,
    /// Acceptable hip-shoulder lean from vertical
    pub torso_lean: AngleRange,
    /// Maximum ankle-knee lean before the knee counts as past the toe
    pub max_shin_lean: f64,
    /// Knee-vertical angle beyond which the squat is too deep
    pub too_deep_angle: f64,
    /// Camera offset above which the frame is not classified
    pub offset_tolerance: f64,
    /// Frames stuck descending in TRANSITION before the rep is shallow
    pub shallow_window_frames: u32,
    /// Consecutive frames a fault must hold before it is reported
    pub debounce_frames: u32,
    /// Time without a state change before the session reads as inactive
    pub inactive_timeout: Duration,
}

impl ThresholdProfile {
    pub fn beginner() -> Self {
        Self {
            difficulty: Difficulty::Beginner,
            knee_bins: PostureBins {
                normal: AngleRange::new(0.0, 32.0),
                transition: AngleRange::new(35.0, 65.0),
                pass: AngleRange::new(70.0, 95.0),
            },
            torso_lean: AngleRange::new(10.0, 50.0),
            max_shin_lean: 45.0,
            too_deep_angle: 95.0,
            offset_tolerance: 35.0,
            shallow_window_frames: 45,
            debounce_frames: 6,
            inactive_timeout: Duration::from_secs(15),
        }
    }

    pub fn pro() -> Self {
        Self {
            difficulty: Difficulty::Pro,
            knee_bins: PostureBins {
                normal: AngleRange::new(0.0, 32.0),
                transition: AngleRange::new(35.0, 65.0),
                pass: AngleRange::new(80.0, 95.0),
            },
            torso_lean: AngleRange::new(15.0, 45.0),
            max_shin_lean: 30.0,
            too_deep_angle: 95.0,
            offset_tolerance: 35.0,
            shallow_window_frames: 30,
            debounce_frames: 3,
            inactive_timeout: Duration::from_secs(15),
        }
    }

    pub fn for_difficulty(difficulty: Difficulty) -> Self {
        match difficulty {
            Difficulty::Beginner => Self::beginner(),
            Difficulty::Pro => Self::pro(),
        }
    }

    /// Fallback when no usable selection arrives
    pub fn most_lenient() -> Self {
        Self::beginner()
    }
}

/// Resolve a profile by name, failing on anything outside {beginner, pro}
pub fn select_profile(name: &str) -> Result<ThresholdProfile> {
    name.parse::<Difficulty>().map(ThresholdProfile::for_difficulty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_known_profiles() {
        assert_eq!(select_profile("beginner").unwrap().difficulty, Difficulty::Beginner);
        assert_eq!(select_profile(" PRO ").unwrap().difficulty, Difficulty::Pro);
    }

    #[test]
    fn test_select_unknown_profile_is_config_error() {
        match select_profile("expert") {
            Err(Error::Config(name)) => assert_eq!(name, "expert"),
            other => panic!("expected Config error, got {:?}", other),
        }
        assert!(select_profile("").is_err());
    }

    #[test]
    fn test_pro_is_stricter_than_beginner() {
        let b = ThresholdProfile::beginner();
        let p = ThresholdProfile::pro();

        assert!(p.knee_bins.pass.width() <= b.knee_bins.pass.width());
        assert!(p.torso_lean.width() <= b.torso_lean.width());
        assert!(p.max_shin_lean <= b.max_shin_lean);
        assert!(p.debounce_frames < b.debounce_frames);
        assert!(p.shallow_window_frames <= b.shallow_window_frames);
    }

    #[test]
    fn test_bins_do_not_overlap() {
        for profile in [ThresholdProfile::beginner(), ThresholdProfile::pro()] {
            let bins = profile.knee_bins;
            assert!(bins.normal.max < bins.transition.min);
            assert!(bins.transition.max < bins.pass.min);
        }
    }

    #[test]
    fn test_most_lenient_is_beginner() {
        assert_eq!(ThresholdProfile::most_lenient(), ThresholdProfile::beginner());
    }
}
