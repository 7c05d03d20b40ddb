//! Fundamental types for the squat analysis system.

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of one live or uploaded analysis session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Timestamp wrapper with nanosecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp_nanos_opt().unwrap_or(0))
    }

    pub fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub fn from_millis(millis: i64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    pub fn as_nanos(&self) -> i64 {
        self.0
    }

    /// Time elapsed since `earlier`, zero if `earlier` is in the future
    pub fn duration_since(&self, earlier: Timestamp) -> Duration {
        let delta = self.0.saturating_sub(earlier.0);
        Duration::from_nanos(delta.max(0) as u64)
    }
}

/// Body side of a bilateral landmark
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// Landmark vocabulary delivered by the pose estimator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum BodyLandmark {
    Nose = 0,
    LeftShoulder = 1,
    RightShoulder = 2,
    LeftHip = 3,
    RightHip = 4,
    LeftKnee = 5,
    RightKnee = 6,
    LeftAnkle = 7,
    RightAnkle = 8,
    LeftFoot = 9,
    RightFoot = 10,
}

impl BodyLandmark {
    pub const COUNT: usize = 11;

    pub const ALL: [BodyLandmark; Self::COUNT] = [
        Self::Nose,
        Self::LeftShoulder,
        Self::RightShoulder,
        Self::LeftHip,
        Self::RightHip,
        Self::LeftKnee,
        Self::RightKnee,
        Self::LeftAnkle,
        Self::RightAnkle,
        Self::LeftFoot,
        Self::RightFoot,
    ];

    pub fn from_index(idx: u8) -> Option<Self> {
        Self::ALL.get(idx as usize).copied()
    }

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nose => "nose",
            Self::LeftShoulder => "left_shoulder",
            Self::RightShoulder => "right_shoulder",
            Self::LeftHip => "left_hip",
            Self::RightHip => "right_hip",
            Self::LeftKnee => "left_knee",
            Self::RightKnee => "right_knee",
            Self::LeftAnkle => "left_ankle",
            Self::RightAnkle => "right_ankle",
            Self::LeftFoot => "left_foot",
            Self::RightFoot => "right_foot",
        }
    }

    /// Side of the body, `None` for the nose
    pub fn side(&self) -> Option<Side> {
        match self {
            Self::Nose => None,
            Self::LeftShoulder | Self::LeftHip | Self::LeftKnee | Self::LeftAnkle | Self::LeftFoot => {
                Some(Side::Left)
            }
            _ => Some(Side::Right),
        }
    }

    /// The same joint on the other side of the body
    pub fn mirrored(&self) -> Self {
        match self {
            Self::Nose => Self::Nose,
            Self::LeftShoulder => Self::RightShoulder,
            Self::RightShoulder => Self::LeftShoulder,
            Self::LeftHip => Self::RightHip,
            Self::RightHip => Self::LeftHip,
            Self::LeftKnee => Self::RightKnee,
            Self::RightKnee => Self::LeftKnee,
            Self::LeftAnkle => Self::RightAnkle,
            Self::RightAnkle => Self::LeftAnkle,
            Self::LeftFoot => Self::RightFoot,
            Self::RightFoot => Self::LeftFoot,
        }
    }

    pub fn shoulder(side: Side) -> Self {
        match side {
            Side::Left => Self::LeftShoulder,
            Side::Right => Self::RightShoulder,
        }
    }

    pub fn hip(side: Side) -> Self {
        match side {
            Side::Left => Self::LeftHip,
            Side::Right => Self::RightHip,
        }
    }

    pub fn knee(side: Side) -> Self {
        match side {
            Side::Left => Self::LeftKnee,
            Side::Right => Self::RightKnee,
        }
    }

    pub fn ankle(side: Side) -> Self {
        match side {
            Side::Left => Self::LeftAnkle,
            Side::Right => Self::RightAnkle,
        }
    }

    pub fn foot(side: Side) -> Self {
        match side {
            Side::Left => Self::LeftFoot,
            Side::Right => Self::RightFoot,
        }
    }

    /// Skeleton connectivity of one body side, used for the overlay
    pub fn side_chain(side: Side) -> [(BodyLandmark, BodyLandmark); 4] {
        [
            (Self::shoulder(side), Self::hip(side)),
            (Self::hip(side), Self::knee(side)),
            (Self::knee(side), Self::ankle(side)),
            (Self::ankle(side), Self::foot(side)),
        ]
    }
}

impl fmt::Display for BodyLandmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 2D position in frame pixel space (y grows downwards)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position2D {
    pub x: f64,
    pub y: f64,
}

impl Position2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn to_nalgebra(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }
}

/// One named body keypoint with its visibility score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    #[serde(rename = "name")]
    pub kind: BodyLandmark,
    #[serde(flatten)]
    pub position: Position2D,
    pub visibility: f32,
}

impl Landmark {
    pub fn new(kind: BodyLandmark, position: Position2D, visibility: f32) -> Self {
        Self {
            kind,
            position,
            visibility,
        }
    }

    /// Reflect across the vertical centre line of a frame `frame_width` wide
    pub fn mirrored(&self, frame_width: f64) -> Self {
        Self {
            kind: self.kind.mirrored(),
            position: Position2D::new(frame_width - self.position.x, self.position.y),
            visibility: self.visibility,
        }
    }
}

/// Landmark set for one frame, indexed by [`BodyLandmark`]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Landmark>", into = "Vec<Landmark>")]
pub struct Pose {
    pub landmarks: [Option<Landmark>; BodyLandmark::COUNT],
}

impl Pose {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an unordered landmark list; later duplicates win
    pub fn from_landmarks<I: IntoIterator<Item = Landmark>>(landmarks: I) -> Self {
        let mut pose = Self::new();
        for landmark in landmarks {
            pose.insert(landmark);
        }
        pose
    }

    pub fn insert(&mut self, landmark: Landmark) {
        self.landmarks[landmark.kind.index()] = Some(landmark);
    }

    pub fn get(&self, kind: BodyLandmark) -> Option<&Landmark> {
        self.landmarks[kind.index()].as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Landmark> {
        self.landmarks.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.landmarks.iter().all(Option::is_none)
    }

    /// Horizontal mirror: x is reflected and left/right labels swap
    pub fn mirrored(&self, frame_width: f64) -> Self {
        Self::from_landmarks(self.iter().map(|lm| lm.mirrored(frame_width)))
    }
}

impl From<Vec<Landmark>> for Pose {
    fn from(landmarks: Vec<Landmark>) -> Self {
        Self::from_landmarks(landmarks)
    }
}

impl From<Pose> for Vec<Landmark> {
    fn from(pose: Pose) -> Self {
        pose.landmarks.into_iter().flatten().collect()
    }
}
