//! Posture classification and form-fault detection.
//!
//! The knee-vertical angle is binned against the profile to drive the rep
//! state machine. Fault predicates are evaluated independently of the bin
//! and pass through a [`FaultDebouncer`] so single-frame jitter from the
//! pose estimator never reaches the user.

use std::fmt;

use serde::{Deserialize, Serialize};
use squat_core::Side;

use crate::machine::SquatState;
use crate::profile::{PostureBins, ThresholdProfile};

/// Discrete reading of one joint angle against a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostureBin {
    Normal,
    Transition,
    Pass,
    /// No bin matched; never advances the state machine
    Unknown,
}

/// Returns the bin whose inclusive range contains `angle`
pub fn classify(angle: f64, bins: &PostureBins) -> PostureBin {
    if bins.normal.contains(angle) {
        PostureBin::Normal
    } else if bins.transition.contains(angle) {
        PostureBin::Transition
    } else if bins.pass.contains(angle) {
        PostureBin::Pass
    } else {
        PostureBin::Unknown
    }
}

/// Form faults, named after the corrective cue shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Fault {
    /// Torso leans further forward than the band allows
    BendBackward = 0,
    /// Torso too upright, or leaning back, during a rep
    BendForward = 1,
    /// Shin leans so far the knee travels past the toes
    KneePastToe = 2,
    /// Stuck in the upper half of the squat for too long
    ShallowRep = 3,
    /// Hips dropped below the deepest acceptable bin
    TooDeep = 4,
}

impl Fault {
    pub const COUNT: usize = 5;

    pub const ALL: [Fault; Self::COUNT] = [
        Fault::BendBackward,
        Fault::BendForward,
        Fault::KneePastToe,
        Fault::ShallowRep,
        Fault::TooDeep,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Fault::BendBackward => "bend_backward",
            Fault::BendForward => "bend_forward",
            Fault::KneePastToe => "knee_past_toe",
            Fault::ShallowRep => "shallow_rep",
            Fault::TooDeep => "too_deep",
        }
    }

    /// Feedback cue rendered on the overlay
    pub fn message(&self) -> &'static str {
        match self {
            Fault::BendBackward => "BEND BACKWARDS",
            Fault::BendForward => "BEND FORWARD",
            Fault::KneePastToe => "KNEE FALLING OVER TOE",
            Fault::ShallowRep => "LOWER YOUR HIPS",
            Fault::TooDeep => "SQUAT TOO DEEP",
        }
    }

    fn bit(&self) -> u8 {
        1 << (*self as u8)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Small set of faults, iterated in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FaultSet(u8);

impl FaultSet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, fault: Fault) {
        self.0 |= fault.bit();
    }

    pub fn remove(&mut self, fault: Fault) {
        self.0 &= !fault.bit();
    }

    pub fn contains(&self, fault: Fault) -> bool {
        self.0 & fault.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = Fault> + '_ {
        Fault::ALL.into_iter().filter(move |f| self.contains(*f))
    }
}

impl FromIterator<Fault> for FaultSet {
    fn from_iter<I: IntoIterator<Item = Fault>>(iter: I) -> Self {
        let mut set = FaultSet::empty();
        for fault in iter {
            set.insert(fault);
        }
        set
    }
}

/// Joint angles measured on the analysed body side for one frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointAngles {
    pub side: Side,
    /// Hip-shoulder segment versus vertical, negative when leaning back
    pub torso_lean: f64,
    /// Hip-knee segment versus vertical
    pub knee_vertical: f64,
    /// Ankle-knee segment versus vertical, negative when the knee is
    /// behind the ankle
    pub shin_lean: f64,
    pub camera_offset: f64,
}

/// Rep-phase context some fault predicates depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultContext {
    pub state: SquatState,
    pub bottom_visited: bool,
    pub frames_descending: u32,
}

/// Raw, undebounced fault predicates for one frame
pub fn evaluate_faults(
    angles: &JointAngles,
    profile: &ThresholdProfile,
    ctx: &FaultContext,
) -> FaultSet {
    let mut faults = FaultSet::empty();
    let in_rep = ctx.state != SquatState::Standing;

    if angles.torso_lean > profile.torso_lean.max {
        faults.insert(Fault::BendBackward);
    } else if in_rep && angles.torso_lean < profile.torso_lean.min {
        faults.insert(Fault::BendForward);
    }

    if angles.shin_lean > profile.max_shin_lean {
        faults.insert(Fault::KneePastToe);
    }

    if ctx.state == SquatState::Transition
        && !ctx.bottom_visited
        && ctx.frames_descending >= profile.shallow_window_frames
    {
        faults.insert(Fault::ShallowRep);
    }

    if angles.knee_vertical > profile.too_deep_angle {
        faults.insert(Fault::TooDeep);
    }

    faults
}

/// Per-fault consecutive-frame counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultDebouncer {
    counters: [u32; Fault::COUNT],
    active: FaultSet,
}

impl FaultDebouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one frame of raw conditions and return the active set
    ///
    /// A counter saturates at `debounce_frames`, so it never exceeds the
    /// number of frames since it was last reset.
    pub fn update(&mut self, conditions: FaultSet, debounce_frames: u32) -> FaultSet {
        let threshold = debounce_frames.max(1);
        for fault in Fault::ALL {
            let counter = &mut self.counters[fault as usize];
            if conditions.contains(fault) {
                *counter = (*counter + 1).min(threshold);
            } else {
                *counter = 0;
            }

            if *counter >= threshold {
                self.active.insert(fault);
            } else {
                self.active.remove(fault);
            }
        }
        self.active
    }

    pub fn active(&self) -> FaultSet {
        self.active
    }

    pub fn counter(&self, fault: Fault) -> u32 {
        self.counters[fault as usize]
    }

    pub fn reset(&mut self) {
        self.counters = [0; Fault::COUNT];
        self.active = FaultSet::empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn angles(torso_lean: f64, knee_vertical: f64, shin_lean: f64) -> JointAngles {
        JointAngles {
            side: Side::Left,
            torso_lean,
            knee_vertical,
            shin_lean,
            camera_offset: 5.0,
        }
    }

    fn ctx(state: SquatState) -> FaultContext {
        FaultContext {
            state,
            bottom_visited: false,
            frames_descending: 0,
        }
    }

    #[test]
    fn test_classify_bins() {
        let bins = ThresholdProfile::beginner().knee_bins;
        assert_eq!(classify(0.0, &bins), PostureBin::Normal);
        assert_eq!(classify(32.0, &bins), PostureBin::Normal);
        assert_eq!(classify(35.0, &bins), PostureBin::Transition);
        assert_eq!(classify(65.0, &bins), PostureBin::Transition);
        assert_eq!(classify(70.0, &bins), PostureBin::Pass);
        assert_eq!(classify(95.0, &bins), PostureBin::Pass);
    }

    #[test]
    fn test_classify_gaps_are_unknown() {
        let bins = ThresholdProfile::beginner().knee_bins;
        assert_eq!(classify(33.5, &bins), PostureBin::Unknown);
        assert_eq!(classify(67.0, &bins), PostureBin::Unknown);
        assert_eq!(classify(120.0, &bins), PostureBin::Unknown);
        assert_eq!(classify(f64::NAN, &bins), PostureBin::Unknown);
    }

    #[test]
    fn test_pro_pass_bin_is_narrower() {
        let bins = ThresholdProfile::pro().knee_bins;
        assert_eq!(classify(75.0, &bins), PostureBin::Unknown);
        assert_eq!(classify(85.0, &bins), PostureBin::Pass);
    }

    #[test]
    fn test_torso_lean_faults() {
        let profile = ThresholdProfile::beginner();

        let forward_lean = evaluate_faults(&angles(60.0, 50.0, 20.0), &profile, &ctx(SquatState::Transition));
        assert!(forward_lean.contains(Fault::BendBackward));

        let upright_descending = evaluate_faults(&angles(2.0, 50.0, 20.0), &profile, &ctx(SquatState::Transition));
        assert!(upright_descending.contains(Fault::BendForward));

        let upright_standing = evaluate_faults(&angles(2.0, 10.0, 5.0), &profile, &ctx(SquatState::Standing));
        assert!(upright_standing.is_empty());
    }

    #[test]
    fn test_knee_past_toe_and_too_deep() {
        let profile = ThresholdProfile::pro();
        let faults = evaluate_faults(&angles(30.0, 100.0, 40.0), &profile, &ctx(SquatState::Bottom));
        assert!(faults.contains(Fault::KneePastToe));
        assert!(faults.contains(Fault::TooDeep));
        assert_eq!(faults.len(), 2);
    }

    #[test]
    fn test_backward_leans_never_cue_forward_faults() {
        let profile = ThresholdProfile::beginner();

        let leaning_back = evaluate_faults(&angles(-60.0, 10.0, -40.0), &profile, &ctx(SquatState::Standing));
        assert!(leaning_back.is_empty());

        let descending = evaluate_faults(&angles(-60.0, 50.0, -40.0), &profile, &ctx(SquatState::Transition));
        assert!(!descending.contains(Fault::BendBackward));
        assert!(!descending.contains(Fault::KneePastToe));
        assert!(descending.contains(Fault::BendForward));
    }

    #[test]
    fn test_shallow_rep_window() {
        let profile = ThresholdProfile::pro();
        let mut context = ctx(SquatState::Transition);
        context.frames_descending = profile.shallow_window_frames - 1;
        assert!(!evaluate_faults(&angles(30.0, 50.0, 20.0), &profile, &context).contains(Fault::ShallowRep));

        context.frames_descending = profile.shallow_window_frames;
        assert!(evaluate_faults(&angles(30.0, 50.0, 20.0), &profile, &context).contains(Fault::ShallowRep));

        context.bottom_visited = true;
        assert!(!evaluate_faults(&angles(30.0, 50.0, 20.0), &profile, &context).contains(Fault::ShallowRep));
    }

    #[test]
    fn test_debounce_requires_consecutive_frames() {
        let mut debouncer = FaultDebouncer::new();
        let knee: FaultSet = [Fault::KneePastToe].into_iter().collect();

        assert!(debouncer.update(knee, 3).is_empty());
        assert!(debouncer.update(knee, 3).is_empty());
        // Interruption resets the run
        assert!(debouncer.update(FaultSet::empty(), 3).is_empty());
        assert_eq!(debouncer.counter(Fault::KneePastToe), 0);
        assert!(debouncer.update(knee, 3).is_empty());
        assert!(debouncer.update(knee, 3).is_empty());
        assert!(debouncer.update(knee, 3).contains(Fault::KneePastToe));
    }

    #[test]
    fn test_debounce_releases_immediately() {
        let mut debouncer = FaultDebouncer::new();
        let deep: FaultSet = [Fault::TooDeep].into_iter().collect();
        for _ in 0..10 {
            debouncer.update(deep, 2);
        }
        assert!(debouncer.active().contains(Fault::TooDeep));
        assert!(debouncer.counter(Fault::TooDeep) <= 2);

        assert!(debouncer.update(FaultSet::empty(), 2).is_empty());
    }

    #[test]
    fn test_fault_set_iterates_in_order() {
        let set: FaultSet = [Fault::TooDeep, Fault::BendBackward].into_iter().collect();
        let listed: Vec<Fault> = set.iter().collect();
        assert_eq!(listed, vec![Fault::BendBackward, Fault::TooDeep]);
    }
}
