//! The squat repetition state machine.
//!
//! One [`RepStateMachine`] exists per session and is stepped exactly once per
//! frame, strictly in frame order. It owns every counter of the session; no
//! state is shared across sessions.
//!
//! ```text
//!   STANDING ──TRANSITION──▶ TRANSITION ──PASS──▶ BOTTOM
//!       ▲                      │   ▲                │
//!       └────────NORMAL────────┘   └──TRANSITION────┘
//! ```
//!
//! A rep is counted on the `TRANSITION → STANDING` edge only if `BOTTOM` was
//! visited since the machine last left `STANDING`.

use std::fmt;

use serde::{Deserialize, Serialize};
use squat_core::Timestamp;

use crate::classifier::{
    classify, evaluate_faults, Fault, FaultContext, FaultDebouncer, FaultSet, JointAngles,
    PostureBin,
};
use crate::profile::ThresholdProfile;

/// Movement phase of the squat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SquatState {
    #[default]
    Standing,
    Transition,
    Bottom,
}

impl SquatState {
    pub fn label(&self) -> &'static str {
        match self {
            SquatState::Standing => "STANDING",
            SquatState::Transition => "TRANSITION",
            SquatState::Bottom => "BOTTOM",
        }
    }

    /// Legal-edge table. `None` means the bin holds the current state.
    pub fn next(self, bin: PostureBin) -> Option<SquatState> {
        match (self, bin) {
            (SquatState::Standing, PostureBin::Transition) => Some(SquatState::Transition),
            (SquatState::Transition, PostureBin::Pass) => Some(SquatState::Bottom),
            (SquatState::Bottom, PostureBin::Transition) => Some(SquatState::Transition),
            (SquatState::Transition, PostureBin::Normal) => Some(SquatState::Standing),
            _ => None,
        }
    }
}

impl fmt::Display for SquatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What the landmark analysis could make of one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Observation {
    /// Usable joint angles on one body side
    Measured(JointAngles),
    /// Subject not side-on to the camera; classification skipped
    Misaligned { offset_angle: f64 },
    /// Landmarks present but neither side is usable
    Unmeasurable,
    /// The pose estimator found no subject
    NoPose,
}

/// Emitted exactly once per completed rep for downstream consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepCompleted {
    pub faulted: bool,
    pub rep_count: u32,
    pub improper_rep_count: u32,
    pub faults: Vec<Fault>,
    pub timestamp: Timestamp,
}

/// Per-session counters, owned by one state machine
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub current_state: SquatState,
    pub previous_state: SquatState,
    pub rep_count: u32,
    pub improper_rep_count: u32,
    /// Time of the last state change, set on the first frame
    pub inactive_since: Option<Timestamp>,
    pub inactive: bool,
    bottom_visited: bool,
    cycle_faults: FaultSet,
    frames_descending: u32,
    debouncer: FaultDebouncer,
}

impl SessionState {
    fn new() -> Self {
        Self {
            current_state: SquatState::Standing,
            previous_state: SquatState::Standing,
            rep_count: 0,
            improper_rep_count: 0,
            inactive_since: None,
            inactive: false,
            bottom_visited: false,
            cycle_faults: FaultSet::empty(),
            frames_descending: 0,
            debouncer: FaultDebouncer::new(),
        }
    }

    pub fn bottom_visited(&self) -> bool {
        self.bottom_visited
    }

    pub fn active_faults(&self) -> FaultSet {
        self.debouncer.active()
    }

    pub fn fault_counter(&self, fault: Fault) -> u32 {
        self.debouncer.counter(fault)
    }
}

/// Result of stepping the machine with one frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameAnalysis {
    pub observation: Observation,
    pub bin: PostureBin,
    pub transition: Option<(SquatState, SquatState)>,
    pub active_faults: FaultSet,
    pub rep: Option<RepCompleted>,
    pub inactive: bool,
}

impl FrameAnalysis {
    pub fn camera_misaligned(&self) -> bool {
        matches!(self.observation, Observation::Misaligned { .. })
    }

    pub fn angles(&self) -> Option<&JointAngles> {
        match &self.observation {
            Observation::Measured(angles) => Some(angles),
            _ => None,
        }
    }
}

/// Squat rep counter and fault tracker for one session
#[derive(Debug, Clone)]
pub struct RepStateMachine {
    profile: ThresholdProfile,
    state: SessionState,
}

impl RepStateMachine {
    pub fn new(profile: ThresholdProfile) -> Self {
        Self {
            profile,
            state: SessionState::new(),
        }
    }

    pub fn profile(&self) -> &ThresholdProfile {
        &self.profile
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Advance by one frame
    pub fn step(&mut self, observation: Observation, now: Timestamp) -> FrameAnalysis {
        let since = *self.state.inactive_since.get_or_insert(now);
        let mut bin = PostureBin::Unknown;
        let mut transition = None;
        let mut rep = None;

        if let Observation::Measured(angles) = &observation {
            bin = classify(angles.knee_vertical, &self.profile.knee_bins);
            self.track_faults(angles);

            let current = self.state.current_state;
            match current.next(bin) {
                Some(next) => {
                    transition = Some((current, next));
                    rep = self.apply_transition(next, now);
                }
                None if current == SquatState::Transition && !self.state.bottom_visited => {
                    self.state.frames_descending = self.state.frames_descending.saturating_add(1);
                }
                None => {}
            }
        }

        let inactive = transition.is_none()
            && now.duration_since(since) > self.profile.inactive_timeout;
        if inactive {
            if !self.state.inactive {
                tracing::debug!(
                    state = %self.state.current_state,
                    "No state change within inactivity timeout"
                );
            }
            self.state.debouncer.reset();
        }
        self.state.inactive = inactive;

        FrameAnalysis {
            observation,
            bin,
            transition,
            active_faults: self.state.debouncer.active(),
            rep,
            inactive,
        }
    }

    fn track_faults(&mut self, angles: &JointAngles) {
        let ctx = FaultContext {
            state: self.state.current_state,
            bottom_visited: self.state.bottom_visited,
            frames_descending: self.state.frames_descending,
        };
        let raw = evaluate_faults(angles, &self.profile, &ctx);
        let active = self.state.debouncer.update(raw, self.profile.debounce_frames);

        if self.state.current_state != SquatState::Standing {
            for fault in active.iter() {
                self.state.cycle_faults.insert(fault);
            }
        }
    }

    fn apply_transition(&mut self, next: SquatState, now: Timestamp) -> Option<RepCompleted> {
        let previous = self.state.current_state;
        self.state.previous_state = previous;
        self.state.current_state = next;
        self.state.inactive_since = Some(now);

        match next {
            SquatState::Bottom => {
                self.state.bottom_visited = true;
                self.state.frames_descending = 0;
                None
            }
            SquatState::Transition => {
                if previous == SquatState::Standing {
                    self.state.bottom_visited = false;
                    self.state.cycle_faults = FaultSet::empty();
                    self.state.frames_descending = 0;
                }
                None
            }
            SquatState::Standing => {
                let completed = self.state.bottom_visited;
                let faults = self.state.cycle_faults;
                self.state.bottom_visited = false;
                self.state.cycle_faults = FaultSet::empty();
                self.state.frames_descending = 0;

                if !completed {
                    return None;
                }

                let faulted = !faults.is_empty();
                self.state.rep_count += 1;
                if faulted {
                    self.state.improper_rep_count += 1;
                }
                tracing::info!(
                    rep_count = self.state.rep_count,
                    improper_rep_count = self.state.improper_rep_count,
                    faulted,
                    "Rep completed"
                );

                Some(RepCompleted {
                    faulted,
                    rep_count: self.state.rep_count,
                    improper_rep_count: self.state.improper_rep_count,
                    faults: faults.iter().collect(),
                    timestamp: now,
                })
            }
        }
    }
}
