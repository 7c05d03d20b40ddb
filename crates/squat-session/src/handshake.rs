//! Difficulty selection at the start of a live session.
//!
//! The client gets a bounded wait to name a profile. Anything other than a
//! recognised name falls back to the most lenient profile so a session can
//! always start; the caller decides how to tell the client.

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use squat_form::{select_profile, ThresholdProfile};

#[derive(Debug, Clone, PartialEq)]
pub enum ProfileSelection {
    Selected(ThresholdProfile),
    /// The client named a profile outside the closed set
    Unrecognized { requested: String, profile: ThresholdProfile },
    /// No selector arrived within the wait
    TimedOut { profile: ThresholdProfile },
    /// The client skipped the selector (closed, or sent a frame first)
    Missing { profile: ThresholdProfile },
}

impl ProfileSelection {
    pub fn profile(&self) -> &ThresholdProfile {
        match self {
            ProfileSelection::Selected(profile)
            | ProfileSelection::Unrecognized { profile, .. }
            | ProfileSelection::TimedOut { profile }
            | ProfileSelection::Missing { profile } => profile,
        }
    }

    pub fn into_profile(self) -> ThresholdProfile {
        match self {
            ProfileSelection::Selected(profile)
            | ProfileSelection::Unrecognized { profile, .. }
            | ProfileSelection::TimedOut { profile }
            | ProfileSelection::Missing { profile } => profile,
        }
    }

    pub fn is_fallback(&self) -> bool {
        !matches!(self, ProfileSelection::Selected(_))
    }

    /// Notice for the client when the fallback profile was used
    pub fn notice(&self) -> Option<String> {
        let fallback = self.profile().difficulty;
        match self {
            ProfileSelection::Selected(_) => None,
            ProfileSelection::Unrecognized { requested, .. } => Some(format!(
                "unknown difficulty '{requested}', using {fallback}"
            )),
            ProfileSelection::TimedOut { .. } => {
                Some(format!("no difficulty selected in time, using {fallback}"))
            }
            ProfileSelection::Missing { .. } => {
                Some(format!("no difficulty selected, using {fallback}"))
            }
        }
    }
}

/// Resolve a profile from the first selector the client sends.
///
/// `selector` yields `None` when the client will not send one.
pub async fn negotiate_profile<F>(selector: F, wait: Duration) -> ProfileSelection
where
    F: Future<Output = Option<String>>,
{
    let selection = match tokio::time::timeout(wait, selector).await {
        Ok(Some(name)) => match select_profile(&name) {
            Ok(profile) => ProfileSelection::Selected(profile),
            Err(e) => {
                warn!(error = %e, "Falling back to the most lenient profile");
                ProfileSelection::Unrecognized {
                    requested: name.trim().to_string(),
                    profile: ThresholdProfile::most_lenient(),
                }
            }
        },
        Ok(None) => ProfileSelection::Missing {
            profile: ThresholdProfile::most_lenient(),
        },
        Err(_) => {
            warn!(wait_ms = wait.as_millis() as u64, "Difficulty selector timed out");
            ProfileSelection::TimedOut {
                profile: ThresholdProfile::most_lenient(),
            }
        }
    };

    info!(difficulty = %selection.profile().difficulty, "Session profile selected");
    selection
}
