//! Lock transition tracking.
//!
//! ```text
//! Unlocked ──locked=true──▶ Locked      emits "user X locked the system"
//! Locked   ──locked=false─▶ Unlocked    emits "user X unlocked the system"
//! ```
//!
//! Repeated observations of the same state emit nothing. The user name only
//! decorates the message; it never decides a transition.

use chrono::{DateTime, Duration, Utc};

const UNKNOWN_USER: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    Locked,
    Unlocked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub kind: TransitionKind,
    pub message: String,
    /// How long the previous state lasted. `None` before the first edge.
    pub previous_state_lasted: Option<Duration>,
}

#[derive(Debug)]
pub struct TransitionTracker {
    last_locked: bool,
    last_edge_at: Option<DateTime<Utc>>,
}

impl Default for TransitionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TransitionTracker {
    /// Starts out unlocked, so an initial unlocked observation is silent.
    pub fn new() -> Self {
        Self {
            last_locked: false,
            last_edge_at: None,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.last_locked
    }

    pub fn observe(&mut self, locked: bool, user: Option<&str>) -> Option<Transition> {
        self.observe_at(locked, user, Utc::now())
    }

    pub fn observe_at(
        &mut self,
        locked: bool,
        user: Option<&str>,
        at: DateTime<Utc>,
    ) -> Option<Transition> {
        if locked == self.last_locked {
            return None;
        }

        let kind = if locked {
            TransitionKind::Locked
        } else {
            TransitionKind::Unlocked
        };
        let previous_state_lasted = self.last_edge_at.map(|since| at - since);
        self.last_locked = locked;
        self.last_edge_at = Some(at);

        Some(Transition {
            kind,
            message: transition_message(kind, user),
            previous_state_lasted,
        })
    }
}

pub fn transition_message(kind: TransitionKind, user: Option<&str>) -> String {
    let user = user
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(UNKNOWN_USER);
    match kind {
        TransitionKind::Locked => format!("user {user} locked the system"),
        TransitionKind::Unlocked => format!("user {user} unlocked the system"),
    }
}
