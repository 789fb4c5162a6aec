//! Node lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The execution state of a node within one run.
///
/// Transitions are monotonic: `Pending -> Ready -> Running -> {Done, Failed}`,
/// or `Pending/Ready -> Skipped`. A node never leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Waiting for upstream nodes.
    Pending,
    /// All inputs available, waiting for a worker.
    Ready,
    /// Dispatched to a worker.
    Running,
    /// Outputs are available, either computed or from cache.
    Done,
    /// The invocation or cache access failed.
    Failed,
    /// Never dispatched because of an upstream failure or a halted run.
    Skipped,
}

impl NodeState {
    /// Returns true for `Done`, `Failed` and `Skipped`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Skipped)
    }

    /// Returns true if `next` is a legal successor of `self`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Ready | Self::Skipped)
                | (Self::Ready, Self::Running | Self::Done | Self::Skipped)
                | (Self::Running, Self::Done | Self::Failed)
        )
    }
}

impl Default for NodeState {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(NodeState::Done.is_terminal());
        assert!(NodeState::Failed.is_terminal());
        assert!(NodeState::Skipped.is_terminal());
        assert!(!NodeState::Running.is_terminal());
        assert!(!NodeState::default().is_terminal());
    }

    #[test]
    fn test_transitions_are_monotonic() {
        assert!(NodeState::Pending.can_transition_to(NodeState::Ready));
        assert!(NodeState::Running.can_transition_to(NodeState::Failed));
        assert!(!NodeState::Done.can_transition_to(NodeState::Pending));
        assert!(!NodeState::Skipped.can_transition_to(NodeState::Ready));
        assert!(!NodeState::Pending.can_transition_to(NodeState::Running));
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&NodeState::Skipped).unwrap();
        assert_eq!(json, "\"skipped\"");
        assert_eq!(NodeState::Failed.to_string(), "failed");
    }
}
