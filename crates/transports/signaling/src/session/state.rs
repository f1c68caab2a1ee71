//! Call state machine

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a call attempt as seen by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// Invite delivered, waiting for the callee
    Ringing,
    /// Callee accepted, peers are negotiating media
    Accepted,
    /// A participant reported media flowing; the media transport owns the call now
    Connected,
    /// Callee declined
    Rejected,
    /// Callee did not answer before the ring timeout
    TimedOut,
    /// Ended by hang-up, disconnect, preemption or shutdown
    Cancelled,
}

impl CallState {
    /// Terminal states accept no further progress; the session only waits to be reaped
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::TimedOut | Self::Cancelled)
    }

    pub fn is_ringing(&self) -> bool {
        matches!(self, Self::Ringing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ringing => "ringing",
            Self::Accepted => "accepted",
            Self::Connected => "connected",
            Self::Rejected => "rejected",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }

    /// Compute the effect of `transition` on this state
    ///
    /// Late members of the cancel/timeout/reject family that lose a race
    /// against an earlier terminal transition come back as
    /// [`TransitionOutcome::Ignored`] instead of an error.
    pub fn next(self, transition: CallTransition) -> Result<TransitionOutcome, InvalidTransition> {
        use CallState::*;
        use CallTransition::*;

        let to = match (self, transition) {
            (Ringing, Accept) => Accepted,
            (Ringing, Reject) => Rejected,
            (Ringing, Timeout) => TimedOut,
            (Accepted, MediaConnected) => Connected,
            (Ringing | Accepted | Connected, Cancel(_)) => Cancelled,

            // Races lost quietly
            (Connected, MediaConnected) => return Ok(TransitionOutcome::Ignored { state: self }),
            (Accepted | Connected, Timeout) => return Ok(TransitionOutcome::Ignored { state: self }),
            (Rejected | TimedOut | Cancelled, Timeout | Cancel(_)) => {
                return Ok(TransitionOutcome::Ignored { state: self })
            }
            (Rejected | Cancelled, Reject) => return Ok(TransitionOutcome::Ignored { state: self }),

            (state, transition) => return Err(InvalidTransition { state, transition }),
        };

        Ok(TransitionOutcome::Applied { from: self, to })
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a call was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// A participant's connection closed
    PeerDisconnected,
    /// A participant hung up explicitly
    HungUp,
    /// A participant registered again from another connection
    ConnectionReplaced,
    /// The server is shutting down
    ServerShutdown,
}

impl CancelReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PeerDisconnected => "peer_disconnected",
            Self::HungUp => "hung_up",
            Self::ConnectionReplaced => "connection_replaced",
            Self::ServerShutdown => "server_shutdown",
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that move a call between states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTransition {
    Accept,
    Reject,
    MediaConnected,
    Timeout,
    Cancel(CancelReason),
}

/// Result of applying a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// State changed
    Applied { from: CallState, to: CallState },
    /// Transition was a harmless no-op in `state`
    Ignored { state: CallState },
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }

    /// State after the transition
    pub fn state(&self) -> CallState {
        match self {
            Self::Applied { to, .. } => *to,
            Self::Ignored { state } => *state,
        }
    }
}

/// Rejected state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot apply {transition:?} to a call in state {state}")]
pub struct InvalidTransition {
    pub state: CallState,
    pub transition: CallTransition,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [CallState; 6] = [
        CallState::Ringing,
        CallState::Accepted,
        CallState::Connected,
        CallState::Rejected,
        CallState::TimedOut,
        CallState::Cancelled,
    ];

    #[test]
    fn test_happy_path() {
        let outcome = CallState::Ringing.next(CallTransition::Accept).unwrap();
        assert_eq!(
            outcome,
            TransitionOutcome::Applied {
                from: CallState::Ringing,
                to: CallState::Accepted
            }
        );

        let outcome = CallState::Accepted
            .next(CallTransition::MediaConnected)
            .unwrap();
        assert_eq!(outcome.state(), CallState::Connected);
        assert!(outcome.is_applied());
    }

    #[test]
    fn test_ringing_exits() {
        assert_eq!(
            CallState::Ringing.next(CallTransition::Reject).unwrap().state(),
            CallState::Rejected
        );
        assert_eq!(
            CallState::Ringing.next(CallTransition::Timeout).unwrap().state(),
            CallState::TimedOut
        );
        assert_eq!(
            CallState::Ringing
                .next(CallTransition::Cancel(CancelReason::PeerDisconnected))
                .unwrap()
                .state(),
            CallState::Cancelled
        );
    }

    #[test]
    fn test_accept_only_from_ringing() {
        for state in ALL_STATES.iter().filter(|s| !s.is_ringing()) {
            let err = state.next(CallTransition::Accept).unwrap_err();
            assert_eq!(err.state, *state);
            assert_eq!(err.transition, CallTransition::Accept);
        }
    }

    #[test]
    fn test_reject_after_timeout_is_invalid() {
        assert!(CallState::TimedOut.next(CallTransition::Reject).is_err());
        assert!(CallState::Accepted.next(CallTransition::Reject).is_err());
        assert!(CallState::Connected.next(CallTransition::Reject).is_err());
    }

    #[test]
    fn test_reject_after_cancel_is_noop() {
        let outcome = CallState::Cancelled.next(CallTransition::Reject).unwrap();
        assert_eq!(
            outcome,
            TransitionOutcome::Ignored {
                state: CallState::Cancelled
            }
        );
        assert!(!CallState::Rejected
            .next(CallTransition::Reject)
            .unwrap()
            .is_applied());
    }

    #[test]
    fn test_cancel_and_timeout_never_fail() {
        for state in ALL_STATES {
            let cancel = state.next(CallTransition::Cancel(CancelReason::HungUp));
            assert!(cancel.is_ok(), "cancel failed from {}", state);
            assert_eq!(cancel.unwrap().is_applied(), !state.is_terminal());

            let timeout = state.next(CallTransition::Timeout).unwrap();
            assert_eq!(timeout.is_applied(), state.is_ringing());
        }
    }

    #[test]
    fn test_media_connected_requires_acceptance() {
        assert!(CallState::Ringing
            .next(CallTransition::MediaConnected)
            .is_err());
        assert!(!CallState::Connected
            .next(CallTransition::MediaConnected)
            .unwrap()
            .is_applied());
        assert!(CallState::Cancelled
            .next(CallTransition::MediaConnected)
            .is_err());
    }

    #[test]
    fn test_serialized_names() {
        assert_eq!(
            serde_json::to_value(CallState::TimedOut).unwrap(),
            serde_json::json!("timed_out")
        );
        assert_eq!(
            serde_json::to_value(CancelReason::ConnectionReplaced).unwrap(),
            serde_json::json!("connection_replaced")
        );
        assert_eq!(CancelReason::HungUp.to_string(), "hung_up");
    }
}
