//! Session table: owned storage for every call attempt

use super::state::{CallState, CallTransition, TransitionOutcome};
use crate::presence::UserIdentity;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Instant, SystemTime};
use tokio::task::AbortHandle;
use tracing::debug;

/// Unique call identifier
pub type CallId = String;

/// One call attempt between a caller and a callee
#[derive(Debug)]
pub struct CallSession {
    pub call_id: CallId,
    pub caller_id: UserIdentity,
    pub callee_id: UserIdentity,
    pub state: CallState,
    /// Unix timestamp in milliseconds, for the wire
    pub created_at_ms: u64,
    pub ended_at: Option<Instant>,
    ring_timer: Option<AbortHandle>,
}

impl CallSession {
    /// Create a new session in `Ringing`
    pub fn new(caller_id: UserIdentity, callee_id: UserIdentity) -> Self {
        Self {
            call_id: format!("call-{}", uuid::Uuid::new_v4()),
            caller_id,
            callee_id,
            state: CallState::Ringing,
            created_at_ms: current_timestamp_ms(),
            ended_at: None,
            ring_timer: None,
        }
    }

    pub fn is_participant(&self, identity: &str) -> bool {
        self.caller_id == identity || self.callee_id == identity
    }

    /// The other participant, if `identity` is one of the two
    pub fn counterpart(&self, identity: &str) -> Option<&UserIdentity> {
        if self.caller_id == identity {
            Some(&self.callee_id)
        } else if self.callee_id == identity {
            Some(&self.caller_id)
        } else {
            None
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            call_id: self.call_id.clone(),
            caller_id: self.caller_id.clone(),
            callee_id: self.callee_id.clone(),
            state: self.state,
            created_at_ms: self.created_at_ms,
        }
    }

    /// Apply a transition, stopping the ring timer once the call leaves `Ringing`
    fn apply(&mut self, transition: CallTransition) -> Result<TransitionOutcome> {
        let outcome = self.state.next(transition)?;
        if let TransitionOutcome::Applied { to, .. } = outcome {
            self.state = to;
            if !to.is_ringing() {
                if let Some(timer) = self.ring_timer.take() {
                    timer.abort();
                }
            }
            if to.is_terminal() {
                self.ended_at = Some(Instant::now());
            }
        }
        Ok(outcome)
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        if let Some(timer) = self.ring_timer.take() {
            timer.abort();
        }
    }
}

/// Read-only view of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub call_id: CallId,
    pub caller_id: UserIdentity,
    pub callee_id: UserIdentity,
    pub state: CallState,
    pub created_at_ms: u64,
}

/// Unordered participant pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PairKey(UserIdentity, UserIdentity);

impl PairKey {
    fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self(a.to_string(), b.to_string())
        } else {
            Self(b.to_string(), a.to_string())
        }
    }
}

/// All sessions plus the indexes that enforce the call invariants
///
/// - at most one non-terminal session per unordered pair
/// - an identity is the callee of at most one ringing session
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<CallId, CallSession>,
    live_pairs: HashMap<PairKey, CallId>,
    ringing_callees: HashMap<UserIdentity, CallId>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ringing session between `caller` and `callee`
    ///
    /// # Errors
    ///
    /// `Error::SessionConflict` if the pair already has a live session or the
    /// callee is already ringing for another call.
    pub fn create(&mut self, caller: &str, callee: &str) -> Result<&CallSession> {
        let pair = PairKey::new(caller, callee);
        if let Some(existing) = self.live_pairs.get(&pair) {
            return Err(Error::SessionConflict(format!(
                "{} and {} already share call {}",
                caller, callee, existing
            )));
        }
        if let Some(existing) = self.ringing_callees.get(callee) {
            return Err(Error::SessionConflict(format!(
                "{} is already ringing for call {}",
                callee, existing
            )));
        }

        let session = CallSession::new(caller.to_string(), callee.to_string());
        let call_id = session.call_id.clone();
        debug!(call_id = %call_id, caller = %caller, callee = %callee, "Session created");

        self.live_pairs.insert(pair, call_id.clone());
        self.ringing_callees
            .insert(callee.to_string(), call_id.clone());
        Ok(&*self.sessions.entry(call_id).or_insert(session))
    }

    pub fn get(&self, call_id: &str) -> Option<&CallSession> {
        self.sessions.get(call_id)
    }

    /// Apply a transition and keep the indexes in step
    ///
    /// # Errors
    ///
    /// `Error::UnknownSession` if no such call, `Error::InvalidTransition` if
    /// the state machine refuses the transition.
    pub fn transition(
        &mut self,
        call_id: &str,
        transition: CallTransition,
    ) -> Result<TransitionOutcome> {
        let session = self
            .sessions
            .get_mut(call_id)
            .ok_or_else(|| Error::UnknownSession(call_id.to_string()))?;

        let outcome = session.apply(transition)?;
        if let TransitionOutcome::Applied { from, to } = outcome {
            debug!(call_id = %call_id, from = %from, to = %to, "Session transition");
            if from.is_ringing() {
                self.ringing_callees.remove(&session.callee_id);
            }
            if to.is_terminal() {
                self.live_pairs
                    .remove(&PairKey::new(&session.caller_id, &session.callee_id));
            }
        }
        Ok(outcome)
    }

    /// Attach the ring timer so it is aborted when the call leaves `Ringing`
    ///
    /// The handle is aborted immediately if the session is gone or no longer ringing.
    pub fn set_ring_timer(&mut self, call_id: &str, timer: AbortHandle) {
        match self.sessions.get_mut(call_id) {
            Some(session) if session.state.is_ringing() => {
                if let Some(previous) = session.ring_timer.replace(timer) {
                    previous.abort();
                }
            }
            _ => timer.abort(),
        }
    }

    /// IDs of non-terminal sessions `identity` takes part in
    pub fn live_sessions_of(&self, identity: &str) -> Vec<CallId> {
        self.sessions
            .values()
            .filter(|s| !s.state.is_terminal() && s.is_participant(identity))
            .map(|s| s.call_id.clone())
            .collect()
    }

    /// IDs of every non-terminal session
    pub fn live_sessions(&self) -> Vec<CallId> {
        self.sessions
            .values()
            .filter(|s| !s.state.is_terminal())
            .map(|s| s.call_id.clone())
            .collect()
    }

    /// Remove a session regardless of state, cleaning its index entries
    pub fn remove(&mut self, call_id: &str) -> Option<CallSession> {
        let session = self.sessions.remove(call_id)?;
        if self.ringing_callees.get(&session.callee_id) == Some(&session.call_id) {
            self.ringing_callees.remove(&session.callee_id);
        }
        let pair = PairKey::new(&session.caller_id, &session.callee_id);
        if self.live_pairs.get(&pair) == Some(&session.call_id) {
            self.live_pairs.remove(&pair);
        }
        Some(session)
    }

    /// Remove a session only if it has reached a terminal state
    pub fn reap(&mut self, call_id: &str) -> Option<CallSession> {
        match self.sessions.get(call_id) {
            Some(session) if session.state.is_terminal() => self.remove(call_id),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of non-terminal sessions
    pub fn live_count(&self) -> usize {
        self.live_pairs.len()
    }
}

fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
