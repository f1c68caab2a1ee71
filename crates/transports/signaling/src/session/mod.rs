//! Call sessions: state machine and owned session storage

mod state;
mod table;

pub use state::{CallState, CallTransition, CancelReason, InvalidTransition, TransitionOutcome};
pub use table::{CallId, CallSession, SessionSnapshot, SessionTable};
