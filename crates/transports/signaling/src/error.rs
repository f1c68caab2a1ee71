//! Error types for the signaling coordinator

use crate::session::InvalidTransition;
use crate::signaling::protocol::error_codes;

/// Result type alias using signaling Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while coordinating calls
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Callee has no open signaling connection
    #[error("Peer unavailable: {0}")]
    PeerUnavailable(String),

    /// A live session already exists for this pair (or the callee is already ringing)
    #[error("Session conflict: {0}")]
    SessionConflict(String),

    /// Operation not allowed in the session's current state
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// No session with this call ID
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    /// Sender is not a participant of the call
    #[error("Unauthorized sender: {0}")]
    UnauthorizedSender(String),

    /// Counterpart has no open connection, payload dropped
    #[error("Peer disconnected: {0}")]
    PeerDisconnected(String),

    /// Connection has not called `register` yet
    #[error("Not registered: {0}")]
    NotRegistered(String),

    /// Malformed or semantically invalid request parameters
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// Request names a method the coordinator does not implement
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Coordinator task is gone (shut down or panicked)
    #[error("Coordinator closed: {0}")]
    CoordinatorClosed(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<InvalidTransition> for Error {
    fn from(err: InvalidTransition) -> Self {
        Error::InvalidTransition(err.to_string())
    }
}

impl Error {
    /// Check if this error is a call-protocol error reported back to the client
    ///
    /// Protocol errors are recoverable: the coordinator answers the
    /// originating connection with a negative acknowledgment and carries on.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Error::PeerUnavailable(_)
                | Error::SessionConflict(_)
                | Error::InvalidTransition(_)
                | Error::UnknownSession(_)
                | Error::UnauthorizedSender(_)
                | Error::PeerDisconnected(_)
                | Error::NotRegistered(_)
                | Error::InvalidParams(_)
                | Error::MethodNotFound(_)
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }

    /// JSON-RPC error code for this error
    pub fn rpc_code(&self) -> i32 {
        match self {
            Error::PeerUnavailable(_) => error_codes::PEER_UNAVAILABLE,
            Error::SessionConflict(_) => error_codes::SESSION_CONFLICT,
            Error::InvalidTransition(_) => error_codes::INVALID_TRANSITION,
            Error::UnknownSession(_) => error_codes::UNKNOWN_SESSION,
            Error::UnauthorizedSender(_) => error_codes::UNAUTHORIZED_SENDER,
            Error::PeerDisconnected(_) => error_codes::PEER_DISCONNECTED,
            Error::NotRegistered(_) => error_codes::NOT_REGISTERED,
            Error::InvalidParams(_) => error_codes::INVALID_PARAMS,
            Error::MethodNotFound(_) => error_codes::METHOD_NOT_FOUND,
            _ => error_codes::INTERNAL_ERROR,
        }
    }

    /// Stable reason code sent in the error's `data.reason`
    pub fn reason(&self) -> &'static str {
        match self {
            Error::PeerUnavailable(_) => "PEER_UNAVAILABLE",
            Error::SessionConflict(_) => "SESSION_CONFLICT",
            Error::InvalidTransition(_) => "INVALID_TRANSITION",
            Error::UnknownSession(_) => "UNKNOWN_SESSION",
            Error::UnauthorizedSender(_) => "UNAUTHORIZED_SENDER",
            Error::PeerDisconnected(_) => "PEER_DISCONNECTED",
            Error::NotRegistered(_) => "NOT_REGISTERED",
            Error::InvalidParams(_) => "INVALID_PARAMS",
            Error::MethodNotFound(_) => "METHOD_NOT_FOUND",
            _ => "INTERNAL_ERROR",
        }
    }
}
