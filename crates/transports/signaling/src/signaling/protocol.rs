//! JSON-RPC 2.0 call-signaling protocol types

use crate::session::{CallId, CallState, CancelReason};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// JSON-RPC 2.0 protocol version
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    /// Protocol version (must be "2.0")
    pub jsonrpc: String,

    /// Method name to invoke
    pub method: String,

    /// Method parameters
    #[serde(default)]
    pub params: Value,

    /// Request ID for matching with response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 response (success)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    /// Protocol version (must be "2.0")
    pub jsonrpc: String,

    /// Result data
    pub result: Value,

    /// Request ID this response corresponds to
    pub id: Value,
}

/// JSON-RPC 2.0 error response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    /// Protocol version (must be "2.0")
    pub jsonrpc: String,

    /// Error details
    pub error: ErrorObject,

    /// Request ID this error corresponds to
    pub id: Value,
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorObject {
    /// Error code
    pub code: i32,

    /// Human-readable error message
    pub message: String,

    /// Additional error data, `{"reason": ...}` for every error this server sends
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC 2.0 error codes
pub mod error_codes {
    /// Invalid JSON was received
    pub const PARSE_ERROR: i32 = -32700;

    /// The JSON sent is not a valid Request object
    pub const INVALID_REQUEST: i32 = -32600;

    /// The method does not exist / is not available
    pub const METHOD_NOT_FOUND: i32 = -32601;

    /// Invalid method parameter(s)
    pub const INVALID_PARAMS: i32 = -32602;

    /// Internal JSON-RPC error
    pub const INTERNAL_ERROR: i32 = -32603;

    // Call-signaling error codes

    /// Callee has no open connection
    pub const PEER_UNAVAILABLE: i32 = -32010;

    /// A live call already exists for the pair, or the callee is ringing
    pub const SESSION_CONFLICT: i32 = -32011;

    /// Operation not allowed in the call's current state
    pub const INVALID_TRANSITION: i32 = -32012;

    /// No call with this ID
    pub const UNKNOWN_SESSION: i32 = -32013;

    /// Sender is not a participant of the call
    pub const UNAUTHORIZED_SENDER: i32 = -32014;

    /// Counterpart is gone, payload dropped
    pub const PEER_DISCONNECTED: i32 = -32015;

    /// Connection must `register` first
    pub const NOT_REGISTERED: i32 = -32016;
}

/// Inbound method names
pub mod methods {
    pub const REGISTER: &str = "register";
    pub const INITIATE_CALL: &str = "initiateCall";
    pub const ACCEPT_CALL: &str = "acceptCall";
    pub const REJECT_CALL: &str = "rejectCall";
    pub const SIGNAL: &str = "signal";
    pub const HANG_UP: &str = "hangUp";
    pub const CALL_CONNECTED: &str = "callConnected";
}

/// Parameters for `register`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegisterParams {
    /// Identity handed out by the authentication provider
    pub identity: String,
}

/// Parameters for `initiateCall`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitiateCallParams {
    pub callee_id: String,

    /// Opaque payload forwarded with the invite (typically the caller's offer)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// Parameters for `acceptCall`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AcceptCallParams {
    pub call_id: CallId,

    /// Opaque payload forwarded to the caller (typically the callee's answer)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// Parameters for `rejectCall`, `hangUp` and `callConnected`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallIdParams {
    pub call_id: CallId,
}

/// Parameters for `signal`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SignalParams {
    pub call_id: CallId,

    /// Opaque negotiation payload (SDP, ICE candidate, ...)
    pub payload: Value,
}

/// Typed client request, decoded from a [`JsonRpcRequest`]
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    Register(RegisterParams),
    InitiateCall(InitiateCallParams),
    AcceptCall(AcceptCallParams),
    RejectCall(CallIdParams),
    Signal(SignalParams),
    HangUp(CallIdParams),
    CallConnected(CallIdParams),
}

impl ClientRequest {
    /// Decode a JSON-RPC request into a typed client request
    ///
    /// # Errors
    ///
    /// `Error::MethodNotFound` for an unknown method, `Error::InvalidParams`
    /// when the parameters do not match the method.
    pub fn from_rpc(request: &JsonRpcRequest) -> Result<Self> {
        let params = request.params.clone();
        let decoded = match request.method.as_str() {
            methods::REGISTER => {
                let params: RegisterParams = decode_params(&request.method, params)?;
                require_non_empty("identity", &params.identity)?;
                ClientRequest::Register(params)
            }
            methods::INITIATE_CALL => {
                let params: InitiateCallParams = decode_params(&request.method, params)?;
                require_non_empty("calleeId", &params.callee_id)?;
                ClientRequest::InitiateCall(params)
            }
            methods::ACCEPT_CALL => ClientRequest::AcceptCall(decode_params(&request.method, params)?),
            methods::REJECT_CALL => ClientRequest::RejectCall(decode_params(&request.method, params)?),
            methods::SIGNAL => ClientRequest::Signal(decode_params(&request.method, params)?),
            methods::HANG_UP => ClientRequest::HangUp(decode_params(&request.method, params)?),
            methods::CALL_CONNECTED => {
                ClientRequest::CallConnected(decode_params(&request.method, params)?)
            }
            other => return Err(Error::MethodNotFound(format!("Unknown method: {}", other))),
        };
        Ok(decoded)
    }

    /// Method name
    pub fn method_name(&self) -> &'static str {
        match self {
            ClientRequest::Register(_) => methods::REGISTER,
            ClientRequest::InitiateCall(_) => methods::INITIATE_CALL,
            ClientRequest::AcceptCall(_) => methods::ACCEPT_CALL,
            ClientRequest::RejectCall(_) => methods::REJECT_CALL,
            ClientRequest::Signal(_) => methods::SIGNAL,
            ClientRequest::HangUp(_) => methods::HANG_UP,
            ClientRequest::CallConnected(_) => methods::CALL_CONNECTED,
        }
    }
}

fn decode_params<T: serde::de::DeserializeOwned>(method: &str, params: Value) -> Result<T> {
    serde_json::from_value(params)
        .map_err(|e| Error::InvalidParams(format!("Invalid params for {}: {}", method, e)))
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidParams(format!("{} must not be empty", field)));
    }
    Ok(())
}

/// Result of `register`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegisterResult {
    pub identity: String,
    /// True if another connection held this identity and was preempted
    pub replaced: bool,
}

/// Result of `initiateCall`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitiateCallResult {
    pub call_id: CallId,
    pub callee_id: String,
    pub state: CallState,
}

/// Result of the state-changing call methods
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallStateResult {
    pub call_id: CallId,
    pub state: CallState,
    /// False if the request was an acknowledged no-op
    pub applied: bool,
}

/// Result of `signal`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SignalResult {
    pub call_id: CallId,
    pub delivered: bool,
}

/// Server-to-client notifications (JSON-RPC requests without an `id`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method", content = "params", rename_all = "camelCase")]
pub enum ServerNotification {
    /// Sent to the callee when a call is placed
    #[serde(rename_all = "camelCase")]
    IncomingCall {
        call_id: CallId,
        caller_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },

    /// Sent to the caller when the callee accepts
    #[serde(rename_all = "camelCase")]
    CallAccepted {
        call_id: CallId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },

    #[serde(rename_all = "camelCase")]
    CallRejected { call_id: CallId },

    /// Sent to both participants when the ring timeout expires
    #[serde(rename_all = "camelCase")]
    CallTimedOut { call_id: CallId },

    #[serde(rename_all = "camelCase")]
    CallCancelled { call_id: CallId, reason: CancelReason },

    /// Sent to the counterpart once a participant reports media flowing
    #[serde(rename_all = "camelCase")]
    CallConnected { call_id: CallId },

    /// Relayed negotiation payload
    #[serde(rename_all = "camelCase")]
    Signal {
        call_id: CallId,
        from: String,
        payload: Value,
    },

    /// Sent to a connection right before it is closed because its identity
    /// registered elsewhere
    ConnectionReplaced { identity: String },
}

impl ServerNotification {
    /// Method name
    pub fn method_name(&self) -> &'static str {
        match self {
            ServerNotification::IncomingCall { .. } => "incomingCall",
            ServerNotification::CallAccepted { .. } => "callAccepted",
            ServerNotification::CallRejected { .. } => "callRejected",
            ServerNotification::CallTimedOut { .. } => "callTimedOut",
            ServerNotification::CallCancelled { .. } => "callCancelled",
            ServerNotification::CallConnected { .. } => "callConnected",
            ServerNotification::Signal { .. } => "signal",
            ServerNotification::ConnectionReplaced { .. } => "connectionReplaced",
        }
    }

    /// Convert to a JSON-RPC notification string
    pub fn to_json(&self) -> Result<String> {
        let mut value = serde_json::to_value(self).map_err(|e| {
            Error::SerializationError(format!("Failed to serialize notification: {}", e))
        })?;
        if let Value::Object(map) = &mut value {
            map.insert("jsonrpc".to_string(), json!(JSONRPC_VERSION));
        }
        Ok(value.to_string())
    }

    /// Parse from a JSON-RPC notification string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            Error::SerializationError(format!("Failed to deserialize notification: {}", e))
        })
    }
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request
    pub fn new(method: impl Into<String>, params: Value, id: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id,
        }
    }

    /// Parse an inbound text frame
    ///
    /// On failure the returned error is ready to send back: `PARSE_ERROR`
    /// for malformed JSON, `INVALID_REQUEST` for JSON that is not a 2.0
    /// request. The request `id` is echoed whenever it can be recovered.
    pub fn parse(text: &str) -> std::result::Result<Self, JsonRpcError> {
        let value: Value = serde_json::from_str(text).map_err(|e| {
            JsonRpcError::with_reason(
                error_codes::PARSE_ERROR,
                "PARSE_ERROR",
                format!("Failed to parse JSON: {}", e),
                Value::Null,
            )
        })?;

        let id = value.get("id").cloned().unwrap_or(Value::Null);
        let request: JsonRpcRequest = serde_json::from_value(value)
            .map_err(|e| JsonRpcError::invalid_request(format!("Invalid request: {}", e), id.clone()))?;

        if request.jsonrpc != JSONRPC_VERSION {
            return Err(JsonRpcError::invalid_request(
                format!("Unsupported jsonrpc version: {}", request.jsonrpc),
                id,
            ));
        }
        Ok(request)
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            Error::SerializationError(format!("Failed to serialize JSON-RPC request: {}", e))
        })
    }
}

impl JsonRpcResponse {
    /// Create a new JSON-RPC response
    pub fn new(result: Value, id: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result,
            id,
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            Error::SerializationError(format!("Failed to serialize JSON-RPC response: {}", e))
        })
    }
}

impl JsonRpcError {
    /// Create a new JSON-RPC error carrying `data: {"reason": reason}`
    pub fn with_reason(code: i32, reason: &str, message: String, id: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            error: ErrorObject {
                code,
                message,
                data: Some(json!({ "reason": reason })),
            },
            id,
        }
    }

    /// `INVALID_REQUEST` error
    pub fn invalid_request(message: String, id: Value) -> Self {
        Self::with_reason(error_codes::INVALID_REQUEST, "INVALID_REQUEST", message, id)
    }

    /// Negative acknowledgment for a failed request
    pub fn from_error(err: &Error, id: Value) -> Self {
        Self::with_reason(err.rpc_code(), err.reason(), err.to_string(), id)
    }

    /// Reason code from `data.reason`, if present
    pub fn reason(&self) -> Option<&str> {
        self.error.data.as_ref()?.get("reason")?.as_str()
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            Error::SerializationError(format!("Failed to serialize JSON-RPC error: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request() {
        let req = JsonRpcRequest::parse(
            r#"{"jsonrpc":"2.0","method":"register","params":{"identity":"alice"},"id":1}"#,
        )
        .unwrap();
        assert_eq!(req.method, "register");
        assert_eq!(req.id, Some(json!(1)));

        let decoded = ClientRequest::from_rpc(&req).unwrap();
        assert_eq!(
            decoded,
            ClientRequest::Register(RegisterParams {
                identity: "alice".to_string()
            })
        );
    }

    #[test]
    fn test_parse_malformed_json() {
        let err = JsonRpcRequest::parse("{not json").unwrap_err();
        assert_eq!(err.error.code, error_codes::PARSE_ERROR);
        assert_eq!(err.reason(), Some("PARSE_ERROR"));
        assert_eq!(err.id, Value::Null);
    }

    #[test]
    fn test_parse_invalid_request_keeps_id() {
        let err = JsonRpcRequest::parse(r#"{"jsonrpc":"2.0","id":"req-7"}"#).unwrap_err();
        assert_eq!(err.error.code, error_codes::INVALID_REQUEST);
        assert_eq!(err.id, json!("req-7"));

        let err = JsonRpcRequest::parse(r#"{"jsonrpc":"1.0","method":"register","id":3}"#)
            .unwrap_err();
        assert_eq!(err.error.code, error_codes::INVALID_REQUEST);
        assert_eq!(err.id, json!(3));
    }

    #[test]
    fn test_unknown_method() {
        let req = JsonRpcRequest::new("dial", json!({}), Some(json!(1)));
        assert!(matches!(
            ClientRequest::from_rpc(&req),
            Err(Error::MethodNotFound(_))
        ));
    }

    #[test]
    fn test_invalid_params() {
        let req = JsonRpcRequest::new(methods::INITIATE_CALL, json!({"callee": "bob"}), None);
        assert!(matches!(
            ClientRequest::from_rpc(&req),
            Err(Error::InvalidParams(_))
        ));

        let req = JsonRpcRequest::new(methods::REGISTER, json!({"identity": "  "}), None);
        assert!(matches!(
            ClientRequest::from_rpc(&req),
            Err(Error::InvalidParams(_))
        ));

        // payload is mandatory for signal
        let req = JsonRpcRequest::new(methods::SIGNAL, json!({"callId": "call-1"}), None);
        assert!(matches!(
            ClientRequest::from_rpc(&req),
            Err(Error::InvalidParams(_))
        ));
    }

    #[test]
    fn test_camel_case_params() {
        let req = JsonRpcRequest::new(
            methods::INITIATE_CALL,
            json!({"calleeId": "bob", "payload": {"sdp": "v=0"}}),
            Some(json!(2)),
        );
        match ClientRequest::from_rpc(&req).unwrap() {
            ClientRequest::InitiateCall(params) => {
                assert_eq!(params.callee_id, "bob");
                assert_eq!(params.payload, Some(json!({"sdp": "v=0"})));
            }
            other => panic!("unexpected request: {:?}", other),
        }

        let req = JsonRpcRequest::new(methods::HANG_UP, json!({"callId": "call-9"}), None);
        let decoded = ClientRequest::from_rpc(&req).unwrap();
        assert_eq!(decoded.method_name(), "hangUp");
    }

    #[test]
    fn test_notification_wire_format() {
        let notification = ServerNotification::CallCancelled {
            call_id: "call-1".to_string(),
            reason: CancelReason::PeerDisconnected,
        };
        let value: Value = serde_json::from_str(&notification.to_json().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({
                "jsonrpc": "2.0",
                "method": "callCancelled",
                "params": {"callId": "call-1", "reason": "peer_disconnected"}
            })
        );
        assert!(value.get("id").is_none());
    }

    #[test]
    fn test_incoming_call_omits_missing_payload() {
        let notification = ServerNotification::IncomingCall {
            call_id: "call-2".to_string(),
            caller_id: "alice".to_string(),
            payload: None,
        };
        let json = notification.to_json().unwrap();
        assert!(json.contains("\"callerId\":\"alice\""));
        assert!(!json.contains("payload"));
        assert_eq!(ServerNotification::from_json(&json).unwrap(), notification);
        assert_eq!(notification.method_name(), "incomingCall");
    }

    #[test]
    fn test_error_from_protocol_error() {
        let err = JsonRpcError::from_error(
            &Error::SessionConflict("alice and carol".to_string()),
            json!(5),
        );
        assert_eq!(err.error.code, -32011);
        assert_eq!(err.reason(), Some("SESSION_CONFLICT"));

        let json = err.to_json().unwrap();
        assert!(json.contains("\"data\":{\"reason\":\"SESSION_CONFLICT\"}"));
    }

    #[test]
    fn test_response_serialization() {
        let result = CallStateResult {
            call_id: "call-3".to_string(),
            state: CallState::Accepted,
            applied: true,
        };
        let resp = JsonRpcResponse::new(serde_json::to_value(&result).unwrap(), json!(4));
        let value: Value = serde_json::from_str(&resp.to_json().unwrap()).unwrap();
        assert_eq!(
            value["result"],
            json!({"callId": "call-3", "state": "accepted", "applied": true})
        );
    }
}
