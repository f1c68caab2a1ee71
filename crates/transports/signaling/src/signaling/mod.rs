//! Signaling protocol and WebSocket transport
//!
//! Clients speak JSON-RPC 2.0 over WebSocket text frames. The transport
//! parses frames into requests and forwards them to the coordinator; every
//! response and notification goes back through the connection's outbound
//! queue.

pub mod protocol;
pub mod websocket;

pub use protocol::{ClientRequest, JsonRpcError, JsonRpcRequest, JsonRpcResponse, ServerNotification};
pub use websocket::{SignalingServer, SignalingServerHandle};
