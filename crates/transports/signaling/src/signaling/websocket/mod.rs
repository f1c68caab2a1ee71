//! WebSocket signaling server for the JSON-RPC 2.0 protocol

mod handler;
mod server;

pub use server::{SignalingServer, SignalingServerHandle};
