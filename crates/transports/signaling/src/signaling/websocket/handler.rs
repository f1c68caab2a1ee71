//! WebSocket message handler for JSON-RPC 2.0 signaling
//!
//! Handles individual WebSocket connections: parses inbound frames, forwards
//! requests to the coordinator in receipt order and drains the connection's
//! outbound queue onto the socket. Refused frames go through the coordinator
//! too, so every reply leaves in the order its frame arrived.

use crate::connection::{ConnectionId, Outbound, OutboundReceiver};
use crate::coordinator::CoordinatorHandle;
use crate::signaling::protocol::{JsonRpcError, JsonRpcRequest};
use crate::{Error, Result};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Handle a single WebSocket connection until it closes
pub async fn handle_connection(
    stream: TcpStream,
    coordinator: CoordinatorHandle,
    max_message_bytes: usize,
    handshake_timeout: Duration,
) -> Result<()> {
    let addr = stream.peer_addr()?;
    let ws_stream = tokio::time::timeout(handshake_timeout, accept_async(stream))
        .await
        .map_err(|_| {
            Error::WebSocketError(format!(
                "Handshake with {} timed out after {}ms",
                addr,
                handshake_timeout.as_millis()
            ))
        })?
        .map_err(|e| Error::WebSocketError(format!("Handshake with {} failed: {}", addr, e)))?;

    let (ws_tx, mut ws_rx) = ws_stream.split();
    let (tx, rx) = mpsc::unbounded_channel();
    let connection = ConnectionId::next();
    coordinator.open(connection, tx).await?;
    info!(connection = %connection, peer = %addr, "WebSocket connection opened");

    let mut writer = tokio::spawn(forward_outbound(connection, ws_tx, rx));

    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            // Writer stops after a server-initiated close
            _ = &mut writer => break,
        };

        // Awaiting each submission keeps this connection's replies in order
        let submitted = match msg {
            Some(Ok(Message::Text(text))) => {
                if text.len() > max_message_bytes {
                    let rpc_error = JsonRpcError::invalid_request(
                        format!(
                            "Message of {} bytes exceeds limit of {} bytes",
                            text.len(),
                            max_message_bytes
                        ),
                        Value::Null,
                    );
                    coordinator.refuse(connection, rpc_error).await
                } else {
                    match JsonRpcRequest::parse(&text) {
                        Ok(request) => coordinator.submit(connection, request).await,
                        Err(rpc_error) => {
                            debug!(connection = %connection, "Rejected malformed frame: {}", rpc_error.error.message);
                            coordinator.refuse(connection, rpc_error).await
                        }
                    }
                }
            }
            Some(Ok(Message::Binary(_))) => {
                let rpc_error = JsonRpcError::invalid_request(
                    "Binary frames are not supported".to_string(),
                    Value::Null,
                );
                coordinator.refuse(connection, rpc_error).await
            }
            Some(Ok(Message::Close(_))) => {
                info!(connection = %connection, "WebSocket connection closed by client");
                break;
            }
            Some(Ok(_)) => Ok(()),
            Some(Err(e)) => {
                warn!(connection = %connection, "WebSocket error: {}", e);
                break;
            }
            None => break,
        };

        if let Err(e) = submitted {
            warn!(connection = %connection, "Coordinator unavailable: {}", e);
            break;
        }
    }

    if let Err(e) = coordinator.close(connection).await {
        debug!(connection = %connection, "Close not delivered: {}", e);
    }
    writer.abort();
    info!(connection = %connection, "WebSocket connection finished");

    Ok(())
}

/// Drain the outbound queue onto the socket
async fn forward_outbound(connection: ConnectionId, mut ws_tx: WsSink, mut rx: OutboundReceiver) {
    while let Some(item) = rx.recv().await {
        match item {
            Outbound::Text(text) => {
                if let Err(e) = ws_tx.send(Message::Text(text)).await {
                    error!(connection = %connection, "Failed to send WebSocket message: {}", e);
                    return;
                }
            }
            Outbound::Close { reason } => {
                debug!(connection = %connection, reason = %reason, "Closing connection");
                let _ = ws_tx.send(Message::Close(None)).await;
                return;
            }
        }
    }
}
