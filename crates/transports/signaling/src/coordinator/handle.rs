//! Command channel into the coordinator task

use crate::connection::{ConnectionId, OutboundReceiver, OutboundSender};
use crate::session::SessionSnapshot;
use crate::signaling::protocol::{JsonRpcError, JsonRpcRequest};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

/// Messages consumed by the coordinator's event loop
#[derive(Debug)]
pub enum Command {
    /// A transport connection opened
    Open {
        connection: ConnectionId,
        tx: OutboundSender,
    },
    /// A parsed JSON-RPC request arrived on a connection
    Request {
        connection: ConnectionId,
        request: JsonRpcRequest,
    },
    /// A frame the transport refused before parsing a request from it
    Refuse {
        connection: ConnectionId,
        error: JsonRpcError,
    },
    /// A transport connection closed (gracefully or not)
    Close { connection: ConnectionId },
    /// Read-only view of one session
    Snapshot {
        call_id: String,
        reply: oneshot::Sender<Option<SessionSnapshot>>,
    },
    /// Table sizes
    Stats {
        reply: oneshot::Sender<CoordinatorStats>,
    },
    /// Cancel every live call, close every connection, stop the loop
    Shutdown { done: oneshot::Sender<()> },
}

/// Table sizes reported by the coordinator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorStats {
    pub connections: usize,
    pub identities: usize,
    pub sessions: usize,
    pub live_sessions: usize,
}

/// Cloneable handle for talking to a running coordinator
///
/// Commands from one handle are processed in the order they are sent.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::Sender<Command>,
}

impl CoordinatorHandle {
    pub(crate) fn new(commands: mpsc::Sender<Command>) -> Self {
        Self { commands }
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::CoordinatorClosed("command channel closed".to_string()))
    }

    /// Hand a new connection's outbound queue to the coordinator
    pub async fn open(&self, connection: ConnectionId, tx: OutboundSender) -> Result<()> {
        self.send(Command::Open { connection, tx }).await
    }

    /// Allocate a connection with a fresh outbound queue
    ///
    /// Used by in-process clients that have no socket of their own.
    pub async fn connect(&self) -> Result<(ConnectionId, OutboundReceiver)> {
        let connection = ConnectionId::next();
        let (tx, rx) = mpsc::unbounded_channel();
        self.open(connection, tx).await?;
        Ok((connection, rx))
    }

    /// Submit a request; the response arrives on the connection's outbound queue
    pub async fn submit(&self, connection: ConnectionId, request: JsonRpcRequest) -> Result<()> {
        self.send(Command::Request {
            connection,
            request,
        })
        .await
    }

    /// Send an error for a refused frame, after replies to earlier requests
    pub async fn refuse(&self, connection: ConnectionId, error: JsonRpcError) -> Result<()> {
        self.send(Command::Refuse { connection, error }).await
    }

    pub async fn close(&self, connection: ConnectionId) -> Result<()> {
        self.send(Command::Close { connection }).await
    }

    /// Snapshot of a session, `None` if unknown or already reaped
    pub async fn session(&self, call_id: &str) -> Result<Option<SessionSnapshot>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot {
            call_id: call_id.to_string(),
            reply,
        })
        .await?;
        rx.await
            .map_err(|_| Error::CoordinatorClosed("snapshot reply dropped".to_string()))
    }

    /// Current table sizes
    ///
    /// Also a barrier: every command sent before it has been processed once it returns.
    pub async fn stats(&self) -> Result<CoordinatorStats> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats { reply }).await?;
        rx.await
            .map_err(|_| Error::CoordinatorClosed("stats reply dropped".to_string()))
    }

    /// Stop the coordinator and wait until it has notified every connection
    pub async fn shutdown(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.send(Command::Shutdown { done }).await?;
        rx.await
            .map_err(|_| Error::CoordinatorClosed("shutdown reply dropped".to_string()))
    }

    /// True once the coordinator task has stopped
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}
