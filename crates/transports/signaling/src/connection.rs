//! Connection table for the lifecycle manager
//!
//! Holds the outbound queue of every open signaling connection. The
//! coordinator never touches sockets directly; it pushes [`Outbound`] items
//! into these queues and the transport's writer task drains them.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::debug;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a transport connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next connection ID
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Item queued for delivery on a connection
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Serialized JSON-RPC message
    Text(String),
    /// Close the connection after flushing what was queued before
    Close { reason: String },
}

/// Sending half of a connection's outbound queue
pub type OutboundSender = mpsc::UnboundedSender<Outbound>;

/// Receiving half of a connection's outbound queue
pub type OutboundReceiver = mpsc::UnboundedReceiver<Outbound>;

struct ConnectionEntry {
    tx: OutboundSender,
    opened_at: Instant,
}

/// Open connections keyed by ID
#[derive(Default)]
pub struct ConnectionTable {
    connections: HashMap<ConnectionId, ConnectionEntry>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly opened connection
    ///
    /// Returns false if the ID is already open.
    pub fn open(&mut self, id: ConnectionId, tx: OutboundSender) -> bool {
        if self.connections.contains_key(&id) {
            return false;
        }
        self.connections.insert(
            id,
            ConnectionEntry {
                tx,
                opened_at: Instant::now(),
            },
        );
        true
    }

    /// Forget a connection; returns true if it was open
    pub fn close(&mut self, id: ConnectionId) -> bool {
        match self.connections.remove(&id) {
            Some(entry) => {
                debug!(
                    connection = %id,
                    open_for_ms = entry.opened_at.elapsed().as_millis() as u64,
                    "Connection removed"
                );
                true
            }
            None => false,
        }
    }

    pub fn is_open(&self, id: ConnectionId) -> bool {
        self.connections
            .get(&id)
            .map(|entry| !entry.tx.is_closed())
            .unwrap_or(false)
    }

    /// Queue an item on a connection
    ///
    /// Returns false if the connection is unknown or its writer is gone.
    pub fn send(&self, id: ConnectionId, item: Outbound) -> bool {
        match self.connections.get(&id) {
            Some(entry) => entry.tx.send(item).is_ok(),
            None => false,
        }
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
