//! Presence registry: which identity is reachable on which connection

use crate::connection::ConnectionId;
use std::collections::HashMap;
use tracing::{debug, info};

/// Opaque user identifier supplied by the authentication provider
pub type UserIdentity = String;

/// Outcome of [`PresenceRegistry::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Identity was not present before
    New,
    /// Identity was already bound to this same connection
    Unchanged,
    /// Identity moved here from another connection, which must be closed
    Replaced(ConnectionId),
}

/// Bidirectional identity ↔ connection mapping
///
/// Last registration wins: binding an identity that is already bound to a
/// different connection preempts that connection.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    by_identity: HashMap<UserIdentity, ConnectionId>,
    by_connection: HashMap<ConnectionId, UserIdentity>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `identity` to `connection`
    ///
    /// If the connection was bound to another identity, that binding is
    /// dropped first so both maps stay one-to-one.
    pub fn register(&mut self, identity: &str, connection: ConnectionId) -> Registration {
        if let Some(previous) = self.by_connection.get(&connection) {
            if previous == identity {
                return Registration::Unchanged;
            }
            let previous = previous.clone();
            self.by_identity.remove(&previous);
            debug!(connection = %connection, previous = %previous, "Connection rebound");
        }

        let replaced = self
            .by_identity
            .insert(identity.to_string(), connection)
            .filter(|old| *old != connection);
        if let Some(old) = replaced {
            self.by_connection.remove(&old);
        }
        self.by_connection.insert(connection, identity.to_string());

        match replaced {
            Some(old) => {
                info!(identity = %identity, old = %old, new = %connection, "Identity preempted by new connection");
                Registration::Replaced(old)
            }
            None => Registration::New,
        }
    }

    /// Remove the binding held by `connection`
    ///
    /// Returns the identity only if it was still bound to this connection.
    pub fn unregister(&mut self, connection: ConnectionId) -> Option<UserIdentity> {
        let identity = self.by_connection.remove(&connection)?;
        if self.by_identity.get(&identity) == Some(&connection) {
            self.by_identity.remove(&identity);
        }
        Some(identity)
    }

    pub fn lookup(&self, identity: &str) -> Option<ConnectionId> {
        self.by_identity.get(identity).copied()
    }

    pub fn identity_of(&self, connection: ConnectionId) -> Option<&UserIdentity> {
        self.by_connection.get(&connection)
    }

    pub fn is_present(&self, identity: &str) -> bool {
        self.by_identity.contains_key(identity)
    }

    /// Number of registered identities
    pub fn len(&self) -> usize {
        self.by_identity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_identity.is_empty()
    }
}
