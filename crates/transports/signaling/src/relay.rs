//! Signal relay between the two participants of a call
//!
//! Payloads are opaque. The relay only checks that the call exists, that the
//! sender takes part in it, and that the call has not ended, then hands the
//! payload to the counterpart's outbound queue.

use crate::connection::{ConnectionId, ConnectionTable, Outbound};
use crate::presence::{PresenceRegistry, UserIdentity};
use crate::session::{CallId, SessionTable};
use crate::signaling::protocol::ServerNotification;
use crate::{Error, Result};
use serde_json::Value;
use tracing::debug;

/// Where a payload from one participant goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRoute {
    pub call_id: CallId,
    pub from: UserIdentity,
    pub to: UserIdentity,
    pub connection: ConnectionId,
}

/// Resolve the destination of a payload sent by `from` on `call_id`
///
/// # Errors
///
/// Checked in order: `UnknownSession`, `UnauthorizedSender`,
/// `InvalidTransition` (call already ended), `PeerDisconnected`.
pub fn resolve(
    sessions: &SessionTable,
    presence: &PresenceRegistry,
    call_id: &str,
    from: &str,
) -> Result<RelayRoute> {
    let session = sessions
        .get(call_id)
        .ok_or_else(|| Error::UnknownSession(call_id.to_string()))?;

    let to = session.counterpart(from).ok_or_else(|| {
        Error::UnauthorizedSender(format!("{} is not a participant of {}", from, call_id))
    })?;

    if session.state.is_terminal() {
        return Err(Error::InvalidTransition(format!(
            "cannot relay on call {} in state {}",
            call_id, session.state
        )));
    }

    let connection = presence
        .lookup(to)
        .ok_or_else(|| Error::PeerDisconnected(format!("{} is not connected", to)))?;

    Ok(RelayRoute {
        call_id: call_id.to_string(),
        from: from.to_string(),
        to: to.clone(),
        connection,
    })
}

/// Forward `payload` from `from` to the other participant of `call_id`
///
/// The payload is dropped if the counterpart's queue is gone.
pub fn relay(
    sessions: &SessionTable,
    presence: &PresenceRegistry,
    connections: &ConnectionTable,
    call_id: &str,
    from: &str,
    payload: Value,
) -> Result<RelayRoute> {
    let route = resolve(sessions, presence, call_id, from)?;

    let message = ServerNotification::Signal {
        call_id: route.call_id.clone(),
        from: route.from.clone(),
        payload,
    }
    .to_json()?;

    if !connections.send(route.connection, Outbound::Text(message)) {
        return Err(Error::PeerDisconnected(format!(
            "{} has no open connection",
            route.to
        )));
    }

    debug!(call_id = %route.call_id, from = %route.from, to = %route.to, "Signal relayed");
    Ok(route)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::OutboundReceiver;
    use crate::session::{CallTransition, CancelReason};
    use serde_json::json;
    use tokio::sync::mpsc;

    struct Fixture {
        sessions: SessionTable,
        presence: PresenceRegistry,
        connections: ConnectionTable,
        call_id: CallId,
        bob_rx: OutboundReceiver,
        _alice_rx: OutboundReceiver,
    }

    fn fixture() -> Fixture {
        let mut presence = PresenceRegistry::new();
        let mut connections = ConnectionTable::new();
        let mut sessions = SessionTable::new();

        let alice = ConnectionId::next();
        let (alice_tx, alice_rx) = mpsc::unbounded_channel();
        connections.open(alice, alice_tx);
        presence.register("alice", alice);

        let bob = ConnectionId::next();
        let (bob_tx, bob_rx) = mpsc::unbounded_channel();
        connections.open(bob, bob_tx);
        presence.register("bob", bob);

        let call_id = sessions.create("alice", "bob").unwrap().call_id.clone();

        Fixture {
            sessions,
            presence,
            connections,
            call_id,
            bob_rx,
            _alice_rx: alice_rx,
        }
    }

    #[test]
    fn test_relay_to_counterpart() {
        let mut f = fixture();
        let payload = json!({"type": "offer", "sdp": "v=0"});

        let route = relay(
            &f.sessions,
            &f.presence,
            &f.connections,
            &f.call_id,
            "alice",
            payload.clone(),
        )
        .unwrap();
        assert_eq!(route.to, "bob");

        let Outbound::Text(text) = f.bob_rx.try_recv().unwrap() else {
            panic!("expected a text frame");
        };
        let notification = ServerNotification::from_json(&text).unwrap();
        assert_eq!(
            notification,
            ServerNotification::Signal {
                call_id: f.call_id.clone(),
                from: "alice".to_string(),
                payload,
            }
        );
    }

    #[test]
    fn test_unknown_call_forwards_nothing() {
        let mut f = fixture();
        let err = relay(
            &f.sessions,
            &f.presence,
            &f.connections,
            "call-unknown",
            "alice",
            json!({}),
        )
        .unwrap_err();

        assert!(matches!(err, Error::UnknownSession(_)));
        assert!(f.bob_rx.try_recv().is_err());
    }

    #[test]
    fn test_non_participant_is_unauthorized() {
        let f = fixture();
        let err = resolve(&f.sessions, &f.presence, &f.call_id, "mallory").unwrap_err();
        assert!(matches!(err, Error::UnauthorizedSender(_)));
    }

    #[test]
    fn test_relay_after_end_is_invalid() {
        let mut f = fixture();
        f.sessions
            .transition(&f.call_id, CallTransition::Cancel(CancelReason::HungUp))
            .unwrap();

        let err = resolve(&f.sessions, &f.presence, &f.call_id, "bob").unwrap_err();
        assert!(matches!(err, Error::InvalidTransition(_)));
    }

    #[test]
    fn test_counterpart_gone() {
        let mut f = fixture();
        let bob = f.presence.lookup("bob").unwrap();
        f.presence.unregister(bob);

        let err = resolve(&f.sessions, &f.presence, &f.call_id, "alice").unwrap_err();
        assert!(matches!(err, Error::PeerDisconnected(_)));
    }

    #[test]
    fn test_counterpart_queue_closed() {
        let f = fixture();
        let Fixture {
            sessions,
            presence,
            connections,
            call_id,
            bob_rx,
            ..
        } = f;
        drop(bob_rx);

        let err = relay(&sessions, &presence, &connections, &call_id, "alice", json!(1)).unwrap_err();
        assert!(matches!(err, Error::PeerDisconnected(_)));
    }
}
