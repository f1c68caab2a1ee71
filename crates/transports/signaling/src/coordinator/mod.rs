//! Call coordinator
//!
//! A single tokio task owns the connection table, the presence registry and
//! the session table. Transports, timers and the server talk to it only
//! through channels, so every transition runs to completion before the next
//! event is looked at and no table needs a lock.

mod handle;

pub use handle::{Command, CoordinatorHandle, CoordinatorStats};

use crate::config::SignalingConfig;
use crate::connection::{ConnectionId, ConnectionTable, Outbound, OutboundSender};
use crate::presence::{PresenceRegistry, Registration, UserIdentity};
use crate::relay;
use crate::session::{CallId, CallState, CallTransition, CancelReason, SessionTable, TransitionOutcome};
use crate::signaling::protocol::{
    AcceptCallParams, CallStateResult, ClientRequest, InitiateCallParams, InitiateCallResult,
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, RegisterResult, ServerNotification,
    SignalParams, SignalResult,
};
use crate::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Internal events produced by timers
#[derive(Debug)]
enum TimerEvent {
    /// Ring timeout elapsed for a call
    RingTimeout(CallId),
    /// Grace period for a finished call elapsed
    Reap(CallId),
}

enum Event {
    Command(Command),
    Timer(TimerEvent),
}

/// Owner of all signaling state
pub struct Coordinator {
    ring_timeout: Duration,
    terminal_grace: Duration,
    connections: ConnectionTable,
    presence: PresenceRegistry,
    sessions: SessionTable,
    commands: mpsc::Receiver<Command>,
    timer_tx: mpsc::UnboundedSender<TimerEvent>,
    timer_rx: mpsc::UnboundedReceiver<TimerEvent>,
}

impl Coordinator {
    /// Create a coordinator and the handle that feeds it
    pub fn new(config: &SignalingConfig) -> (Self, CoordinatorHandle) {
        let (command_tx, commands) = mpsc::channel(config.command_queue_capacity.max(1));
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();

        let coordinator = Self {
            ring_timeout: config.ring_timeout(),
            terminal_grace: config.terminal_grace(),
            connections: ConnectionTable::new(),
            presence: PresenceRegistry::new(),
            sessions: SessionTable::new(),
            commands,
            timer_tx,
            timer_rx,
        };
        (coordinator, CoordinatorHandle::new(command_tx))
    }

    /// Spawn the event loop on the current runtime
    pub fn spawn(config: &SignalingConfig) -> (CoordinatorHandle, JoinHandle<()>) {
        let (coordinator, handle) = Self::new(config);
        let task = tokio::spawn(coordinator.run());
        (handle, task)
    }

    /// Run until a shutdown command arrives or every handle is dropped
    pub async fn run(mut self) {
        info!(
            ring_timeout_ms = self.ring_timeout.as_millis() as u64,
            terminal_grace_ms = self.terminal_grace.as_millis() as u64,
            "Call coordinator started"
        );

        loop {
            let event = tokio::select! {
                command = self.commands.recv() => command.map(Event::Command),
                Some(timer) = self.timer_rx.recv() => Some(Event::Timer(timer)),
            };

            let Some(event) = event else {
                debug!("All coordinator handles dropped");
                self.shutdown();
                break;
            };

            match event {
                Event::Command(command) => {
                    if !self.handle_command(command) {
                        break;
                    }
                }
                Event::Timer(TimerEvent::RingTimeout(call_id)) => self.on_ring_timeout(&call_id),
                Event::Timer(TimerEvent::Reap(call_id)) => {
                    if self.sessions.reap(&call_id).is_some() {
                        debug!(call_id = %call_id, "Session reaped");
                    }
                }
            }
        }

        info!("Call coordinator stopped");
    }

    /// Returns false once the loop should stop
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Open { connection, tx } => self.on_open(connection, tx),
            Command::Request {
                connection,
                request,
            } => self.on_request(connection, request),
            Command::Refuse { connection, error } => self.on_refuse(connection, error),
            Command::Close { connection } => self.on_close(connection),
            Command::Snapshot { call_id, reply } => {
                let snapshot = self.sessions.get(&call_id).map(|s| s.snapshot());
                let _ = reply.send(snapshot);
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            Command::Shutdown { done } => {
                self.shutdown();
                let _ = done.send(());
                return false;
            }
        }
        true
    }

    fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            connections: self.connections.len(),
            identities: self.presence.len(),
            sessions: self.sessions.len(),
            live_sessions: self.sessions.live_count(),
        }
    }

    // ---- connection lifecycle ----

    fn on_open(&mut self, connection: ConnectionId, tx: OutboundSender) {
        if self.connections.open(connection, tx) {
            debug!(connection = %connection, "Connection opened");
        } else {
            warn!(connection = %connection, "Connection opened twice, ignoring");
        }
    }

    fn on_close(&mut self, connection: ConnectionId) {
        self.connections.close(connection);

        // None if never registered or already preempted by a newer connection
        if let Some(identity) = self.presence.unregister(connection) {
            info!(connection = %connection, identity = %identity, "Identity went offline");
            self.cancel_calls_of(&identity, CancelReason::PeerDisconnected);
        }
    }

    fn shutdown(&mut self) {
        let live = self.sessions.live_sessions();
        info!(
            live_sessions = live.len(),
            connections = self.connections.len(),
            "Shutting down call coordinator"
        );

        for call_id in live {
            if let Err(e) = self.cancel_call(&call_id, CancelReason::ServerShutdown, None) {
                warn!(call_id = %call_id, "Failed to cancel call: {}", e);
            }
        }
        for connection in self.connections.ids() {
            self.connections.send(
                connection,
                Outbound::Close {
                    reason: "server shutdown".to_string(),
                },
            );
            self.connections.close(connection);
        }
    }

    // ---- request dispatch ----

    fn on_request(&mut self, connection: ConnectionId, request: JsonRpcRequest) {
        // Preempted or never opened; acting on it could rebind a live identity
        if !self.connections.is_open(connection) {
            debug!(connection = %connection, method = %request.method, "Request from a closed connection dropped");
            return;
        }

        let id = request.id.clone().unwrap_or(Value::Null);
        let result = self.dispatch(connection, &request);

        let message = match result {
            Ok(value) => JsonRpcResponse::new(value, id).to_json(),
            Err(err) => {
                if err.is_protocol_error() {
                    debug!(connection = %connection, method = %request.method, reason = err.reason(), "Request refused: {}", err);
                } else {
                    warn!(connection = %connection, method = %request.method, "Request failed: {}", err);
                }
                JsonRpcError::from_error(&err, id).to_json()
            }
        };

        match message {
            Ok(text) => {
                if !self.connections.send(connection, Outbound::Text(text)) {
                    debug!(connection = %connection, "Response dropped, connection gone");
                }
            }
            Err(e) => error!(connection = %connection, "Failed to serialize response: {}", e),
        }
    }

    fn on_refuse(&mut self, connection: ConnectionId, error: JsonRpcError) {
        match error.to_json() {
            Ok(text) => {
                if !self.connections.send(connection, Outbound::Text(text)) {
                    debug!(connection = %connection, "Error reply dropped, connection gone");
                }
            }
            Err(e) => error!(connection = %connection, "Failed to serialize error response: {}", e),
        }
    }

    fn dispatch(&mut self, connection: ConnectionId, request: &JsonRpcRequest) -> Result<Value> {
        let call = ClientRequest::from_rpc(request)?;
        let method = call.method_name();
        let identity = self
            .presence
            .identity_of(connection)
            .cloned()
            .ok_or_else(|| {
                Error::NotRegistered(format!("{} must register before calling {}", connection, method))
            });

        match call {
            ClientRequest::Register(params) => to_result(self.register(connection, &params.identity)?),
            ClientRequest::InitiateCall(params) => to_result(self.initiate(&identity?, params)?),
            ClientRequest::AcceptCall(params) => to_result(self.accept(&identity?, params)?),
            ClientRequest::RejectCall(params) => {
                to_result(self.reject(&identity?, &params.call_id)?)
            }
            ClientRequest::Signal(params) => to_result(self.signal(&identity?, params)?),
            ClientRequest::HangUp(params) => to_result(self.hang_up(&identity?, &params.call_id)?),
            ClientRequest::CallConnected(params) => {
                to_result(self.media_connected(&identity?, &params.call_id)?)
            }
        }
    }

    // ---- presence ----

    fn register(&mut self, connection: ConnectionId, identity: &str) -> Result<RegisterResult> {
        if let Some(current) = self.presence.identity_of(connection) {
            if current != identity {
                return Err(Error::InvalidParams(format!(
                    "{} is already registered as {}",
                    connection, current
                )));
            }
        }

        let replaced = match self.presence.register(identity, connection) {
            Registration::New => {
                info!(connection = %connection, identity = %identity, "Identity registered");
                false
            }
            Registration::Unchanged => false,
            Registration::Replaced(old) => {
                self.evict(old, identity);
                self.cancel_calls_of(identity, CancelReason::ConnectionReplaced);
                true
            }
        };

        Ok(RegisterResult {
            identity: identity.to_string(),
            replaced,
        })
    }

    /// Tell a preempted connection why it is being dropped, then close it
    fn evict(&mut self, old: ConnectionId, identity: &str) {
        let notice = ServerNotification::ConnectionReplaced {
            identity: identity.to_string(),
        };
        match notice.to_json() {
            Ok(text) => {
                self.connections.send(old, Outbound::Text(text));
            }
            Err(e) => error!(connection = %old, "Failed to serialize notification: {}", e),
        }
        self.connections.send(
            old,
            Outbound::Close {
                reason: "connection replaced".to_string(),
            },
        );
        self.connections.close(old);
    }

    // ---- call lifecycle ----

    fn initiate(&mut self, caller: &str, params: InitiateCallParams) -> Result<InitiateCallResult> {
        let callee = params.callee_id;
        if caller == callee {
            return Err(Error::InvalidParams("cannot call yourself".to_string()));
        }

        let reachable = self
            .presence
            .lookup(&callee)
            .map(|conn| self.connections.is_open(conn))
            .unwrap_or(false);
        if !reachable {
            return Err(Error::PeerUnavailable(format!("{} is not connected", callee)));
        }

        let call_id = self.sessions.create(caller, &callee)?.call_id.clone();

        let invite = ServerNotification::IncomingCall {
            call_id: call_id.clone(),
            caller_id: caller.to_string(),
            payload: params.payload,
        };
        if !self.notify(&callee, &invite) {
            self.sessions.remove(&call_id);
            return Err(Error::PeerUnavailable(format!(
                "{} disconnected before the invite was delivered",
                callee
            )));
        }

        self.start_ring_timer(&call_id);
        info!(call_id = %call_id, caller = %caller, callee = %callee, "Call ringing");

        Ok(InitiateCallResult {
            call_id,
            callee_id: callee,
            state: CallState::Ringing,
        })
    }

    fn accept(&mut self, identity: &str, params: AcceptCallParams) -> Result<CallStateResult> {
        let caller = self.require_callee(&params.call_id, identity, "accept")?;
        let outcome = self
            .sessions
            .transition(&params.call_id, CallTransition::Accept)?;

        info!(call_id = %params.call_id, "Call accepted");
        self.notify(
            &caller,
            &ServerNotification::CallAccepted {
                call_id: params.call_id.clone(),
                payload: params.payload,
            },
        );

        Ok(state_result(params.call_id, outcome))
    }

    fn reject(&mut self, identity: &str, call_id: &str) -> Result<CallStateResult> {
        let caller = self.require_callee(call_id, identity, "reject")?;
        let outcome = self.sessions.transition(call_id, CallTransition::Reject)?;

        if outcome.is_applied() {
            info!(call_id = %call_id, "Call rejected");
            self.notify(
                &caller,
                &ServerNotification::CallRejected {
                    call_id: call_id.to_string(),
                },
            );
            self.schedule_reap(call_id);
        }

        Ok(state_result(call_id.to_string(), outcome))
    }

    fn hang_up(&mut self, identity: &str, call_id: &str) -> Result<CallStateResult> {
        self.require_participant(call_id, identity)?;
        let outcome = self.cancel_call(call_id, CancelReason::HungUp, Some(identity))?;
        Ok(state_result(call_id.to_string(), outcome))
    }

    fn media_connected(&mut self, identity: &str, call_id: &str) -> Result<CallStateResult> {
        let counterpart = self.require_participant(call_id, identity)?;
        let outcome = self
            .sessions
            .transition(call_id, CallTransition::MediaConnected)?;

        if outcome.is_applied() {
            info!(call_id = %call_id, reported_by = %identity, "Call connected");
            self.notify(
                &counterpart,
                &ServerNotification::CallConnected {
                    call_id: call_id.to_string(),
                },
            );
        }

        Ok(state_result(call_id.to_string(), outcome))
    }

    fn signal(&mut self, identity: &str, params: SignalParams) -> Result<SignalResult> {
        let route = relay::relay(
            &self.sessions,
            &self.presence,
            &self.connections,
            &params.call_id,
            identity,
            params.payload,
        )?;
        Ok(SignalResult {
            call_id: route.call_id,
            delivered: true,
        })
    }

    fn on_ring_timeout(&mut self, call_id: &str) {
        let outcome = match self.sessions.transition(call_id, CallTransition::Timeout) {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!(call_id = %call_id, "Ring timer fired for a gone session: {}", e);
                return;
            }
        };
        if !outcome.is_applied() {
            return;
        }

        info!(call_id = %call_id, "Call timed out");
        if let Some(session) = self.sessions.get(call_id) {
            let participants = [session.caller_id.clone(), session.callee_id.clone()];
            let notice = ServerNotification::CallTimedOut {
                call_id: call_id.to_string(),
            };
            for identity in &participants {
                self.notify(identity, &notice);
            }
        }
        self.schedule_reap(call_id);
    }

    /// Cancel every live call of `identity`, notifying the other side
    fn cancel_calls_of(&mut self, identity: &str, reason: CancelReason) {
        for call_id in self.sessions.live_sessions_of(identity) {
            if let Err(e) = self.cancel_call(&call_id, reason, Some(identity)) {
                warn!(call_id = %call_id, "Failed to cancel call: {}", e);
            }
        }
    }

    /// Cancel a call and notify every participant except `initiator`
    fn cancel_call(
        &mut self,
        call_id: &str,
        reason: CancelReason,
        initiator: Option<&str>,
    ) -> Result<TransitionOutcome> {
        let outcome = self
            .sessions
            .transition(call_id, CallTransition::Cancel(reason))?;
        if !outcome.is_applied() {
            return Ok(outcome);
        }

        info!(call_id = %call_id, reason = %reason, "Call cancelled");
        let recipients: Vec<UserIdentity> = match self.sessions.get(call_id) {
            Some(session) => [&session.caller_id, &session.callee_id]
                .into_iter()
                .filter(|p| Some(p.as_str()) != initiator)
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        let notice = ServerNotification::CallCancelled {
            call_id: call_id.to_string(),
            reason,
        };
        for identity in &recipients {
            self.notify(identity, &notice);
        }

        self.schedule_reap(call_id);
        Ok(outcome)
    }

    /// Return the caller if `identity` is the callee of `call_id`
    fn require_callee(&self, call_id: &str, identity: &str, action: &str) -> Result<UserIdentity> {
        let session = self
            .sessions
            .get(call_id)
            .ok_or_else(|| Error::UnknownSession(call_id.to_string()))?;
        if session.callee_id != identity {
            return Err(Error::InvalidTransition(format!(
                "only the callee can {} call {}",
                action, call_id
            )));
        }
        Ok(session.caller_id.clone())
    }

    /// Return the counterpart if `identity` takes part in `call_id`
    fn require_participant(&self, call_id: &str, identity: &str) -> Result<UserIdentity> {
        let session = self
            .sessions
            .get(call_id)
            .ok_or_else(|| Error::UnknownSession(call_id.to_string()))?;
        session.counterpart(identity).cloned().ok_or_else(|| {
            Error::UnauthorizedSender(format!("{} is not a participant of {}", identity, call_id))
        })
    }

    // ---- delivery and timers ----

    /// Queue a notification for `identity`; false if it has no open connection
    fn notify(&self, identity: &str, notification: &ServerNotification) -> bool {
        let Some(connection) = self.presence.lookup(identity) else {
            debug!(identity = %identity, method = notification.method_name(), "Recipient offline, notification dropped");
            return false;
        };
        let text = match notification.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!(identity = %identity, "Failed to serialize notification: {}", e);
                return false;
            }
        };
        let delivered = self.connections.send(connection, Outbound::Text(text));
        if !delivered {
            debug!(identity = %identity, connection = %connection, method = notification.method_name(), "Outbound queue closed, notification dropped");
        }
        delivered
    }

    fn start_ring_timer(&mut self, call_id: &str) {
        let task = spawn_timer(
            self.timer_tx.clone(),
            self.ring_timeout,
            TimerEvent::RingTimeout(call_id.to_string()),
        );
        self.sessions.set_ring_timer(call_id, task.abort_handle());
    }

    fn schedule_reap(&self, call_id: &str) {
        spawn_timer(
            self.timer_tx.clone(),
            self.terminal_grace,
            TimerEvent::Reap(call_id.to_string()),
        );
    }
}

fn spawn_timer(
    tx: mpsc::UnboundedSender<TimerEvent>,
    after: Duration,
    event: TimerEvent,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        let _ = tx.send(event);
    })
}

fn state_result(call_id: CallId, outcome: TransitionOutcome) -> CallStateResult {
    CallStateResult {
        call_id,
        state: outcome.state(),
        applied: outcome.is_applied(),
    }
}

fn to_result<T: Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| Error::SerializationError(format!("Failed to serialize result: {}", e)))
}
