//! Call-signaling test harness
//!
//! Drives a coordinator through in-memory connections, without sockets.
//!
//! Basic usage pattern:
//!
//! 1. Create a `SignalingTestHarness` (optionally with a custom config)
//! 2. Create registered peers with `harness.peer("alice")`
//! 3. Issue requests with `peer.call_ok(..)` / `peer.call_err(..)`
//! 4. Await notifications with `peer.expect_notification(..)`
//! 5. Use `harness.settle()` before asserting that nothing else arrived

#![allow(dead_code)]

use rendezvous_signaling::signaling::protocol::JsonRpcRequest;
use rendezvous_signaling::{
    ConnectionId, Coordinator, CoordinatorHandle, CoordinatorStats, Outbound, SessionSnapshot,
    SignalingConfig,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Long enough for a default ring timeout to fire while the clock is paused
pub const RECV_TIMEOUT: Duration = Duration::from_secs(120);

/// Initialize test logging (safe to call from every test)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,rendezvous_signaling=debug")
        .with_test_writer()
        .try_init();
}

/// Something a peer received on its outbound queue
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    Message(Value),
    Close(String),
}

/// Coordinator plus helpers for creating peers
pub struct SignalingTestHarness {
    pub coordinator: CoordinatorHandle,
    task: JoinHandle<()>,
}

impl SignalingTestHarness {
    pub fn new() -> Self {
        Self::with_config(SignalingConfig::default())
    }

    pub fn with_config(config: SignalingConfig) -> Self {
        init_logging();
        let (coordinator, task) = Coordinator::spawn(&config);
        Self { coordinator, task }
    }

    /// Open a connection without registering
    pub async fn connect(&self) -> TestPeer {
        TestPeer::connect(self.coordinator.clone()).await
    }

    /// Open a connection and register `identity` on it
    pub async fn peer(&self, identity: &str) -> TestPeer {
        let mut peer = self.connect().await;
        let result = peer.call_ok("register", json!({ "identity": identity })).await;
        assert_eq!(result["identity"], json!(identity));
        peer
    }

    /// Wait until every command sent so far has been processed
    pub async fn settle(&self) -> CoordinatorStats {
        self.coordinator.stats().await.unwrap()
    }

    pub async fn session(&self, call_id: &str) -> Option<SessionSnapshot> {
        self.coordinator.session(call_id).await.unwrap()
    }

    pub async fn shutdown(self) {
        self.coordinator.shutdown().await.unwrap();
        self.task.await.unwrap();
    }
}

/// In-memory client connection
pub struct TestPeer {
    pub connection: ConnectionId,
    coordinator: CoordinatorHandle,
    rx: mpsc::UnboundedReceiver<Outbound>,
    pending: VecDeque<Received>,
    next_id: u64,
}

impl TestPeer {
    pub async fn connect(coordinator: CoordinatorHandle) -> Self {
        let (connection, rx) = coordinator.connect().await.unwrap();
        Self {
            connection,
            coordinator,
            rx,
            pending: VecDeque::new(),
            next_id: 1,
        }
    }

    async fn recv(&mut self) -> Received {
        let item = tokio::time::timeout(RECV_TIMEOUT, self.rx.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("outbound queue closed");
        match item {
            Outbound::Text(text) => Received::Message(serde_json::from_str(&text).unwrap()),
            Outbound::Close { reason } => Received::Close(reason),
        }
    }

    /// Submit a request without waiting for any reply
    pub async fn send(&mut self, method: &str, params: Value) {
        let id = self.next_id;
        self.next_id += 1;
        self.coordinator
            .submit(
                self.connection,
                JsonRpcRequest::new(method, params, Some(json!(id))),
            )
            .await
            .unwrap();
    }

    /// Send a request and return the full response object
    ///
    /// Notifications that arrive first are kept for `next_received`.
    pub async fn request(&mut self, method: &str, params: Value) -> Value {
        let id = self.next_id;
        self.next_id += 1;
        self.coordinator
            .submit(
                self.connection,
                JsonRpcRequest::new(method, params, Some(json!(id))),
            )
            .await
            .unwrap();

        loop {
            match self.recv().await {
                Received::Message(msg) if msg.get("id") == Some(&json!(id)) => return msg,
                other => self.pending.push_back(other),
            }
        }
    }

    /// Send a request that must succeed; returns `result`
    pub async fn call_ok(&mut self, method: &str, params: Value) -> Value {
        let response = self.request(method, params).await;
        assert!(
            response.get("error").is_none(),
            "{} failed: {}",
            method,
            response
        );
        response["result"].clone()
    }

    /// Send a request that must fail; returns `(code, reason)`
    pub async fn call_err(&mut self, method: &str, params: Value) -> (i64, String) {
        let response = self.request(method, params).await;
        let error = response
            .get("error")
            .unwrap_or_else(|| panic!("{} unexpectedly succeeded: {}", method, response));
        (
            error["code"].as_i64().unwrap(),
            error["data"]["reason"].as_str().unwrap().to_string(),
        )
    }

    /// Place a call and return its ID
    pub async fn initiate(&mut self, callee: &str) -> String {
        let result = self
            .call_ok("initiateCall", json!({ "calleeId": callee }))
            .await;
        assert_eq!(result["state"], json!("ringing"));
        result["callId"].as_str().unwrap().to_string()
    }

    pub async fn next_received(&mut self) -> Received {
        match self.pending.pop_front() {
            Some(item) => item,
            None => self.recv().await,
        }
    }

    /// Wait for the next message, which must be a `method` notification; returns its params
    pub async fn expect_notification(&mut self, method: &str) -> Value {
        match self.next_received().await {
            Received::Message(msg) => {
                assert_eq!(msg["method"], json!(method), "unexpected message: {}", msg);
                assert!(msg.get("id").is_none(), "notifications carry no id");
                msg["params"].clone()
            }
            Received::Close(reason) => panic!("expected {}, connection closed: {}", method, reason),
        }
    }

    pub async fn expect_close(&mut self) -> String {
        match self.next_received().await {
            Received::Close(reason) => reason,
            Received::Message(msg) => panic!("expected close, got {}", msg),
        }
    }

    /// Assert nothing is queued; call after `SignalingTestHarness::settle`
    pub fn assert_quiet(&mut self) {
        assert!(self.pending.is_empty(), "unexpected messages: {:?}", self.pending);
        if let Ok(item) = self.rx.try_recv() {
            panic!("unexpected message: {:?}", item);
        }
    }

    /// Close the connection from the client side
    pub async fn disconnect(self) {
        self.coordinator.close(self.connection).await.unwrap();
    }
}
