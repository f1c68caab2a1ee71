//! Call-signaling coordinator for one-to-one video calls
//!
//! This crate pairs two users for a call and relays the WebRTC negotiation
//! between them. Media never flows through it: once both sides report the
//! call as connected, the peer connection owns the call.
//!
//! # Features
//!
//! - **Presence**: identity ↔ connection mapping, last registration wins
//! - **Call state machine**: ringing, accepted, connected and the terminal
//!   states, with a configurable ring timeout
//! - **Signal relay**: opaque SDP/ICE payloads forwarded between participants
//! - **Lifecycle handling**: a dropped connection cancels its calls
//! - **JSON-RPC 2.0 over WebSocket**: browser-friendly transport
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  Browser clients                                     │
//! │  ↓ (WebSocket, JSON-RPC 2.0)                         │
//! │  SignalingServer                                     │
//! │  └─ handler task per connection                      │
//! │     ↓ Command (mpsc)           ↑ Outbound (mpsc)     │
//! │  Coordinator (single task, owns all state)           │
//! │  ├─ ConnectionTable                                  │
//! │  ├─ PresenceRegistry                                 │
//! │  ├─ SessionTable (CallState machine, ring timers)    │
//! │  └─ relay                                            │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use rendezvous_signaling::SignalingConfig;
//!
//! let config = SignalingConfig {
//!     bind_address: "127.0.0.1:9000".to_string(),
//!     ring_timeout_ms: 45_000,
//!     ..Default::default()
//! };
//!
//! assert!(config.validate().is_ok());
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use rendezvous_signaling::{SignalingConfig, SignalingServer};
//!
//! # async fn example() -> rendezvous_signaling::Result<()> {
//! let server = SignalingServer::new(SignalingConfig::default());
//! let handle = server.start().await?;
//! println!("listening on {}", handle.local_addr());
//!
//! // ...
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod presence;
pub mod relay;
pub mod session;
pub mod signaling;

pub use config::SignalingConfig;
pub use connection::{ConnectionId, Outbound};
pub use coordinator::{Coordinator, CoordinatorHandle, CoordinatorStats};
pub use error::{Error, Result};
pub use presence::UserIdentity;
pub use session::{CallId, CallState, CancelReason, SessionSnapshot};
pub use signaling::{SignalingServer, SignalingServerHandle};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
