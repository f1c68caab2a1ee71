//! WebSocket signaling server
//!
//! Binds the listener, spawns the call coordinator and runs the accept loop.
//! Each accepted socket gets its own handler task; all of them share one
//! [`CoordinatorHandle`].

use super::handler::handle_connection;
use crate::config::SignalingConfig;
use crate::coordinator::{Coordinator, CoordinatorHandle};
use crate::Result;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// WebSocket signaling server
pub struct SignalingServer {
    config: SignalingConfig,
}

impl SignalingServer {
    /// Create a new server from a configuration
    pub fn new(config: SignalingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SignalingConfig {
        &self.config
    }

    /// Bind the listener and start serving
    ///
    /// Returns once the listener is bound. The returned handle shuts the
    /// server down.
    pub async fn start(self) -> Result<SignalingServerHandle> {
        self.config.validate()?;
        let addr = self.config.socket_addr()?;

        let listener = TcpListener::bind(addr).await.map_err(|e| {
            error!("Failed to bind WebSocket server to {}: {}", addr, e);
            e
        })?;
        let local_addr = listener.local_addr()?;
        info!("WebSocket signaling server listening on ws://{}", local_addr);

        let (coordinator, coordinator_task) = Coordinator::spawn(&self.config);
        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        let accept_task = tokio::spawn(accept_loop(
            listener,
            coordinator.clone(),
            self.config.max_message_bytes,
            self.config.handshake_timeout(),
            shutdown_tx.subscribe(),
        ));

        Ok(SignalingServerHandle {
            local_addr,
            coordinator,
            shutdown_tx,
            accept_task,
            coordinator_task,
        })
    }
}

async fn accept_loop(
    listener: TcpListener,
    coordinator: CoordinatorHandle,
    max_message_bytes: usize,
    handshake_timeout: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        let coordinator = coordinator.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, coordinator, max_message_bytes, handshake_timeout).await {
                                warn!("WebSocket connection error from {}: {}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept WebSocket connection: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("WebSocket signaling server received shutdown signal");
                break;
            }
        }
    }

    info!("WebSocket signaling server accept loop exited");
}

/// Handle for controlling a running signaling server
pub struct SignalingServerHandle {
    local_addr: SocketAddr,
    coordinator: CoordinatorHandle,
    shutdown_tx: broadcast::Sender<()>,
    accept_task: JoinHandle<()>,
    coordinator_task: JoinHandle<()>,
}

impl SignalingServerHandle {
    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle to the coordinator serving this server's connections
    pub fn coordinator(&self) -> &CoordinatorHandle {
        &self.coordinator
    }

    /// Stop accepting, cancel every live call and close every connection
    pub async fn shutdown(self) {
        info!("Shutting down WebSocket signaling server");
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.accept_task.await {
            error!("Accept loop ended abnormally: {}", e);
        }

        if let Err(e) = self.coordinator.shutdown().await {
            warn!("Coordinator already stopped: {}", e);
        }
        if let Err(e) = self.coordinator_task.await {
            error!("Coordinator task ended abnormally: {}", e);
        }
        info!("WebSocket signaling server stopped");
    }
}
