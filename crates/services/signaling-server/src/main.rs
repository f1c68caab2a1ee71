//! Call-signaling server binary entry point
//!
//! Starts the WebSocket call-signaling coordinator.
//!
//! # Usage
//!
//! ```bash
//! # Defaults (0.0.0.0:8080, 30s ring timeout)
//! cargo run -p rendezvous-signaling-server
//!
//! # YAML config file, with a flag override
//! cargo run -p rendezvous-signaling-server -- \
//!   --config ./signaling.yaml \
//!   --ring-timeout-ms 45000
//!
//! # JSON logs for log shippers
//! RUST_LOG=rendezvous_signaling=debug cargo run -p rendezvous-signaling-server -- --log-json
//! ```

use anyhow::Context;
use clap::Parser;
use rendezvous_signaling::{SignalingConfig, SignalingServer};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Rendezvous call-signaling server
///
/// Pairs users for one-to-one video calls and relays WebRTC negotiation
/// between them over JSON-RPC 2.0 / WebSocket.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file; flags override its values
    #[arg(short, long, env = "SIGNALING_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address
    #[arg(long, env = "SIGNALING_BIND")]
    bind: Option<String>,

    /// Time a callee has to answer, in milliseconds
    #[arg(long, env = "SIGNALING_RING_TIMEOUT_MS")]
    ring_timeout_ms: Option<u64>,

    /// Time finished calls are kept for late messages, in milliseconds
    #[arg(long, env = "SIGNALING_TERMINAL_GRACE_MS")]
    terminal_grace_ms: Option<u64>,

    /// Largest accepted text frame, in bytes
    #[arg(long, env = "SIGNALING_MAX_MESSAGE_BYTES")]
    max_message_bytes: Option<usize>,

    /// Coordinator command queue capacity
    #[arg(long, env = "SIGNALING_COMMAND_QUEUE_CAPACITY")]
    command_queue_capacity: Option<usize>,

    /// Time a client gets to finish the WebSocket handshake, in milliseconds
    #[arg(long, env = "SIGNALING_HANDSHAKE_TIMEOUT_MS")]
    handshake_timeout_ms: Option<u64>,

    /// Emit logs as JSON
    #[arg(long, env = "SIGNALING_LOG_JSON")]
    log_json: bool,
}

impl Args {
    /// Load the config file (if any) and apply flag overrides
    fn resolve_config(&self) -> anyhow::Result<SignalingConfig> {
        let mut config = match &self.config {
            Some(path) => SignalingConfig::from_yaml_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => SignalingConfig::default(),
        };

        if let Some(bind) = &self.bind {
            config.bind_address = bind.clone();
        }
        if let Some(ms) = self.ring_timeout_ms {
            config.ring_timeout_ms = ms;
        }
        if let Some(ms) = self.terminal_grace_ms {
            config.terminal_grace_ms = ms;
        }
        if let Some(bytes) = self.max_message_bytes {
            config.max_message_bytes = bytes;
        }
        if let Some(capacity) = self.command_queue_capacity {
            config.command_queue_capacity = capacity;
        }
        if let Some(ms) = self.handshake_timeout_ms {
            config.handshake_timeout_ms = ms;
        }

        config.validate().context("Invalid signaling configuration")?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Set up Ctrl+C handler at the very start
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        eprintln!("\nCtrl+C received, shutting down...");

        let was_already_set = shutdown_flag_handler.swap(true, Ordering::SeqCst);
        if was_already_set {
            eprintln!("Shutdown already in progress, forcing exit");
            std::process::exit(0);
        }

        // Give it a moment for graceful shutdown
        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_secs(3));
            eprintln!("Graceful shutdown timed out (3s), forcing exit");
            std::process::exit(0);
        });
    })
    .context("Failed to set Ctrl+C handler")?;

    // Create multi-threaded tokio runtime
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("signaling-worker")
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(args: Args, shutdown_flag: Arc<AtomicBool>) -> anyhow::Result<()> {
    init_tracing(args.log_json);

    let config = args.resolve_config()?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.bind_address,
        ring_timeout_ms = config.ring_timeout_ms,
        terminal_grace_ms = config.terminal_grace_ms,
        max_message_bytes = config.max_message_bytes,
        "Rendezvous signaling server starting"
    );

    let server = SignalingServer::new(config)
        .start()
        .await
        .context("Failed to start signaling server")?;
    info!("Server running on ws://{}. Press Ctrl+C to shutdown.", server.local_addr());

    while !shutdown_flag.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }

    info!("Shutdown signal received, cleaning up...");
    server.shutdown().await;
    info!("Signaling server shut down gracefully");

    Ok(())
}

fn init_tracing(json: bool) {
    // Initialize tracing with EnvFilter for RUST_LOG support
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
