//! # Pingslot Endpoint
//!
//! Runs one Class A/B endpoint session against the simulated engine.
//!
//! ## Startup Sequence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. Initialize tracing (RUST_LOG, default info + debug for pingslot)   │
//! │  2. Load NodeConfig (file from argv[1] or the platform default,        │
//! │     then PINGSLOT_* overrides, then validation)                        │
//! │  3. Build the node with the simulated engine attached to its queue     │
//! │  4. Ctrl-C → NodeHandle::shutdown                                      │
//! │  5. Run until Disconnected, shutdown or a fatal error                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pingslot_core::DeviceClass;
use pingslot_node::{CounterPayload, Node, NodeConfig, NodeHandle, NodeResult, SessionSummary, SimulatedEngine};

#[tokio::main]
async fn main() {
    init_tracing();

    let config_path = std::env::args().nth(1).map(PathBuf::from);

    match run(config_path).await {
        Ok(summary) => match serde_json::to_string(&summary) {
            Ok(json) => info!(summary = %json, "Endpoint finished"),
            Err(e) => info!(end = ?summary.end, error = %e, "Endpoint finished"),
        },
        Err(err) => {
            error!(error = %err, code = err.exit_code(), "Endpoint stopped");
            std::process::exit(err.exit_code());
        }
    }
}

async fn run(config_path: Option<PathBuf>) -> NodeResult<SessionSummary> {
    let config = NodeConfig::load(config_path)?;

    let mut node = Node::new(config, SimulatedEngine::new(), CounterPayload::default());
    let sender = node.event_sender();
    node.engine_mut().attach(sender);

    let handle = node.handle();
    watch_class_changes(handle.clone());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            if let Err(e) = handle.shutdown() {
                error!(error = %e, "Failed to request shutdown");
            }
        }
    });

    node.run().await
}

/// Logs every class transition seen on the status channel.
fn watch_class_changes(handle: NodeHandle) {
    let mut rx = handle.subscribe();
    tokio::spawn(async move {
        let mut class = DeviceClass::A;
        while rx.changed().await.is_ok() {
            let status = rx.borrow_and_update().clone();
            if status.class != class {
                class = status.class;
                info!(
                    class = %class,
                    floor_ms = status.duty_floor_ms,
                    beacons = status.counters.beacon_lock_count,
                    misses = status.counters.beacon_miss_count,
                    "Device class changed"
                );
            }
        }
    });
}

/// Initializes the tracing subscriber for structured logging.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=pingslot_node=trace` - Trace the dispatcher and engine calls
/// - Default: INFO, DEBUG for the pingslot crates
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pingslot_node=debug,endpoint=debug"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
