//! Console tracing setup for binaries and examples.
//!
//! The core only emits `tracing` spans and events; whether anything
//! renders them is the embedding process's choice. This helper wires a
//! formatted subscriber with env-filter (`RUST_LOG`) and span-trace
//! capture for error reports.

use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install a global subscriber. Safe to call once per process; repeat
/// calls are ignored.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,gatewright=debug"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(ErrorLayer::default())
        .try_init();
}
