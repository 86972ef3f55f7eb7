//! Tracing initialization for the controller binary

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the global tracing subscriber
///
/// Plain fmt output with `RUST_LOG`-style filtering. Safe to call more than
/// once; subsequent calls are no-ops.
pub fn init_telemetry() {
    let _ = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init();
}
