//! Tracing bootstrap.
//!
//! The engine only emits `tracing` events; installing a subscriber is the
//! application's call. This helper wires the common fmt + env-filter
//! setup for binaries and examples that do not bring their own.

use tracing_subscriber::{fmt, EnvFilter};

/// Install a fmt subscriber honoring `RUST_LOG`, defaulting to `info` for
/// this crate. Calling it twice is harmless: the second call is a no-op.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tasktree=info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
