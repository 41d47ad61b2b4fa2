//! Logging bootstrap for binaries/tests embedding this crate.
//!
//! The library itself never installs a global subscriber — it only emits
//! `tracing` events — matching the donor crate's separation between
//! library code and its `tauri::Builder` setup hook that wires up
//! `tracing-subscriber`. This helper exists for integration tests and any
//! future thin CLI/service layer.

use std::sync::Once;

static INIT: Once = Once::new();

/// Installs an `EnvFilter`-driven `fmt` subscriber, defaulting to `info`
/// and honoring `RUST_LOG`. Idempotent: subsequent calls are no-ops.
pub fn init() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    });
}
