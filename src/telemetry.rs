//! Global tracing subscriber setup.
//!
//! The engine logs with `tracing` throughout (cell births/deaths, mutation
//! events, reaper sweeps, allocation failures) instead of the ad hoc
//! println!/event-buffer approach of earlier prototypes. `init` is cheap to
//! call from every binary entry point and every test that wants output;
//! a second call is a no-op.

use std::sync::Once;

static INIT: Once = Once::new();

/// Installs a global `tracing` subscriber reading `RUST_LOG` (default
/// `info`). Safe to call more than once; only the first call takes effect.
pub fn init() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    });
}
