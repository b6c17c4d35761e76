//! Logging setup
//!
//! The library only emits `tracing` events. Binaries and tests that want to
//! see them call [`init_tracing`] once at startup.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_DIRECTIVE: &str = "router_core=info";

/// Install a formatted subscriber filtered by `RUST_LOG`
///
/// Returns an error instead of panicking if a global subscriber is already
/// installed.
pub fn init_tracing() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives)?,
        _ => EnvFilter::new(DEFAULT_DIRECTIVE),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
}
