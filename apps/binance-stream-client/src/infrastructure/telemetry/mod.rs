//! Tracing Initialisation
//!
//! Configures the `tracing` subscriber for structured logging. Log
//! levels are controlled through `RUST_LOG`; without it, the client
//! logs at `info` and its own crate at `debug`.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Default filter directives applied when `RUST_LOG` is unset.
const DEFAULT_DIRECTIVES: &str = "info,binance_stream_client=debug";

/// Initialize the tracing subscriber.
///
/// Safe to call once per process; later calls are ignored.
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init();
}
