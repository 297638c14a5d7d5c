//! Binance Stream Client Binary
//!
//! Subscribes to the configured market data streams and logs every
//! delivered event until interrupted.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin binance-stream-client
//! ```
//!
//! # Environment Variables
//!
//! ## Optional
//! - `KLINE_STREAM_ENDPOINT`: WebSocket endpoint
//!   (default: `wss://stream.binance.com:9443/ws`)
//! - `BINANCE_STREAMS`: comma-separated stream topics
//!   (default: `btcusdt@kline_1m`)
//! - `KLINE_STREAM_CONNECT_TIMEOUT_MS`: connect timeout (default: 10000)
//! - `KLINE_STREAM_IDLE_TIMEOUT_SECS`: stale-connection window (default: 60)
//! - `KLINE_STREAM_PING_INTERVAL_SECS`: ping cadence (default: 20)
//! - `KLINE_STREAM_BACKOFF_MIN_MS` / `KLINE_STREAM_BACKOFF_MAX_SECS`:
//!   reconnect delay bounds (default: 500 / 30)
//! - `KLINE_STREAM_BACKOFF_RESET_SECS`: healthy time that resets the
//!   backoff schedule (default: 60)
//! - `KLINE_STREAM_MAX_RECONNECT_ATTEMPTS`: 0 = unlimited (default: 0)
//! - `KLINE_STREAM_QUEUE_CAPACITY`: per-consumer queue (default: 1024)
//! - `KLINE_STREAM_BACKPRESSURE`: `drop_oldest` | `drop_newest` |
//!   `block:<ms>` (default: `drop_oldest`)
//! - `RUST_LOG`: log filter (default: info, crate at debug)

use std::sync::Arc;

use async_trait::async_trait;
use binance_stream_client::{
    ClientConfig, EventConsumer, MarketEvent, StreamClient, StreamUpdate, Subscription,
    init_metrics, init_telemetry,
};
use tokio::signal;

/// Default stream set: the classic single-stream demonstration.
const DEFAULT_STREAMS: &str = "btcusdt@kline_1m";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();
    init_telemetry();
    let _metrics_handle = init_metrics();

    tracing::info!("Starting Binance stream client");

    let config = ClientConfig::from_env()?;
    log_config(&config);

    let subscriptions = parse_streams()?;

    let client = StreamClient::start(config.clone())?;
    client.register_consumer(
        "stdout-logger",
        Arc::new(EventLogger),
        config.delivery.backpressure,
    );

    for subscription in subscriptions {
        tracing::info!(stream = %subscription.stream_name(), "Subscribing");
        client.subscribe(subscription);
    }

    await_shutdown().await;

    client.shutdown().await;
    log_diagnostics(&client);

    tracing::info!("Stream client stopped");
    Ok(())
}

/// Consumer that logs every delivered update; stands in for the
/// original print-each-message loop.
struct EventLogger;

#[async_trait]
impl EventConsumer for EventLogger {
    async fn on_event(&self, update: StreamUpdate) {
        if let Some(gap) = update.gap {
            tracing::warn!(
                stream = %update.event.stream_id(),
                from = gap.from,
                to = gap.to,
                "Events were missed; cached state may be stale"
            );
        }

        match update.event {
            MarketEvent::Kline(kline) => {
                tracing::info!(
                    stream = %kline.stream_id,
                    open_time = %kline.open_time,
                    open = %kline.open,
                    high = %kline.high,
                    low = %kline.low,
                    close = %kline.close,
                    volume = %kline.volume,
                    closed = kline.is_final,
                    "Kline"
                );
            }
            MarketEvent::Trade(trade) => {
                tracing::info!(
                    stream = %trade.stream_id,
                    price = %trade.price,
                    quantity = %trade.quantity,
                    buyer_is_maker = trade.buyer_is_maker,
                    "Trade"
                );
            }
        }
    }
}

/// Parse the `BINANCE_STREAMS` list into subscriptions.
fn parse_streams() -> anyhow::Result<Vec<Subscription>> {
    let raw = std::env::var("BINANCE_STREAMS").unwrap_or_else(|_| DEFAULT_STREAMS.to_string());

    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|name| {
            Subscription::parse_stream_name(name)
                .ok_or_else(|| anyhow::anyhow!("unsupported stream topic: {name}"))
        })
        .collect()
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ClientConfig) {
    tracing::info!(
        endpoint = %config.endpoint,
        connect_timeout_ms = config.connection.connect_timeout.as_millis(),
        idle_timeout_secs = config.connection.idle_timeout.as_secs(),
        backoff_min_ms = config.connection.backoff_min.as_millis(),
        backoff_max_secs = config.connection.backoff_max.as_secs(),
        queue_capacity = config.delivery.queue_capacity,
        backpressure = config.delivery.backpressure.as_str(),
        "Configuration loaded"
    );
}

/// Log the final diagnostics counters.
fn log_diagnostics(client: &StreamClient) {
    let snapshot = client.diagnostics();
    tracing::info!(
        frames_received = snapshot.frames_received,
        malformed_frames = snapshot.malformed_frames,
        duplicates_dropped = snapshot.duplicates_dropped,
        gaps_detected = snapshot.gaps_detected,
        events_dispatched = snapshot.events_dispatched,
        reconnects = snapshot.reconnects,
        "Final diagnostics"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
