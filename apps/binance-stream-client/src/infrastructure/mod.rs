//! Infrastructure layer - Adapters and external integrations.

/// Exchange WebSocket adapter.
pub mod binance;

/// Event dispatcher with per-consumer backpressure.
pub mod dispatch;

/// Environment-driven configuration.
pub mod config;

/// Prometheus metrics.
pub mod metrics;

/// Tracing initialisation.
pub mod telemetry;
