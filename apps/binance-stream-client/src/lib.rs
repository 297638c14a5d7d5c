#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Binance Stream Client - Resilient Market Data Streaming
//!
//! Maintains one logical subscription set over a sequence of physical
//! WebSocket connections to the exchange, survives disconnects with
//! backoff and resubscription, and delivers ordered, de-duplicated
//! updates to registered consumers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core streaming logic and data types
//!   - `streaming`: Market data events (klines, trades) and delivery types
//!   - `subscription`: Active subscription set tracking
//!   - `sequencing`: Per-stream watermarks, dedup and gap detection
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Consumer sink interface and backpressure policies
//!   - `services`: The `StreamClient` facade and processing pipeline
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `binance`: WebSocket supervisor, frame codec, liveness, backoff
//!   - `dispatch`: Per-consumer bounded delivery queues
//!   - `config`: Environment-driven configuration
//!   - `metrics`: Prometheus counters for every recovered failure
//!
//! # Data Flow
//!
//! ```text
//!                ┌────────────┐    ┌───────┐    ┌────────────┐    ┌────────────┐
//! Exchange WS ──▶│ Supervisor │───▶│ Codec │───▶│ Sequencing │───▶│ Dispatcher │──▶ Consumer 1
//!                └────────────┘    └───────┘    └────────────┘    └────────────┘──▶ Consumer N
//!                      ▲
//!                      │ resubscribe on every new connection
//!                ┌─────┴────────┐
//!                │ Subscription │
//!                │   Manager    │
//!                └──────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core streaming types with no transport dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::sequencing::{Admission, SequenceBuffer};
pub use domain::streaming::{
    ControlMessage, KlineEvent, KlineInterval, MarketEvent, MissingRange, RawFrame, StreamId,
    StreamKind, StreamUpdate, TradeEvent,
};
pub use domain::subscription::{Subscription, SubscriptionManager};

// Application surface
pub use application::ports::{BackpressurePolicy, EventConsumer};
pub use application::services::{Diagnostics, DiagnosticsSnapshot, StreamClient};

// Infrastructure config
pub use infrastructure::config::{
    ClientConfig, ConfigError, ConnectionSettings, DEFAULT_ENDPOINT, DeliverySettings,
};

// Supervisor surface (for integration tests and embedders)
pub use infrastructure::binance::supervisor::{ConnectionState, ConnectionStatus};

// Codec surface (for integration tests)
pub use infrastructure::binance::codec::{CodecError, Decoded, FrameCodec};

// Dispatcher surface (for integration tests)
pub use infrastructure::dispatch::{
    ConsumerId, ConsumerStats, DispatchConfig, DispatcherStats, EventDispatcher,
};

// Metrics
pub use infrastructure::metrics::{get_metrics_handle, init_metrics};

// Telemetry
pub use infrastructure::telemetry::init as init_telemetry;
