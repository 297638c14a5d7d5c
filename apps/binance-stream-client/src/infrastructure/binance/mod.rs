//! Binance Stream Adapter
//!
//! WebSocket adapter for the exchange's market data streams: wire
//! message types, the frame codec, liveness monitoring, reconnection
//! backoff, and the connection supervisor.

/// Wire message types.
pub mod messages;

/// Frame codec (decode inbound frames, encode control requests).
pub mod codec;

/// Reconnection backoff policy.
pub mod reconnect;

/// Connection liveness monitoring.
pub mod heartbeat;

/// Connection supervisor state machine.
pub mod supervisor;
