//! Configuration Module
//!
//! Environment-driven settings for the stream client.

mod settings;

pub use settings::{
    ClientConfig, ConfigError, ConnectionSettings, DEFAULT_ENDPOINT, DeliverySettings,
    parse_backpressure,
};
