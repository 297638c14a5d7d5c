//! Port Interfaces
//!
//! Contracts between the client core and the outside world, following
//! the Hexagonal Architecture pattern.
//!
//! ## Driver Ports (Inbound)
//!
//! - [`EventConsumer`]: callback sink invoked with one delivered update
//!   at a time, in dispatch order
//!
//! The backpressure policy chosen at registration governs what happens
//! when a consumer cannot keep pace with production.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::streaming::StreamUpdate;

/// Policy applied when a consumer's delivery queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressurePolicy {
    /// Discard the oldest buffered-but-undelivered update.
    DropOldest,
    /// Refuse the newest update.
    DropNewest,
    /// Suspend the producing path until space frees up, bounded by the
    /// timeout; on timeout, fall back to [`Self::DropOldest`].
    Block {
        /// Maximum time to suspend the producer.
        timeout: Duration,
    },
}

impl BackpressurePolicy {
    /// Policy name for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DropOldest => "drop_oldest",
            Self::DropNewest => "drop_newest",
            Self::Block { .. } => "block",
        }
    }
}

/// A registered consumer of stream updates.
///
/// `on_event` is invoked from the consumer's dedicated delivery task,
/// one update at a time, in the global delivery order. Implementations
/// must not block indefinitely: a consumer that stalls only backs up
/// its own queue, where the registered backpressure policy applies.
#[async_trait]
pub trait EventConsumer: Send + Sync {
    /// Handle one delivered update.
    async fn on_event(&self, update: StreamUpdate);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_names() {
        assert_eq!(BackpressurePolicy::DropOldest.as_str(), "drop_oldest");
        assert_eq!(BackpressurePolicy::DropNewest.as_str(), "drop_newest");
        assert_eq!(
            BackpressurePolicy::Block {
                timeout: Duration::from_secs(1)
            }
            .as_str(),
            "block"
        );
    }
}
