//! Subscription Management Types
//!
//! Domain types for tracking the desired set of market data streams.
//!
//! # Design
//!
//! The subscription manager tracks the active set in insertion order so
//! that replaying it on a fresh connection is deterministic: the same
//! active set always produces the same outbound subscribe sequence.
//! Both `subscribe` and `unsubscribe` are idempotent.

use parking_lot::RwLock;

use crate::domain::streaming::{KlineInterval, StreamId, StreamKind};

// =============================================================================
// Subscription
// =============================================================================

/// A desired subscription to one market data stream.
///
/// Unique by `(symbol, kind, interval)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    /// Lowercase exchange symbol, e.g. `btcusdt`.
    pub symbol: String,
    /// Stream kind.
    pub kind: StreamKind,
    /// Candle interval; required for kline streams, absent otherwise.
    pub interval: Option<KlineInterval>,
}

impl Subscription {
    /// Create a kline subscription.
    #[must_use]
    pub fn kline(symbol: impl Into<String>, interval: KlineInterval) -> Self {
        Self {
            symbol: symbol.into().to_lowercase(),
            kind: StreamKind::Kline,
            interval: Some(interval),
        }
    }

    /// Create a trade subscription.
    #[must_use]
    pub fn trade(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into().to_lowercase(),
            kind: StreamKind::Trade,
            interval: None,
        }
    }

    /// The exchange topic for this subscription, e.g. `btcusdt@kline_1m`.
    #[must_use]
    pub fn stream_name(&self) -> StreamId {
        match (self.kind, self.interval) {
            (StreamKind::Kline, Some(interval)) => {
                format!("{}@kline_{}", self.symbol, interval.as_str())
            }
            // A kline subscription without an interval cannot be built
            // through the constructors; fall back to the bare topic.
            (StreamKind::Kline, None) => format!("{}@kline", self.symbol),
            (StreamKind::Trade, _) => format!("{}@trade", self.symbol),
        }
    }

    /// Parse a subscription from an exchange topic such as
    /// `btcusdt@kline_1m` or `ethusdt@trade`.
    #[must_use]
    pub fn parse_stream_name(name: &str) -> Option<Self> {
        let (symbol, channel) = name.split_once('@')?;
        if symbol.is_empty() {
            return None;
        }

        if channel == "trade" {
            return Some(Self::trade(symbol));
        }

        let interval = channel.strip_prefix("kline_")?;
        KlineInterval::parse(interval).map(|interval| Self::kline(symbol, interval))
    }
}

// =============================================================================
// Subscription Manager
// =============================================================================

/// Tracks the active subscription set for one client instance.
///
/// Thread-safe; insertion order is preserved so resubscription replay
/// is deterministic given the same active set.
///
/// # Example
///
/// ```rust
/// use binance_stream_client::domain::streaming::KlineInterval;
/// use binance_stream_client::domain::subscription::{Subscription, SubscriptionManager};
///
/// let manager = SubscriptionManager::new();
/// let sub = Subscription::kline("btcusdt", KlineInterval::OneMinute);
///
/// assert!(manager.subscribe(sub.clone()));
/// // Subscribing twice is a no-op.
/// assert!(!manager.subscribe(sub.clone()));
///
/// assert_eq!(manager.stream_names(), vec!["btcusdt@kline_1m".to_string()]);
///
/// assert!(manager.unsubscribe(&sub));
/// assert!(!manager.unsubscribe(&sub));
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    active: RwLock<Vec<Subscription>>,
}

impl SubscriptionManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            active: RwLock::new(Vec::new()),
        }
    }

    /// Add a subscription to the active set.
    ///
    /// Returns `true` if the set changed (`false` when the subscription
    /// was already present).
    pub fn subscribe(&self, subscription: Subscription) -> bool {
        let mut active = self.active.write();
        if active.contains(&subscription) {
            return false;
        }
        active.push(subscription);
        true
    }

    /// Remove a subscription from the active set.
    ///
    /// Returns `true` if the set changed (`false` when the subscription
    /// was absent).
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let mut active = self.active.write();
        let before = active.len();
        active.retain(|s| s != subscription);
        active.len() != before
    }

    /// Snapshot of the active set, in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Subscription> {
        self.active.read().clone()
    }

    /// Stream topics of the active set, in insertion order.
    #[must_use]
    pub fn stream_names(&self) -> Vec<StreamId> {
        self.active.read().iter().map(Subscription::stream_name).collect()
    }

    /// Number of active subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.read().len()
    }

    /// Whether the active set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.read().is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
