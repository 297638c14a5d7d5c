//! Market Data Streaming Types
//!
//! Core domain types for market data events. These types are
//! codec-agnostic and represent the canonical internal representation
//! of everything that flows from the transport to consumers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

// =============================================================================
// Stream Identity
// =============================================================================

/// A stream identifier (exchange topic), e.g. `btcusdt@kline_1m`.
pub type StreamId = String;

/// Kind of market data stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Candlestick (OHLCV) updates.
    Kline,
    /// Individual trades.
    Trade,
}

impl StreamKind {
    /// Get the topic segment for this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Kline => "kline",
            Self::Trade => "trade",
        }
    }
}

/// Candlestick aggregation interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KlineInterval {
    /// One minute.
    OneMinute,
    /// Three minutes.
    ThreeMinutes,
    /// Five minutes.
    FiveMinutes,
    /// Fifteen minutes.
    FifteenMinutes,
    /// Thirty minutes.
    ThirtyMinutes,
    /// One hour.
    OneHour,
    /// Four hours.
    FourHours,
    /// One day.
    OneDay,
}

impl KlineInterval {
    /// Get the wire representation of the interval.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::ThreeMinutes => "3m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
            Self::FourHours => "4h",
            Self::OneDay => "1d",
        }
    }

    /// Parse an interval from its wire representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(Self::OneMinute),
            "3m" => Some(Self::ThreeMinutes),
            "5m" => Some(Self::FiveMinutes),
            "15m" => Some(Self::FifteenMinutes),
            "30m" => Some(Self::ThirtyMinutes),
            "1h" => Some(Self::OneHour),
            "4h" => Some(Self::FourHours),
            "1d" => Some(Self::OneDay),
            _ => None,
        }
    }
}

// =============================================================================
// Frames
// =============================================================================

/// One discrete unit of data received from the transport, prior to
/// decoding. Produced by the connection supervisor and consumed exactly
/// once by the codec.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Raw frame payload.
    pub payload: Vec<u8>,
    /// When the frame was read off the socket.
    pub received_at: DateTime<Utc>,
}

impl RawFrame {
    /// Create a frame stamped with the current time.
    #[must_use]
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            received_at: Utc::now(),
        }
    }
}

// =============================================================================
// Market Events
// =============================================================================

/// A validated candlestick update.
///
/// Immutable once constructed. `sequence` increases strictly
/// monotonically per `stream_id`; the sequencing buffer enforces that
/// consumers never observe the same sequence twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KlineEvent {
    /// Stream this event belongs to.
    pub stream_id: StreamId,
    /// Candle open time.
    pub open_time: DateTime<Utc>,
    /// Candle close time.
    pub close_time: DateTime<Utc>,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
    /// Base asset volume.
    pub volume: Decimal,
    /// Whether the candle is closed (final update for this candle).
    pub is_final: bool,
    /// Per-stream monotonic sequence.
    pub sequence: u64,
}

/// A validated trade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeEvent {
    /// Stream this event belongs to.
    pub stream_id: StreamId,
    /// Exchange-assigned trade id; doubles as the per-stream sequence.
    pub trade_id: u64,
    /// Trade price.
    pub price: Decimal,
    /// Trade quantity.
    pub quantity: Decimal,
    /// Whether the buyer was the maker.
    pub buyer_is_maker: bool,
    /// Trade time.
    pub trade_time: DateTime<Utc>,
}

/// Any decoded market data event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketEvent {
    /// Candlestick update.
    Kline(KlineEvent),
    /// Trade.
    Trade(TradeEvent),
}

impl MarketEvent {
    /// Stream the event belongs to.
    #[must_use]
    pub fn stream_id(&self) -> &str {
        match self {
            Self::Kline(k) => &k.stream_id,
            Self::Trade(t) => &t.stream_id,
        }
    }

    /// Per-stream monotonic sequence of the event.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        match self {
            Self::Kline(k) => k.sequence,
            Self::Trade(t) => t.trade_id,
        }
    }
}

// =============================================================================
// Control Messages
// =============================================================================

/// Non-data frames decoded off the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Acknowledgement of a subscribe/unsubscribe request.
    SubscribeAck {
        /// Request id the acknowledgement refers to.
        id: u64,
    },
    /// Error frame from the exchange.
    Error {
        /// Exchange error code.
        code: i64,
        /// Exchange error message.
        message: String,
    },
    /// An event type this client does not handle. Kept for forward
    /// compatibility; never treated as malformed.
    Unhandled {
        /// The wire event type.
        event_type: String,
    },
}

// =============================================================================
// Delivery
// =============================================================================

/// An inclusive range of sequence numbers that were never admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissingRange {
    /// First missing sequence.
    pub from: u64,
    /// Last missing sequence.
    pub to: u64,
}

impl MissingRange {
    /// Number of sequences covered by the range.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.to.saturating_sub(self.from) + 1
    }

    /// A missing range is never empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }
}

/// What the dispatcher delivers to a consumer: one admitted event,
/// plus the missing sequence range when admission detected that prior
/// events were skipped (e.g. across a reconnect). A gap never blocks
/// delivery; consumers use it to invalidate cached state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamUpdate {
    /// The admitted event.
    pub event: MarketEvent,
    /// Sequence range skipped since the previous admitted event.
    pub gap: Option<MissingRange>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_round_trip() {
        for interval in [
            KlineInterval::OneMinute,
            KlineInterval::ThreeMinutes,
            KlineInterval::FiveMinutes,
            KlineInterval::FifteenMinutes,
            KlineInterval::ThirtyMinutes,
            KlineInterval::OneHour,
            KlineInterval::FourHours,
            KlineInterval::OneDay,
        ] {
            assert_eq!(KlineInterval::parse(interval.as_str()), Some(interval));
        }
    }

    #[test]
    fn interval_rejects_unknown() {
        assert_eq!(KlineInterval::parse("2w"), None);
        assert_eq!(KlineInterval::parse(""), None);
    }

    #[test]
    fn missing_range_len() {
        let range = MissingRange { from: 3, to: 3 };
        assert_eq!(range.len(), 1);

        let range = MissingRange { from: 5, to: 9 };
        assert_eq!(range.len(), 5);
    }

    #[test]
    fn market_event_accessors() {
        let trade = MarketEvent::Trade(TradeEvent {
            stream_id: "btcusdt@trade".to_string(),
            trade_id: 42,
            price: Decimal::new(500, 1),
            quantity: Decimal::ONE,
            buyer_is_maker: false,
            trade_time: Utc::now(),
        });

        assert_eq!(trade.stream_id(), "btcusdt@trade");
        assert_eq!(trade.sequence(), 42);
    }
}
