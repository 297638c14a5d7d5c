//! Binance WebSocket Message Types
//!
//! Wire format types for the exchange's market data streams. These map
//! directly to the JSON schemas the exchange sends; decoding into
//! domain events (with validation) happens in the codec.
//!
//! # Message Types
//!
//! ## Data frames
//! - `KlineStreamMsg`: candlestick updates (`"e":"kline"`)
//! - `TradeStreamMsg`: individual trades (`"e":"trade"`)
//! - `CombinedStreamMsg`: envelope used by `/stream` endpoints, wrapping
//!   any data frame together with its stream topic
//!
//! ## Control frames
//! - `SubscribeRequest`: outbound subscribe/unsubscribe
//! - `SubscribeAckMsg`: acknowledgement of a control request
//! - `ErrorMsg`: error response with code and message
//!
//! Numeric prices and quantities arrive as JSON strings and are kept as
//! strings here; parsing and validation belong to the codec.

use serde::{Deserialize, Serialize};

// =============================================================================
// Data Frames
// =============================================================================

/// Candlestick stream message.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "e": "kline", "E": 1700000000123, "s": "BTCUSDT",
///   "k": {
///     "t": 1699999980000, "T": 1700000039999, "s": "BTCUSDT", "i": "1m",
///     "o": "42000.10", "c": "42001.55", "h": "42010.00", "l": "41995.00",
///     "v": "12.41", "x": false
///   }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KlineStreamMsg {
    /// Event type (always "kline").
    #[serde(rename = "e")]
    pub event_type: String,

    /// Event sequence: exchange event time in milliseconds, strictly
    /// increasing per stream.
    #[serde(rename = "E")]
    pub event_time: u64,

    /// Symbol, e.g. "BTCUSDT".
    #[serde(rename = "s")]
    pub symbol: String,

    /// Candle payload.
    #[serde(rename = "k")]
    pub kline: KlinePayload,
}

/// Candle payload within a kline message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KlinePayload {
    /// Candle open time in milliseconds.
    #[serde(rename = "t")]
    pub open_time: i64,

    /// Candle close time in milliseconds.
    #[serde(rename = "T")]
    pub close_time: i64,

    /// Symbol.
    #[serde(rename = "s")]
    pub symbol: String,

    /// Candle interval, e.g. "1m".
    #[serde(rename = "i")]
    pub interval: String,

    /// Open price.
    #[serde(rename = "o")]
    pub open: String,

    /// Close price.
    #[serde(rename = "c")]
    pub close: String,

    /// High price.
    #[serde(rename = "h")]
    pub high: String,

    /// Low price.
    #[serde(rename = "l")]
    pub low: String,

    /// Base asset volume.
    #[serde(rename = "v")]
    pub volume: String,

    /// Whether the candle is closed.
    #[serde(rename = "x")]
    pub is_final: bool,
}

/// Trade stream message.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "e": "trade", "E": 1700000000123, "s": "BTCUSDT",
///   "t": 912871, "p": "42000.10", "q": "0.25",
///   "T": 1700000000120, "m": true
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeStreamMsg {
    /// Event type (always "trade").
    #[serde(rename = "e")]
    pub event_type: String,

    /// Event time in milliseconds.
    #[serde(rename = "E")]
    pub event_time: u64,

    /// Symbol.
    #[serde(rename = "s")]
    pub symbol: String,

    /// Trade id; contiguous per symbol.
    #[serde(rename = "t")]
    pub trade_id: u64,

    /// Trade price.
    #[serde(rename = "p")]
    pub price: String,

    /// Trade quantity.
    #[serde(rename = "q")]
    pub quantity: String,

    /// Trade time in milliseconds.
    #[serde(rename = "T")]
    pub trade_time: i64,

    /// Whether the buyer is the market maker.
    #[serde(rename = "m")]
    pub buyer_is_maker: bool,
}

/// Combined-stream envelope used by `/stream` endpoints.
///
/// # Wire Format (JSON)
/// ```json
/// {"stream": "btcusdt@kline_1m", "data": { ... }}
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CombinedStreamMsg {
    /// Stream topic the payload belongs to.
    pub stream: String,

    /// The wrapped data frame.
    pub data: serde_json::Value,
}

// =============================================================================
// Control Frames
// =============================================================================

/// Method for a subscription control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscribeMethod {
    /// Add streams to the connection.
    Subscribe,
    /// Remove streams from the connection.
    Unsubscribe,
}

/// Outbound subscribe/unsubscribe request.
///
/// # Wire Format (JSON)
/// ```json
/// {"method": "SUBSCRIBE", "params": ["btcusdt@kline_1m"], "id": 1}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Request method.
    pub method: SubscribeMethod,

    /// Stream topics the request applies to.
    pub params: Vec<String>,

    /// Client-assigned request id, echoed back in the acknowledgement.
    pub id: u64,
}

impl SubscribeRequest {
    /// Build a subscribe request.
    #[must_use]
    pub const fn subscribe(params: Vec<String>, id: u64) -> Self {
        Self {
            method: SubscribeMethod::Subscribe,
            params,
            id,
        }
    }

    /// Build an unsubscribe request.
    #[must_use]
    pub const fn unsubscribe(params: Vec<String>, id: u64) -> Self {
        Self {
            method: SubscribeMethod::Unsubscribe,
            params,
            id,
        }
    }
}

/// Acknowledgement of a control request.
///
/// # Wire Format (JSON)
/// ```json
/// {"result": null, "id": 1}
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubscribeAckMsg {
    /// Result payload; `null` on success.
    pub result: Option<serde_json::Value>,

    /// The request id being acknowledged.
    pub id: u64,
}

/// Error frame from the exchange.
///
/// # Wire Format (JSON)
/// ```json
/// {"error": {"code": 2, "msg": "Invalid request"}, "id": 1}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorMsg {
    /// Error detail.
    pub error: ErrorDetail,

    /// The request id the error refers to, when applicable.
    #[serde(default)]
    pub id: Option<u64>,
}

/// Code and message of an error frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorDetail {
    /// Exchange error code.
    pub code: i64,

    /// Exchange error message.
    pub msg: String,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kline_message_deserializes() {
        let json = r#"{
            "e": "kline", "E": 1700000000123, "s": "BTCUSDT",
            "k": {
                "t": 1699999980000, "T": 1700000039999, "s": "BTCUSDT", "i": "1m",
                "o": "42000.10", "c": "42001.55", "h": "42010.00", "l": "41995.00",
                "v": "12.41", "x": false
            }
        }"#;

        let msg: KlineStreamMsg = serde_json::from_str(json).unwrap();
        assert_eq!(msg.event_type, "kline");
        assert_eq!(msg.event_time, 1_700_000_000_123);
        assert_eq!(msg.kline.interval, "1m");
        assert_eq!(msg.kline.open, "42000.10");
        assert!(!msg.kline.is_final);
    }

    #[test]
    fn kline_message_tolerates_unknown_fields() {
        // Forward compatibility: extra fields must not break decoding.
        let json = r#"{
            "e": "kline", "E": 1, "s": "BTCUSDT", "new_field": 7,
            "k": {
                "t": 0, "T": 59999, "s": "BTCUSDT", "i": "1m",
                "o": "1", "c": "1", "h": "1", "l": "1", "v": "0",
                "x": true, "q": "0", "n": 12, "V": "0", "Q": "0", "B": "0"
            }
        }"#;

        let msg: KlineStreamMsg = serde_json::from_str(json).unwrap();
        assert!(msg.kline.is_final);
    }

    #[test]
    fn trade_message_deserializes() {
        let json = r#"{
            "e": "trade", "E": 1700000000123, "s": "BTCUSDT",
            "t": 912871, "p": "42000.10", "q": "0.25",
            "T": 1700000000120, "m": true
        }"#;

        let msg: TradeStreamMsg = serde_json::from_str(json).unwrap();
        assert_eq!(msg.trade_id, 912_871);
        assert!(msg.buyer_is_maker);
    }

    #[test]
    fn subscribe_request_serializes() {
        let request = SubscribeRequest::subscribe(vec!["btcusdt@kline_1m".to_string()], 1);
        let json = serde_json::to_string(&request).unwrap();

        assert!(json.contains(r#""method":"SUBSCRIBE""#));
        assert!(json.contains(r#""params":["btcusdt@kline_1m"]"#));
        assert!(json.contains(r#""id":1"#));
    }

    #[test]
    fn unsubscribe_request_serializes() {
        let request = SubscribeRequest::unsubscribe(vec!["btcusdt@trade".to_string()], 7);
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains(r#""method":"UNSUBSCRIBE""#));
    }

    #[test]
    fn ack_deserializes_null_result() {
        let msg: SubscribeAckMsg = serde_json::from_str(r#"{"result": null, "id": 3}"#).unwrap();
        assert_eq!(msg.id, 3);
        assert!(msg.result.is_none());
    }

    #[test]
    fn error_frame_deserializes() {
        let msg: ErrorMsg =
            serde_json::from_str(r#"{"error": {"code": 2, "msg": "Invalid request"}, "id": 1}"#)
                .unwrap();
        assert_eq!(msg.error.code, 2);
        assert_eq!(msg.id, Some(1));
    }

    #[test]
    fn combined_envelope_deserializes() {
        let json = r#"{"stream": "btcusdt@trade", "data": {"e": "trade"}}"#;
        let msg: CombinedStreamMsg = serde_json::from_str(json).unwrap();
        assert_eq!(msg.stream, "btcusdt@trade");
        assert_eq!(msg.data["e"], "trade");
    }
}
