//! Stream Frame Codec
//!
//! Decodes raw frames from the exchange into domain events and encodes
//! outbound control requests.
//!
//! Decoding is defensive: a malformed frame (invalid JSON, missing
//! required field, unparsable or physically impossible numeric) yields
//! a [`CodecError`] that the pipeline recovers from locally — the frame
//! is dropped and counted, and the error never reaches consumers.
//! Unknown additional fields and unknown event types are tolerated for
//! forward compatibility.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::streaming::{ControlMessage, KlineEvent, MarketEvent, RawFrame, TradeEvent};
use crate::infrastructure::binance::messages::{
    CombinedStreamMsg, ErrorMsg, KlineStreamMsg, SubscribeAckMsg, SubscribeRequest, TradeStreamMsg,
};

/// Codec errors. Every variant is a frame-level failure, recovered by
/// dropping the offending frame.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON decoding failed (invalid JSON, wrong type, missing field).
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// A numeric field could not be parsed.
    #[error("invalid number in field `{field}`: {value}")]
    InvalidNumber {
        /// Field name on the wire.
        field: &'static str,
        /// Offending value.
        value: String,
    },

    /// A millisecond timestamp was out of range.
    #[error("invalid timestamp in field `{field}`: {value}")]
    InvalidTimestamp {
        /// Field name on the wire.
        field: &'static str,
        /// Offending value.
        value: i64,
    },

    /// A price was zero or negative.
    #[error("non-positive price in field `{field}`: {value}")]
    NonPositivePrice {
        /// Field name on the wire.
        field: &'static str,
        /// Offending value.
        value: Decimal,
    },

    /// A volume or quantity was negative.
    #[error("negative quantity in field `{field}`: {value}")]
    NegativeQuantity {
        /// Field name on the wire.
        field: &'static str,
        /// Offending value.
        value: Decimal,
    },

    /// The frame matched no known shape.
    #[error("unrecognized frame shape")]
    UnrecognizedFrame,
}

/// A successfully decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A market data event to be admitted and dispatched.
    Event(MarketEvent),
    /// A control message handled inside the client.
    Control(ControlMessage),
}

/// JSON codec for the exchange's market data streams.
#[derive(Debug, Default, Clone)]
pub struct FrameCodec;

impl FrameCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a raw frame into an event or control message.
    ///
    /// Frames from combined-stream endpoints (`{"stream":..,"data":..}`)
    /// are unwrapped transparently, and the envelope topic is preferred
    /// as the stream id.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] when the frame is malformed; see the
    /// module docs for the recovery contract.
    pub fn decode(&self, frame: &RawFrame) -> Result<Decoded, CodecError> {
        let value: serde_json::Value = serde_json::from_slice(&frame.payload)?;

        // Combined-stream envelope: unwrap and keep the topic.
        if value.get("stream").is_some() && value.get("data").is_some() {
            let envelope: CombinedStreamMsg = serde_json::from_value(value)?;
            return Self::decode_value(envelope.data, Some(&envelope.stream));
        }

        Self::decode_value(value, None)
    }

    /// Encode an outbound control request.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode_request(&self, request: &SubscribeRequest) -> Result<String, CodecError> {
        Ok(serde_json::to_string(request)?)
    }

    fn decode_value(
        value: serde_json::Value,
        stream_hint: Option<&str>,
    ) -> Result<Decoded, CodecError> {
        if let Some(event_type) = value.get("e").and_then(|v| v.as_str()) {
            return match event_type {
                "kline" => {
                    let msg: KlineStreamMsg = serde_json::from_value(value)?;
                    decode_kline(&msg, stream_hint).map(|k| Decoded::Event(MarketEvent::Kline(k)))
                }
                "trade" => {
                    let msg: TradeStreamMsg = serde_json::from_value(value)?;
                    decode_trade(&msg, stream_hint).map(|t| Decoded::Event(MarketEvent::Trade(t)))
                }
                other => Ok(Decoded::Control(ControlMessage::Unhandled {
                    event_type: other.to_string(),
                })),
            };
        }

        if value.get("error").is_some() {
            let msg: ErrorMsg = serde_json::from_value(value)?;
            return Ok(Decoded::Control(ControlMessage::Error {
                code: msg.error.code,
                message: msg.error.msg,
            }));
        }

        // Subscribe acknowledgement: {"result": null, "id": N}.
        if value.get("id").is_some() {
            let msg: SubscribeAckMsg = serde_json::from_value(value)?;
            return Ok(Decoded::Control(ControlMessage::SubscribeAck { id: msg.id }));
        }

        Err(CodecError::UnrecognizedFrame)
    }
}

fn decode_kline(msg: &KlineStreamMsg, stream_hint: Option<&str>) -> Result<KlineEvent, CodecError> {
    let open = parse_price("o", &msg.kline.open)?;
    let high = parse_price("h", &msg.kline.high)?;
    let low = parse_price("l", &msg.kline.low)?;
    let close = parse_price("c", &msg.kline.close)?;
    let volume = parse_quantity("v", &msg.kline.volume)?;

    let stream_id = stream_hint.map_or_else(
        || {
            format!(
                "{}@kline_{}",
                msg.symbol.to_lowercase(),
                msg.kline.interval.to_lowercase()
            )
        },
        ToString::to_string,
    );

    Ok(KlineEvent {
        stream_id,
        open_time: parse_millis("t", msg.kline.open_time)?,
        close_time: parse_millis("T", msg.kline.close_time)?,
        open,
        high,
        low,
        close,
        volume,
        is_final: msg.kline.is_final,
        sequence: msg.event_time,
    })
}

fn decode_trade(msg: &TradeStreamMsg, stream_hint: Option<&str>) -> Result<TradeEvent, CodecError> {
    let price = parse_price("p", &msg.price)?;
    let quantity = parse_quantity("q", &msg.quantity)?;

    let stream_id = stream_hint.map_or_else(
        || format!("{}@trade", msg.symbol.to_lowercase()),
        ToString::to_string,
    );

    Ok(TradeEvent {
        stream_id,
        trade_id: msg.trade_id,
        price,
        quantity,
        buyer_is_maker: msg.buyer_is_maker,
        trade_time: parse_millis("T", msg.trade_time)?,
    })
}

fn parse_decimal(field: &'static str, value: &str) -> Result<Decimal, CodecError> {
    value.parse().map_err(|_| CodecError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

fn parse_price(field: &'static str, value: &str) -> Result<Decimal, CodecError> {
    let price = parse_decimal(field, value)?;
    if price <= Decimal::ZERO {
        return Err(CodecError::NonPositivePrice {
            field,
            value: price,
        });
    }
    Ok(price)
}

fn parse_quantity(field: &'static str, value: &str) -> Result<Decimal, CodecError> {
    let quantity = parse_decimal(field, value)?;
    if quantity < Decimal::ZERO {
        return Err(CodecError::NegativeQuantity {
            field,
            value: quantity,
        });
    }
    Ok(quantity)
}

fn parse_millis(field: &'static str, value: i64) -> Result<DateTime<Utc>, CodecError> {
    DateTime::from_timestamp_millis(value)
        .ok_or(CodecError::InvalidTimestamp { field, value })
}

// =============================================================================
// Tests
// =============================================================================
