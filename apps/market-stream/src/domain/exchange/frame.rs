//! Frame Codec
//!
//! Decodes websocket text frames into data payloads or control replies and
//! encodes subscribe requests.
//!
//! Frame shapes:
//! ```json
//! {"stream": "btcusdt@trade", "data": {...}}     // combined envelope
//! {"e": "trade", ...}                            // raw payload
//! [{"e": "24hrTicker", ...}, ...]                // aggregate array
//! {"result": null, "id": 1}                      // subscribe ack
//! {"error": {"code": 2, "msg": "..."}, "id": 1}  // subscribe rejection
//! ```

use serde::Serialize;
use serde_json::Value;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Valid JSON that is neither an object nor an array.
    #[error("invalid frame format: {0}")]
    InvalidFormat(String),
}

/// Reply to a request sent on the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlReply {
    /// Request accepted.
    Ack {
        /// Request id echoed by the exchange.
        id: Option<u64>,
    },
    /// Request refused.
    Error {
        /// Request id echoed by the exchange.
        id: Option<u64>,
        /// Exchange error message.
        message: String,
    },
}

/// Decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Market data, unwrapped from any envelope. May be an array of payloads.
    Data {
        /// Channel the payload arrived on, for enveloped frames.
        stream: Option<String>,
        /// Payload or array of payloads.
        payload: Value,
    },
    /// Reply to a request.
    Control(ControlReply),
}

/// Subscribe request sent in handshake mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscribeRequest<'a> {
    method: &'static str,
    params: &'a [String],
    id: u64,
}

impl<'a> SubscribeRequest<'a> {
    /// Request subscribing to `channels`.
    #[must_use]
    pub const fn new(id: u64, channels: &'a [String]) -> Self {
        Self {
            method: "SUBSCRIBE",
            params: channels,
            id,
        }
    }
}

/// JSON codec for exchange stream frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not JSON, or is a JSON scalar.
    pub fn decode(self, bytes: &[u8]) -> Result<Frame, CodecError> {
        let value: Value = serde_json::from_slice(bytes)?;

        match value {
            Value::Object(mut object) => {
                if let Some(error) = object.get("error").filter(|e| !e.is_null()) {
                    let message = error
                        .get("msg")
                        .and_then(Value::as_str)
                        .map_or_else(|| error.to_string(), str::to_string);
                    return Ok(Frame::Control(ControlReply::Error {
                        id: object.get("id").and_then(Value::as_u64),
                        message,
                    }));
                }
                if object.contains_key("result") && object.contains_key("id") {
                    return Ok(Frame::Control(ControlReply::Ack {
                        id: object.get("id").and_then(Value::as_u64),
                    }));
                }
                let enveloped = matches!(object.get("stream"), Some(Value::String(_)))
                    && object.contains_key("data");
                if enveloped {
                    let stream = object
                        .remove("stream")
                        .and_then(|s| s.as_str().map(str::to_string));
                    let payload = object.remove("data").unwrap_or(Value::Null);
                    return Ok(Frame::Data { stream, payload });
                }
                Ok(Frame::Data {
                    stream: None,
                    payload: Value::Object(object),
                })
            }
            array @ Value::Array(_) => Ok(Frame::Data {
                stream: None,
                payload: array,
            }),
            other => Err(CodecError::InvalidFormat(format!(
                "expected JSON object or array, got: {}",
                truncate(&other.to_string(), 50)
            ))),
        }
    }

    /// Encode a value to a JSON frame.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode<T: Serialize>(self, value: &T) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(value)?)
    }
}

fn truncate(text: &str, max: usize) -> &str {
    text.char_indices()
        .nth(max)
        .map_or(text, |(index, _)| &text[..index])
}
