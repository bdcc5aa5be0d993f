//! Frame codecs for channel messages
//!
//! Transports hand raw frames to a [`MessageDecoder`] and get back a
//! [`ChannelMessage`]. Two encodings exist on the wire:
//!
//! - **JSON**: a 4-element array `[message_id, correlation_id, event, payload]`
//! - **Binary**: byte 0 is the control byte `255`, bytes 1-3 hold the byte
//!   lengths of `message_id`, `correlation_id` and `event` (0 meaning an empty
//!   string), followed by those UTF-8 strings in order; every remaining byte is
//!   the UTF-8 payload
//!
//! The WebSocket transport picks the decoder from the negotiated subprotocol
//! (see [`Decoder::for_protocol`]). The SSE transport always reads JSON text.
//!
//! Outbound traffic is plain text: `Auth::<token>`, `hb::<ref>`, `Ack::<id>`.
//!
//! # Examples
//!
//! ```rust
//! use chanlink_core::codec::{self, JsonDecoder, MessageDecoder, RawFrame};
//!
//! let frame = r#"["12", "", "person.registered", "CC111222"]"#;
//! let msg = JsonDecoder.decode(RawFrame::Text(frame)).unwrap();
//! assert_eq!(msg.event, "person.registered");
//! assert_eq!(codec::ack_frame(&msg.message_id), "Ack::12");
//! ```

use crate::error::{Error, Result};
use crate::types::{ChannelMessage, Protocol};
use serde_json::Value;

/// Control byte that opens every binary frame
pub const BINARY_CONTROL_BYTE: u8 = 255;

/// Size of the binary frame header (control byte + three lengths)
const BINARY_HEADER_LEN: usize = 4;

/// A raw frame as delivered by a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawFrame<'a> {
    /// Text frame (WebSocket text message)
    Text(&'a str),
    /// Binary frame (WebSocket binary message)
    Binary(&'a [u8]),
}

/// Converts raw transport frames into channel messages
pub trait MessageDecoder: Send + Sync {
    /// Decode a frame from the bidirectional transport
    fn decode(&self, frame: RawFrame<'_>) -> Result<ChannelMessage>;

    /// Decode the `data` of a server-sent event
    fn decode_sse(&self, data: &str) -> Result<ChannelMessage>;
}

/// Decoder for the JSON array encoding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonDecoder;

impl JsonDecoder {
    fn decode_text(text: &str) -> Result<ChannelMessage> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| Error::Decode(format!("invalid JSON frame: {}", e)))?;

        let mut items = match value {
            Value::Array(items) if items.len() == 4 => items,
            Value::Array(items) => {
                return Err(Error::Decode(format!(
                    "expected 4 elements, found {}",
                    items.len()
                )))
            }
            _ => return Err(Error::Decode("frame is not a JSON array".to_string())),
        };

        let payload = items.pop().unwrap_or(Value::Null);
        let event = field_text(&items[2], "event")?;
        let correlation_id = field_text(&items[1], "correlation_id")?;
        let message_id = field_text(&items[0], "message_id")?;

        Ok(ChannelMessage {
            message_id,
            event,
            correlation_id,
            payload,
        })
    }
}

// Ids arrive as strings, but some producers send bare numbers
fn field_text(value: &Value, name: &str) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(Error::Decode(format!(
            "field '{}' must be a string, found {}",
            name, other
        ))),
    }
}

impl MessageDecoder for JsonDecoder {
    fn decode(&self, frame: RawFrame<'_>) -> Result<ChannelMessage> {
        match frame {
            RawFrame::Text(text) => Self::decode_text(text),
            RawFrame::Binary(bytes) => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|e| Error::Decode(format!("frame is not UTF-8: {}", e)))?;
                Self::decode_text(text)
            }
        }
    }

    fn decode_sse(&self, data: &str) -> Result<ChannelMessage> {
        Self::decode_text(data)
    }
}

/// Decoder for the fixed-layout binary encoding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BinaryDecoder;

impl BinaryDecoder {
    fn decode_bytes(bytes: &[u8]) -> Result<ChannelMessage> {
        if bytes.len() < BINARY_HEADER_LEN {
            return Err(Error::Decode(format!(
                "binary frame too short: {} bytes",
                bytes.len()
            )));
        }
        if bytes[0] != BINARY_CONTROL_BYTE {
            return Err(Error::Decode(
                "Invalid binary data; no control byte match".to_string(),
            ));
        }

        let mut chunks = Chunks {
            bytes,
            offset: BINARY_HEADER_LEN,
        };
        let message_id = chunks.take(bytes[1] as usize, "message_id")?;
        let correlation_id = chunks.take(bytes[2] as usize, "correlation_id")?;
        let event = chunks.take(bytes[3] as usize, "event")?;
        let payload = chunks.rest()?;

        Ok(ChannelMessage {
            message_id,
            event,
            correlation_id,
            payload: Value::String(payload),
        })
    }
}

impl MessageDecoder for BinaryDecoder {
    fn decode(&self, frame: RawFrame<'_>) -> Result<ChannelMessage> {
        match frame {
            RawFrame::Binary(bytes) => Self::decode_bytes(bytes),
            RawFrame::Text(text) => Self::decode_bytes(text.as_bytes()),
        }
    }

    fn decode_sse(&self, _data: &str) -> Result<ChannelMessage> {
        Err(Error::Unsupported(
            "binary decoder cannot read server-sent events".to_string(),
        ))
    }
}

struct Chunks<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Chunks<'a> {
    fn take(&mut self, len: usize, name: &str) -> Result<String> {
        if len == 0 {
            return Ok(String::new());
        }
        let end = self.offset + len;
        let slice = self.bytes.get(self.offset..end).ok_or_else(|| {
            Error::Decode(format!(
                "binary frame truncated while reading {} ({} of {} bytes)",
                name,
                self.bytes.len().saturating_sub(self.offset),
                len
            ))
        })?;
        self.offset = end;
        utf8(slice, name)
    }

    fn rest(&mut self) -> Result<String> {
        let slice = self.bytes.get(self.offset..).unwrap_or_default();
        self.offset = self.bytes.len();
        utf8(slice, "payload")
    }
}

fn utf8(bytes: &[u8], name: &str) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| Error::Decode(format!("{} is not UTF-8: {}", name, e)))
}

/// The closed set of decoders a transport can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoder {
    /// JSON array frames
    Json(JsonDecoder),
    /// Binary frames
    Binary(BinaryDecoder),
}

impl Decoder {
    /// Select the decoder for a negotiated subprotocol
    pub fn for_protocol(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Json => Decoder::Json(JsonDecoder),
            Protocol::Binary => Decoder::Binary(BinaryDecoder),
        }
    }

    /// The protocol this decoder reads
    pub fn protocol(&self) -> Protocol {
        match self {
            Decoder::Json(_) => Protocol::Json,
            Decoder::Binary(_) => Protocol::Binary,
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Decoder::Json(JsonDecoder)
    }
}

impl MessageDecoder for Decoder {
    fn decode(&self, frame: RawFrame<'_>) -> Result<ChannelMessage> {
        match self {
            Decoder::Json(d) => d.decode(frame),
            Decoder::Binary(d) => d.decode(frame),
        }
    }

    fn decode_sse(&self, data: &str) -> Result<ChannelMessage> {
        match self {
            Decoder::Json(d) => d.decode_sse(data),
            Decoder::Binary(d) => d.decode_sse(data),
        }
    }
}

/// Encode a message in the JSON array layout
pub fn encode_json(message: &ChannelMessage) -> Result<String> {
    let array = Value::Array(vec![
        Value::String(message.message_id.clone()),
        Value::String(message.correlation_id.clone()),
        Value::String(message.event.clone()),
        message.payload.clone(),
    ]);
    serde_json::to_string(&array).map_err(|e| Error::Serialization(e.to_string()))
}

/// Encode a message in the binary layout
///
/// Each of `message_id`, `correlation_id` and `event` must fit in 255 bytes.
pub fn encode_binary(message: &ChannelMessage) -> Result<Vec<u8>> {
    let header_field = |value: &str, name: &str| -> Result<u8> {
        u8::try_from(value.len())
            .map_err(|_| Error::Serialization(format!("{} longer than 255 bytes", name)))
    };
    let payload = message.payload_text();

    let mut out = Vec::with_capacity(
        BINARY_HEADER_LEN
            + message.message_id.len()
            + message.correlation_id.len()
            + message.event.len()
            + payload.len(),
    );
    out.push(BINARY_CONTROL_BYTE);
    out.push(header_field(&message.message_id, "message_id")?);
    out.push(header_field(&message.correlation_id, "correlation_id")?);
    out.push(header_field(&message.event, "event")?);
    out.extend_from_slice(message.message_id.as_bytes());
    out.extend_from_slice(message.correlation_id.as_bytes());
    out.extend_from_slice(message.event.as_bytes());
    out.extend_from_slice(payload.as_bytes());
    Ok(out)
}

/// Authentication frame carrying the current channel token
pub fn auth_frame(token: &str) -> String {
    format!("Auth::{}", token)
}

/// Heartbeat probe carrying its correlation ref
pub fn heartbeat_frame(reference: &str) -> String {
    format!("hb::{}", reference)
}

/// Delivery acknowledgement for a routed message
pub fn ack_frame(message_id: &str) -> String {
    format!("Ack::{}", message_id)
}

/// Diagnostic notice for an event nobody subscribed to
pub fn no_bindings_frame(event: &str) -> String {
    format!("NoBindings::{}", event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_decode_text_frame() {
        let msg = JsonDecoder
            .decode(RawFrame::Text(r#"["12", "", "person.registered", "CC111222"]"#))
            .unwrap();
        assert_eq!(msg, ChannelMessage::new("12", "person.registered", "", "CC111222"));
    }

    #[test]
    fn test_json_decode_object_payload() {
        let msg = JsonDecoder
            .decode_sse(r#"["7", "c-1", "order.created", {"total": 10}]"#)
            .unwrap();
        assert_eq!(msg.correlation_id, "c-1");
        assert_eq!(msg.payload, json!({"total": 10}));
    }

    #[test]
    fn test_json_decode_numeric_ids() {
        let msg = JsonDecoder.decode(RawFrame::Text(r#"[12, 3, "x.y", null]"#)).unwrap();
        assert_eq!(msg.message_id, "12");
        assert_eq!(msg.correlation_id, "3");
        assert_eq!(msg.payload, Value::Null);
    }

    #[test]
    fn test_json_decode_rejects_malformed() {
        assert!(matches!(
            JsonDecoder.decode(RawFrame::Text("not json")),
            Err(Error::Decode(_))
        ));
        assert!(matches!(
            JsonDecoder.decode(RawFrame::Text(r#"["1", "", "e"]"#)),
            Err(Error::Decode(_))
        ));
        assert!(matches!(
            JsonDecoder.decode(RawFrame::Text(r#"{"event": "e"}"#)),
            Err(Error::Decode(_))
        ));
        assert!(matches!(
            JsonDecoder.decode(RawFrame::Text(r#"["1", "", {"bad": true}, ""]"#)),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn test_binary_decode_layout() {
        let mut frame = vec![255u8, 2, 1, 17];
        frame.extend_from_slice(b"12");
        frame.extend_from_slice(b"9");
        frame.extend_from_slice(b"person.registered");
        frame.extend_from_slice(b"CC111222");

        let msg = BinaryDecoder.decode(RawFrame::Binary(&frame)).unwrap();
        assert_eq!(msg, ChannelMessage::new("12", "person.registered", "9", "CC111222"));
    }

    #[test]
    fn test_binary_decode_empty_fields() {
        let mut frame = vec![255u8, 0, 0, 6];
        frame.extend_from_slice(b"AuthOk");
        let msg = BinaryDecoder.decode(RawFrame::Binary(&frame)).unwrap();
        assert_eq!(msg.message_id, "");
        assert_eq!(msg.correlation_id, "");
        assert_eq!(msg.event, "AuthOk");
        assert_eq!(msg.payload, json!(""));
    }

    #[test]
    fn test_binary_decode_bad_control_byte() {
        let err = BinaryDecoder
            .decode(RawFrame::Binary(&[254, 0, 0, 0]))
            .unwrap_err();
        assert!(err.to_string().contains("no control byte match"));
    }

    #[test]
    fn test_binary_decode_truncated() {
        let frame = [255u8, 5, 0, 0, b'a', b'b'];
        assert!(matches!(
            BinaryDecoder.decode(RawFrame::Binary(&frame)),
            Err(Error::Decode(_))
        ));
        assert!(BinaryDecoder.decode(RawFrame::Binary(&[255, 0])).is_err());
    }

    #[test]
    fn test_binary_decoder_has_no_sse() {
        assert!(matches!(
            BinaryDecoder.decode_sse("[]"),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn test_encode_binary_matches_decoder_layout() {
        let msg = ChannelMessage::new("42", "quick.orange.rabbit", "", "hop");
        let bytes = encode_binary(&msg).unwrap();
        assert_eq!(&bytes[..4], &[255, 2, 0, 19]);
        assert_eq!(BinaryDecoder.decode(RawFrame::Binary(&bytes)).unwrap(), msg);
    }

    #[test]
    fn test_encode_binary_rejects_long_header_field() {
        let msg = ChannelMessage::new("x".repeat(256), "e", "", "");
        assert!(encode_binary(&msg).is_err());
    }

    #[test]
    fn test_decoder_selection() {
        assert_eq!(Decoder::for_protocol(Protocol::Binary).protocol(), Protocol::Binary);
        assert_eq!(Decoder::for_protocol(Protocol::Json).protocol(), Protocol::Json);
        assert_eq!(Decoder::default().protocol(), Protocol::Json);
    }

    #[test]
    fn test_outbound_frames() {
        assert_eq!(auth_frame("secret"), "Auth::secret");
        assert_eq!(heartbeat_frame("3"), "hb::3");
        assert_eq!(ack_frame("12"), "Ack::12");
        assert_eq!(no_bindings_frame("a.b"), "NoBindings::a.b");
    }

    #[test]
    fn test_encode_json_layout() {
        let msg = ChannelMessage::new("1", "a.b", "c", "p");
        assert_eq!(encode_json(&msg).unwrap(), r#"["1","c","a.b","p"]"#);
    }
}
