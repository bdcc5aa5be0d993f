//! Channel message types
//!
//! A channel carries server-pushed events. Every raw frame a transport
//! receives is decoded into exactly one [`ChannelMessage`]; the client façade
//! then matches the message's event name against subscriber patterns.
//!
//! # Reserved Events
//!
//! A few event names belong to the control plane and are never ordinary
//! application events:
//!
//! - [`events::AUTH_OK`]: the server accepted the channel secret
//! - [`events::HEARTBEAT`]: acknowledgement of a `hb::<ref>` probe
//! - [`events::NEW_TOKEN`]: the server rotated the channel credential
//!
//! # Transports and Protocols
//!
//! [`TransportKind`] names the physical delivery mechanisms. The WebSocket
//! transport additionally negotiates a [`Protocol`] that decides which decoder
//! reads its frames.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reserved control-plane event names
pub mod events {
    /// Sent once the server accepted the `Auth::<token>` frame
    pub const AUTH_OK: &str = "AuthOk";
    /// Heartbeat acknowledgement; its correlation id echoes the probe ref
    pub const HEARTBEAT: &str = ":hb";
    /// Token rotation; the payload carries the new channel secret
    pub const NEW_TOKEN: &str = ":n_token";

    /// Whether `event` is one of the reserved names
    pub fn is_reserved(event: &str) -> bool {
        matches!(event, AUTH_OK | HEARTBEAT | NEW_TOKEN)
    }
}

/// A decoded server message
///
/// Produced by a decoder from exactly one raw frame. `message_id` is the
/// deduplication key; control frames may leave it empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// Server-assigned identifier, used for acks and dedup
    pub message_id: String,
    /// Dot-separated event name matched against subscriptions
    pub event: String,
    /// Correlation id (heartbeat ref, request correlation, ...)
    pub correlation_id: String,
    /// Application payload
    pub payload: serde_json::Value,
}

impl ChannelMessage {
    /// Create a new message
    pub fn new(
        message_id: impl Into<String>,
        event: impl Into<String>,
        correlation_id: impl Into<String>,
        payload: impl Into<serde_json::Value>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            event: event.into(),
            correlation_id: correlation_id.into(),
            payload: payload.into(),
        }
    }

    /// Whether the event is a reserved control-plane name
    pub fn is_control(&self) -> bool {
        events::is_reserved(&self.event)
    }

    /// The payload as text
    ///
    /// String payloads are returned verbatim, anything else as its JSON
    /// rendering. Token rotation uses this to read the new secret.
    pub fn payload_text(&self) -> String {
        match &self.payload {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// The interchangeable physical delivery mechanisms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Bidirectional WebSocket channel
    Ws,
    /// Server-Sent Events stream (receive only)
    Sse,
}

impl TransportKind {
    /// The configuration name of this transport
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Ws => "ws",
            TransportKind::Sse => "sse",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ws" => Ok(TransportKind::Ws),
            "sse" => Ok(TransportKind::Sse),
            other => Err(crate::Error::Config(format!("unknown transport '{}'", other))),
        }
    }
}

/// WebSocket subprotocols understood by the channel server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// JSON array frames, see [`crate::codec::JsonDecoder`]
    Json,
    /// Fixed-layout binary frames, see [`crate::codec::BinaryDecoder`]
    Binary,
}

impl Protocol {
    /// Subprotocol token offered in `Sec-WebSocket-Protocol`
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Json => "json_flow",
            Protocol::Binary => "binary_flow",
        }
    }

    /// Map a negotiated subprotocol back to a protocol
    ///
    /// Anything other than the binary token (including no negotiated
    /// protocol at all) falls back to JSON.
    pub fn from_negotiated(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v == Protocol::Binary.as_str() => Protocol::Binary,
            _ => Protocol::Json,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
