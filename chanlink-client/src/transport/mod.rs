//! Transports
//!
//! A transport owns one physical connection to the channel server and reports
//! back through two sinks: decoded messages go to the message sink, and a
//! fatal [`TransportError`] goes to the error sink once the transport gives
//! up. Everything in between (authentication, heartbeats, retries, token
//! rotation) stays inside the transport.
//!
//! Two transports exist:
//!
//! - [`WsTransport`]: bidirectional WebSocket, the primary channel
//! - [`SseTransport`]: receive-only server-sent event stream, the fallback
//!
//! The façade holds whichever one is active as an `Arc<dyn Transport>` and
//! creates them through a [`TransportFactory`].

pub mod sse;
pub mod ws;

pub use sse::SseTransport;
pub use ws::{CloseInfo, WsTransport};

use crate::config::ClientConfig;
use crate::credentials::SessionCredentials;
use crate::metrics::ClientMetrics;
use chanlink_core::{ChannelMessage, Result, TransportError, TransportKind};
use std::sync::Arc;

/// Receives decoded messages from the active transport
pub type MessageSink = Arc<dyn Fn(ChannelMessage) + Send + Sync>;

/// Receives fatal errors from the active transport
pub type ErrorSink = Arc<dyn Fn(TransportError) + Send + Sync>;

/// Capability shared by every transport
///
/// All methods return immediately; connection work happens on background
/// tasks, so they must be called from within a Tokio runtime.
pub trait Transport: Send + Sync {
    /// Open the connection unless one is already open or opening
    fn connect(&self);

    /// Close the connection on purpose; no reconnect follows
    fn disconnect(&self);

    /// Which transport this is
    fn name(&self) -> TransportKind;

    /// Whether the connection is established and receiving
    fn connected(&self) -> bool;

    /// Send a text frame to the server, if the transport can
    fn send(&self, text: &str);
}

/// Readiness of one physical socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SocketState {
    /// Handshake in progress
    Connecting = 0,
    /// Frames can flow
    Open = 1,
    /// Close requested, waiting for the peer
    Closing = 2,
    /// Gone
    Closed = 3,
}

impl SocketState {
    /// Decode a value stored with `as u8`
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => SocketState::Connecting,
            1 => SocketState::Open,
            2 => SocketState::Closing,
            _ => SocketState::Closed,
        }
    }

    /// Whether frames may still be sent
    pub fn is_writable(&self) -> bool {
        matches!(self, SocketState::Connecting | SocketState::Open)
    }
}

/// Everything a transport needs from the client that creates it
#[derive(Clone)]
pub struct TransportContext {
    /// Shared client configuration
    pub config: Arc<ClientConfig>,
    /// Channel token cell shared with the façade
    pub credentials: SessionCredentials,
    /// Destination for decoded messages
    pub on_message: MessageSink,
    /// Destination for fatal errors
    pub on_error: ErrorSink,
    /// Optional instruments
    pub metrics: Option<Arc<ClientMetrics>>,
}

/// Builds transports by name
pub trait TransportFactory: Send + Sync {
    /// Create a transport of `kind` wired to `context`
    fn create(&self, kind: TransportKind, context: TransportContext) -> Result<Arc<dyn Transport>>;
}

/// Builds [`WsTransport`] for `ws` and [`SseTransport`] for `sse`
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTransportFactory;

impl TransportFactory for DefaultTransportFactory {
    fn create(&self, kind: TransportKind, context: TransportContext) -> Result<Arc<dyn Transport>> {
        Ok(match kind {
            TransportKind::Ws => Arc::new(WsTransport::new(context)?),
            TransportKind::Sse => Arc::new(SseTransport::new(context)?),
        })
    }
}

impl<F> TransportFactory for F
where
    F: Fn(TransportKind, TransportContext) -> Result<Arc<dyn Transport>> + Send + Sync,
{
    fn create(&self, kind: TransportKind, context: TransportContext) -> Result<Arc<dyn Transport>> {
        self(kind, context)
    }
}

/// Leading integer of a close reason or error text, `0` when there is none
///
/// Leading whitespace and a sign are accepted; parsing stops at the first
/// non-digit, so `"3050: retry later"` yields `3050`.
pub fn extract_reason(text: &str) -> i64 {
    let trimmed = text.trim_start();
    let (sign, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (-1, &trimmed[1..]),
        Some(b'+') => (1, &trimmed[1..]),
        _ => (1, trimmed),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end]
        .parse::<i64>()
        .map(|n| sign * n)
        .unwrap_or(0)
}
