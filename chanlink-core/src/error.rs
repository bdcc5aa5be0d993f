//! Error types for chanlink
//!
//! This module defines the two error shapes used across the workspace:
//!
//! - **Error**: Application-level errors returned from fallible library calls
//!   (uses thiserror)
//! - **TransportError**: The value a transport hands to the client façade when
//!   its connection can no longer be recovered locally
//!
//! # Propagation
//!
//! Most failures never leave the transport that observed them. A malformed
//! frame is logged and dropped, a missed heartbeat closes the socket and the
//! retry scheduler takes over. Only when the transport gives up does it
//! surface a `TransportError`, and only the façade decides what happens next
//! (failover to the next transport in the configured list).
//!
//! # Examples
//!
//! ```rust
//! use chanlink_core::{Error, TransportError, TransportKind};
//!
//! let fatal = TransportError::fatal(TransportKind::Sse, "Internal Server Error ");
//! assert!(fatal.is_fatal());
//!
//! let error: Error = fatal.into();
//! assert!(error.to_string().contains("sse"));
//! ```

use crate::types::TransportKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for chanlink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Application-level error type for chanlink operations
///
/// # Error Categories
///
/// - **Frame errors**: Decode, Serialization
/// - **Transport errors**: WebSocket, Http, Transport, ConnectionClosed
/// - **Setup errors**: Config, InvalidUrl, Unsupported
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A raw frame could not be turned into a `ChannelMessage`
    ///
    /// The frame is dropped; the connection that carried it is unaffected.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Serialization or deserialization error outside of frame decoding
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// WebSocket transport layer error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// HTTP error from the event-stream transport
    #[error("HTTP error: {0}")]
    Http(String),

    /// Invalid client configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A configured URL could not be parsed or normalized
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl {
        /// The offending URL as configured
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// A transport gave up on its connection
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The connection is no longer active
    #[error("Connection closed")]
    ConnectionClosed,

    /// The operation is not available on this transport or decoder
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Connection-level failure reported by a transport to the client façade
///
/// `code == 1` ([`TransportError::FATAL`]) is the only code currently
/// defined. It means "this transport cannot recover, try the next one".
/// The façade only acts on it when `origin` matches the transport it
/// currently has installed, so a late report from a replaced transport is
/// ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("[{origin}:{code}] {message}")]
pub struct TransportError {
    /// Which transport raised the error
    pub origin: TransportKind,
    /// Error code, see [`TransportError::FATAL`]
    pub code: i32,
    /// Human-readable detail (close reason, HTTP status text and body, ...)
    pub message: String,
}

impl TransportError {
    /// Fatal for the reporting transport; the façade should fail over.
    pub const FATAL: i32 = 1;

    /// Create a transport error with an explicit code
    pub fn new(origin: TransportKind, code: i32, message: impl Into<String>) -> Self {
        Self {
            origin,
            code,
            message: message.into(),
        }
    }

    /// Create a fatal transport error
    pub fn fatal(origin: TransportKind, message: impl Into<String>) -> Self {
        Self::new(origin, Self::FATAL, message)
    }

    /// Whether this error asks the façade to move on to the next transport
    pub fn is_fatal(&self) -> bool {
        self.code == Self::FATAL
    }
}
