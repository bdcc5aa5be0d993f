//! Core channel types and codecs for chanlink
//!
//! This crate holds the wire-level values shared by every chanlink transport:
//!
//! - **Types**: [`ChannelMessage`], [`TransportKind`], [`Protocol`] and the
//!   reserved control-plane event names
//! - **Codec**: the [`MessageDecoder`] trait with JSON and binary decoders, and
//!   the outbound `Auth::`, `hb::` and `Ack::` frames
//! - **Errors**: [`Error`], [`Result`] and the [`TransportError`] a transport
//!   reports when it gives up
//! - **Observability**: OpenTelemetry and `tracing` bootstrap
//!
//! The crate does no I/O. `chanlink-client` builds the stateful transports and
//! the client façade on top of it.
//!
//! # Example
//!
//! ```rust
//! use chanlink_core::{codec, Decoder, MessageDecoder, Protocol, RawFrame};
//!
//! let decoder = Decoder::for_protocol(Protocol::Json);
//! let msg = decoder
//!     .decode(RawFrame::Text(r#"["", "", "AuthOk", ""]"#))
//!     .unwrap();
//! assert!(msg.is_control());
//! assert_eq!(codec::auth_frame("secret"), "Auth::secret");
//! ```

pub mod codec;
pub mod error;
pub mod observability;
pub mod types;

pub use codec::{BinaryDecoder, Decoder, JsonDecoder, MessageDecoder, RawFrame};
pub use error::{Error, Result, TransportError};
pub use observability::{init_observability, shutdown_observability, ObservabilityConfig};
pub use types::{events, ChannelMessage, Protocol, TransportKind};
