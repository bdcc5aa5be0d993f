//! Chanlink - channel client over WebSocket with SSE fallback
//!
//! This is the convenience crate that re-exports the chanlink sub-crates.
//!
//! # Architecture
//!
//! - **chanlink-core**: message types, codecs, errors, observability bootstrap
//! - **chanlink-client**: transports, subscriptions, dedup, failover
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use chanlink::{AsyncClient, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = AsyncClient::new(ClientConfig::new(
//!         "ws://localhost:8080",
//!         "channel-ref",
//!         "secret",
//!     ))?;
//!
//!     client.listen_event("quick.orange.*", |msg| {
//!         println!("{}: {}", msg.event, msg.payload);
//!     });
//!     client.connect();
//!
//!     tokio::signal::ctrl_c().await?;
//!     Ok(())
//! }
//! ```

/// Message types, codecs and errors
pub use chanlink_core as core;

/// Client, transports and subscriptions
pub use chanlink_client as client;

pub use chanlink_client::{AsyncClient, ClientBuilder, ClientConfig};
pub use chanlink_core::{ChannelMessage, Error, Result, TransportError, TransportKind};
