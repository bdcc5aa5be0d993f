//! Reconnecting channel client over WebSocket with SSE fallback
//!
//! This crate connects an application to a server-push channel. Messages are
//! routed to callbacks by dot-separated event name; the client keeps the
//! connection alive on its own and falls back to a server-sent event stream
//! when the WebSocket cannot be kept up.
//!
//! # Core Features
//!
//! - **WebSocket Transport**: token auth, heartbeats, acks, subprotocol
//!   negotiation (`json_flow` / `binary_flow`), backoff reconnect
//! - **SSE Transport**: receive-only fallback with status-driven retry
//! - **Pattern Subscriptions**: `*` matches one segment, `#` one or more
//! - **Deduplication**: bounded TTL cache of recently delivered message ids
//! - **Failover**: moves through the configured transport list on fatal errors
//! - **Token Rotation**: server-issued tokens apply to every later auth attempt
//! - **Observability**: OpenTelemetry metrics and tracing spans
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use chanlink_client::{AsyncClient, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("wss://events.example.com", "channel-ref", "secret");
//!     let client = AsyncClient::new(config)?;
//!
//!     client.listen_event("person.registered", |msg| {
//!         println!("registered: {}", msg.payload);
//!     });
//!     client.listen_event("orders.#", |msg| {
//!         println!("{} -> {}", msg.event, msg.payload);
//!     });
//!
//!     client.connect();
//!     tokio::signal::ctrl_c().await?;
//!     client.disconnect();
//!     Ok(())
//! }
//! ```
//!
//! # Transport Selection
//!
//! ```rust,no_run
//! use chanlink_client::{ClientBuilder, ClientConfig};
//! use chanlink_core::TransportKind;
//!
//! # async fn example() -> chanlink_core::Result<()> {
//! let config = ClientConfig::new("https://events.example.com", "channel-ref", "secret")
//!     .with_transports([TransportKind::Sse])
//!     .with_max_reconnect_attempts(5);
//!
//! let client = ClientBuilder::new(config)
//!     .with_default_observability()
//!     .connect()
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod backoff;
mod cache;
mod client;
mod client_builder;
mod config;
mod credentials;
mod failover;
mod focus;
mod metrics;
mod pattern;
mod retry;
mod subscription;
pub mod transport;

pub use backoff::{
    apply_jitter, calculate_backoff, ExponentialBackoff, FixedDelay, ReconnectionStrategy,
};
pub use cache::DedupCache;
pub use client::{AsyncClient, ExhaustedHook};
pub use client_builder::ClientBuilder;
pub use config::ClientConfig;
pub use credentials::SessionCredentials;
pub use failover::{FailoverDecision, FailoverState};
pub use focus::{FocusHandler, FocusSource, ManualFocus};
pub use metrics::{ClientMetrics, TransportState};
pub use pattern::EventPattern;
pub use retry::{RetryTimer, Scheduled};
pub use subscription::{SubscriberFn, Subscription, SubscriptionTable};
pub use transport::{
    DefaultTransportFactory, SseTransport, Transport, TransportContext, TransportFactory,
    WsTransport,
};
