//! Client builder
//!
//! `ClientBuilder` wires the optional collaborators of an [`AsyncClient`]
//! before it is created:
//! - a [`TransportFactory`] other than the default WebSocket/SSE one
//! - a [`FocusSource`] for reconnect-on-focus
//! - a hook for transport exhaustion
//! - OpenTelemetry observability and client metrics
//!
//! # Examples
//!
//! ```rust,no_run
//! use chanlink_client::{ClientBuilder, ClientConfig, ManualFocus};
//!
//! # async fn example() -> chanlink_core::Result<()> {
//! let config = ClientConfig::new("wss://events.example.com", "channel-ref", "secret");
//! let focus = ManualFocus::new();
//!
//! let client = ClientBuilder::new(config)
//!     .with_focus_source(focus.clone())
//!     .on_exhausted(|| eprintln!("channel unavailable"))
//!     .connect()
//!     .await?;
//!
//! client.listen_event("orders.*", |msg| println!("{}", msg.payload));
//! # Ok(())
//! # }
//! ```

use crate::client::{AsyncClient, ExhaustedHook, Parts};
use crate::config::ClientConfig;
use crate::focus::FocusSource;
use crate::metrics::ClientMetrics;
use crate::transport::{DefaultTransportFactory, TransportFactory};
use chanlink_core::{Error, ObservabilityConfig, Result};
use std::sync::Arc;

/// Builder for configuring and creating an [`AsyncClient`]
pub struct ClientBuilder {
    config: ClientConfig,
    factory: Option<Arc<dyn TransportFactory>>,
    focus: Option<Arc<dyn FocusSource>>,
    on_exhausted: Option<ExhaustedHook>,
    observability_config: Option<ObservabilityConfig>,
    service_name: Option<String>,
}

impl ClientBuilder {
    /// Create a builder for `config`
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            factory: None,
            focus: None,
            on_exhausted: None,
            observability_config: None,
            service_name: None,
        }
    }

    /// Create transports with `factory` instead of the default one
    pub fn with_transport_factory<F>(mut self, factory: F) -> Self
    where
        F: TransportFactory + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Reconnect when `source` reports regained focus
    ///
    /// Ignored when `check_connection_on_focus` is off.
    pub fn with_focus_source<S>(mut self, source: S) -> Self
    where
        S: FocusSource + 'static,
    {
        self.focus = Some(Arc::new(source));
        self
    }

    /// Run `hook` once every transport option has been used up
    pub fn on_exhausted<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_exhausted = Some(Arc::new(hook));
        self
    }

    /// Enable OpenTelemetry observability with custom configuration
    pub fn with_observability(mut self, config: ObservabilityConfig) -> Self {
        self.observability_config = Some(config);
        self
    }

    /// Enable OpenTelemetry observability with default configuration
    pub fn with_default_observability(mut self) -> Self {
        self.observability_config = Some(ObservabilityConfig::default());
        self
    }

    /// Set service name for observability (used if observability is enabled)
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Validate the configuration and create the client without connecting
    ///
    /// Must be called inside a Tokio runtime.
    pub fn build(self) -> Result<AsyncClient> {
        self.config.validate()?;

        let metrics = match self.observability_config {
            Some(mut config) => {
                if let Some(name) = self.service_name {
                    config.service_name = name;
                }
                chanlink_core::init_observability(config).map_err(|e| {
                    Error::Config(format!("Failed to initialize observability: {}", e))
                })?;
                Some(Arc::new(ClientMetrics::new()))
            }
            None => None,
        };

        AsyncClient::assemble(Parts {
            config: self.config,
            factory: self
                .factory
                .unwrap_or_else(|| Arc::new(DefaultTransportFactory)),
            focus: self.focus,
            on_exhausted: self.on_exhausted,
            metrics,
        })
    }

    /// Build the client and connect it
    pub async fn connect(self) -> Result<AsyncClient> {
        let client = self.build()?;
        client.connect();
        Ok(client)
    }
}
