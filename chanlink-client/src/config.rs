//! Client configuration
//!
//! [`ClientConfig`] can be built in code with the `with_*` setters or loaded
//! from JSON. Option names accept the Rust field names as well as the camelCase
//! spellings used by other channel clients (`dedupCacheDisable`,
//! `maxReconnectAttempts`, ...).
//!
//! ```rust
//! use chanlink_client::ClientConfig;
//!
//! let config: ClientConfig = serde_json::from_str(r#"{
//!     "socket_url": "https://channels.example.com",
//!     "channel_ref": "ch-1",
//!     "channel_secret": "s3cret",
//!     "dedupCacheTtl": 5,
//!     "maxReconnectAttempts": 3
//! }"#).unwrap();
//!
//! assert_eq!(config.heartbeat_interval, 750);
//! assert_eq!(
//!     config.socket_endpoint().unwrap().as_str(),
//!     "wss://channels.example.com/ext/socket?channel=ch-1"
//! );
//! ```

use chanlink_core::{Error, Result, TransportKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

const SOCKET_PATH: &str = "/ext/socket";
const SSE_PATH: &str = "/ext/sse";

fn default_heartbeat_interval() -> u64 {
    750
}

fn default_dedup_cache_max_size() -> usize {
    crate::cache::DEFAULT_CAPACITY
}

fn default_dedup_cache_ttl() -> u64 {
    10
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

fn default_transports() -> Vec<TransportKind> {
    vec![TransportKind::Ws, TransportKind::Sse]
}

fn default_reconnect_initial_delay() -> u64 {
    50
}

fn default_reconnect_max_delay() -> u64 {
    6000
}

/// Options recognized by the channel client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the channel server (`http(s)://` or `ws(s)://`)
    #[serde(alias = "socketUrl")]
    pub socket_url: String,

    /// Base URL for the event stream; derived from `socket_url` when absent
    #[serde(default, alias = "sseUrl", skip_serializing_if = "Option::is_none")]
    pub sse_url: Option<String>,

    /// Channel reference sent as the `channel` query parameter
    #[serde(alias = "channelRef")]
    pub channel_ref: String,

    /// Initial channel token
    #[serde(alias = "channelSecret")]
    pub channel_secret: String,

    /// Offer the binary subprotocol in addition to JSON
    #[serde(default, alias = "enableBinaryTransport")]
    pub enable_binary_transport: bool,

    /// Heartbeat interval in milliseconds
    #[serde(default = "default_heartbeat_interval", alias = "heartbeatInterval")]
    pub heartbeat_interval: u64,

    /// Deliver duplicates instead of filtering them
    #[serde(default, alias = "dedupCacheDisable")]
    pub dedup_cache_disable: bool,

    /// Number of message ids remembered for deduplication
    #[serde(default = "default_dedup_cache_max_size", alias = "dedupCacheMaxSize")]
    pub dedup_cache_max_size: usize,

    /// Lifetime of a remembered message id, in minutes
    #[serde(default = "default_dedup_cache_ttl", alias = "dedupCacheTtl")]
    pub dedup_cache_ttl: u64,

    /// Retry ceiling per transport, also bounding failover rounds
    #[serde(default = "default_max_reconnect_attempts", alias = "maxReconnectAttempts")]
    pub max_reconnect_attempts: u32,

    /// Reconnect when the host application regains focus
    #[serde(default = "default_true", alias = "checkConnectionOnFocus")]
    pub check_connection_on_focus: bool,

    /// Transports in priority order; empty means `["ws", "sse"]`
    #[serde(default = "default_transports")]
    pub transports: Vec<TransportKind>,

    /// First reconnect delay in milliseconds
    #[serde(default = "default_reconnect_initial_delay", alias = "reconnectInitialDelay")]
    pub reconnect_initial_delay: u64,

    /// Reconnect delay cap in milliseconds
    #[serde(default = "default_reconnect_max_delay", alias = "reconnectMaxDelay")]
    pub reconnect_max_delay: u64,
}

impl ClientConfig {
    /// Configuration with every optional setting at its default
    pub fn new(
        socket_url: impl Into<String>,
        channel_ref: impl Into<String>,
        channel_secret: impl Into<String>,
    ) -> Self {
        Self {
            socket_url: socket_url.into(),
            sse_url: None,
            channel_ref: channel_ref.into(),
            channel_secret: channel_secret.into(),
            enable_binary_transport: false,
            heartbeat_interval: default_heartbeat_interval(),
            dedup_cache_disable: false,
            dedup_cache_max_size: default_dedup_cache_max_size(),
            dedup_cache_ttl: default_dedup_cache_ttl(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            check_connection_on_focus: true,
            transports: default_transports(),
            reconnect_initial_delay: default_reconnect_initial_delay(),
            reconnect_max_delay: default_reconnect_max_delay(),
        }
    }

    /// Use a dedicated event-stream base URL
    pub fn with_sse_url(mut self, url: impl Into<String>) -> Self {
        self.sse_url = Some(url.into());
        self
    }

    /// Offer the binary subprotocol
    pub fn with_binary_transport(mut self, enable: bool) -> Self {
        self.enable_binary_transport = enable;
        self
    }

    /// Set the heartbeat interval
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.as_millis() as u64;
        self
    }

    /// Turn message deduplication off
    pub fn without_dedup(mut self) -> Self {
        self.dedup_cache_disable = true;
        self
    }

    /// Size and lifetime of the dedup cache (TTL rounded down to minutes)
    pub fn with_dedup_cache(mut self, max_size: usize, ttl: Duration) -> Self {
        self.dedup_cache_max_size = max_size;
        self.dedup_cache_ttl = ttl.as_secs() / 60;
        self
    }

    /// Set the retry ceiling
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Enable or disable focus-triggered reconnection
    pub fn with_focus_reconnect(mut self, enable: bool) -> Self {
        self.check_connection_on_focus = enable;
        self
    }

    /// Set the transport priority list
    pub fn with_transports(mut self, transports: impl IntoIterator<Item = TransportKind>) -> Self {
        self.transports = transports.into_iter().collect();
        self
    }

    /// Set the reconnect delay bounds
    pub fn with_reconnect_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_initial_delay = initial.as_millis() as u64;
        self.reconnect_max_delay = max.as_millis() as u64;
        self
    }

    /// Transports in priority order, never empty
    pub fn transport_list(&self) -> Vec<TransportKind> {
        if self.transports.is_empty() {
            default_transports()
        } else {
            self.transports.clone()
        }
    }

    /// Heartbeat interval as a duration
    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval)
    }

    /// Dedup entry lifetime as a duration
    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_cache_ttl * 60)
    }

    /// First reconnect delay as a duration
    pub fn reconnect_initial(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_delay)
    }

    /// Reconnect delay cap as a duration
    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay)
    }

    /// WebSocket URL: `<ws(s) base>/ext/socket?channel=<channel_ref>`
    pub fn socket_endpoint(&self) -> Result<Url> {
        endpoint(&self.socket_url, Family::Socket, SOCKET_PATH, &self.channel_ref)
    }

    /// Event-stream URL: `<http(s) base>/ext/sse?channel=<channel_ref>`
    ///
    /// Uses `sse_url` as base when set, `socket_url` otherwise.
    pub fn sse_endpoint(&self) -> Result<Url> {
        let base = self.sse_url.as_deref().unwrap_or(&self.socket_url);
        endpoint(base, Family::Http, SSE_PATH, &self.channel_ref)
    }

    /// Check the configuration for values the client cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.channel_ref.trim().is_empty() {
            return Err(Error::Config("channel_ref must not be empty".to_string()));
        }
        if self.heartbeat_interval == 0 {
            return Err(Error::Config("heartbeat_interval must be positive".to_string()));
        }
        if !self.dedup_cache_disable && self.dedup_cache_max_size == 0 {
            return Err(Error::Config(
                "dedup_cache_max_size must be positive unless dedup is disabled".to_string(),
            ));
        }
        let transports = self.transport_list();
        if transports.contains(&TransportKind::Ws) {
            self.socket_endpoint()?;
        }
        if transports.contains(&TransportKind::Sse) {
            self.sse_endpoint()?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Family {
    Socket,
    Http,
}

fn endpoint(base: &str, family: Family, suffix: &str, channel_ref: &str) -> Result<Url> {
    let invalid = |reason: String| Error::InvalidUrl {
        url: base.to_string(),
        reason,
    };

    let mut url = Url::parse(base).map_err(|e| invalid(e.to_string()))?;

    let scheme = match (family, url.scheme()) {
        (Family::Socket, "http" | "ws") => "ws",
        (Family::Socket, "https" | "wss") => "wss",
        (Family::Http, "ws" | "http") => "http",
        (Family::Http, "wss" | "https") => "https",
        (_, other) => return Err(invalid(format!("unsupported scheme '{}'", other))),
    };
    if url.scheme() != scheme {
        url.set_scheme(scheme)
            .map_err(|_| invalid(format!("cannot switch scheme to '{}'", scheme)))?;
    }

    let path = url.path().trim_end_matches('/').to_string();
    if !path.ends_with(suffix) {
        url.set_path(&format!("{}{}", path, suffix));
    }
    url.query_pairs_mut().append_pair("channel", channel_ref);
    Ok(url)
}
