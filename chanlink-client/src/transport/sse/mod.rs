//! Server-sent events transport
//!
//! Receive-only fallback: one long-lived `GET <http base>/ext/sse?channel=<ref>`
//! whose body is an event stream of JSON-encoded channel messages.
//!
//! # Retry Rules
//!
//! Every request reads the current token from the credentials cell, so a
//! token rotated mid-session is used by the next retry automatically.
//!
//! | Outcome | Counted | Action |
//! |---|---|---|
//! | 2xx, stream delivering | counter reset per message | deliver |
//! | stream ended / network error | yes | backoff, retry |
//! | 401 | no | retry after the initial delay |
//! | 400, 404, 428 with reason < 3050 | yes | fatal |
//! | any other status | yes | backoff, retry |
//!
//! Reaching `max_reconnect_attempts` counted failures is fatal as well. A
//! fatal outcome stops the driver and reports [`TransportError`] with the
//! status text and body.

mod parse;

pub use parse::{EventStreamParser, SseEvent};

use crate::backoff::{apply_jitter, calculate_backoff, DEFAULT_JITTER};
use crate::metrics::{ClientMetrics, TransportState};
use crate::transport::{extract_reason, Transport, TransportContext};
use chanlink_core::{
    events, ChannelMessage, Error, JsonDecoder, MessageDecoder, Result, TransportError,
    TransportKind,
};
use futures::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION, CACHE_CONTROL};
use reqwest::StatusCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use url::Url;

/// Reason codes at or above this keep stop-retry statuses retryable
pub const STOP_RETRY_REASON_THRESHOLD: i64 = 3050;

/// Statuses that stop retrying when their reason is below the threshold
pub const STOP_RETRY_STATUSES: [StatusCode; 3] = [
    StatusCode::BAD_REQUEST,
    StatusCode::NOT_FOUND,
    StatusCode::PRECONDITION_REQUIRED,
];

/// Run once, the first time a request gets a success status
pub type ConnectedCallback = Box<dyn FnOnce() + Send>;

/// Numeric reason carried by an error response body
///
/// JSON bodies are searched for `reason`, `code`, `error` and `message` in
/// that order; anything else is treated as `{"message": <body>}`.
pub fn response_reason(body: &str) -> i64 {
    let value = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .filter(|v| v.is_object())
        .unwrap_or_else(|| serde_json::json!({ "message": body }));

    ["reason", "code", "error", "message"]
        .iter()
        .find_map(|field| match value.get(field) {
            Some(serde_json::Value::String(s)) => Some(extract_reason(s)),
            Some(serde_json::Value::Number(n)) => Some(extract_reason(&n.to_string())),
            _ => None,
        })
        .unwrap_or(0)
}

/// Whether an error response ends retrying regardless of the counter
pub fn is_stop_status(status: StatusCode, reason: i64) -> bool {
    STOP_RETRY_STATUSES.contains(&status) && reason < STOP_RETRY_REASON_THRESHOLD
}

struct Driver {
    aborted: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Driver {
    fn is_running(&self) -> bool {
        !self.aborted.load(Ordering::SeqCst) && !self.task.is_finished()
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.task.abort();
    }
}

struct Stream {
    context: TransportContext,
    url: Url,
    http: reqwest::Client,
    connected: AtomicBool,
}

/// Server-sent events transport
///
/// The stream runs on a spawned task, so [`Transport::connect`] must be
/// called inside a Tokio runtime. Dropping the transport aborts the stream.
pub struct SseTransport {
    stream: Arc<Stream>,
    driver: Mutex<Option<Driver>>,
}

impl SseTransport {
    /// Create a transport for the context's configuration
    ///
    /// Fails if the stream URL cannot be derived or the HTTP client cannot
    /// be built.
    #[tracing::instrument(skip_all, fields(transport = "sse"))]
    pub fn new(context: TransportContext) -> Result<Self> {
        let url = context.config.sse_endpoint()?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        tracing::debug!(url = %url, "sse transport created");
        Ok(Self {
            stream: Arc::new(Stream {
                context,
                url,
                http,
                connected: AtomicBool::new(false),
            }),
            driver: Mutex::new(None),
        })
    }

    /// Open the stream and run `on_connected` on the first success status
    ///
    /// No-op while a stream is already running.
    pub fn connect_with(&self, on_connected: Option<ConnectedCallback>) {
        let Ok(mut driver) = self.driver.lock() else {
            return;
        };
        if driver.as_ref().is_some_and(Driver::is_running) {
            tracing::debug!("sse stream already running");
            return;
        }

        let aborted = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(drive(
            Arc::clone(&self.stream),
            Arc::clone(&aborted),
            on_connected,
        ));
        *driver = Some(Driver { aborted, task });
    }

    /// The stream URL
    pub fn url(&self) -> &Url {
        &self.stream.url
    }
}

impl Transport for SseTransport {
    fn connect(&self) {
        self.connect_with(None);
    }

    fn disconnect(&self) {
        if let Ok(driver) = self.driver.lock() {
            if let Some(driver) = driver.as_ref() {
                if !driver.aborted.load(Ordering::SeqCst) {
                    tracing::info!("sse disconnect requested");
                    driver.abort();
                    if let Some(m) = self.stream.metrics() {
                        m.update_transport_state(TransportKind::Sse, TransportState::Disconnected);
                    }
                }
            }
        }
        self.stream.connected.store(false, Ordering::SeqCst);
    }

    fn name(&self) -> TransportKind {
        TransportKind::Sse
    }

    fn connected(&self) -> bool {
        self.stream.connected.load(Ordering::SeqCst)
    }

    fn send(&self, text: &str) {
        tracing::warn!(len = text.len(), "sse transport is receive-only, outbound frame dropped");
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        if let Ok(driver) = self.driver.lock() {
            if let Some(driver) = driver.as_ref() {
                driver.abort();
            }
        }
    }
}

enum Attempt {
    /// The stream ended or the request failed before a response
    Ended(Option<String>),
    /// 401; retry with whatever token the cell holds by then
    Unauthorized,
    /// Non-success status with its body
    Rejected { status: StatusCode, body: String },
}

impl Stream {
    fn metrics(&self) -> Option<&ClientMetrics> {
        self.context.metrics.as_deref()
    }

    fn config_max_attempts(&self) -> u32 {
        self.context.config.max_reconnect_attempts
    }

    async fn attempt(
        &self,
        errors: &mut u32,
        on_connected: &mut Option<ConnectedCallback>,
    ) -> Attempt {
        let request = self
            .http
            .get(self.url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .header(AUTHORIZATION, self.context.credentials.bearer());

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "sse request failed");
                return Attempt::Ended(Some(e.to_string()));
            }
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Attempt::Unauthorized;
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Attempt::Rejected { status, body };
        }

        self.connected.store(true, Ordering::SeqCst);
        tracing::info!(status = status.as_u16(), "sse stream open");
        if let Some(m) = self.metrics() {
            m.update_transport_state(TransportKind::Sse, TransportState::Active);
        }
        if let Some(callback) = on_connected.take() {
            callback();
        }

        let mut parser = EventStreamParser::new();
        let body = response.bytes_stream();
        tokio::pin!(body);
        let ended = loop {
            match body.next().await {
                Some(Ok(chunk)) => {
                    for event in parser.feed(&chunk) {
                        self.on_event(event, errors);
                    }
                }
                Some(Err(e)) => break Some(e.to_string()),
                None => break None,
            }
        };
        self.connected.store(false, Ordering::SeqCst);
        Attempt::Ended(ended)
    }

    fn on_event(&self, event: SseEvent, errors: &mut u32) {
        let msg: ChannelMessage = match JsonDecoder.decode_sse(&event.data) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable sse event");
                return;
            }
        };
        if let Some(m) = self.metrics() {
            m.record_received(TransportKind::Sse);
        }
        if msg.event == events::NEW_TOKEN {
            self.context.credentials.rotate(msg.payload_text());
            tracing::info!("channel token rotated by server");
        }
        *errors = 0;
        (self.context.on_message)(msg);
    }

    fn backoff(&self, errors: u32) -> Duration {
        let delay = calculate_backoff(
            errors.saturating_sub(1),
            self.context.config.reconnect_initial(),
            self.context.config.reconnect_max(),
        );
        apply_jitter(delay, DEFAULT_JITTER)
    }

    fn fail(&self, aborted: &AtomicBool, message: String) {
        aborted.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        tracing::error!(message = %message, "sse stream stopped");
        if let Some(m) = self.metrics() {
            m.record_transport_error(TransportKind::Sse);
            m.update_transport_state(TransportKind::Sse, TransportState::Disconnected);
        }
        (self.context.on_error)(TransportError::fatal(TransportKind::Sse, message));
    }
}

async fn drive(
    stream: Arc<Stream>,
    aborted: Arc<AtomicBool>,
    mut on_connected: Option<ConnectedCallback>,
) {
    let max_attempts = stream.config_max_attempts();
    let mut errors: u32 = 0;

    if let Some(m) = stream.metrics() {
        m.update_transport_state(TransportKind::Sse, TransportState::Connecting);
    }
    tracing::info!(url = %stream.url, "connecting sse stream");

    while !aborted.load(Ordering::SeqCst) {
        let delay = match stream.attempt(&mut errors, &mut on_connected).await {
            Attempt::Unauthorized => {
                tracing::info!("sse request unauthorized, retrying with current token");
                stream.context.config.reconnect_initial()
            }
            Attempt::Ended(error) => {
                errors += 1;
                tracing::warn!(errors, max_attempts, error = ?error, "sse stream ended");
                if errors >= max_attempts {
                    stream.fail(&aborted, "max reconnect attempts reached".to_string());
                    return;
                }
                stream.backoff(errors)
            }
            Attempt::Rejected { status, body } => {
                errors += 1;
                let reason = response_reason(&body);
                tracing::warn!(status = status.as_u16(), reason, errors, "sse response error");
                if is_stop_status(status, reason) || errors >= max_attempts {
                    let text = status.canonical_reason().unwrap_or_default();
                    stream.fail(&aborted, format!("{} {}", text, body));
                    return;
                }
                stream.backoff(errors)
            }
        };

        if let Some(m) = stream.metrics() {
            m.record_reconnect_attempt(TransportKind::Sse);
            m.update_transport_state(TransportKind::Sse, TransportState::Reconnecting);
        }
        tokio::time::sleep(delay).await;
    }
}
