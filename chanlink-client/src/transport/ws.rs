//! WebSocket transport
//!
//! Maintains one authenticated, heartbeating, reconnecting WebSocket to the
//! channel server.
//!
//! # Session
//!
//! 1. Open `<ws base>/ext/socket?channel=<ref>`, offering `json_flow` (and
//!    `binary_flow` when enabled)
//! 2. On open: pick the decoder for the negotiated subprotocol, start the
//!    heartbeat and send `Auth::<token>`
//! 3. `AuthOk` marks the session active and resets the retry scheduler
//! 4. Every routed message is acknowledged with `Ack::<message_id>`
//!
//! # Heartbeat
//!
//! Each tick sends `hb::<ref>` unless a previous probe is still unanswered,
//! in which case the socket is closed with code `3051` and the close path
//! schedules a reconnect.
//!
//! # Close Classification
//!
//! A close is retried when it was not requested by [`Transport::disconnect`],
//! its reason is not `Invalid token for channel`, and either the code is
//! above `1001` or it is `1001` with a reason code of at least `3050`. Every
//! other close is terminal and reported to `on_close` observers. When the
//! retry ceiling is reached the transport reports a fatal [`TransportError`].
//!
//! # Architecture
//!
//! A single actor task owns all session state and processes commands, socket
//! events and timer ticks in order. Each physical socket runs in its own task
//! and tags its events with a generation number; events from a socket that has
//! been replaced are ignored.

use crate::metrics::{ClientMetrics, TransportState};
use crate::retry::RetryTimer;
use crate::transport::{extract_reason, SocketState, Transport, TransportContext};
use chanlink_core::{
    codec, events, ChannelMessage, Decoder, Error, MessageDecoder, Protocol, RawFrame, Result,
    TransportError, TransportKind,
};
use futures::{SinkExt, StreamExt};
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

/// Close code used when a heartbeat goes unanswered
pub const HEARTBEAT_TIMEOUT_CODE: u16 = 3051;

/// Close reason used when a heartbeat goes unanswered
pub const HEARTBEAT_TIMEOUT_REASON: &str = "heartbeat timeout. Attempting to re-establish connection";

/// Close reason the server uses for a rejected token; never retried
pub const INVALID_TOKEN_REASON: &str = "Invalid token for channel";

/// Highest close code treated as a normal closure
pub const NORMAL_CLOSURE_BASELINE: u16 = 1001;

/// Reason codes at or above this make a baseline closure retryable
pub const RETRY_REASON_THRESHOLD: i64 = 3050;

/// Close code reported when the connection ended without a close frame
pub const ABNORMAL_CLOSURE: u16 = 1006;

const CLIENT_DISCONNECT_CODE: u16 = 1000;
const CLIENT_DISCONNECT_REASON: &str = "Client disconnect";
const TEARDOWN_POLLS: u32 = 5;
const TEARDOWN_POLL_STEP: Duration = Duration::from_millis(150);
const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// Code and reason of a terminal closure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// WebSocket close code
    pub code: u16,
    /// Close reason text
    pub reason: String,
}

/// Whether a close with `code` and `reason` should be followed by a reconnect
///
/// Does not account for user-initiated closes; the transport checks that
/// separately.
pub fn should_retry(code: u16, reason: &str) -> bool {
    if reason == INVALID_TOKEN_REASON {
        return false;
    }
    code > NORMAL_CLOSURE_BASELINE
        || (code == NORMAL_CLOSURE_BASELINE && extract_reason(reason) >= RETRY_REASON_THRESHOLD)
}

type OpenObserver = Arc<dyn Fn() + Send + Sync>;
type CloseObserver = Arc<dyn Fn(CloseInfo) + Send + Sync>;

#[derive(Default)]
struct Shared {
    open: AtomicBool,
    active: AtomicBool,
    binary: AtomicBool,
    open_observers: Mutex<Vec<OpenObserver>>,
    close_observers: Mutex<Vec<CloseObserver>>,
}

impl Shared {
    fn open_observers(&self) -> Vec<OpenObserver> {
        self.open_observers.lock().map(|o| o.clone()).unwrap_or_default()
    }

    fn close_observers(&self) -> Vec<CloseObserver> {
        self.close_observers.lock().map(|o| o.clone()).unwrap_or_default()
    }
}

enum Event {
    Connect,
    Disconnect,
    Send(String),
    Shutdown,
    Opened { generation: u64, protocol: Protocol },
    Frame { generation: u64, message: Message },
    Closed { generation: u64, code: u16, reason: String },
    Retry,
    TornDown,
    LimitReached,
}

/// WebSocket transport
///
/// Creating one spawns its actor task, so it must happen inside a Tokio
/// runtime. Dropping it disconnects.
pub struct WsTransport {
    events: mpsc::UnboundedSender<Event>,
    shared: Arc<Shared>,
    actor: JoinHandle<()>,
}

impl WsTransport {
    /// Create a transport for the context's configuration
    ///
    /// Fails if the socket URL cannot be derived.
    #[tracing::instrument(skip_all, fields(transport = "ws"))]
    pub fn new(context: TransportContext) -> Result<Self> {
        let url = context.config.socket_endpoint()?;
        let mut subprotocols = vec![Protocol::Json];
        if context.config.enable_binary_transport {
            subprotocols.push(Protocol::Binary);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());

        let on_retry = {
            let tx = tx.clone();
            Arc::new(move || {
                let _ = tx.send(Event::Retry);
            })
        };
        let on_limit = {
            let tx = tx.clone();
            Arc::new(move || {
                let _ = tx.send(Event::LimitReached);
            })
        };
        let retry = RetryTimer::new(
            context.config.reconnect_initial(),
            context.config.reconnect_max(),
            context.config.max_reconnect_attempts,
            on_retry,
            on_limit,
        );

        tracing::debug!(url = %url, protocols = ?subprotocols, "websocket transport created");

        let actor = Actor {
            heartbeat_period: context.config.heartbeat(),
            context,
            url,
            subprotocols,
            events_tx: tx.clone(),
            events: rx,
            shared: Arc::clone(&shared),
            socket: None,
            generation: 0,
            decoder: Decoder::default(),
            heartbeat: None,
            pending_heartbeat: None,
            next_ref: 0,
            close_was_clean: false,
            tearing_down: false,
            retry,
        };

        Ok(Self {
            events: tx,
            shared,
            actor: tokio::spawn(actor.run()),
        })
    }

    /// Whether a socket is open
    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// Whether the server accepted the token on the current socket
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Subprotocol negotiated on the current socket
    pub fn protocol(&self) -> Protocol {
        if self.shared.binary.load(Ordering::SeqCst) {
            Protocol::Binary
        } else {
            Protocol::Json
        }
    }

    /// Run `observer` every time a socket opens
    pub fn on_open<F>(&self, observer: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        if let Ok(mut observers) = self.shared.open_observers.lock() {
            observers.push(Arc::new(observer));
        }
    }

    /// Run `observer` on every terminal closure
    pub fn on_close<F>(&self, observer: F)
    where
        F: Fn(CloseInfo) + Send + Sync + 'static,
    {
        if let Ok(mut observers) = self.shared.close_observers.lock() {
            observers.push(Arc::new(observer));
        }
    }

    fn post(&self, event: Event) {
        if self.events.send(event).is_err() {
            tracing::debug!("websocket actor stopped");
        }
    }
}

impl Transport for WsTransport {
    fn connect(&self) {
        self.post(Event::Connect);
    }

    fn disconnect(&self) {
        self.post(Event::Disconnect);
    }

    fn name(&self) -> TransportKind {
        TransportKind::Ws
    }

    fn connected(&self) -> bool {
        self.is_active()
    }

    fn send(&self, text: &str) {
        self.post(Event::Send(text.to_string()));
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if self.events.send(Event::Shutdown).is_err() {
            self.actor.abort();
        }
    }
}

struct SocketHandle {
    generation: u64,
    state: Arc<AtomicU8>,
    outbound: mpsc::UnboundedSender<Message>,
    task: JoinHandle<()>,
}

impl SocketHandle {
    fn state(&self) -> SocketState {
        SocketState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn send_text(&self, text: String) -> bool {
        self.state() == SocketState::Open && self.outbound.send(Message::Text(text)).is_ok()
    }

    fn close(&self, code: u16, reason: &str) {
        if !self.state().is_writable() {
            return;
        }
        self.state.store(SocketState::Closing as u8, Ordering::SeqCst);
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: Cow::Owned(reason.to_string()),
        };
        let _ = self.outbound.send(Message::Close(Some(frame)));
    }
}

struct Actor {
    context: TransportContext,
    url: Url,
    subprotocols: Vec<Protocol>,
    events_tx: mpsc::UnboundedSender<Event>,
    events: mpsc::UnboundedReceiver<Event>,
    shared: Arc<Shared>,
    socket: Option<SocketHandle>,
    generation: u64,
    decoder: Decoder,
    heartbeat: Option<Interval>,
    heartbeat_period: Duration,
    pending_heartbeat: Option<String>,
    next_ref: u64,
    close_was_clean: bool,
    tearing_down: bool,
    retry: RetryTimer,
}

impl Actor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(Event::Shutdown) | None => break,
                    Some(event) => self.handle(event),
                },
                _ = next_tick(&mut self.heartbeat) => self.on_heartbeat_tick(),
            }
        }
        self.disconnect();
        tracing::debug!("websocket actor stopped");
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Connect => self.connect(),
            Event::Disconnect => self.disconnect(),
            Event::Send(text) => self.send_text(text),
            Event::Opened {
                generation,
                protocol,
            } if self.is_current(generation) => self.on_open(protocol),
            Event::Frame {
                generation,
                message,
            } if self.is_current(generation) => self.on_frame(message),
            Event::Closed {
                generation,
                code,
                reason,
            } if self.is_current(generation) => self.on_close(code, reason),
            Event::Opened { generation, .. }
            | Event::Frame { generation, .. }
            | Event::Closed { generation, .. } => {
                tracing::trace!(generation, current = self.generation, "ignoring event from replaced socket");
            }
            Event::Retry => self.on_retry(),
            Event::TornDown => {
                self.tearing_down = false;
                if !self.close_was_clean {
                    self.connect();
                }
            }
            Event::LimitReached => self.on_limit_reached(),
            Event::Shutdown => {}
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.socket
            .as_ref()
            .is_some_and(|socket| socket.generation == generation)
    }

    fn metrics(&self) -> Option<&ClientMetrics> {
        self.context.metrics.as_deref()
    }

    fn connect(&mut self) {
        if self.tearing_down {
            tracing::debug!("teardown in progress, connect deferred");
            return;
        }
        if let Some(socket) = &self.socket {
            if matches!(socket.state(), SocketState::Connecting | SocketState::Open) {
                tracing::debug!("socket already created and open");
                return;
            }
        }

        self.close_was_clean = false;
        let request = match self.build_request() {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(error = %e, "cannot build websocket request");
                (self.context.on_error)(TransportError::fatal(TransportKind::Ws, e.to_string()));
                return;
            }
        };

        self.generation += 1;
        let state = Arc::new(AtomicU8::new(SocketState::Connecting as u8));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_socket(
            request,
            self.generation,
            Arc::clone(&state),
            outbound_rx,
            self.events_tx.clone(),
        ));

        tracing::info!(url = %self.url, generation = self.generation, "connecting websocket");
        if let Some(m) = self.metrics() {
            m.update_transport_state(TransportKind::Ws, TransportState::Connecting);
        }
        // replacing a closing socket drops its sender, which lets it finish on its own
        self.socket = Some(SocketHandle {
            generation: self.generation,
            state,
            outbound: outbound_tx,
            task,
        });
    }

    fn build_request(&self) -> Result<Request> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::WebSocket(e.to_string()))?;

        let offered = self
            .subprotocols
            .iter()
            .map(Protocol::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        let value = HeaderValue::from_str(&offered).map_err(|e| Error::WebSocket(e.to_string()))?;
        request.headers_mut().insert("Sec-WebSocket-Protocol", value);
        Ok(request)
    }

    fn disconnect(&mut self) {
        tracing::info!("websocket disconnect requested");
        self.close_was_clean = true;
        self.shared.active.store(false, Ordering::SeqCst);
        self.heartbeat = None;
        self.pending_heartbeat = None;
        self.retry.reset();
        if let Some(socket) = &self.socket {
            socket.close(CLIENT_DISCONNECT_CODE, CLIENT_DISCONNECT_REASON);
        }
    }

    fn send_text(&self, text: String) {
        match &self.socket {
            Some(socket) if socket.send_text(text) => {}
            _ => tracing::debug!("socket not open, outbound frame dropped"),
        }
    }

    fn on_open(&mut self, protocol: Protocol) {
        self.decoder = Decoder::for_protocol(protocol);
        self.shared
            .binary
            .store(protocol == Protocol::Binary, Ordering::SeqCst);
        self.shared.open.store(true, Ordering::SeqCst);
        tracing::info!(protocol = %protocol, "websocket open");

        self.reset_heartbeat();
        self.send_text(codec::auth_frame(&self.context.credentials.token()));

        for observer in self.shared.open_observers() {
            observer();
        }
    }

    fn reset_heartbeat(&mut self) {
        self.pending_heartbeat = None;
        let mut interval =
            tokio::time::interval_at(Instant::now() + self.heartbeat_period, self.heartbeat_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heartbeat = Some(interval);
    }

    fn on_frame(&mut self, message: Message) {
        let decoded = match &message {
            Message::Text(text) => self.decoder.decode(RawFrame::Text(text)),
            Message::Binary(bytes) => self.decoder.decode(RawFrame::Binary(bytes)),
            _ => return,
        };
        let msg = match decoded {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable frame");
                return;
            }
        };
        if let Some(m) = self.metrics() {
            m.record_received(TransportKind::Ws);
        }

        let active = self.shared.active.load(Ordering::SeqCst);
        if !active && msg.event == events::AUTH_OK {
            self.shared.active.store(true, Ordering::SeqCst);
            self.retry.reset();
            tracing::info!("channel authenticated");
            if let Some(m) = self.metrics() {
                m.update_transport_state(TransportKind::Ws, TransportState::Active);
            }
        } else if msg.event == events::HEARTBEAT {
            if self.pending_heartbeat.as_deref() == Some(msg.correlation_id.as_str()) {
                self.pending_heartbeat = None;
            } else {
                tracing::debug!(reference = %msg.correlation_id, "heartbeat ack without pending probe");
            }
        } else if msg.event == events::NEW_TOKEN {
            self.context.credentials.rotate(msg.payload_text());
            tracing::info!("channel token rotated by server");
            self.deliver(msg);
        } else if active {
            self.deliver(msg);
        } else {
            tracing::warn!(event = %msg.event, message_id = %msg.message_id, "unexpected message before AuthOk");
        }
    }

    fn deliver(&self, msg: ChannelMessage) {
        if let Some(socket) = &self.socket {
            if socket.state().is_writable() {
                socket.send_text(codec::ack_frame(&msg.message_id));
            }
        }
        (self.context.on_message)(msg);
    }

    fn on_heartbeat_tick(&mut self) {
        if !self.shared.active.load(Ordering::SeqCst) {
            return;
        }
        if self.pending_heartbeat.take().is_some() {
            tracing::warn!(code = HEARTBEAT_TIMEOUT_CODE, "{}", HEARTBEAT_TIMEOUT_REASON);
            if let Some(m) = self.metrics() {
                m.record_heartbeat_timeout();
            }
            self.close_was_clean = false;
            self.heartbeat = None;
            if let Some(socket) = &self.socket {
                socket.close(HEARTBEAT_TIMEOUT_CODE, HEARTBEAT_TIMEOUT_REASON);
            }
            return;
        }

        let reference = self.make_ref();
        self.send_text(codec::heartbeat_frame(&reference));
        self.pending_heartbeat = Some(reference);
    }

    fn make_ref(&mut self) -> String {
        self.next_ref = self.next_ref.wrapping_add(1);
        self.next_ref.to_string()
    }

    fn on_close(&mut self, code: u16, reason: String) {
        self.shared.active.store(false, Ordering::SeqCst);
        self.shared.open.store(false, Ordering::SeqCst);
        self.heartbeat = None;
        self.pending_heartbeat = None;

        let retry = !self.close_was_clean && should_retry(code, &reason);
        tracing::warn!(code, reason = %reason, clean = self.close_was_clean, retry, "channel closed");

        if retry {
            if let Some(m) = self.metrics() {
                m.record_reconnect_attempt(TransportKind::Ws);
                m.update_transport_state(TransportKind::Ws, TransportState::Reconnecting);
            }
            self.retry.schedule();
        } else {
            if let Some(m) = self.metrics() {
                m.update_transport_state(TransportKind::Ws, TransportState::Disconnected);
            }
            let info = CloseInfo { code, reason };
            for observer in self.shared.close_observers() {
                observer(info.clone());
            }
        }
    }

    fn on_retry(&mut self) {
        if self.close_was_clean || self.tearing_down {
            return;
        }
        tracing::info!(attempt = self.retry.tries(), "reconnecting websocket");

        let Some(socket) = self.socket.take() else {
            self.connect();
            return;
        };
        if socket.state() == SocketState::Closed {
            self.connect();
            return;
        }

        self.tearing_down = true;
        socket.close(CLIENT_DISCONNECT_CODE, "");
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            for attempt in 1..=TEARDOWN_POLLS {
                if socket.state() == SocketState::Closed {
                    break;
                }
                if attempt == TEARDOWN_POLLS {
                    tracing::debug!("socket did not close in time, discarding it");
                    socket.task.abort();
                    break;
                }
                tokio::time::sleep(TEARDOWN_POLL_STEP * attempt).await;
            }
            let _ = events.send(Event::TornDown);
        });
    }

    fn on_limit_reached(&mut self) {
        tracing::error!(
            max = self.context.config.max_reconnect_attempts,
            "websocket reconnect attempts exhausted"
        );
        if let Some(m) = self.metrics() {
            m.record_transport_error(TransportKind::Ws);
            m.update_transport_state(TransportKind::Ws, TransportState::Disconnected);
        }
        (self.context.on_error)(TransportError::fatal(
            TransportKind::Ws,
            "max reconnect attempts reached",
        ));
    }
}

async fn next_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn close_parts(frame: Option<CloseFrame<'_>>) -> (u16, String) {
    match frame {
        Some(frame) => (u16::from(frame.code), frame.reason.into_owned()),
        None => (u16::from(CloseCode::Status), String::new()),
    }
}

// Drives one physical socket and reports its lifecycle to the actor
async fn run_socket(
    request: Request,
    generation: u64,
    state: Arc<AtomicU8>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    events: mpsc::UnboundedSender<Event>,
) {
    let finish = |code: u16, reason: String| {
        state.store(SocketState::Closed as u8, Ordering::SeqCst);
        let _ = events.send(Event::Closed {
            generation,
            code,
            reason,
        });
    };

    let connecting = connect_async(request);
    tokio::pin!(connecting);
    let (stream, response) = loop {
        tokio::select! {
            result = &mut connecting => match result {
                Ok(pair) => break pair,
                Err(e) => {
                    tracing::warn!(error = %e, "websocket connect failed");
                    finish(ABNORMAL_CLOSURE, e.to_string());
                    return;
                }
            },
            command = outbound.recv() => match command {
                Some(Message::Close(frame)) => {
                    let (code, reason) = close_parts(frame);
                    finish(code, reason);
                    return;
                }
                Some(_) => continue,
                None => {
                    finish(ABNORMAL_CLOSURE, String::new());
                    return;
                }
            },
        }
    };

    let negotiated = response
        .headers()
        .get("sec-websocket-protocol")
        .and_then(|v| v.to_str().ok());
    let protocol = Protocol::from_negotiated(negotiated);
    // a close requested during the handshake leaves the state at Closing
    let _ = state.compare_exchange(
        SocketState::Connecting as u8,
        SocketState::Open as u8,
        Ordering::SeqCst,
        Ordering::SeqCst,
    );
    let _ = events.send(Event::Opened {
        generation,
        protocol,
    });

    let (mut sink, mut source) = stream.split();
    let mut local_close: Option<(u16, String)> = None;
    let mut peer_close: Option<(u16, String)> = None;
    let mut failure: Option<String> = None;
    let mut close_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            command = outbound.recv() => match command {
                Some(message) => {
                    let is_close = matches!(message, Message::Close(_));
                    if local_close.is_some() || peer_close.is_some() {
                        if !is_close {
                            continue;
                        }
                    }
                    if let Message::Close(Some(frame)) = &message {
                        local_close = Some((u16::from(frame.code), frame.reason.to_string()));
                    }
                    if is_close {
                        state.store(SocketState::Closing as u8, Ordering::SeqCst);
                        close_deadline = Some(Instant::now() + CLOSE_HANDSHAKE_TIMEOUT);
                    }
                    if let Err(e) = sink.send(message).await {
                        tracing::debug!(error = %e, "websocket write failed");
                        failure = Some(e.to_string());
                        break;
                    }
                }
                None => {
                    let _ = sink.close().await;
                    local_close.get_or_insert((CLIENT_DISCONNECT_CODE, String::new()));
                    break;
                }
            },
            incoming = source.next() => match incoming {
                Some(Ok(message @ (Message::Text(_) | Message::Binary(_)))) => {
                    let _ = events.send(Event::Frame { generation, message });
                }
                Some(Ok(Message::Close(frame))) => {
                    peer_close = Some(close_parts(frame));
                    state.store(SocketState::Closing as u8, Ordering::SeqCst);
                    close_deadline.get_or_insert(Instant::now() + CLOSE_HANDSHAKE_TIMEOUT);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    failure = Some(e.to_string());
                    break;
                }
                None => break,
            },
            _ = until(close_deadline) => {
                tracing::debug!("close handshake timed out");
                break;
            }
        }
    }

    let (code, reason) = peer_close
        .or(local_close)
        .unwrap_or_else(|| (ABNORMAL_CLOSURE, failure.unwrap_or_default()));
    finish(code, reason);
}
