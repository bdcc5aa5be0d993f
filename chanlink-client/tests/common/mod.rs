//! Common test utilities for chanlink-client integration tests
//!
//! - [`MockChannelServer`]: scripted WebSocket channel server
//! - [`MockSseServer`]: scripted event-stream server built on warp
//! - [`MockedTransport`]: in-memory `Transport` for façade tests

#![allow(dead_code)]

use chanlink_client::{ClientConfig, Transport, TransportContext};
use chanlink_core::{codec, events, ChannelMessage, Protocol, TransportError, TransportKind};
use futures::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// Poll `condition` every 10ms until it holds or `timeout` passes
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A channel message in the JSON array layout
pub fn json_frame(message_id: &str, event: &str, payload: serde_json::Value) -> String {
    serde_json::json!([message_id, "", event, payload]).to_string()
}

/// The server's `AuthOk` frame
pub fn auth_ok_frame() -> String {
    serde_json::json!(["", "", events::AUTH_OK, ""]).to_string()
}

/// Config with short retry delays, pointing at `url`
pub fn test_config(url: &str, token: &str) -> ClientConfig {
    ClientConfig::new(url, "test-ref", token)
        .with_reconnect_delays(Duration::from_millis(20), Duration::from_millis(200))
}

enum Control {
    Send(ChannelMessage),
    ReleaseAuth,
    Drop,
}

struct ServerState {
    accepted_tokens: Mutex<Vec<String>>,
    answer_heartbeats: AtomicBool,
    hold_auth: AtomicBool,
    prefer_binary: AtomicBool,
    received: Mutex<Vec<String>>,
    protocols: Mutex<Vec<Protocol>>,
    connections: AtomicUsize,
    current: Mutex<Option<mpsc::UnboundedSender<Control>>>,
}

/// Scripted WebSocket channel server
///
/// Accepts `Auth::<token>` for any accepted token and answers `AuthOk`;
/// other tokens get a close with `Invalid token for channel`. Heartbeats are
/// answered while [`set_answer_heartbeats`](Self::set_answer_heartbeats) is
/// on. Every text frame received is recorded.
pub struct MockChannelServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
}

impl MockChannelServer {
    /// Start a server accepting `token`
    pub async fn start(token: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(ServerState {
            accepted_tokens: Mutex::new(vec![token.to_string()]),
            answer_heartbeats: AtomicBool::new(true),
            hold_auth: AtomicBool::new(false),
            prefer_binary: AtomicBool::new(false),
            received: Mutex::new(Vec::new()),
            protocols: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
            current: Mutex::new(None),
        });

        let accept_state = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_socket(stream, Arc::clone(&accept_state)));
            }
        });

        Self { addr, state }
    }

    /// Base URL for the client configuration
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Only accept `token` from now on
    pub fn accept_only(&self, token: &str) {
        *self.state.accepted_tokens.lock().unwrap() = vec![token.to_string()];
    }

    /// Answer heartbeats or let them time out
    pub fn set_answer_heartbeats(&self, answer: bool) {
        self.state.answer_heartbeats.store(answer, Ordering::SeqCst);
    }

    /// Hold back `AuthOk` for accepted tokens until
    /// [`release_auth`](Self::release_auth)
    pub fn hold_auth(&self) {
        self.state.hold_auth.store(true, Ordering::SeqCst);
    }

    /// Send the held `AuthOk` on the latest connection
    pub fn release_auth(&self) {
        self.state.hold_auth.store(false, Ordering::SeqCst);
        if let Some(tx) = self.state.current.lock().unwrap().as_ref() {
            let _ = tx.send(Control::ReleaseAuth);
        }
    }

    /// Select `binary_flow` when the client offers it
    pub fn prefer_binary(&self) {
        self.state.prefer_binary.store(true, Ordering::SeqCst);
    }

    /// Connections accepted so far
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Every text frame received, in order
    pub fn received(&self) -> Vec<String> {
        self.state.received.lock().unwrap().clone()
    }

    /// Whether `frame` was received
    pub fn has_received(&self, frame: &str) -> bool {
        self.received().iter().any(|f| f == frame)
    }

    /// Subprotocol selected for each connection, in order
    pub fn protocols(&self) -> Vec<Protocol> {
        self.state.protocols.lock().unwrap().clone()
    }

    /// Push a message on the latest connection
    pub fn push(&self, message: ChannelMessage) {
        if let Some(tx) = self.state.current.lock().unwrap().as_ref() {
            let _ = tx.send(Control::Send(message));
        }
    }

    /// Drop the latest connection without a close frame
    pub fn drop_connection(&self) {
        if let Some(tx) = self.state.current.lock().unwrap().as_ref() {
            let _ = tx.send(Control::Drop);
        }
    }
}

async fn serve_socket(stream: TcpStream, state: Arc<ServerState>) {
    let prefer_binary = state.prefer_binary.load(Ordering::SeqCst);
    let mut selected = Protocol::Json;
    let callback = |request: &Request, mut response: Response| {
        let offered = request
            .headers()
            .get("sec-websocket-protocol")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if prefer_binary && offered.contains(Protocol::Binary.as_str()) {
            selected = Protocol::Binary;
        }
        response.headers_mut().insert(
            "sec-websocket-protocol",
            HeaderValue::from_static(selected.as_str()),
        );
        Ok(response)
    };
    let Ok(ws) = accept_hdr_async(stream, callback).await else {
        return;
    };

    let (tx, mut control) = mpsc::unbounded_channel();
    *state.current.lock().unwrap() = Some(tx);
    state.protocols.lock().unwrap().push(selected);
    state.connections.fetch_add(1, Ordering::SeqCst);

    let encode = |msg: &ChannelMessage| match selected {
        Protocol::Json => Message::Text(codec::encode_json(msg).unwrap()),
        Protocol::Binary => Message::Binary(codec::encode_binary(msg).unwrap()),
    };

    let (mut write, mut read) = ws.split();
    let mut auth_held = false;
    loop {
        tokio::select! {
            command = control.recv() => match command {
                Some(Control::Send(msg)) => {
                    let _ = write.send(encode(&msg)).await;
                }
                Some(Control::ReleaseAuth) => {
                    if auth_held {
                        auth_held = false;
                        let ok = ChannelMessage::new("", events::AUTH_OK, "", "");
                        let _ = write.send(encode(&ok)).await;
                    }
                }
                Some(Control::Drop) | None => break,
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    state.received.lock().unwrap().push(text.clone());
                    if let Some(token) = text.strip_prefix("Auth::") {
                        let accepted = state.accepted_tokens.lock().unwrap().iter().any(|t| t == token);
                        if accepted && state.hold_auth.load(Ordering::SeqCst) {
                            auth_held = true;
                        } else if accepted {
                            let ok = ChannelMessage::new("", events::AUTH_OK, "", "");
                            let _ = write.send(encode(&ok)).await;
                        } else {
                            let frame = CloseFrame {
                                code: CloseCode::Policy,
                                reason: "Invalid token for channel".into(),
                            };
                            let _ = write.send(Message::Close(Some(frame))).await;
                        }
                    } else if let Some(reference) = text.strip_prefix("hb::") {
                        if state.answer_heartbeats.load(Ordering::SeqCst) {
                            let ack = ChannelMessage::new("", events::HEARTBEAT, reference, "");
                            let _ = write.send(encode(&ack)).await;
                        }
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => break,
            },
        }
    }
}

/// Canned reply for one SSE request
#[derive(Debug, Clone)]
pub enum SseReply {
    /// Error status with a body
    Status(u16, String),
    /// 200 stream sending these `data` payloads, then staying open
    Events(Vec<String>),
}

/// Scripted event-stream server
///
/// Requests consume replies in order; once the script is empty every request
/// gets an open stream without events. The `Authorization` header of every
/// request is recorded.
pub struct MockSseServer {
    addr: SocketAddr,
    script: Arc<Mutex<VecDeque<SseReply>>>,
    authorizations: Arc<Mutex<Vec<String>>>,
}

impl MockSseServer {
    /// Start a server with `script`
    pub async fn start(script: Vec<SseReply>) -> Self {
        use warp::Filter;

        let script = Arc::new(Mutex::new(VecDeque::from(script)));
        let authorizations = Arc::new(Mutex::new(Vec::new()));

        let route = {
            let script = Arc::clone(&script);
            let authorizations = Arc::clone(&authorizations);
            warp::path!("ext" / "sse")
                .and(warp::header::optional::<String>("authorization"))
                .map(move |auth: Option<String>| {
                    authorizations.lock().unwrap().push(auth.unwrap_or_default());
                    let reply = script.lock().unwrap().pop_front();
                    sse_response(reply.unwrap_or(SseReply::Events(Vec::new())))
                })
        };

        let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);
        Self {
            addr,
            script,
            authorizations,
        }
    }

    /// Base URL for the client configuration
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Requests served so far
    pub fn requests(&self) -> usize {
        self.authorizations.lock().unwrap().len()
    }

    /// `Authorization` header of every request, in order
    pub fn authorizations(&self) -> Vec<String> {
        self.authorizations.lock().unwrap().clone()
    }
}

fn sse_response(reply: SseReply) -> warp::reply::Response {
    use warp::Reply;

    match reply {
        SseReply::Status(status, body) => {
            let status = warp::http::StatusCode::from_u16(status).unwrap();
            warp::reply::with_status(body, status).into_response()
        }
        SseReply::Events(data) => {
            let events = futures::stream::iter(data.into_iter().map(|d| {
                Ok::<_, std::convert::Infallible>(warp::sse::Event::default().data(d))
            }))
            .chain(futures::stream::pending());
            warp::sse::reply(events).into_response()
        }
    }
}

/// In-memory transport recording what the façade asks of it
pub struct MockedTransport {
    kind: TransportKind,
    context: TransportContext,
    connected: AtomicBool,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    sent: Mutex<Vec<String>>,
}

impl MockedTransport {
    /// Hand `message` to the façade as if it had been received
    pub fn emit(&self, message: ChannelMessage) {
        (self.context.on_message)(message);
    }

    /// Report a fatal error to the façade
    pub fn fail(&self) {
        (self.context.on_error)(TransportError::fatal(self.kind, "mocked failure"));
    }

    /// Report an error with `origin` and `code`
    pub fn report(&self, origin: TransportKind, code: i32) {
        (self.context.on_error)(TransportError::new(origin, code, "mocked report"));
    }

    /// Times `connect` was called
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Times `disconnect` was called
    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Frames passed to `send`
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// The credentials cell the façade handed over
    pub fn token(&self) -> String {
        self.context.credentials.token()
    }
}

impl Transport for MockedTransport {
    fn connect(&self) {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn name(&self) -> TransportKind {
        self.kind
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send(&self, text: &str) {
        self.sent.lock().unwrap().push(text.to_string());
    }
}

/// Every `MockedTransport` a factory created, in creation order
pub type Created = Arc<Mutex<Vec<Arc<MockedTransport>>>>;

/// Factory producing `MockedTransport`s, plus the list it fills
pub fn mocked_factory() -> (
    impl Fn(TransportKind, TransportContext) -> chanlink_core::Result<Arc<dyn Transport>>
        + Send
        + Sync
        + 'static,
    Created,
) {
    let created: Created = Arc::new(Mutex::new(Vec::new()));
    let registry = Arc::clone(&created);
    let factory = move |kind: TransportKind,
                        context: TransportContext|
          -> chanlink_core::Result<Arc<dyn Transport>> {
        let transport = Arc::new(MockedTransport {
            kind,
            context,
            connected: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        });
        registry.lock().unwrap().push(Arc::clone(&transport));
        Ok(transport as Arc<dyn Transport>)
    };
    (factory, created)
}

/// The `index`-th transport a mocked factory created
pub fn created(created: &Created, index: usize) -> Arc<MockedTransport> {
    Arc::clone(&created.lock().unwrap()[index])
}
