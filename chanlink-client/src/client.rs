//! Channel client façade
//!
//! `AsyncClient` is the single entry point an application uses. It owns the
//! active transport, the subscription table and the dedup cache, and moves to
//! the next configured transport when the active one gives up.
//!
//! # Message Flow
//!
//! 1. The active transport decodes a frame and hands the message over
//! 2. `:n_token` updates the shared credentials and stops there
//! 3. No subscriptions, or none matching: a `NoBindings::<event>` notice goes
//!    back through the transport and the message is dropped
//! 4. One dedup check per message decides for every matching subscriber
//! 5. Subscribers run in registration order
//!
//! # Failover
//!
//! A fatal [`TransportError`] from the installed transport disconnects it,
//! advances the transport list and connects the next entry, until the
//! failover counter passes `max_reconnect_attempts`. Errors from a transport
//! that has already been replaced are ignored.
//!
//! # Cloning
//!
//! `AsyncClient` is cheaply cloneable; clones share one session. Dropping the
//! last clone drops the transport, which disconnects it.

use crate::cache::DedupCache;
use crate::config::ClientConfig;
use crate::credentials::SessionCredentials;
use crate::failover::{FailoverDecision, FailoverState};
use crate::focus::FocusSource;
use crate::metrics::{ClientMetrics, TransportState};
use crate::subscription::{Subscription, SubscriptionTable};
use crate::transport::{Transport, TransportContext, TransportFactory};
use chanlink_core::{codec, events, ChannelMessage, Result, TransportError, TransportKind};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Hook run once when every transport option has been used up
pub type ExhaustedHook = Arc<dyn Fn() + Send + Sync>;

struct State {
    subscriptions: SubscriptionTable,
    dedup: Option<DedupCache>,
    transport: Arc<dyn Transport>,
    failover: FailoverState,
    close_was_clean: bool,
}

enum Route {
    NoBindings,
    Unmatched,
    Duplicate,
    Deliver(Vec<Subscription>),
}

impl State {
    fn route(&mut self, msg: &ChannelMessage) -> Route {
        if self.subscriptions.is_empty() {
            return Route::NoBindings;
        }
        let matched = self.subscriptions.matching(&msg.event);
        if matched.is_empty() {
            return Route::Unmatched;
        }
        let fresh = match self.dedup.as_mut() {
            Some(cache) => cache.check_and_insert(&msg.message_id),
            None => true,
        };
        if fresh {
            Route::Deliver(matched)
        } else {
            Route::Duplicate
        }
    }
}

struct Inner {
    config: Arc<ClientConfig>,
    credentials: SessionCredentials,
    factory: Arc<dyn TransportFactory>,
    metrics: Option<Arc<ClientMetrics>>,
    on_exhausted: Option<ExhaustedHook>,
    state: Mutex<State>,
}

/// Channel client over a prioritized list of transports
#[derive(Clone)]
pub struct AsyncClient {
    inner: Arc<Inner>,
}

pub(crate) struct Parts {
    pub config: ClientConfig,
    pub factory: Arc<dyn TransportFactory>,
    pub focus: Option<Arc<dyn FocusSource>>,
    pub on_exhausted: Option<ExhaustedHook>,
    pub metrics: Option<Arc<ClientMetrics>>,
}

impl AsyncClient {
    /// Create a client with the default transports and no focus source
    ///
    /// Must be called inside a Tokio runtime. See
    /// [`ClientBuilder`](crate::ClientBuilder) for the other options.
    pub fn new(config: ClientConfig) -> Result<Self> {
        crate::ClientBuilder::new(config).build()
    }

    #[tracing::instrument(skip_all, fields(channel = %parts.config.channel_ref))]
    pub(crate) fn assemble(parts: Parts) -> Result<Self> {
        let Parts {
            config,
            factory,
            focus,
            on_exhausted,
            metrics,
        } = parts;

        let config = Arc::new(config);
        let credentials = SessionCredentials::new(config.channel_secret.clone());
        let failover = FailoverState::new(config.transport_list(), config.max_reconnect_attempts);
        let dedup = (!config.dedup_cache_disable)
            .then(|| DedupCache::new(config.dedup_cache_max_size, config.dedup_ttl()));

        // the first transport needs sinks that point back at the client
        let mut first: Option<Result<Arc<dyn Transport>>> = None;
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let context = transport_context(weak, &config, &credentials, &metrics);
            let created = factory.create(failover.current(), context);
            let transport = match &created {
                Ok(transport) => Arc::clone(transport),
                Err(_) => Arc::new(Unavailable(failover.current())) as Arc<dyn Transport>,
            };
            first = Some(created);
            Inner {
                config: Arc::clone(&config),
                credentials: credentials.clone(),
                factory: Arc::clone(&factory),
                metrics: metrics.clone(),
                on_exhausted,
                state: Mutex::new(State {
                    subscriptions: SubscriptionTable::new(),
                    dedup,
                    transport,
                    failover,
                    close_was_clean: false,
                }),
            }
        });
        if let Some(Err(e)) = first {
            return Err(e);
        }

        if config.check_connection_on_focus {
            if let Some(focus) = focus {
                let weak = Arc::downgrade(&inner);
                focus.subscribe(Arc::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_focus();
                    }
                }));
            }
        }

        tracing::info!(
            transport = %inner.lock().transport.name(),
            dedup = !config.dedup_cache_disable,
            "channel client created"
        );
        Ok(Self { inner })
    }

    /// Connect the current transport
    ///
    /// After exhaustion this resets the failover counter and tries again
    /// with the transport that was active last.
    pub fn connect(&self) {
        let transport = {
            let mut state = self.inner.lock();
            state.close_was_clean = false;
            if state.failover.is_exhausted() {
                tracing::info!("restarting after transport exhaustion");
                state.failover.reset();
            }
            Arc::clone(&state.transport)
        };
        transport.connect();
    }

    /// Disconnect the current transport on purpose
    pub fn disconnect(&self) {
        let transport = {
            let mut state = self.inner.lock();
            state.close_was_clean = true;
            Arc::clone(&state.transport)
        };
        transport.disconnect();
    }

    /// Run `callback` for every message whose event matches `pattern`
    ///
    /// `*` matches one dot-separated segment, `#` one or more. The pattern
    /// is not validated.
    pub fn listen_event<F>(&self, pattern: &str, callback: F)
    where
        F: Fn(ChannelMessage) + Send + Sync + 'static,
    {
        tracing::debug!(pattern, "subscription registered");
        self.inner.lock().subscriptions.register(pattern, callback);
    }

    /// Whether failover gave up
    pub fn is_exhausted(&self) -> bool {
        self.inner.lock().failover.is_exhausted()
    }

    /// Name of the installed transport
    pub fn transport_name(&self) -> TransportKind {
        self.inner.lock().transport.name()
    }

    /// Whether the installed transport is connected
    pub fn connected(&self) -> bool {
        let transport = Arc::clone(&self.inner.lock().transport);
        transport.connected()
    }

    /// Number of registered subscriptions
    pub fn subscription_count(&self) -> usize {
        self.inner.lock().subscriptions.len()
    }

    /// The shared credentials cell
    pub fn credentials(&self) -> &SessionCredentials {
        &self.inner.credentials
    }

    /// The client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn context(self: &Arc<Self>) -> TransportContext {
        transport_context(
            &Arc::downgrade(self),
            &self.config,
            &self.credentials,
            &self.metrics,
        )
    }

    fn handle_message(&self, msg: ChannelMessage) {
        if msg.event == events::NEW_TOKEN {
            self.credentials.rotate(msg.payload_text());
            return;
        }
        if msg.is_control() {
            tracing::debug!(event = %msg.event, "control message not routed");
            return;
        }

        let (route, transport) = {
            let mut state = self.lock();
            (state.route(&msg), Arc::clone(&state.transport))
        };

        match route {
            Route::NoBindings => {
                tracing::debug!(event = %msg.event, "no subscriptions registered");
                transport.send(&codec::no_bindings_frame(&msg.event));
            }
            Route::Unmatched => {
                tracing::debug!(event = %msg.event, "no subscription matches");
                if let Some(m) = &self.metrics {
                    m.record_unmatched(&msg.event);
                }
                transport.send(&codec::no_bindings_frame(&msg.event));
            }
            Route::Duplicate => {
                tracing::debug!(message_id = %msg.message_id, "duplicate message suppressed");
                if let Some(m) = &self.metrics {
                    m.record_duplicate();
                }
            }
            Route::Deliver(subscriptions) => {
                if let Some(m) = &self.metrics {
                    m.record_delivered(&msg.event, subscriptions.len() as u64);
                }
                for subscription in subscriptions {
                    subscription.deliver(msg.clone());
                }
            }
        }
    }

    fn handle_error(self: &Arc<Self>, error: TransportError) {
        let failed = {
            let state = self.lock();
            if !error.is_fatal()
                || state.transport.name() != error.origin
                || state.failover.is_exhausted()
            {
                tracing::debug!(error = %error, "ignoring transport error");
                return;
            }
            Arc::clone(&state.transport)
        };

        tracing::warn!(error = %error, "transport failed");
        failed.disconnect();

        loop {
            let decision = self.lock().failover.advance();
            let next = match decision {
                FailoverDecision::Next(next) => next,
                FailoverDecision::Exhausted => {
                    self.exhausted();
                    return;
                }
            };

            match self.factory.create(next, self.context()) {
                Ok(transport) => {
                    let retries = {
                        let mut state = self.lock();
                        state.transport = Arc::clone(&transport);
                        state.failover.retries()
                    };
                    tracing::info!(from = %error.origin, to = %next, retries, "failing over");
                    if let Some(m) = &self.metrics {
                        m.record_failover(error.origin, next);
                    }
                    transport.connect();
                    return;
                }
                Err(e) => {
                    tracing::error!(transport = %next, error = %e, "cannot create transport");
                }
            }
        }
    }

    fn exhausted(&self) {
        if let Some(m) = &self.metrics {
            let kind = self.lock().transport.name();
            m.update_transport_state(kind, TransportState::Exhausted);
        }
        tracing::error!(
            max = self.config.max_reconnect_attempts,
            "all transports exhausted, giving up"
        );
        if let Some(hook) = &self.on_exhausted {
            hook();
        }
    }

    fn on_focus(&self) {
        let transport = {
            let state = self.lock();
            if state.close_was_clean || state.failover.is_exhausted() {
                return;
            }
            Arc::clone(&state.transport)
        };
        tracing::debug!("focus regained, checking connection");
        transport.connect();
    }
}

fn transport_context(
    weak: &Weak<Inner>,
    config: &Arc<ClientConfig>,
    credentials: &SessionCredentials,
    metrics: &Option<Arc<ClientMetrics>>,
) -> TransportContext {
    let on_message = {
        let weak = weak.clone();
        Arc::new(move |msg: ChannelMessage| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_message(msg);
            }
        })
    };
    let on_error = {
        let weak = weak.clone();
        Arc::new(move |error: TransportError| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_error(error);
            }
        })
    };
    TransportContext {
        config: Arc::clone(config),
        credentials: credentials.clone(),
        on_message,
        on_error,
        metrics: metrics.clone(),
    }
}

// Placeholder installed only while construction fails
struct Unavailable(TransportKind);

impl Transport for Unavailable {
    fn connect(&self) {}

    fn disconnect(&self) {}

    fn name(&self) -> TransportKind {
        self.0
    }

    fn connected(&self) -> bool {
        false
    }

    fn send(&self, _text: &str) {}
}
