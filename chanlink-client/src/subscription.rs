//! Subscription table
//!
//! Subscriptions pair an [`EventPattern`] with a callback. They are kept in
//! registration order, which is also the delivery order, and live as long as
//! the client. Patterns compile once when registered.

use crate::pattern::EventPattern;
use chanlink_core::ChannelMessage;
use std::sync::Arc;

/// Subscriber callback
pub type SubscriberFn = Arc<dyn Fn(ChannelMessage) + Send + Sync>;

/// One registered subscription
#[derive(Clone)]
pub struct Subscription {
    pattern: EventPattern,
    callback: SubscriberFn,
}

impl Subscription {
    /// The subscription's pattern
    pub fn pattern(&self) -> &EventPattern {
        &self.pattern
    }

    /// Invoke the callback
    pub fn deliver(&self, message: ChannelMessage) {
        (self.callback)(message)
    }
}

/// Ordered collection of subscriptions
#[derive(Clone, Default)]
pub struct SubscriptionTable {
    entries: Vec<Subscription>,
}

impl SubscriptionTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription
    pub fn register<F>(&mut self, pattern: &str, callback: F)
    where
        F: Fn(ChannelMessage) + Send + Sync + 'static,
    {
        self.entries.push(Subscription {
            pattern: EventPattern::new(pattern),
            callback: Arc::new(callback),
        });
    }

    /// Subscriptions whose pattern matches `event`, in registration order
    pub fn matching(&self, event: &str) -> Vec<Subscription> {
        self.entries
            .iter()
            .filter(|s| s.pattern.matches(event))
            .cloned()
            .collect()
    }

    /// Number of subscriptions
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is subscribed
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered patterns, in registration order
    pub fn patterns(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|s| s.pattern.as_str().to_string())
            .collect()
    }
}
