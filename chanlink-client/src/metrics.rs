//! OpenTelemetry instruments for the channel client
//!
//! # Metrics Collected
//!
//! - **transport.state**: state of the active transport (gauge, see
//!   [`TransportState`])
//! - **messages.received**: messages decoded by a transport
//! - **messages.delivered**: subscriber callbacks invoked
//! - **messages.duplicates**: messages suppressed by the dedup cache
//! - **messages.unmatched**: messages no subscription matched
//! - **reconnect.attempts**: reconnects scheduled by a transport
//! - **heartbeat.timeouts**: heartbeats that went unanswered
//! - **transport.failovers**: switches to the next configured transport
//! - **transport.errors**: fatal transport errors, by origin
//!
//! Every recording site takes an `Option<Arc<ClientMetrics>>`; nothing is
//! recorded unless the client was built with observability enabled.

use chanlink_core::TransportKind;
use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Meter},
    KeyValue,
};

/// Instrumentation scope name
pub const METER_NAME: &str = "chanlink-client";

/// Values reported by the transport state gauge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum TransportState {
    /// Not connected
    Disconnected = 0,
    /// Socket or stream opening
    Connecting = 1,
    /// Authenticated and receiving
    Active = 2,
    /// Waiting for a scheduled reconnect
    Reconnecting = 3,
    /// Every transport gave up
    Exhausted = 4,
}

/// Client metrics
pub struct ClientMetrics {
    /// Active transport state
    pub transport_state: Gauge<i64>,
    /// Messages decoded by transports
    pub messages_received: Counter<u64>,
    /// Subscriber callbacks invoked
    pub messages_delivered: Counter<u64>,
    /// Messages dropped as duplicates
    pub duplicates_suppressed: Counter<u64>,
    /// Messages without a matching subscription
    pub unmatched_messages: Counter<u64>,
    /// Reconnects scheduled
    pub reconnect_attempts: Counter<u64>,
    /// Heartbeats without acknowledgement
    pub heartbeat_timeouts: Counter<u64>,
    /// Transport failovers
    pub transport_failovers: Counter<u64>,
    /// Fatal transport errors
    pub transport_errors: Counter<u64>,
}

impl ClientMetrics {
    /// Instruments from the global meter provider
    pub fn new() -> Self {
        Self::new_with_meter(&global::meter(METER_NAME))
    }

    /// Instruments from an explicit meter
    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            transport_state: meter
                .i64_gauge("chanlink.client.transport.state")
                .with_description(
                    "Active transport state (0=disconnected, 1=connecting, 2=active, 3=reconnecting, 4=exhausted)",
                )
                .build(),
            messages_received: meter
                .u64_counter("chanlink.client.messages.received")
                .with_description("Messages decoded by a transport")
                .build(),
            messages_delivered: meter
                .u64_counter("chanlink.client.messages.delivered")
                .with_description("Subscriber callbacks invoked")
                .build(),
            duplicates_suppressed: meter
                .u64_counter("chanlink.client.messages.duplicates")
                .with_description("Messages suppressed by the dedup cache")
                .build(),
            unmatched_messages: meter
                .u64_counter("chanlink.client.messages.unmatched")
                .with_description("Messages no subscription matched")
                .build(),
            reconnect_attempts: meter
                .u64_counter("chanlink.client.reconnect.attempts")
                .with_description("Reconnects scheduled by a transport")
                .build(),
            heartbeat_timeouts: meter
                .u64_counter("chanlink.client.heartbeat.timeouts")
                .with_description("Heartbeats that went unanswered")
                .build(),
            transport_failovers: meter
                .u64_counter("chanlink.client.transport.failovers")
                .with_description("Switches to the next configured transport")
                .build(),
            transport_errors: meter
                .u64_counter("chanlink.client.transport.errors")
                .with_description("Fatal errors reported by transports")
                .build(),
        }
    }

    /// Record the state of a transport
    pub fn update_transport_state(&self, transport: TransportKind, state: TransportState) {
        self.transport_state
            .record(state as i64, &[transport_attr(transport)]);
    }

    /// Record a decoded message
    pub fn record_received(&self, transport: TransportKind) {
        self.messages_received.add(1, &[transport_attr(transport)]);
    }

    /// Record deliveries of one message
    pub fn record_delivered(&self, event: &str, subscribers: u64) {
        self.messages_delivered
            .add(subscribers, &[KeyValue::new("event", event.to_string())]);
    }

    /// Record a suppressed duplicate
    pub fn record_duplicate(&self) {
        self.duplicates_suppressed.add(1, &[]);
    }

    /// Record a message without subscribers
    pub fn record_unmatched(&self, event: &str) {
        self.unmatched_messages
            .add(1, &[KeyValue::new("event", event.to_string())]);
    }

    /// Record a scheduled reconnect
    pub fn record_reconnect_attempt(&self, transport: TransportKind) {
        self.reconnect_attempts.add(1, &[transport_attr(transport)]);
    }

    /// Record a missed heartbeat
    pub fn record_heartbeat_timeout(&self) {
        self.heartbeat_timeouts.add(1, &[]);
    }

    /// Record a failover between transports
    pub fn record_failover(&self, from: TransportKind, to: TransportKind) {
        self.transport_failovers.add(
            1,
            &[
                KeyValue::new("from", from.as_str()),
                KeyValue::new("to", to.as_str()),
            ],
        );
    }

    /// Record a fatal transport error
    pub fn record_transport_error(&self, origin: TransportKind) {
        self.transport_errors.add(1, &[transport_attr(origin)]);
    }
}

impl Default for ClientMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn transport_attr(transport: TransportKind) -> KeyValue {
    KeyValue::new("transport", transport.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_without_provider() {
        let metrics = ClientMetrics::new();

        metrics.update_transport_state(TransportKind::Ws, TransportState::Connecting);
        metrics.update_transport_state(TransportKind::Ws, TransportState::Active);
        metrics.record_received(TransportKind::Ws);
        metrics.record_delivered("person.registered", 2);
        metrics.record_duplicate();
        metrics.record_unmatched("orphan.event");
        metrics.record_reconnect_attempt(TransportKind::Sse);
        metrics.record_heartbeat_timeout();
        metrics.record_failover(TransportKind::Ws, TransportKind::Sse);
        metrics.record_transport_error(TransportKind::Ws);
    }

    #[test]
    fn test_instruments_from_sdk_provider() {
        use opentelemetry::metrics::MeterProvider;

        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder().build();
        let metrics = ClientMetrics::new_with_meter(&provider.meter(METER_NAME));
        metrics.record_failover(TransportKind::Ws, TransportKind::Sse);
        metrics.update_transport_state(TransportKind::Sse, TransportState::Exhausted);
        let _ = provider.shutdown();
    }

    #[test]
    fn test_state_values() {
        assert_eq!(TransportState::Disconnected as i64, 0);
        assert_eq!(TransportState::Active as i64, 2);
        assert_eq!(TransportState::Exhausted as i64, 4);
    }
}
