//! Transport failover bookkeeping
//!
//! Tracks which entry of the configured transport list is active and how many
//! times the façade has moved on after a fatal error. The ceiling is
//! `max_reconnect_attempts`; once the counter passes it the client is
//! exhausted and stays put until a manual `connect()` resets it.
//!
//! # State Transitions
//!
//! ```text
//! Active(i) --fatal--> Active((i + 1) % n)   while retries <= ceiling
//!     |
//!     +-----fatal----> Exhausted(i)          once retries > ceiling
//! ```

use chanlink_core::TransportKind;

/// Outcome of [`FailoverState::advance`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverDecision {
    /// Instantiate and connect this transport
    Next(TransportKind),
    /// Ceiling passed; stop
    Exhausted,
}

/// Position in the transport list plus the failover counter
#[derive(Debug, Clone)]
pub struct FailoverState {
    transports: Vec<TransportKind>,
    index: usize,
    retries: u32,
    ceiling: u32,
    exhausted: bool,
}

impl FailoverState {
    /// Start at the head of `transports`
    ///
    /// An empty list falls back to `[ws, sse]`.
    pub fn new(transports: Vec<TransportKind>, ceiling: u32) -> Self {
        let transports = if transports.is_empty() {
            vec![TransportKind::Ws, TransportKind::Sse]
        } else {
            transports
        };
        Self {
            transports,
            index: 0,
            retries: 0,
            ceiling,
            exhausted: false,
        }
    }

    /// The transport at the current position
    pub fn current(&self) -> TransportKind {
        self.transports[self.index]
    }

    /// Failovers performed so far
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Whether the ceiling has been passed
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Record a fatal error on the current transport and move on
    pub fn advance(&mut self) -> FailoverDecision {
        if self.exhausted {
            return FailoverDecision::Exhausted;
        }
        self.retries += 1;
        if self.retries > self.ceiling {
            // the position stays on the transport that is still installed
            self.exhausted = true;
            return FailoverDecision::Exhausted;
        }
        self.index = (self.index + 1) % self.transports.len();
        FailoverDecision::Next(self.current())
    }

    /// Clear the counter and the exhausted flag, keeping the position
    pub fn reset(&mut self) {
        self.retries = 0;
        self.exhausted = false;
    }
}
