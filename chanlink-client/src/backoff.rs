//! Backoff calculation for reconnection attempts
//!
//! A [`ReconnectionStrategy`] maps a zero-based attempt number to the delay
//! before that attempt, or `None` once the strategy gives up. The WebSocket
//! retry scheduler and the SSE driver both consult one.
//!
//! # Built-in Strategies
//!
//! - **ExponentialBackoff**: `initial * 2^attempt`, capped, with optional
//!   downward jitter (the default for both transports)
//! - **FixedDelay**: Constant delay between attempts
//!
//! # Examples
//!
//! ```rust
//! use chanlink_client::{ExponentialBackoff, ReconnectionStrategy};
//! use std::time::Duration;
//!
//! let backoff = ExponentialBackoff::new(Duration::from_millis(10), Duration::from_millis(6000));
//! assert_eq!(backoff.next_delay(0), Some(Duration::from_millis(10)));
//! assert_eq!(backoff.next_delay(11), Some(Duration::from_millis(6000)));
//! ```

use rand::Rng;
use std::time::Duration;

/// Upper bound applied by the default strategy
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(6000);

/// Default jitter factor: delays land in `[0.75 * d, d]`
pub const DEFAULT_JITTER: f64 = 0.25;

/// Computes the delay before each reconnection attempt
pub trait ReconnectionStrategy: Send + Sync {
    /// Delay before attempt `attempt` (0-indexed), `None` to give up
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

/// Delay for `attempt` without jitter: `initial * 2^attempt`, clamped to `max`
///
/// Saturates instead of overflowing for large attempt numbers.
pub fn calculate_backoff(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let initial_ms = initial.as_millis() as u64;
    let max_ms = max.as_millis() as u64;

    let delay_ms = 2u64
        .checked_pow(attempt)
        .and_then(|factor| initial_ms.checked_mul(factor))
        .unwrap_or(max_ms);

    Duration::from_millis(delay_ms.min(max_ms))
}

/// Pull `delay` down by a random share of at most `factor`
///
/// The result lies in `[delay - delay * factor, delay]`. A factor of zero
/// returns the delay unchanged.
pub fn apply_jitter(delay: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return delay;
    }
    let factor = factor.min(1.0);
    let base = delay.as_millis() as f64;
    let floor = base - base * factor;
    let jittered = floor + rand::thread_rng().gen::<f64>() * base * factor;
    Duration::from_millis(jittered.round() as u64)
}

/// Exponential backoff with a cap and optional jitter
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    max_attempts: Option<u32>,
    jitter: f64,
}

impl ExponentialBackoff {
    /// Create a strategy without jitter or attempt limit
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            max_attempts: None,
            jitter: 0.0,
        }
    }

    /// Give up after `max_attempts` attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Enable the default downward jitter
    pub fn with_jitter(self) -> Self {
        self.with_jitter_factor(DEFAULT_JITTER)
    }

    /// Enable jitter with an explicit factor in `0.0..=1.0`
    pub fn with_jitter_factor(mut self, factor: f64) -> Self {
        self.jitter = factor.clamp(0.0, 1.0);
        self
    }

    /// Configured attempt ceiling
    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(10), DEFAULT_MAX_DELAY)
            .with_max_attempts(10)
            .with_jitter()
    }
}

impl ReconnectionStrategy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if matches!(self.max_attempts, Some(max) if attempt >= max) {
            return None;
        }
        let delay = calculate_backoff(attempt, self.initial, self.max);
        Some(apply_jitter(delay, self.jitter))
    }
}

/// Constant delay between attempts
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
    max_attempts: Option<u32>,
}

impl FixedDelay {
    /// Create a fixed delay strategy without attempt limit
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    /// Give up after `max_attempts` attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl ReconnectionStrategy for FixedDelay {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if matches!(self.max_attempts, Some(max) if attempt >= max) {
            return None;
        }
        Some(self.delay)
    }
}
