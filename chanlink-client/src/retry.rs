//! Retry scheduling
//!
//! [`RetryTimer`] owns the retry count and at most one pending timer. Each
//! [`schedule`](RetryTimer::schedule) arms a timer for the next backoff delay
//! and fires the retry callback when it elapses. Once the attempt ceiling is
//! reached, further calls notify the limit-reached callback, exactly once
//! until the next [`reset`](RetryTimer::reset).
//!
//! Callers reset the timer on every successful (re)authentication and on user
//! disconnect; reset also cancels a pending timer.

use crate::backoff::{ExponentialBackoff, ReconnectionStrategy};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Callback fired by the retry timer
pub type RetryCallback = Arc<dyn Fn() + Send + Sync>;

/// Outcome of a [`RetryTimer::schedule`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheduled {
    /// A retry will fire after the delay
    After(Duration),
    /// The ceiling was reached; the limit callback has been notified
    LimitReached,
}

/// Bounded retry scheduler with a single pending timer
pub struct RetryTimer {
    strategy: Box<dyn ReconnectionStrategy>,
    max_retries: u32,
    tries: u32,
    limit_notified: bool,
    pending: Option<JoinHandle<()>>,
    on_retry: RetryCallback,
    on_limit: RetryCallback,
}

impl RetryTimer {
    /// Create a timer using exponential backoff from `initial` with jitter
    pub fn new(
        initial: Duration,
        max_delay: Duration,
        max_retries: u32,
        on_retry: RetryCallback,
        on_limit: RetryCallback,
    ) -> Self {
        let strategy = ExponentialBackoff::new(initial, max_delay).with_jitter();
        Self::with_strategy(Box::new(strategy), max_retries, on_retry, on_limit)
    }

    /// Create a timer with an explicit delay strategy
    pub fn with_strategy(
        strategy: Box<dyn ReconnectionStrategy>,
        max_retries: u32,
        on_retry: RetryCallback,
        on_limit: RetryCallback,
    ) -> Self {
        Self {
            strategy,
            max_retries,
            tries: 0,
            limit_notified: false,
            pending: None,
            on_retry,
            on_limit,
        }
    }

    /// Arm the next retry, or report the ceiling
    ///
    /// Must be called from within a Tokio runtime.
    pub fn schedule(&mut self) -> Scheduled {
        let delay = if self.tries < self.max_retries {
            self.strategy.next_delay(self.tries)
        } else {
            None
        };

        let Some(delay) = delay else {
            if !self.limit_notified {
                self.limit_notified = true;
                tracing::warn!(tries = self.tries, "retry limit reached");
                (self.on_limit)();
            }
            return Scheduled::LimitReached;
        };

        self.tries += 1;
        self.cancel_pending();
        tracing::debug!(
            delay_ms = delay.as_millis() as u64,
            attempt = self.tries,
            max = self.max_retries,
            "scheduling retry"
        );

        let callback = Arc::clone(&self.on_retry);
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        }));
        Scheduled::After(delay)
    }

    /// Cancel any pending retry and start counting from zero
    pub fn reset(&mut self) {
        self.cancel_pending();
        self.tries = 0;
        self.limit_notified = false;
    }

    /// Retries scheduled since the last reset
    pub fn tries(&self) -> u32 {
        self.tries
    }

    /// Whether a retry timer is armed and has not fired yet
    pub fn is_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn cancel_pending(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

impl Drop for RetryTimer {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}
