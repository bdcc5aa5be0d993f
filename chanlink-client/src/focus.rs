//! Focus notifications
//!
//! Interactive hosts can tell the client when the application regains focus,
//! so a connection lost in the background is re-established right away. The
//! capability is optional: a client built without a [`FocusSource`] simply
//! never reconnects on focus.

use std::sync::{Arc, Mutex};

/// Callback run when the host regains focus
pub type FocusHandler = Arc<dyn Fn() + Send + Sync>;

/// A source of "application regained focus" notifications
pub trait FocusSource: Send + Sync {
    /// Run `handler` on every future focus notification
    fn subscribe(&self, handler: FocusHandler);
}

/// Focus source driven by explicit [`notify_focus`](ManualFocus::notify_focus) calls
#[derive(Clone, Default)]
pub struct ManualFocus {
    handlers: Arc<Mutex<Vec<FocusHandler>>>,
}

impl ManualFocus {
    /// Create a source with no handlers
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every subscribed handler
    pub fn notify_focus(&self) {
        let handlers = match self.handlers.lock() {
            Ok(handlers) => handlers.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        tracing::debug!(handlers = handlers.len(), "focus regained");
        for handler in handlers {
            handler();
        }
    }

    /// Number of subscribed handlers
    pub fn handler_count(&self) -> usize {
        self.handlers.lock().map(|h| h.len()).unwrap_or(0)
    }
}

impl FocusSource for ManualFocus {
    fn subscribe(&self, handler: FocusHandler) {
        if let Ok(mut handlers) = self.handlers.lock() {
            handlers.push(handler);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_notify_runs_handlers() {
        let focus = ManualFocus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let hits = Arc::clone(&hits);
            focus.subscribe(Arc::new(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            }));
        }

        focus.notify_focus();
        focus.clone().notify_focus();
        assert_eq!(hits.load(Ordering::SeqCst), 4);
        assert_eq!(focus.handler_count(), 2);
    }
}
