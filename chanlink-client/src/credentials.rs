//! Session credentials
//!
//! The channel token is the only piece of session state shared between the
//! façade and whichever transport is active. [`SessionCredentials`] is a cheap
//! clonable handle to one token cell: every clone observes the latest value,
//! and rotation goes through the single [`rotate`](SessionCredentials::rotate)
//! setter.

use std::fmt;
use std::sync::{Arc, RwLock};

/// Shared, rotatable channel token
#[derive(Clone)]
pub struct SessionCredentials {
    token: Arc<RwLock<String>>,
}

impl SessionCredentials {
    /// Create a cell holding the initial channel secret
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Arc::new(RwLock::new(token.into())),
        }
    }

    /// The current token
    pub fn token(&self) -> String {
        match self.token.read() {
            Ok(token) => token.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the token; returns `true` if the value changed
    pub fn rotate(&self, token: impl Into<String>) -> bool {
        let token = token.into();
        let mut guard = match self.token.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *guard == token {
            return false;
        }
        *guard = token;
        tracing::debug!("channel token rotated");
        true
    }

    /// `Authorization` header value for the current token
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token())
    }
}

// Keep tokens out of logs
impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("token", &"<redacted>")
            .finish()
    }
}
