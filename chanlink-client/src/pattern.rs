//! Topic-style event patterns
//!
//! Event names are dot-separated segments. A subscription pattern is either
//! the exact event name or a template with segment wildcards:
//!
//! - `*` - Matches exactly one segment
//! - `#` - Matches one or more segments
//!
//! Wildcard patterns compile to an anchored regular expression once, at
//! registration. Literal text is escaped, so a `.` only ever separates
//! segments.
//!
//! # Examples
//!
//! ```rust
//! use chanlink_client::EventPattern;
//!
//! let pattern = EventPattern::new("quick.orange.*");
//! assert!(pattern.matches("quick.orange.rabbit"));
//! assert!(!pattern.matches("quick.white.male.bird"));
//!
//! let multi = EventPattern::new("quick.#.bird");
//! assert!(multi.matches("quick.white.male.bird"));
//! ```

use regex::Regex;
use std::fmt;

const ONE_SEGMENT: &str = "[^.]+";
const MANY_SEGMENTS: &str = r"([^.]+\.?)+";

/// A compiled subscription pattern
#[derive(Debug, Clone)]
pub enum EventPattern {
    /// No wildcards; plain string comparison
    Exact(String),
    /// Wildcard template and its compiled expression
    Wildcard {
        /// The pattern as registered
        pattern: String,
        /// Anchored expression; `None` if it failed to compile
        regex: Option<Regex>,
    },
}

impl EventPattern {
    /// Compile a pattern
    ///
    /// Never fails: a wildcard pattern whose expression does not compile only
    /// matches its own text.
    pub fn new(pattern: &str) -> Self {
        if !pattern.contains(['*', '#']) {
            return EventPattern::Exact(pattern.to_string());
        }

        let regex = match Regex::new(&Self::to_regex(pattern)) {
            Ok(regex) => Some(regex),
            Err(e) => {
                tracing::warn!(pattern, error = %e, "event pattern did not compile");
                None
            }
        };
        EventPattern::Wildcard {
            pattern: pattern.to_string(),
            regex,
        }
    }

    /// Whether `event` satisfies this pattern
    pub fn matches(&self, event: &str) -> bool {
        match self {
            EventPattern::Exact(exact) => exact == event,
            EventPattern::Wildcard { pattern, regex } => {
                pattern == event || regex.as_ref().is_some_and(|r| r.is_match(event))
            }
        }
    }

    /// The pattern as registered
    pub fn as_str(&self) -> &str {
        match self {
            EventPattern::Exact(p) | EventPattern::Wildcard { pattern: p, .. } => p,
        }
    }

    /// Whether the pattern contains wildcards
    pub fn is_wildcard(&self) -> bool {
        matches!(self, EventPattern::Wildcard { .. })
    }

    fn to_regex(pattern: &str) -> String {
        let mut out = String::with_capacity(pattern.len() * 2 + 2);
        out.push('^');
        let mut literal = String::new();
        for ch in pattern.chars() {
            match ch {
                '*' | '#' => {
                    out.push_str(&regex::escape(&literal));
                    literal.clear();
                    out.push_str(if ch == '*' { ONE_SEGMENT } else { MANY_SEGMENTS });
                }
                other => literal.push(other),
            }
        }
        out.push_str(&regex::escape(&literal));
        out.push('$');
        out
    }
}

impl fmt::Display for EventPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialEq for EventPattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for EventPattern {}
