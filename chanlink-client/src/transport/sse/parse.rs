//! Incremental `text/event-stream` parser
//!
//! Bytes arrive in arbitrary chunks; [`EventStreamParser::feed`] buffers
//! partial lines (including UTF-8 sequences split across chunks) and returns
//! every event completed by the chunk.
//!
//! Rules followed:
//!
//! - Lines end with `\n` or `\r\n`
//! - A blank line dispatches the pending event, if it has data
//! - Lines starting with `:` are comments
//! - `field: value` loses one leading space in the value; a line without a
//!   colon is a field with an empty value
//! - Multiple `data` lines are joined with `\n`

/// One dispatched server-sent event
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    /// `event` field, if sent
    pub event: Option<String>,
    /// Joined `data` lines
    pub data: String,
    /// `id` field, if sent
    pub id: Option<String>,
}

/// Stateful line parser for one response body
#[derive(Debug, Default)]
pub struct EventStreamParser {
    buffer: Vec<u8>,
    data: Vec<String>,
    event: Option<String>,
    id: Option<String>,
}

impl EventStreamParser {
    /// Create a parser for a new response body
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk and return the events it completed
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut dispatched = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.process_line(&line) {
                dispatched.push(event);
            }
        }
        dispatched
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            "id" if !value.contains('\0') => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event,
            data,
            id: self.id.clone(),
        })
    }
}
