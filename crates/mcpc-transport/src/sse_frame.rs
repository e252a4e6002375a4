//! Server-Sent Events framing, shared between the legacy SSE transport and
//! Streamable HTTP's persistent SSE stream.
//!
//! A frame ends at the first blank line. `data:`/`event:`/`id:` lines
//! accumulate; multiple `data:` lines within one frame join with `\n`.

use bytes::BytesMut;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: Option<String>,
    pub id: Option<String>,
}

impl SseEvent {
    fn is_empty(&self) -> bool {
        self.event.is_none() && self.data.is_none() && self.id.is_none()
    }
}

/// Accumulates line-delimited SSE fields into complete events.
#[derive(Debug, Default)]
pub struct SseFrameParser {
    current: SseEvent,
    data_lines: Vec<String>,
}

impl SseFrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line (without its trailing newline). Returns a completed
    /// event when `line` is blank and at least one field had been
    /// accumulated; otherwise returns `None` and keeps accumulating.
    pub fn feed_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.flush();
        }
        if let Some(rest) = line.strip_prefix("data:") {
            self.data_lines.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
        } else if let Some(rest) = line.strip_prefix("event:") {
            self.current.event = Some(rest.strip_prefix(' ').unwrap_or(rest).to_string());
        } else if let Some(rest) = line.strip_prefix("id:") {
            self.current.id = Some(rest.strip_prefix(' ').unwrap_or(rest).to_string());
        }
        // Unknown field names (e.g. `retry:`) and comment lines (leading
        // `:`) are ignored per the SSE spec.
        None
    }

    fn flush(&mut self) -> Option<SseEvent> {
        if !self.data_lines.is_empty() {
            self.current.data = Some(self.data_lines.join("\n"));
        }
        let event = std::mem::take(&mut self.current);
        self.data_lines.clear();
        if event.is_empty() {
            None
        } else {
            Some(event)
        }
    }
}

/// Extracts complete lines from a growing byte buffer and feeds them to an
/// [`SseFrameParser`], so transports can accumulate raw HTTP chunk bytes
/// (which do not necessarily align on line boundaries) into full events.
#[derive(Debug, Default)]
pub struct SseByteAccumulator {
    buffer: BytesMut,
    parser: SseFrameParser,
}

impl SseByteAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return every complete event extracted so far.
    /// Partial trailing lines remain buffered for the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        loop {
            let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') else {
                break;
            };
            let mut line = self.buffer.split_to(pos + 1);
            line.truncate(line.len() - 1); // drop trailing \n
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            let line = match std::str::from_utf8(&line) {
                Ok(s) => s.to_string(),
                Err(_) => {
                    // Drop undecodable lines rather than fail the whole
                    // stream over one bad frame.
                    tracing::debug!("dropping non-UTF-8 SSE line");
                    continue;
                }
            };
            if let Some(event) = self.parser.feed_line(&line) {
                events.push(event);
            }
        }
        events
    }
}
