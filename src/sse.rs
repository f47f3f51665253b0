//! SSE line codec
//!
//! Encoding and incremental decoding of the Server-Sent-Events wire
//! format. This module knows nothing about HTTP; the server adapter
//! and the probe client both frame through it.

/// A single SSE event: optional event name plus payload text.
///
/// A missing name means the default `message` event on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub name: Option<String>,
    pub data: String,
}

impl SseEvent {
    /// Event with an explicit name
    pub fn named(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            data: data.into(),
        }
    }

    /// Default `message` event
    pub fn message(data: impl Into<String>) -> Self {
        Self {
            name: None,
            data: data.into(),
        }
    }

    /// Effective event name, defaulting to `message`
    pub fn effective_name(&self) -> &str {
        self.name.as_deref().unwrap_or("message")
    }
}

/// Encode an event as wire bytes: `event:` line if named, one `data:`
/// line per payload line, blank-line terminator.
pub fn encode(event: &SseEvent) -> String {
    let mut out = String::new();
    if let Some(name) = &event.name {
        out.push_str("event: ");
        out.push_str(name);
        out.push('\n');
    }
    for line in event.data.split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    out
}

/// Encode a comment frame (heartbeat). Decoders drop these.
pub fn encode_comment(text: &str) -> String {
    format!(": {}\n\n", text)
}

/// Incremental SSE decoder, fed one line at a time.
///
/// Restartable only at stream start; there is no mid-stream resume.
#[derive(Debug, Default)]
pub struct SseDecoder {
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line (without its trailing newline). Returns a
    /// dispatched event when the line was the blank terminator of a
    /// non-empty accumulation.
    pub fn push_line(&mut self, line: &str) -> Option<SseEvent> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            if self.event.is_none() && self.data.is_empty() {
                return None;
            }
            let event = SseEvent {
                name: self.event.take(),
                data: std::mem::take(&mut self.data).join("\n"),
            };
            return Some(event);
        }

        // Comment / heartbeat lines never touch the accumulator.
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            // A line with no colon is a field name with an empty value.
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // Unknown fields (id, retry, ...) are ignored for
            // forward compatibility.
            _ => {}
        }

        None
    }
}

/// Byte-chunk decoder for streaming bodies: buffers partial lines
/// across chunk boundaries and feeds complete lines to [`SseDecoder`].
#[derive(Debug, Default)]
pub struct SseStreamDecoder {
    decoder: SseDecoder,
    buffer: String,
}

impl SseStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of body bytes, returning every event completed by
    /// it. Bytes that are not valid UTF-8 are replaced, not fatal.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            if let Some(event) = self.decoder.push_line(line.trim_end_matches('\n')) {
                events.push(event);
            }
        }
        events
    }
}
