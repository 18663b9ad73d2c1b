//! Server-sent events framing
//!
//! Splits a `text/event-stream` body into event payloads. Chunks may end
//! anywhere, including inside a line or a UTF-8 sequence, so bytes are
//! buffered until a full line arrives. Only `data:` fields are kept;
//! comment lines (the server's `: ping` keepalives) and the `event:`, `id:`
//! and `retry:` fields are skipped.

/// Incremental decoder for one event stream
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Bytes after the last complete line
    pending: Vec<u8>,
    /// `data:` lines of the event being read
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of the body; returns the payloads it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(end) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=end).collect();
            let line = &raw[..end];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if let Some(event) = self.line(&String::from_utf8_lossy(line)) {
                events.push(event);
            }
        }
        events
    }

    fn line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            // Blank line ends the event
            if self.data.is_empty() {
                return None;
            }
            let data = self.data.join("\n");
            self.data.clear();
            return Some(data);
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data.push(value.to_string());
        }
        None
    }
}
