//! Server-sent events decoding.
//!
//! Byte chunks from an HTTP body rarely line up with event boundaries, so the
//! decoder buffers partial lines (including partial UTF-8 sequences) until a
//! newline arrives.

/// A dispatched server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event:` field, if present
    pub event: Option<String>,
    /// The `data:` lines joined with newlines
    pub data: String,
}

impl SseEvent {
    /// Returns the event name, defaulting to `message`.
    #[must_use]
    pub fn name(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }
}

/// Incremental server-sent events decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk of bytes and returns every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(event) = self.process_line(line) {
                events.push(event);
            }
        }
        events
    }

    /// Flushes whatever is left once the body ends.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).into_owned();
            if let Some(event) = self.process_line(line.trim_end_matches('\r')) {
                return Some(event);
            }
        }
        self.dispatch()
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
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() && self.event.is_none() {
            return None;
        }

        let event = SseEvent {
            event: self.event.take(),
            data: self.data.join("\n"),
        };
        self.data.clear();
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_data_only_events() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: {\"a\":1}\n\ndata: [DONE]\n\n");

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].name(), "message");
        assert_eq!(events[0].data, "{\"a\":1}");
        assert_eq!(events[1].data, "[DONE]");
    }

    #[test]
    fn decodes_named_events() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"event: output\ndata: Hello\n\nevent: done\ndata: {}\n\n");

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].name(), "output");
        assert_eq!(events[0].data, "Hello");
        assert_eq!(events[1].name(), "done");
    }

    #[test]
    fn joins_multiple_data_lines() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"event: output\ndata: line one\ndata: line two\n\n");

        assert_eq!(events[0].data, "line one\nline two");
    }

    #[test]
    fn buffers_events_split_across_chunks() {
        let mut decoder = SseDecoder::new();

        assert!(decoder.push(b"event: out").is_empty());
        assert!(decoder.push(b"put\ndata: Hel").is_empty());
        let events = decoder.push(b"lo\r\n\r\n");

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name(), "output");
        assert_eq!(events[0].data, "Hello");
    }

    #[test]
    fn keeps_multibyte_characters_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        let bytes = "data: caf\u{e9}\n\n".as_bytes();
        let split = bytes.len() - 3;

        assert!(decoder.push(&bytes[..split]).is_empty());
        let events = decoder.push(&bytes[split..]);

        assert_eq!(events[0].data, "caf\u{e9}");
    }

    #[test]
    fn ignores_comments_and_unknown_fields() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b": keep-alive\nid: 7\nretry: 100\ndata: x\n\n");

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: done\ndata: {}").is_empty());

        let event = decoder.finish().unwrap();
        assert_eq!(event.name(), "done");
        assert_eq!(event.data, "{}");
        assert!(decoder.finish().is_none());
    }
}
