//! Incremental `text/event-stream` decoder

/// One dispatched server-sent event
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    /// Value of the `event:` field, `None` for the default `message` type
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// Line-oriented decoder that accepts arbitrary chunk boundaries.
///
/// Bytes are buffered until a full line is available, so a chunk may end in
/// the middle of a field or even a multi-byte character.
#[derive(Debug, Default)]
pub struct SseDecoder {
    line_buf: Vec<u8>,
    event_name: Option<String>,
    data_buf: String,
    has_data: bool,
    last_id: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and collect every event completed by it
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                let mut line = std::mem::take(&mut self.line_buf);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                let line = String::from_utf8_lossy(&line).into_owned();
                if let Some(event) = self.process_line(&line) {
                    events.push(event);
                }
            } else {
                self.line_buf.push(byte);
            }
        }
        events
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
            "event" => self.event_name = Some(value.to_string()),
            "data" => {
                if self.has_data {
                    self.data_buf.push('\n');
                }
                self.data_buf.push_str(value);
                self.has_data = true;
            }
            "id" => self.last_id = Some(value.to_string()),
            // reconnection timing is owned by the caller
            "retry" => {}
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event_name = self.event_name.take();
        if !self.has_data {
            return None;
        }
        self.has_data = false;
        Some(SseEvent {
            event: event_name,
            data: std::mem::take(&mut self.data_buf),
            id: self.last_id.clone(),
        })
    }
}
