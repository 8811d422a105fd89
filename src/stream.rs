//! Line framing for streamed answers.
//!
//! The proxy relays the search service's stream verbatim. Each line is either
//! `data: <payload>` or a bare payload; a payload of `[DONE]` ends the
//! stream. Payloads are JSON objects carrying a `response` fragment, or plain
//! text when they don't parse.

use serde_json::Value;

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Done,
    Text(String),
}

/// Interpret one complete line. Blank lines and JSON payloads without a
/// usable `response` fragment yield `None`.
///
/// A bare `null` payload is appended as the text `null`; a numeric or `true`
/// fragment is appended in its printed form.
pub fn parse_line(line: &str) -> Option<StreamEvent> {
    if line.trim().is_empty() {
        return None;
    }

    let payload = line.strip_prefix(DATA_PREFIX).unwrap_or(line);
    if payload == DONE_SENTINEL {
        return Some(StreamEvent::Done);
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Null) => Some(StreamEvent::Text(payload.to_string())),
        Ok(value) => value.get("response").and_then(fragment_text).map(StreamEvent::Text),
        Err(_) => Some(StreamEvent::Text(payload.to_string())),
    }
}

/// Text appended for a `response` value. Empty, zero and `false` add nothing.
fn fragment_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64().is_some_and(|f| f != 0.0) => Some(n.to_string()),
        Value::Bool(true) => Some("true".to_string()),
        _ => None,
    }
}

/// Splits a chunked byte stream into lines.
///
/// Lines are split on raw `\n` bytes before decoding, so multi-byte UTF-8
/// sequences cut across chunk boundaries are reassembled intact.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0usize;
        while let Some(offset) = self.pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            lines.push(decode_line(&self.pending[start..end]));
            start = end + 1;
        }
        self.pending.drain(..start);
        lines
    }

    /// Remaining bytes with no terminating newline.
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let bytes = std::mem::take(&mut self.pending);
        Some(decode_line(&bytes))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Progress {
    pub changed: bool,
    pub done: bool,
}

/// Accumulates the answer text of one streamed search.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    lines: LineBuffer,
    answer: String,
    done: bool,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(&self) -> &str {
        &self.answer
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn push(&mut self, chunk: &[u8]) -> Progress {
        if self.done {
            return Progress { changed: false, done: true };
        }
        let lines = self.lines.push(chunk);
        self.apply(lines)
    }

    /// Flush a final line that arrived without a trailing newline.
    pub fn finish(&mut self) -> Progress {
        if self.done {
            return Progress { changed: false, done: true };
        }
        let rest = self.lines.take_remainder().into_iter().collect();
        let progress = self.apply(rest);
        self.done = true;
        Progress { changed: progress.changed, done: true }
    }

    pub fn into_answer(self) -> String {
        self.answer
    }

    fn apply(&mut self, lines: Vec<String>) -> Progress {
        let mut changed = false;
        for line in lines {
            match parse_line(&line) {
                Some(StreamEvent::Done) => {
                    self.done = true;
                    break;
                }
                Some(StreamEvent::Text(text)) => {
                    self.answer.push_str(&text);
                    changed = true;
                }
                None => {}
            }
        }
        Progress { changed, done: self.done }
    }
}
