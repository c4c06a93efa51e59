//! Token-delta event streams from the generation endpoint.
//!
//! The endpoint answers with lines of the form
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"The "}}]}
//! data: {"choices":[{"delta":{"content":"tide"}}]}
//! data: [DONE]
//! ```
//!
//! Chunks from the transport can split lines anywhere; the accumulator
//! buffers partial lines until their newline arrives.

use crate::error::Result;
use serde_json::Value;
use std::io::BufRead;

const DATA_PREFIX: &str = "data:";
const DONE_MARKER: &str = "[DONE]";

/// What one complete `data:` line meant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// A piece of generated text.
    Delta(String),
    /// The stream signalled completion.
    Done,
}

/// Incrementally decodes a `data:` event stream into text.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    pending: String,
    text: String,
    done: bool,
    skipped_lines: usize,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return the events completed by it. Input after
    /// `[DONE]` is ignored.
    pub fn feed(&mut self, chunk: &str) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }

        self.pending.push_str(chunk);
        while let Some(newline) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=newline).collect();
            if let Some(event) = self.handle_line(&line) {
                let finished = event == StreamEvent::Done;
                events.push(event);
                if finished {
                    self.pending.clear();
                    break;
                }
            }
        }
        events
    }

    /// Flush a trailing line without newline and return the full text.
    pub fn finish(mut self) -> String {
        if !self.done && !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.handle_line(&line);
        }
        if self.skipped_lines > 0 {
            tracing::debug!(skipped = self.skipped_lines, "ignored unparseable stream lines");
        }
        self.text
    }

    /// Text accumulated so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    fn handle_line(&mut self, line: &str) -> Option<StreamEvent> {
        let line = line.trim_end_matches(&['\r', '\n'][..]);
        let data = line.strip_prefix(DATA_PREFIX)?.trim_start();

        if data == DONE_MARKER {
            self.done = true;
            return Some(StreamEvent::Done);
        }
        if data.is_empty() {
            return None;
        }

        let value: Value = match serde_json::from_str(data) {
            Ok(value) => value,
            Err(e) => {
                self.skipped_lines += 1;
                tracing::debug!(error = %e, "skipping malformed stream line");
                return None;
            }
        };

        let delta = delta_text(&value)?;
        if delta.is_empty() {
            return None;
        }
        self.text.push_str(delta);
        Some(StreamEvent::Delta(delta.to_string()))
    }
}

/// Pull the text delta out of one event object.
fn delta_text(value: &Value) -> Option<&str> {
    value
        .pointer("/choices/0/delta/content")
        .or_else(|| value.pointer("/delta/text"))
        .or_else(|| value.get("content"))
        .and_then(Value::as_str)
}

/// Read a whole stream and return the generated text.
///
/// Bytes that are not valid UTF-8 are replaced rather than failing the
/// read; the damaged line then fails to parse and is skipped like any other
/// malformed line. Only reader errors are returned.
pub fn accumulate(mut reader: impl BufRead) -> Result<String> {
    let mut acc = StreamAccumulator::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        acc.feed(&String::from_utf8_lossy(&line));
        if acc.is_done() {
            break;
        }
    }
    Ok(acc.finish())
}
