//! Event-stream (`data: <json>` line) decoder for OpenAI-compatible providers

use super::{StreamDecoder, TextDelta};
use serde_json::Value;

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

/// Parsed event-stream line
enum SseLine {
    /// `data: [DONE]` stream terminator
    Done,
    /// `data: <json>` payload
    Data(String),
    /// Blank, comment, `event:` or other non-data line
    Skip,
}

impl SseLine {
    fn parse(raw: &[u8]) -> Self {
        // '\n' never occurs inside a multi-byte sequence, so a whole line
        // decodes on its own; only genuinely invalid bytes are replaced.
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end();
        match line.strip_prefix(DATA_PREFIX).map(str::trim) {
            Some(DONE_SENTINEL) => SseLine::Done,
            Some(payload) if !payload.is_empty() => SseLine::Data(payload.to_string()),
            _ => SseLine::Skip,
        }
    }
}

/// Accumulates bytes and decodes complete lines as they arrive.
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buf: Vec<u8>,
    done: bool,
    dropped: usize,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(4096),
            done: false,
            dropped: 0,
        }
    }

    /// Split off the next complete line, newline included
    fn next_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        Some(self.buf.drain(..=pos).collect())
    }

    fn decode_line(&mut self, raw: &[u8]) -> Option<TextDelta> {
        match SseLine::parse(raw) {
            SseLine::Done => {
                self.done = true;
                self.buf.clear();
                None
            }
            SseLine::Data(payload) => match serde_json::from_str::<Value>(&payload) {
                Ok(value) => {
                    if let Some(error) = value.get("error") {
                        tracing::warn!("Upstream reported an error in-stream: {}", error);
                    }
                    extract_openai_text(&value)
                        .filter(|text| !text.is_empty())
                        .map(str::to_string)
                }
                Err(e) => {
                    self.dropped += 1;
                    tracing::debug!("Dropping undecodable event-stream line: {}", e);
                    None
                }
            },
            SseLine::Skip => None,
        }
    }
}

impl StreamDecoder for EventStreamDecoder {
    fn feed(&mut self, chunk: &[u8]) -> Vec<TextDelta> {
        if self.done || chunk.is_empty() {
            return Vec::new();
        }
        self.buf.extend_from_slice(chunk);

        let mut deltas = Vec::new();
        while let Some(line) = self.next_line() {
            deltas.extend(self.decode_line(&line));
            if self.done {
                break;
            }
        }
        deltas
    }

    fn finish(&mut self) -> Vec<TextDelta> {
        if self.done || self.buf.is_empty() {
            return Vec::new();
        }
        // Some servers close without a trailing newline
        let rest = std::mem::take(&mut self.buf);
        self.decode_line(&rest).into_iter().collect()
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn dropped(&self) -> usize {
        self.dropped
    }
}

/// Text of the first choice's delta, if any.
///
/// Missing fields and non-string content read as no text.
pub fn extract_openai_text(value: &Value) -> Option<&str> {
    value
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
}
