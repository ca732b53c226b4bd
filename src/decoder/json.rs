//! Concatenated-JSON decoder for the Gemini streaming endpoint
//!
//! The body is a run of JSON values written back to back with optional
//! whitespace between them and no other framing. A value is recognized
//! purely by parsing a complete one from the front of the buffer.

use super::{StreamDecoder, TextDelta};
use serde_json::Value;

/// Decodes back-to-back JSON documents as they complete.
#[derive(Debug, Default)]
pub struct ConcatenatedJsonDecoder {
    /// Bytes of a character split across chunks (at most three)
    pending: Vec<u8>,
    /// Decoded text holding at most one incomplete document
    buf: String,
    dropped: usize,
}

impl ConcatenatedJsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` to the text buffer, carrying an incomplete trailing
    /// character over to the next call.
    fn decode_utf8(&mut self, chunk: &[u8]) {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.buf.push_str(text);
                    return;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    self.buf.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            self.buf.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.pending = after.to_vec();
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Parse and consume every complete document at the front of the buffer
    fn drain_documents(&mut self) -> Vec<TextDelta> {
        let mut deltas = Vec::new();
        loop {
            let start = self.buf.len() - self.buf.trim_start().len();
            if start == self.buf.len() {
                self.buf.clear();
                break;
            }

            let mut values =
                serde_json::Deserializer::from_str(&self.buf[start..]).into_iter::<Value>();
            match values.next() {
                Some(Ok(value)) => {
                    let consumed = start + values.byte_offset();
                    collect_text(&value, &mut deltas);
                    self.buf.drain(..consumed);
                }
                Some(Err(e)) if e.is_eof() => {
                    // Incomplete document: keep it for the next feed
                    self.buf.drain(..start);
                    break;
                }
                Some(Err(e)) => {
                    self.dropped += 1;
                    tracing::warn!("Dropping malformed JSON in upstream stream: {}", e);
                    self.resync(start);
                }
                None => {
                    self.buf.clear();
                    break;
                }
            }
        }
        deltas
    }

    /// Skip past garbage to the next plausible document start
    fn resync(&mut self, start: usize) {
        let from = start + self.buf[start..].chars().next().map_or(1, char::len_utf8);
        let next = self.buf[from..]
            .find(['{', '['])
            .map(|offset| from + offset);
        match next {
            Some(pos) => {
                self.buf.drain(..pos);
            }
            None => self.buf.clear(),
        }
    }
}

fn collect_text(value: &Value, deltas: &mut Vec<TextDelta>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_text(item, deltas);
            }
        }
        other => {
            if let Some(error) = other.get("error") {
                tracing::warn!("Upstream reported an error in-stream: {}", error);
            }
            if let Some(text) = extract_gemini_text(other).filter(|t| !t.is_empty()) {
                deltas.push(text.to_string());
            }
        }
    }
}

impl StreamDecoder for ConcatenatedJsonDecoder {
    fn feed(&mut self, chunk: &[u8]) -> Vec<TextDelta> {
        if chunk.is_empty() {
            return Vec::new();
        }
        self.decode_utf8(chunk);
        self.drain_documents()
    }

    fn finish(&mut self) -> Vec<TextDelta> {
        if !self.buf.trim().is_empty() || !self.pending.is_empty() {
            tracing::debug!(
                "Discarding {} bytes of incomplete trailing JSON",
                self.buf.len() + self.pending.len()
            );
        }
        self.buf.clear();
        self.pending.clear();
        Vec::new()
    }

    fn is_done(&self) -> bool {
        // No in-band end marker; the stream ends when the body does
        false
    }

    fn dropped(&self) -> usize {
        self.dropped
    }
}

/// Text of the first candidate's first content part, if any.
///
/// Missing fields and non-string text read as no text.
pub fn extract_gemini_text(value: &Value) -> Option<&str> {
    value
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .get(0)?
        .get("text")?
        .as_str()
}
