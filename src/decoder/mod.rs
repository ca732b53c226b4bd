//! Incremental decoders from raw upstream chunks to text deltas
//!
//! Both wire formats share one [`StreamDecoder`] contract. A decoder is
//! created per response and dropped with it; nothing is pooled.

mod json;
mod sse;

pub use json::{extract_gemini_text, ConcatenatedJsonDecoder};
pub use sse::{extract_openai_text, EventStreamDecoder};

use crate::provider::WireFormat;

/// One ordered, append-only fragment of answer text
pub type TextDelta = String;

/// Turns arbitrarily fragmented body chunks into text deltas
pub trait StreamDecoder: Send {
    /// Consume one chunk and return every delta it completes.
    ///
    /// Empty chunks are ignored. Once [`is_done`](Self::is_done) reports
    /// true every further feed returns nothing.
    fn feed(&mut self, chunk: &[u8]) -> Vec<TextDelta>;

    /// Signal end of input and flush whatever can still be decoded.
    fn finish(&mut self) -> Vec<TextDelta>;

    /// True once an in-band end marker was seen
    fn is_done(&self) -> bool;

    /// Units dropped as undecodable so far
    fn dropped(&self) -> usize;
}

/// Pick the decoder for a provider's wire format
pub fn create_decoder(format: WireFormat) -> Box<dyn StreamDecoder> {
    match format {
        WireFormat::EventStream => Box::new(EventStreamDecoder::new()),
        WireFormat::ConcatenatedJson => Box::new(ConcatenatedJsonDecoder::new()),
    }
}
