//! Streaming answer-synthesis gateway
//!
//! Turns a query plus grounding context into a live answer by calling one
//! upstream LLM endpoint and normalizing its streaming wire format into
//! ordered text deltas.
mod auth;
mod config;
pub mod decoder;
mod grounding;
mod prompt;
mod provider;
mod request;
mod transport;

#[cfg(feature = "gate")]
pub mod gate;

use thiserror::Error;

/// Result type for synth-gate operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for synth-gate operations
#[derive(Debug, Error)]
pub enum Error {
    /// Inbound auth token rejected
    #[error("authorization failed: {0}")]
    Auth(AuthFailure),

    /// No provider or credential configured; the gateway is inert
    #[error("gateway not configured: {0}")]
    Unconfigured(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Inbound request is missing something it needs
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Upstream answered with a non-2xx status
    #[error("upstream {provider} returned HTTP {status}")]
    UpstreamStatus { provider: String, status: u16 },

    /// Connection, timeout or mid-stream failure talking to the upstream
    #[error("transport error: {0}")]
    Transport(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub use auth::{AuthFailure, AuthToken, AuthTokenizer, TOKEN_TTL_SECS};
pub use config::{resolve_secret, ProviderConfig, SamplingParams, Settings};
pub use decoder::{create_decoder, StreamDecoder, TextDelta};
pub use grounding::{build_grounding, Grounding, SearchResult};
pub use prompt::{PromptAssembler, PromptInput, ANSWER_CLOSE_TAG, CONTINUE_QUERY};
pub use provider::{detect_provider, ProviderId, ProviderPreset, WireFormat};
pub use request::{build_request, HttpRequestSpec};
pub use transport::{drain, ChunkStream, HttpTransport, Transport, UpstreamResponse};
