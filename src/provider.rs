//! Provider registry: presets, detection and wire-format selection

use serde::{Deserialize, Serialize};

/// Placeholder in URL templates replaced by the effective model name
const MODEL_PLACEHOLDER: &str = "{model}";

/// Known upstream providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    OpenAI,
    OpenRouter,
    Ollama,
    LocalAI,
    LmStudio,
    /// Google Generative Language API (concatenated JSON streaming)
    Gemini,
    /// Azure OpenAI; has no default endpoint
    Azure,
    HuggingFace,
}

/// How a provider frames its streaming response body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// `data: <json>` lines terminated by `data: [DONE]`
    EventStream,
    /// JSON documents written back to back with no framing
    ConcatenatedJson,
}

/// Default endpoint and model for a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderPreset {
    /// Endpoint URL template, may contain `{model}`
    pub url: Option<&'static str>,
    /// Default model name
    pub model: &'static str,
}

impl ProviderPreset {
    /// Endpoint URL with the model placeholder interpolated
    pub fn endpoint(&self, model: &str) -> Option<String> {
        self.url.map(|url| url.replace(MODEL_PLACEHOLDER, model))
    }
}

impl ProviderId {
    pub const ALL: [ProviderId; 8] = [
        ProviderId::OpenAI,
        ProviderId::OpenRouter,
        ProviderId::Ollama,
        ProviderId::LocalAI,
        ProviderId::LmStudio,
        ProviderId::Gemini,
        ProviderId::Azure,
        ProviderId::HuggingFace,
    ];

    /// Get the config key for this provider
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenAI => "openai",
            ProviderId::OpenRouter => "openrouter",
            ProviderId::Ollama => "ollama",
            ProviderId::LocalAI => "localai",
            ProviderId::LmStudio => "lmstudio",
            ProviderId::Gemini => "gemini",
            ProviderId::Azure => "azure",
            ProviderId::HuggingFace => "huggingface",
        }
    }

    /// Look up a provider by its config key (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        let key = s.trim().to_lowercase();
        Self::ALL.into_iter().find(|id| id.as_str() == key)
    }

    /// Resolve a configured identifier, falling back to the OpenAI-compatible
    /// preset for identifiers this build does not know about.
    pub fn resolve(s: &str) -> Self {
        Self::parse(s).unwrap_or_else(|| {
            tracing::warn!(
                "Unknown provider '{}', treating it as OpenAI-compatible",
                s.trim()
            );
            ProviderId::OpenAI
        })
    }

    /// Default endpoint and model
    pub fn preset(&self) -> ProviderPreset {
        let (url, model) = match self {
            ProviderId::OpenAI => (
                Some("https://api.openai.com/v1/chat/completions"),
                "gpt-4o-mini",
            ),
            ProviderId::OpenRouter => (
                Some("https://openrouter.ai/api/v1/chat/completions"),
                "google/gemma-3-27b-it:free",
            ),
            ProviderId::Ollama => (Some("http://localhost:11434/v1/chat/completions"), "llama3.2"),
            ProviderId::LocalAI => (Some("http://localhost:8080/v1/chat/completions"), "gpt-4"),
            ProviderId::LmStudio => (
                Some("http://localhost:1234/v1/chat/completions"),
                "local-model",
            ),
            ProviderId::Gemini => (
                Some("https://generativelanguage.googleapis.com/v1/models/{model}:streamGenerateContent"),
                "gemma-3-27b-it",
            ),
            ProviderId::Azure => (None, "azure-deployment"),
            ProviderId::HuggingFace => (
                Some("https://api-inference.huggingface.co/models/{model}/v1/chat/completions"),
                "meta-llama/Meta-Llama-3-8B-Instruct",
            ),
        };
        ProviderPreset { url, model }
    }

    /// Streaming framing used by this provider
    pub fn wire_format(&self) -> WireFormat {
        match self {
            ProviderId::Gemini => WireFormat::ConcatenatedJson,
            _ => WireFormat::EventStream,
        }
    }

    /// Providers that usually run on the local machine without a key
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            ProviderId::Ollama | ProviderId::LocalAI | ProviderId::LmStudio
        )
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Guess the provider from an endpoint URL when none is configured.
pub fn detect_provider(url: &str) -> Option<ProviderId> {
    let url = url.to_lowercase();
    if url.contains("openai.com") {
        Some(ProviderId::OpenAI)
    } else if url.contains("openrouter.ai") {
        Some(ProviderId::OpenRouter)
    } else if url.contains(":11434") {
        Some(ProviderId::Ollama)
    } else if url.contains("generativelanguage.googleapis.com") {
        Some(ProviderId::Gemini)
    } else {
        None
    }
}
