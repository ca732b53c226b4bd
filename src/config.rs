//! Provider configuration
//!
//! Raw [`Settings`] are layered from several sources in priority order:
//! 1. Command-line arguments (highest)
//! 2. Environment variables (`LLM_*`)
//! 3. Config file (`[provider]` table)
//! 4. Default values (lowest)
//!
//! [`ProviderConfig::resolve`] turns the merged settings into the immutable
//! configuration one gateway runs with.

use crate::provider::{detect_provider, ProviderId, WireFormat};
use crate::{Error, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use std::str::FromStr;

const DEFAULT_MAX_TOKENS: u32 = 500;
const DEFAULT_TEMPERATURE: f32 = 0.2;
const DEFAULT_CONTEXT_COUNT: usize = 5;

/// Credential sent to local providers that do not check keys
const LOCAL_PLACEHOLDER_KEY: &str = "none";

/// Path appended to a bare Gemini host
const GEMINI_STREAM_PATH: &str = "/v1/models/{model}:streamGenerateContent";

/// Unresolved settings as read from a config file, the environment or flags.
///
/// Every field is optional so that layers can be merged with [`Settings::or`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Provider identifier (`openai`, `gemini`, ...)
    #[serde(alias = "provider")]
    pub id: Option<String>,

    /// Endpoint URL override
    pub url: Option<String>,

    /// Model name override
    pub model: Option<String>,

    /// API key
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,

    /// Number of search results rendered into the grounding context
    pub context_count: Option<usize>,

    /// Explicit token-signing secret
    #[serde(skip_serializing)]
    pub secret: Option<String>,

    /// Forward proxy URL
    pub proxy: Option<String>,
}

impl Settings {
    /// Read settings from `LLM_*` environment variables.
    ///
    /// - `LLM_PROVIDER`, `LLM_URL`, `LLM_MODEL`, `LLM_KEY`
    /// - `LLM_MAX_TOKENS`, `LLM_TEMPERATURE`, `LLM_CONTEXT_COUNT`
    /// - `LLM_SECRET`, or the older `SXNG_LLM_SECRET`
    ///
    /// The proxy is not read here; it depends on the endpoint scheme and is
    /// picked up by [`ProviderConfig::resolve`].
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Settings::from_env`] with an injectable variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Settings {
            id: lookup("LLM_PROVIDER"),
            url: lookup("LLM_URL"),
            model: lookup("LLM_MODEL"),
            api_key: lookup("LLM_KEY"),
            max_tokens: parse_var(&lookup, "LLM_MAX_TOKENS"),
            temperature: parse_var(&lookup, "LLM_TEMPERATURE"),
            context_count: parse_var(&lookup, "LLM_CONTEXT_COUNT"),
            secret: lookup("LLM_SECRET").or_else(|| lookup("SXNG_LLM_SECRET")),
            proxy: None,
        }
    }

    /// Fill every unset field of `self` from `fallback`.
    pub fn or(self, fallback: Settings) -> Settings {
        Settings {
            id: self.id.or(fallback.id),
            url: self.url.or(fallback.url),
            model: self.model.or(fallback.model),
            api_key: self.api_key.or(fallback.api_key),
            max_tokens: self.max_tokens.or(fallback.max_tokens),
            temperature: self.temperature.or(fallback.temperature),
            context_count: self.context_count.or(fallback.context_count),
            secret: self.secret.or(fallback.secret),
            proxy: self.proxy.or(fallback.proxy),
        }
    }
}

/// Parse a numeric variable, falling back to the default on garbage.
fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring invalid {}={:?}, using default", key, raw);
            None
        }
    }
}

/// Trimmed value, `None` when empty
fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Sampling parameters sent upstream
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        SamplingParams {
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

/// Resolved configuration for the single upstream provider
#[derive(Debug, Clone, Serialize)]
pub struct ProviderConfig {
    /// Provider identifier
    pub provider: ProviderId,

    /// Full endpoint URL
    pub endpoint_url: String,

    /// Model name
    pub model: String,

    /// API key
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Sampling parameters
    pub sampling: SamplingParams,

    /// Number of search results rendered into the grounding context
    pub context_count: usize,

    /// Forward proxy URL
    pub proxy: Option<String>,
}

impl ProviderConfig {
    /// Resolve settings into a provider configuration.
    ///
    /// Returns [`Error::Unconfigured`] when neither a provider nor an
    /// endpoint URL is set, or when the provider has no default endpoint
    /// and none was given. A missing API key is not an error here; the
    /// gateway reports it as unconfigured at request time.
    pub fn resolve(settings: &Settings) -> Result<Self> {
        Self::resolve_with_env(settings, |key| std::env::var(key).ok())
    }

    /// Same as [`ProviderConfig::resolve`] with an injectable lookup for the
    /// proxy variables.
    pub fn resolve_with_env(
        settings: &Settings,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let url_override = non_empty(&settings.url);

        let raw_id = non_empty(&settings.id).or_else(|| {
            url_override
                .as_deref()
                .and_then(detect_provider)
                .map(|id| id.as_str().to_string())
        });
        let Some(raw_id) = raw_id else {
            return Err(Error::Unconfigured("no provider configured".to_string()));
        };

        let provider = ProviderId::resolve(&raw_id);
        let preset = provider.preset();

        let model = non_empty(&settings.model).unwrap_or_else(|| preset.model.to_string());

        let api_key = non_empty(&settings.api_key).or_else(|| {
            provider
                .is_local()
                .then(|| LOCAL_PLACEHOLDER_KEY.to_string())
        });

        let raw_url = match url_override {
            Some(url) => url.replace("{model}", &model),
            None => preset.endpoint(&model).ok_or_else(|| {
                Error::Unconfigured(format!("provider '{}' requires an endpoint URL", provider))
            })?,
        };
        let url = normalize_url(&raw_url, provider, &model)?;

        if url.scheme() != "https" && !is_loopback(&url) {
            tracing::warn!(
                "Plain HTTP endpoint on non-loopback host {}; credentials may be exposed",
                url.host_str().unwrap_or("?")
            );
        }

        let proxy = non_empty(&settings.proxy).or_else(|| {
            let (upper, lower) = if url.scheme() == "https" {
                ("HTTPS_PROXY", "https_proxy")
            } else {
                ("HTTP_PROXY", "http_proxy")
            };
            non_empty(&lookup(upper)).or_else(|| non_empty(&lookup(lower)))
        });

        let sampling = SamplingParams {
            max_tokens: settings.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: settings.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        };

        Ok(ProviderConfig {
            provider,
            endpoint_url: url.to_string(),
            model,
            api_key,
            sampling,
            context_count: settings.context_count.unwrap_or(DEFAULT_CONTEXT_COUNT),
            proxy,
        })
    }

    /// Streaming framing of the configured provider
    pub fn wire_format(&self) -> WireFormat {
        self.provider.wire_format()
    }

    /// True for OpenAI-compatible providers
    pub fn uses_event_stream_framing(&self) -> bool {
        self.wire_format() == WireFormat::EventStream
    }

    /// Get the API key, if any
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    /// Endpoint host, safe to log
    pub fn endpoint_host(&self) -> String {
        Url::parse(&self.endpoint_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "localhost".to_string())
    }
}

/// Add a missing scheme and, for Gemini, the streaming path on a bare host.
fn normalize_url(raw: &str, provider: ProviderId, model: &str) -> Result<Url> {
    let with_scheme = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{}", raw)
    };

    let mut url = Url::parse(&with_scheme)
        .map_err(|e| Error::Config(format!("invalid endpoint URL '{}': {}", raw, e)))?;

    if provider == ProviderId::Gemini && matches!(url.path(), "" | "/") {
        url.set_path(&GEMINI_STREAM_PATH.replace("{model}", model));
    }

    Ok(url)
}

fn is_loopback(url: &Url) -> bool {
    match url.host_str() {
        Some("localhost") => true,
        Some(host) => host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false),
        None => false,
    }
}

/// Resolve the token-signing secret.
///
/// An explicit secret wins; otherwise the secret is the hex SHA-256 of the
/// API key. Without either the gateway stays inert.
pub fn resolve_secret(explicit: Option<&str>, api_key: Option<&str>) -> Option<String> {
    if let Some(secret) = explicit.map(str::trim).filter(|s| !s.is_empty()) {
        return Some(secret.to_string());
    }
    api_key
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(|k| hex::encode(Sha256::digest(k.as_bytes())))
}
