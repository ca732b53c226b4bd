//! Provider-specific upstream request construction

use crate::config::{ProviderConfig, SamplingParams};
use crate::prompt::ANSWER_CLOSE_TAG;
use crate::provider::{ProviderId, WireFormat};
use crate::{Error, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use serde::Serialize;

/// Attribution headers understood by OpenRouter
const REFERER: &str = "https://github.com/synth-gate/synth-gate";
const TITLE: &str = "synth-gate";

/// Everything needed to send one upstream request
#[derive(Debug, Clone)]
pub struct HttpRequestSpec {
    pub method: Method,
    pub url: String,
    /// Credential headers are marked sensitive
    pub headers: HeaderMap,
    pub body: serde_json::Value,
}

/// Build the upstream request for `config` carrying `prompt`.
pub fn build_request(
    config: &ProviderConfig,
    prompt: &str,
    sampling: &SamplingParams,
) -> Result<HttpRequestSpec> {
    let api_key = config
        .api_key()
        .ok_or_else(|| Error::Unconfigured(format!("no API key for {}", config.provider)))?;

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let body = match config.wire_format() {
        WireFormat::EventStream => {
            headers.insert("http-referer", HeaderValue::from_static(REFERER));
            headers.insert("x-title", HeaderValue::from_static(TITLE));
            if config.provider == ProviderId::Azure {
                headers.insert("api-key", secret_value(api_key)?);
            } else {
                headers.insert(AUTHORIZATION, secret_value(&format!("Bearer {}", api_key))?);
            }
            serde_json::to_value(ChatRequest {
                model: &config.model,
                messages: vec![ChatMessage {
                    role: "user",
                    content: prompt,
                }],
                stream: true,
                max_tokens: sampling.max_tokens,
                temperature: sampling.temperature,
                stop: vec![ANSWER_CLOSE_TAG],
            })?
        }
        WireFormat::ConcatenatedJson => {
            headers.insert(HeaderName::from_static("x-goog-api-key"), secret_value(api_key)?);
            serde_json::to_value(GenerateContentRequest {
                contents: vec![Content {
                    parts: vec![Part { text: prompt }],
                }],
                generation_config: GenerationConfig {
                    max_output_tokens: sampling.max_tokens,
                    temperature: sampling.temperature,
                    stop_sequences: vec![ANSWER_CLOSE_TAG],
                },
            })?
        }
    };

    Ok(HttpRequestSpec {
        method: Method::POST,
        url: config.endpoint_url.clone(),
        headers,
        body,
    })
}

fn secret_value(value: &str) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(value)
        .map_err(|_| Error::Config("API key contains invalid header characters".to_string()))?;
    value.set_sensitive(true);
    Ok(value)
}

// OpenAI-compatible types

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    max_tokens: u32,
    temperature: f32,
    stop: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

// Gemini types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig<'a>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    max_output_tokens: u32,
    temperature: f32,
    stop_sequences: Vec<&'a str>,
}
