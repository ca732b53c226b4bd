//! Mock upstream servers for gateway tests
//!
//! wiremock-based stand-ins for an OpenAI-compatible endpoint and the Gemini
//! streaming endpoint, so the gateway can be exercised end to end offline.

#![allow(dead_code)]

use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

pub const API_KEY: &str = "sk-upstream-test";
pub const OPENAI_PATH: &str = "/v1/chat/completions";
pub const GEMINI_PATH: &str = "/v1/models/gemma-3-27b-it:streamGenerateContent";

/// OpenAI-compatible mock upstream
pub struct OpenAIMockServer {
    server: MockServer,
}

impl OpenAIMockServer {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}{}", self.server.uri(), OPENAI_PATH)
    }

    /// Respond with one `data:` event per chunk followed by `[DONE]`
    pub async fn mock_streaming(&self, chunks: &[&str]) {
        let mut body = String::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let finish_reason = (i + 1 == chunks.len()).then_some("stop");
            let event = serde_json::json!({
                "id": "chatcmpl-mock",
                "object": "chat.completion.chunk",
                "choices": [{
                    "index": 0,
                    "delta": {"content": chunk},
                    "finish_reason": finish_reason
                }]
            });
            body.push_str(&format!("data: {}\n\n", event));
        }
        body.push_str("data: [DONE]\n\n");

        Mock::given(method("POST"))
            .and(path(OPENAI_PATH))
            .and(header("authorization", format!("Bearer {}", API_KEY).as_str()))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .expect(1)
            .mount(&self.server)
            .await;
    }

    /// Respond with an error status
    pub async fn mock_error(&self, status: u16, body: &str) {
        Mock::given(method("POST"))
            .and(path(OPENAI_PATH))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .expect(1)
            .mount(&self.server)
            .await;
    }

    /// Fail the test if any request reaches this server
    pub async fn expect_no_calls(&self) {
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&self.server)
            .await;
    }
}

/// Gemini streaming mock upstream
pub struct GeminiMockServer {
    server: MockServer,
}

impl GeminiMockServer {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}{}", self.server.uri(), GEMINI_PATH)
    }

    /// Respond with a JSON array of candidates, the way the endpoint streams
    pub async fn mock_streaming(&self, texts: &[&str]) {
        let items: Vec<serde_json::Value> = texts
            .iter()
            .map(|text| {
                serde_json::json!({
                    "candidates": [{
                        "content": {"parts": [{"text": text}], "role": "model"},
                        "index": 0
                    }]
                })
            })
            .collect();
        let body = serde_json::to_string_pretty(&items).unwrap_or_default();

        Mock::given(method("POST"))
            .and(path(GEMINI_PATH))
            .and(header("x-goog-api-key", API_KEY))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/json")
                    .set_body_string(body),
            )
            .expect(1)
            .mount(&self.server)
            .await;
    }
}
