//! Synthesis orchestration
//!
//! One [`Gateway`] serves every request. Per request it checks the token,
//! renders the prompt, opens exactly one upstream exchange and turns the
//! body into ordered text deltas with the provider's decoder. Nothing is
//! retried; a failure ends the delta stream after whatever was emitted.

use crate::decoder::{create_decoder, TextDelta};
use crate::gate::config::GatewayConfig;
use crate::prompt::{truncate_tail, PromptAssembler, PromptInput, PRIOR_ANSWER_WINDOW};
use crate::request::{build_request, HttpRequestSpec};
use crate::transport::{drain, HttpTransport, Transport};
use crate::{AuthTokenizer, Error, ProviderConfig, Result};
use chrono::NaiveDate;
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

/// Ordered answer fragments; an `Err` item is terminal
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<TextDelta>> + Send>>;

/// One inbound synthesis call
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SynthesisRequest {
    #[serde(alias = "q")]
    pub query: String,
    #[serde(alias = "lang", default = "default_language")]
    pub language: String,
    #[serde(alias = "context")]
    pub grounding_context: String,
    #[serde(alias = "prev_answer")]
    pub prior_answer: String,
    #[serde(alias = "tk")]
    pub auth_token: String,
    /// Keep-alive probe: authorize, then answer without calling upstream
    pub warmup: bool,
}

fn default_language() -> String {
    "all".to_string()
}

/// Outcome of an accepted request
pub enum Synthesis {
    Warmup,
    Stream(DeltaStream),
}

impl std::fmt::Debug for Synthesis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Synthesis::Warmup => f.write_str("Warmup"),
            Synthesis::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Orchestrates auth, prompt, request, transport and decoding
#[derive(Clone)]
pub struct Gateway {
    provider: Option<Arc<ProviderConfig>>,
    tokenizer: AuthTokenizer,
    transport: Arc<dyn Transport>,
}

impl Gateway {
    pub fn new(
        provider: Option<ProviderConfig>,
        tokenizer: AuthTokenizer,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let gateway = Gateway {
            provider: provider.map(Arc::new),
            tokenizer,
            transport,
        };
        if !gateway.is_configured() {
            warn!("No provider credential configured; /ai-stream will answer 400");
        }
        gateway
    }

    /// Build a gateway with the reqwest transport
    pub fn with_http_transport(
        provider: Option<ProviderConfig>,
        tokenizer: AuthTokenizer,
        config: &GatewayConfig,
    ) -> Result<Self> {
        let proxy = provider.as_ref().and_then(|p| p.proxy.clone());
        let transport = HttpTransport::new(config.timeout(), config.stream_timeout(), proxy.as_deref())?;
        Ok(Self::new(provider, tokenizer, Arc::new(transport)))
    }

    pub fn provider(&self) -> Option<&ProviderConfig> {
        self.provider.as_deref()
    }

    /// True when a provider, its credential and a token secret are all set
    pub fn is_configured(&self) -> bool {
        self.tokenizer.is_configured()
            && self
                .provider
                .as_ref()
                .is_some_and(|p| p.api_key().is_some())
    }

    /// Check the gateway is usable and `token` is valid
    pub fn authorize(&self, token: &str) -> Result<()> {
        if !self.is_configured() {
            return Err(Error::Unconfigured("no provider credential".to_string()));
        }
        self.tokenizer.verify(token).inspect_err(|e| {
            if let Error::Auth(reason) = e {
                warn!("Rejected synthesis request: {}", reason);
            }
        })
    }

    /// Render the prompt `request` would send upstream
    pub fn render_prompt(&self, request: &SynthesisRequest, today: NaiveDate) -> Result<String> {
        let provider = self.configured_provider()?;
        Ok(PromptAssembler::new(provider.sampling.max_tokens).render(&PromptInput {
            query: request.query.trim(),
            language: &request.language,
            grounding: &request.grounding_context,
            prior_answer: truncate_tail(&request.prior_answer, PRIOR_ANSWER_WINDOW),
            today,
        }))
    }

    /// Handle one request.
    ///
    /// Errors returned here happen before any upstream call. Failures after
    /// the upstream exchange opened arrive as the last item of the stream.
    pub async fn handle(&self, request: SynthesisRequest) -> Result<Synthesis> {
        self.authorize(&request.auth_token)?;
        if request.warmup {
            return Ok(Synthesis::Warmup);
        }
        if request.query.trim().is_empty() {
            return Err(Error::InvalidRequest("missing query".to_string()));
        }

        let provider = self.configured_provider()?;
        let today = chrono::Local::now().date_naive();
        let prompt = self.render_prompt(&request, today)?;
        let spec = build_request(&provider, &prompt, &provider.sampling)?;

        Ok(Synthesis::Stream(self.stream(provider, spec)))
    }

    fn configured_provider(&self) -> Result<Arc<ProviderConfig>> {
        self.provider
            .clone()
            .ok_or_else(|| Error::Unconfigured("no provider configured".to_string()))
    }

    fn stream(&self, provider: Arc<ProviderConfig>, spec: HttpRequestSpec) -> DeltaStream {
        let transport = Arc::clone(&self.transport);
        let span = info_span!(
            "synthesis",
            request_id = %Uuid::new_v4(),
            provider = %provider.provider,
            host = %provider.endpoint_host()
        );

        Box::pin(async_stream::stream! {
            let response = match transport.open(&spec).await {
                Ok(response) => response,
                Err(e) => {
                    error!(parent: &span, "Upstream request failed: {}", e);
                    yield Err(e);
                    return;
                }
            };

            if !response.is_success() {
                let status = response.status;
                let excerpt = drain(response.body).await;
                error!(parent: &span, status, "Upstream error: {}", excerpt);
                yield Err(Error::UpstreamStatus {
                    provider: provider.provider.to_string(),
                    status,
                });
                return;
            }

            let mut decoder = create_decoder(provider.wire_format());
            let mut body = response.body;
            let mut emitted = 0usize;

            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!(parent: &span, emitted, "Upstream stream ended early: {}", e);
                        yield Err(e);
                        return;
                    }
                };
                for delta in decoder.feed(&chunk) {
                    emitted += 1;
                    yield Ok(delta);
                }
                if decoder.is_done() {
                    break;
                }
            }
            drop(body);

            for delta in decoder.finish() {
                emitted += 1;
                yield Ok(delta);
            }
            info!(parent: &span, emitted, dropped = decoder.dropped(), "Synthesis complete");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ChunkStream, UpstreamResponse};
    use crate::{AuthFailure, Settings};
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const SECRET: &str = "test-secret";

    /// Scripted transport that tracks open connections and drained bytes
    #[derive(Default)]
    struct FakeTransport {
        status: u16,
        chunks: Vec<Result<Bytes>>,
        opened: AtomicUsize,
        live: Arc<AtomicUsize>,
        read: Arc<AtomicUsize>,
        requests: Mutex<Vec<HttpRequestSpec>>,
    }

    impl FakeTransport {
        fn new(status: u16, chunks: Vec<&'static str>) -> Arc<Self> {
            Arc::new(FakeTransport {
                status,
                chunks: chunks
                    .into_iter()
                    .map(|c| Ok(Bytes::from_static(c.as_bytes())))
                    .collect(),
                ..Default::default()
            })
        }
    }

    /// Decrements the live-connection count when the body is dropped
    struct Connection(Arc<AtomicUsize>);

    impl Drop for Connection {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl Transport for FakeTransport {
        async fn open(&self, spec: &HttpRequestSpec) -> Result<UpstreamResponse> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            self.live.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(spec.clone());

            let connection = Connection(Arc::clone(&self.live));
            let read = Arc::clone(&self.read);
            let chunks: Vec<Result<Bytes>> = self
                .chunks
                .iter()
                .map(|c| match c {
                    Ok(b) => Ok(b.clone()),
                    Err(e) => Err(Error::Transport(e.to_string())),
                })
                .collect();
            let body: ChunkStream = Box::pin(async_stream::stream! {
                let _connection = connection;
                for chunk in chunks {
                    if let Ok(bytes) = &chunk {
                        read.fetch_add(bytes.len(), Ordering::SeqCst);
                    }
                    yield chunk;
                }
            });
            Ok(UpstreamResponse {
                status: self.status,
                body,
            })
        }
    }

    fn provider(id: &str) -> ProviderConfig {
        let settings = Settings {
            id: Some(id.to_string()),
            api_key: Some("sk-test".to_string()),
            ..Settings::default()
        };
        ProviderConfig::resolve_with_env(&settings, |_| None).unwrap()
    }

    fn gateway(id: &str, transport: Arc<FakeTransport>) -> Gateway {
        Gateway::new(
            Some(provider(id)),
            AuthTokenizer::new(Some(SECRET.to_string())),
            transport,
        )
    }

    fn request(query: &str) -> SynthesisRequest {
        SynthesisRequest {
            query: query.to_string(),
            language: "all".to_string(),
            auth_token: AuthTokenizer::new(Some(SECRET.to_string()))
                .issue()
                .unwrap()
                .to_string(),
            ..Default::default()
        }
    }

    async fn collect(synthesis: Synthesis) -> Vec<Result<TextDelta>> {
        match synthesis {
            Synthesis::Stream(stream) => stream.collect().await,
            Synthesis::Warmup => panic!("expected a stream"),
        }
    }

    #[tokio::test]
    async fn test_streams_openai_deltas_in_order() {
        let transport = FakeTransport::new(
            200,
            vec![
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\nda",
                "ta: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
                "data: [DONE]\n\n",
            ],
        );
        let gw = gateway("openai", transport.clone());
        let items = collect(gw.handle(request("hi")).await.unwrap()).await;
        let deltas: Vec<String> = items.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(deltas, vec!["Hel", "lo"]);
        assert_eq!(transport.opened.load(Ordering::SeqCst), 1);
        assert_eq!(transport.live.load(Ordering::SeqCst), 0);

        let sent = transport.requests.lock().unwrap();
        let prompt = sent[0].body["messages"][0]["content"].as_str().unwrap();
        assert!(prompt.contains("<query>hi</query>"));
    }

    #[tokio::test]
    async fn test_streams_gemini_deltas() {
        let transport = FakeTransport::new(
            200,
            vec![
                r#"{"candidates":[{"content":{"parts":[{"text":"He"}]}}]}{"candi"#,
                r#"dates":[{"content":{"parts":[{"text":"llo"}]}}]}"#,
            ],
        );
        let gw = gateway("gemini", transport.clone());
        let items = collect(gw.handle(request("hi")).await.unwrap()).await;
        let text: String = items.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(text, "Hello");
        let sent = transport.requests.lock().unwrap();
        assert!(sent[0].body.get("generationConfig").is_some());
    }

    #[tokio::test]
    async fn test_non_2xx_drains_and_closes() {
        let transport = FakeTransport::new(503, vec!["upstream ", "overloaded"]);
        let gw = gateway("openai", transport.clone());
        let items = collect(gw.handle(request("hi")).await.unwrap()).await;

        assert_eq!(items.len(), 1);
        assert!(matches!(
            items[0],
            Err(Error::UpstreamStatus { status: 503, .. })
        ));
        assert_eq!(transport.read.load(Ordering::SeqCst), "upstream overloaded".len());
        assert_eq!(transport.live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_done_closes_connection_before_body_ends() {
        let transport = FakeTransport::new(
            200,
            vec![
                "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\ndata: [DONE]\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n",
            ],
        );
        let gw = gateway("openai", transport.clone());
        let items = collect(gw.handle(request("hi")).await.unwrap()).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap(), "a");
        assert_eq!(transport.live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_mid_stream_error_keeps_partial_output() {
        let transport = Arc::new(FakeTransport {
            status: 200,
            chunks: vec![
                Ok(Bytes::from_static(
                    b"data: {\"choices\":[{\"delta\":{\"content\":\"part\"}}]}\n\n",
                )),
                Err(Error::Transport("reset".to_string())),
                Ok(Bytes::from_static(b"never")),
            ],
            ..Default::default()
        });
        let gw = gateway("openai", transport.clone());
        let items = collect(gw.handle(request("hi")).await.unwrap()).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "part");
        assert!(matches!(items[1], Err(Error::Transport(_))));
        assert_eq!(transport.live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_abandoned_stream_releases_connection() {
        let transport = FakeTransport::new(
            200,
            vec![
                "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n\n",
            ],
        );
        let gw = gateway("openai", transport.clone());
        let Synthesis::Stream(mut stream) = gw.handle(request("hi")).await.unwrap() else {
            panic!("expected a stream");
        };
        assert_eq!(stream.next().await.unwrap().unwrap(), "a");
        assert_eq!(transport.live.load(Ordering::SeqCst), 1);
        drop(stream);
        assert_eq!(transport.live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_auth_failures_never_reach_upstream() {
        let transport = FakeTransport::new(200, vec![]);
        let gw = gateway("openai", transport.clone());

        let mut req = request("hi");
        req.auth_token = "123.deadbeef".to_string();
        assert!(matches!(
            gw.handle(req).await,
            Err(Error::Auth(AuthFailure::BadSignature))
        ));

        let mut req = request("hi");
        req.auth_token.clear();
        assert!(matches!(
            gw.handle(req).await,
            Err(Error::Auth(AuthFailure::Missing))
        ));
        assert_eq!(transport.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_warmup_skips_upstream() {
        let transport = FakeTransport::new(200, vec![]);
        let gw = gateway("openai", transport.clone());
        let mut req = request("");
        req.warmup = true;
        assert!(matches!(gw.handle(req).await, Ok(Synthesis::Warmup)));
        assert_eq!(transport.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unconfigured_is_distinct() {
        let transport = FakeTransport::new(200, vec![]);
        let gw = Gateway::new(None, AuthTokenizer::new(None), transport.clone());
        assert!(!gw.is_configured());
        assert!(matches!(
            gw.handle(request("hi")).await,
            Err(Error::Unconfigured(_))
        ));

        let mut keyless = provider("openai");
        keyless.api_key = None;
        let gw = Gateway::new(
            Some(keyless),
            AuthTokenizer::new(Some(SECRET.to_string())),
            transport.clone(),
        );
        assert!(matches!(
            gw.handle(request("hi")).await,
            Err(Error::Unconfigured(_))
        ));
        assert_eq!(transport.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_query_is_invalid() {
        let transport = FakeTransport::new(200, vec![]);
        let gw = gateway("openai", transport.clone());
        assert!(matches!(
            gw.handle(request("  ")).await,
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_prior_answer_window() {
        let gw = gateway("openai", FakeTransport::new(200, vec![]));
        let mut req = request("next?");
        req.prior_answer = format!("{}{}", "OLD".repeat(10), "n".repeat(PRIOR_ANSWER_WINDOW));
        let prompt = gw
            .render_prompt(&req, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap())
            .unwrap();
        assert!(!prompt.contains("OLD"));
        assert!(prompt.contains("FOLLOW-UP"));
    }

    #[test]
    fn test_request_aliases() {
        let req: SynthesisRequest = serde_json::from_str(
            r#"{"q":"rust","lang":"de","context":"[1] a","prev_answer":"p","tk":"1.ab"}"#,
        )
        .unwrap();
        assert_eq!(req.query, "rust");
        assert_eq!(req.language, "de");
        assert_eq!(req.grounding_context, "[1] a");
        assert_eq!(req.prior_answer, "p");
        assert_eq!(req.auth_token, "1.ab");
        assert!(!req.warmup);

        let req: SynthesisRequest =
            serde_json::from_str(r#"{"query":"x","authToken":"t","warmup":true}"#).unwrap();
        assert_eq!(req.language, "all");
        assert!(req.warmup);
    }
}
