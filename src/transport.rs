//! Outbound streaming HTTP transport

use crate::request::HttpRequestSpec;
use crate::{Error, Result};
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use reqwest::Client as HttpClient;
use std::pin::Pin;
use std::time::Duration;

/// Bytes of a failed upstream body kept for the error log
const DRAIN_EXCERPT_BYTES: usize = 512;

/// Raw response body chunks, in arrival order
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Status line plus the unread body of an upstream response
pub struct UpstreamResponse {
    pub status: u16,
    pub body: ChunkStream,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl std::fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Opens one streaming upstream exchange per call.
///
/// Dropping the returned body closes the connection, so a consumer that
/// stops reading early leaks nothing.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, spec: &HttpRequestSpec) -> Result<UpstreamResponse>;
}

/// Build an HTTP client with the gateway's timeouts and proxy
fn build_http_client(
    connect_timeout: Duration,
    stream_timeout: Duration,
    proxy: Option<&str>,
) -> Result<HttpClient> {
    let mut builder = HttpClient::builder()
        .connect_timeout(connect_timeout)
        .timeout(stream_timeout);

    builder = match proxy {
        // CONNECT-tunnels https targets through the proxy
        Some(url) => builder.proxy(
            reqwest::Proxy::all(url)
                .map_err(|e| Error::Config(format!("invalid proxy URL '{}': {}", url, e)))?,
        ),
        None => builder.no_proxy(),
    };

    Ok(builder.build()?)
}

/// [`Transport`] backed by reqwest
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: HttpClient,
    idle_timeout: Duration,
}

impl HttpTransport {
    /// `timeout` bounds connecting and every wait for the next chunk;
    /// `stream_timeout` bounds one whole response.
    pub fn new(timeout: Duration, stream_timeout: Duration, proxy: Option<&str>) -> Result<Self> {
        Ok(HttpTransport {
            client: build_http_client(timeout, stream_timeout, proxy)?,
            idle_timeout: timeout,
        })
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn open(&self, spec: &HttpRequestSpec) -> Result<UpstreamResponse> {
        let send = self
            .client
            .request(spec.method.clone(), &spec.url)
            .headers(spec.headers.clone())
            .json(&spec.body)
            .send();

        let response = tokio::time::timeout(self.idle_timeout, send)
            .await
            .map_err(|_| Error::Transport("timed out waiting for response headers".to_string()))?
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        let idle_timeout = self.idle_timeout;
        let mut chunks = response.bytes_stream();

        let body = async_stream::stream! {
            loop {
                match tokio::time::timeout(idle_timeout, chunks.next()).await {
                    Ok(Some(Ok(chunk))) => yield Ok(chunk),
                    Ok(Some(Err(e))) => {
                        yield Err(transport_error(e));
                        return;
                    }
                    Ok(None) => return,
                    Err(_) => {
                        yield Err(Error::Transport(format!("no data for {:?}", idle_timeout)));
                        return;
                    }
                }
            }
        };

        Ok(UpstreamResponse {
            status,
            body: Box::pin(body),
        })
    }
}

/// Strip the URL so query-string credentials never reach a log line
fn transport_error(e: reqwest::Error) -> Error {
    let kind = if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connect"
    } else {
        "io"
    };
    Error::Transport(format!("{}: {}", kind, e.without_url()))
}

/// Read a body to its end and return a short lossy excerpt of it.
///
/// Never fails: a broken body simply ends the excerpt early.
pub async fn drain(mut body: ChunkStream) -> String {
    let mut excerpt = Vec::with_capacity(DRAIN_EXCERPT_BYTES);
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => {
                let room = DRAIN_EXCERPT_BYTES - excerpt.len();
                excerpt.extend_from_slice(&bytes[..bytes.len().min(room)]);
            }
            Err(e) => {
                tracing::debug!("Stopped draining upstream body: {}", e);
                break;
            }
        }
    }
    String::from_utf8_lossy(&excerpt).into_owned()
}
