//! HTTP request handlers for the gateway

use crate::gate::gateway::{Gateway, Synthesis, SynthesisRequest};
use crate::Error;
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use futures::future;
use futures::stream::StreamExt;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, error};

/// Gateway state shared across handlers
#[derive(Clone)]
pub struct GatewayState {
    pub gateway: Arc<Gateway>,
}

impl GatewayState {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway: Arc::new(gateway),
        }
    }
}

/// Handle `POST /ai-stream`
///
/// The body is the raw concatenation of answer deltas. A failure after
/// streaming began ends the body early; it is never turned into an error
/// status because the status line is already on the wire.
///
/// The body is parsed whatever its content type. One that does not parse
/// reads as an empty request, so it fails the token check like any other.
pub async fn ai_stream_handler(State(state): State<GatewayState>, body: Bytes) -> Response {
    match state.gateway.handle(parse_request(&body)).await {
        Ok(Synthesis::Warmup) => StatusCode::OK.into_response(),
        Ok(Synthesis::Stream(deltas)) => {
            let body = deltas
                .take_while(|item| future::ready(item.is_ok()))
                .filter_map(|item| {
                    future::ready(item.ok().map(|delta| Ok::<_, Infallible>(Bytes::from(delta))))
                });
            stream_response(Body::from_stream(body))
        }
        Err(e) => error_response(&e),
    }
}

fn parse_request(body: &[u8]) -> SynthesisRequest {
    serde_json::from_slice(body).unwrap_or_else(|e| {
        debug!("Unreadable synthesis request body: {}", e);
        SynthesisRequest::default()
    })
}

/// 200 with headers that keep proxies from buffering or caching
fn stream_response(body: Body) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/event-stream; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache, no-store"),
            (header::CONTENT_ENCODING, "identity"),
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        body,
    )
        .into_response()
}

/// Map a pre-stream failure to a status. Auth detail is never echoed.
fn error_response(e: &Error) -> Response {
    match e {
        Error::Auth(_) => (StatusCode::FORBIDDEN, "Forbidden").into_response(),
        Error::Unconfigured(_) => {
            (StatusCode::BAD_REQUEST, "Gateway not configured").into_response()
        }
        Error::InvalidRequest(reason) => {
            (StatusCode::BAD_REQUEST, format!("Bad request: {}", reason)).into_response()
        }
        other => {
            error!("Failed to start synthesis: {}", other);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
        }
    }
}

/// Handle `GET /health`
pub async fn health_check(State(state): State<GatewayState>) -> Json<Value> {
    let gateway = &state.gateway;
    Json(json!({
        "status": "ok",
        "provider": gateway.provider().map(|p| p.provider.as_str()),
        "configured": gateway.is_configured(),
    }))
}
