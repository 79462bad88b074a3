//! Guidance endpoints.
//!
//! - `POST /v1/guidance`: admitted, screened, generated, filtered, then
//!   streamed as SSE (`chunk` events followed by one `done`)
//! - `POST /v1/guidance/preview`: the fused prompt as JSON, no generation
//!
//! Handlers take the raw body so the admission gate sees the true payload
//! size before anything is parsed. Bodies past the transport limit never
//! buffer, but still go through the gate so the reject is logged.

use crate::SharedState;
use auspex_pipeline::PipelineError;
use auspex_security::{AdmissionReason, RequestSignals, Scope};
use axum::{
    body::Bytes,
    extract::rejection::{BytesRejection, FailedToBufferBody},
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::sse::{Event as SseEvent, Sse},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

// ── Signals ───────────────────────────────────────────────────────────────

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Transport metadata used for fingerprinting and bot detection.
pub fn request_signals(peer: SocketAddr, headers: &HeaderMap) -> RequestSignals {
    RequestSignals {
        ip: peer.ip().to_string(),
        user_agent: header_str(headers, header::USER_AGENT),
        accept_language: header_str(headers, header::ACCEPT_LANGUAGE),
        accept_encoding: header_str(headers, header::ACCEPT_ENCODING),
        accept: header_str(headers, header::ACCEPT),
        forwarded_for: headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    }
}

// ── Errors ────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_ms: Option<u64>,
}

#[derive(Serialize)]
struct FallbackResponse {
    error: &'static str,
    fallback: bool,
    message: String,
}

/// Maps pipeline failures onto HTTP statuses. Bodies only ever carry the
/// caller-safe message; internal reasons stay in the logs.
pub struct ApiError(pub PipelineError);

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let message = err.caller_message();

        match &err {
            PipelineError::Admission {
                reason,
                retry_after_ms,
            } => {
                let status = match reason {
                    AdmissionReason::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
                    _ => StatusCode::TOO_MANY_REQUESTS,
                };
                let mut response = (
                    status,
                    Json(ErrorResponse {
                        error: message,
                        retry_after_ms: *retry_after_ms,
                    }),
                )
                    .into_response();
                if let Some(ms) = retry_after_ms {
                    let secs = ms.div_ceil(1000).max(1);
                    response
                        .headers_mut()
                        .insert(header::RETRY_AFTER, HeaderValue::from(secs));
                }
                response
            }
            PipelineError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: message,
                    retry_after_ms: None,
                }),
            )
                .into_response(),
            PipelineError::Rejected(_) => (
                StatusCode::FORBIDDEN,
                Json(ErrorResponse {
                    error: message,
                    retry_after_ms: None,
                }),
            )
                .into_response(),
            PipelineError::Generation(_) => (
                StatusCode::BAD_GATEWAY,
                Json(FallbackResponse {
                    error: "generation_failed",
                    fallback: true,
                    message,
                }),
            )
                .into_response(),
        }
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn read_body(
    state: &SharedState,
    signals: &RequestSignals,
    scope: Scope,
    body: Result<Bytes, BytesRejection>,
) -> Result<Bytes, PipelineError> {
    match body {
        Ok(bytes) => Ok(bytes),
        Err(BytesRejection::FailedToBufferBody(FailedToBufferBody::LengthLimitError(_))) => {
            Err(state.pipeline.reject_oversized(signals, scope).await)
        }
        Err(other) => Err(PipelineError::Validation(format!(
            "Unreadable request body: {other}"
        ))),
    }
}

/// `POST /v1/guidance`: stream a guidance answer as server-sent events.
pub async fn guidance_handler(
    State(state): State<SharedState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let started = Instant::now();
    let request_id = uuid::Uuid::new_v4();
    let signals = request_signals(peer, &headers);

    let prepared = match read_body(&state, &signals, Scope::Guidance, body).await {
        Ok(body) => state.pipeline.prepare(&signals, &body, started).await,
        Err(e) => Err(e),
    };
    let prepared = match prepared {
        Ok(p) => p,
        Err(e) => {
            warn!(%request_id, outcome = %e, "Guidance request refused");
            return Err(e.into());
        }
    };

    info!(
        %request_id,
        fingerprint = prepared.fingerprint.short(),
        mode = %prepared.mode,
        verdict = prepared.verdict.label(),
        "Streaming guidance"
    );

    let rx = state.pipeline.deliver(prepared);
    let stream = ReceiverStream::new(rx).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(SseEvent::default().event(event.event_type()).data(data))
    });

    Ok(Sse::new(stream))
}

/// `POST /v1/guidance/preview`: the prompt that would be sent, without generating.
pub async fn preview_handler(
    State(state): State<SharedState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let signals = request_signals(peer, &headers);
    let body = read_body(&state, &signals, Scope::Preview, body).await?;
    let preview = state.pipeline.preview(&signals, &body).await?;
    Ok(Json(preview))
}
