//! HTTP gateway for Auspex.
//!
//! Exposes the guidance pipeline over Axum:
//!
//! - `GET  /health`                 : liveness, exempt from admission
//! - `POST /v1/guidance`            : SSE guidance stream
//! - `POST /v1/guidance/preview`    : fused prompt as JSON (opt-in)
//!
//! Admission, abuse controls and rate limiting live in the pipeline, not in
//! middleware, so every decision is keyed by the same fingerprint and lands
//! in the same security log.

pub mod guidance;

use auspex_config::GatewayConfig;
use auspex_pipeline::GuidancePipeline;
use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    extract::State,
    http::{HeaderValue, Method, header},
    response::Json,
    routing::{get, post},
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

/// Shared application state for the gateway.
pub struct GatewayState {
    pub pipeline: Arc<GuidancePipeline>,
    pub config: GatewayConfig,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl GatewayState {
    pub fn new(pipeline: Arc<GuidancePipeline>, config: GatewayConfig) -> Self {
        Self {
            pipeline,
            config,
            started_at: chrono::Utc::now(),
        }
    }
}

pub type SharedState = Arc<GatewayState>;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(parsed))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .max_age(std::time::Duration::from_secs(3600))
}

/// Build the Axum router with all gateway routes.
///
/// The body limit sits well above the admission ceiling so moderately
/// oversized payloads are buffered and measured by the gate. Anything past
/// the transport limit is handed to the gate unread.
pub fn build_router(state: SharedState) -> Router {
    let body_limit = state.pipeline.max_body_bytes().saturating_mul(4).max(1024);

    let mut v1 = Router::new().route("/guidance", post(guidance::guidance_handler));
    if state.config.enable_prompt_preview {
        v1 = v1.route("/guidance/preview", post(guidance::preview_handler));
    }

    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", v1)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors_layer(&state.config.cors_origins))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: SharedState) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let preview = state.config.enable_prompt_preview;
    let app = build_router(state);

    info!(addr = %addr, preview, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: i64,
    security_events: usize,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: (chrono::Utc::now() - state.started_at).num_seconds(),
        security_events: state.pipeline.security_log().len(),
    })
}
