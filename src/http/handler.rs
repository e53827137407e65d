//! Main axum routers.
//!
//! Proxy listener:
//! - `/healthz`, `/readiness`         - upstream health hook, any method, no auth
//! - everything else                   - configured gate, then upstream
//!
//! Metrics listener (optional):
//! - `GET /metrics`                    - Prometheus metrics

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Router,
};
use tracing::{error, instrument, warn};

use crate::health::HealthCheck;
use crate::metrics::MetricsRegistry;

use super::basic::BasicGate;
use super::html::HtmlGate;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Front-end protocol selected at startup.
pub enum Gate {
    Basic(BasicGate),
    Html(HtmlGate),
}

impl Gate {
    pub async fn handle(&self, request: Request) -> Result<Response, AppError> {
        match self {
            Gate::Basic(gate) => gate.handle(request).await,
            Gate::Html(gate) => gate.handle(request).await,
        }
    }
}

pub struct AppState {
    pub gate: Gate,
    pub health: HealthCheck,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the proxy [`Router`]: health routes plus the gated fallback.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", any(handle_health))
        .route("/readiness", any(handle_health))
        .fallback(handle_gated)
        .with_state(state)
}

/// Build the metrics [`Router`], served on its own listener.
pub fn create_metrics_router(metrics: MetricsRegistry) -> Router {
    Router::new()
        .route("/metrics", get(handle_metrics))
        .with_state(metrics)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
async fn handle_gated(State(state): State<Arc<AppState>>, request: Request) -> Response {
    state.gate.handle(request).await.into_response()
}

/// `/healthz`, `/readiness`
async fn handle_health(State(state): State<Arc<AppState>>) -> Response {
    match state.health.check().await {
        Ok(()) => (StatusCode::OK, "ok").into_response(),
        Err(e) => {
            warn!(error = %format!("{e:#}"), "health check failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "check failed").into_response()
        }
    }
}

/// `GET /metrics`
async fn handle_metrics(State(metrics): State<MetricsRegistry>) -> Result<Response, AppError> {
    let body = metrics.encode()?;
    Ok((
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        body,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Application-level error type that maps cleanly to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// The caller is not authenticated or not authorised.
    Unauthorized { realm: String },
    /// An unexpected internal error.  Details are logged, never returned.
    Internal(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Unauthorized { realm } => {
                let challenge = format!("Basic realm=\"{}\"", realm.replace('"', "\\\""));
                Response::builder()
                    .status(StatusCode::UNAUTHORIZED)
                    .header(header::WWW_AUTHENTICATE, challenge)
                    .body(Body::empty())
                    .unwrap_or_else(|_| StatusCode::UNAUTHORIZED.into_response())
            }
            AppError::Internal(err) => {
                error!(error = %format!("{err:#}"), "internal server error");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}
