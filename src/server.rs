//! HTTP surface of the execution service
//!
//! Request pipeline: token verification (middleware) → rate limit →
//! normalization → backend dispatch. User-code failures and timeouts are
//! data in the 200 path; only infrastructure failures become 5xx.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Extension, Json, Router};
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::auth::{self, CallerId, RequestIdentity};
use crate::badge::BadgeNotifier;
use crate::config::{Config, RunnerMode};
use crate::metrics::{Metrics, RunStatus};
use crate::rate_limit::RateLimiter;
use crate::runner::{build_runner, Runner};
use crate::submission::Submission;

/// Request-failure taxonomy surfaced to callers
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Terse on the wire; the cause is logged server-side
    #[error("internal error")]
    Infra,
}

impl RequestError {
    fn status(&self) -> StatusCode {
        match self {
            RequestError::Unauthorized => StatusCode::UNAUTHORIZED,
            RequestError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            RequestError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RequestError::Infra => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Shared handler state; everything request handlers touch lives here
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub limiter: Arc<RateLimiter>,
    pub metrics: Arc<Metrics>,
    pub runner: Arc<dyn Runner>,
    pub badge: Arc<BadgeNotifier>,
}

impl AppState {
    pub fn new(config: Arc<Config>) -> anyhow::Result<Self> {
        let limiter = Arc::new(RateLimiter::new(config.rate_limit_per_minute));
        let metrics = Arc::new(Metrics::new()?);
        let runner = build_runner(&config);
        let badge = Arc::new(BadgeNotifier::new(config.badge.clone()));
        Ok(Self { config, limiter, metrics, runner, badge })
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/run",
            post(run_handler)
                .layer(middleware::from_fn_with_state(state.clone(), auth::require_auth)),
        )
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(|| async { "ready" }))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Rate-limit key: caller identity when authenticated, peer address
/// otherwise
fn rate_identity(caller: Option<&CallerId>, peer: IpAddr) -> String {
    match caller {
        Some(CallerId(id)) => id.clone(),
        None => peer.to_string(),
    }
}

async fn run_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Extension(RequestIdentity(caller)): Extension<RequestIdentity>,
    body: Bytes,
) -> Response {
    let mode = state.config.runner_mode;

    let identity = rate_identity(caller.as_ref(), peer.ip());
    if !state.limiter.allow(&identity) {
        state.metrics.record_run(mode.as_str(), RunStatus::RateLimited);
        return RequestError::RateLimited.into_response();
    }

    let mut submission: Submission = match serde_json::from_slice(&body) {
        Ok(submission) => submission,
        Err(err) => {
            state.metrics.record_run(mode.as_str(), RunStatus::BadRequest);
            return RequestError::BadRequest(format!("malformed submission: {err}"))
                .into_response();
        }
    };
    if let Err(reason) = submission.normalize(&state.config) {
        state.metrics.record_run(mode.as_str(), RunStatus::BadRequest);
        return RequestError::BadRequest(reason).into_response();
    }

    let start = Instant::now();
    let result = match state.runner.execute(&submission).await {
        Ok(result) => result,
        Err(err) => {
            error!("run failed: {err:#}");
            state.metrics.record_run(mode.as_str(), RunStatus::Error);
            return RequestError::Infra.into_response();
        }
    };

    let status = if result.is_timeout() {
        RunStatus::Timeout
    } else if result.success {
        RunStatus::Ok
    } else {
        RunStatus::Fail
    };
    state.metrics.record_run(mode.as_str(), status);
    state
        .metrics
        .observe_duration(mode.as_str(), start.elapsed().as_secs_f64());

    if result.success {
        if let Some(caller) = &caller {
            state.badge.notify_run_success(caller);
        }
    }

    match mode {
        // Image compatibility: docker callers get the combined stream as-is
        RunnerMode::Docker => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            result.stdout,
        )
            .into_response(),
        _ => Json(result).into_response(),
    }
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
        .into_response()
}
