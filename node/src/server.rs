// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::api::*;
use crate::config::{AuthConfig, RateLimitConfig};
use crate::coordinator::IngestCoordinator;
use crate::errors::IngestError;
use crate::ratelimit::{RateDecision, RateLimiter};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{from_fn_with_state, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use headers::authorization::Bearer;
use headers::{Authorization, HeaderMapExt};
use logpulse_kernel::LogRecord;
use serde_json::json;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<IngestCoordinator>,
}

pub fn build_router(
    coordinator: Arc<IngestCoordinator>,
    auth: &AuthConfig,
    rate_limit: &RateLimitConfig,
) -> Router {
    let mut app = Router::new()
        .route("/v1/ingest", post(ingest))
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .with_state(AppState { coordinator });

    if auth.enabled {
        tracing::info!("Auth Enabled: API key required");
        let key = Arc::new(auth.api_key.clone());
        app = app.layer(from_fn_with_state(key, auth_guard));
    } else {
        tracing::warn!("Auth Disabled: No API key configured");
    }

    // Added last so it runs before auth.
    if rate_limit.enabled {
        let limiter = Arc::new(RateLimiter::new(rate_limit.clone()));
        app = app.layer(from_fn_with_state(limiter, rate_limit_guard));
    }

    app.layer(TraceLayer::new_for_http())
}

fn reject(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn auth_guard(State(key): State<Arc<String>>, req: Request, next: Next) -> Response {
    if req.uri().path() == "/health" {
        return next.run(req).await;
    }

    let headers = req.headers();
    let api_key_ok = headers
        .get(API_KEY_HEADER)
        .and_then(|val| val.to_str().ok())
        .map_or(false, |val| val == key.as_str());
    let bearer_ok = headers
        .typed_get::<Authorization<Bearer>>()
        .map_or(false, |auth| auth.token() == key.as_str());

    if api_key_ok || bearer_ok {
        next.run(req).await
    } else {
        reject(StatusCode::UNAUTHORIZED, "Missing or invalid API key")
    }
}

async fn rate_limit_guard(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    if !limiter.applies_to(req.uri().path()) {
        return next.run(req).await;
    }

    let socket_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip());
    let ip = socket_ip.or_else(|| forwarded_for(req.headers()));

    match limiter.check(ip, tokio::time::Instant::now()) {
        RateDecision::Allow => next.run(req).await,
        RateDecision::Blocked => reject(StatusCode::FORBIDDEN, "Client address is blocked"),
        RateDecision::Limited => reject(StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded"),
    }
}

/// First address in `X-Forwarded-For`.
fn forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")?
        .to_str()
        .ok()?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

async fn ingest(
    State(state): State<AppState>,
    Json(payload): Json<IngestRequest>,
) -> Result<(StatusCode, Json<IngestResponse>), IngestError> {
    let mut accepted = 0;
    for record in payload.records {
        state.coordinator.submit(LogRecord::from(record)).await?;
        accepted += 1;
    }
    Ok((StatusCode::ACCEPTED, Json(IngestResponse { accepted })))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        buffered: state.coordinator.buffer().len(),
    })
}

async fn metrics_handler() -> String {
    crate::telemetry::get_metrics()
}
