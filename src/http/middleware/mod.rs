//! HTTP middleware for the listener
//!
//! - Request tracing spans
//! - Deadline for status requests
//! - HMAC signature verification for the deploy trigger

pub mod auth;

use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tower_http::{
    classify::{ServerErrorsAsFailures, SharedClassifier},
    trace::TraceLayer,
};
use tracing::{info_span, warn, Span};

use crate::http::{handlers::AppState, responses::ErrorResponse};

pub use auth::{signature_middleware, HmacValidator, SignatureCheck};

/// Tracing layer creating one `http_request` span per request
pub fn trace_layer(
) -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>, fn(&Request<Body>) -> Span> {
    TraceLayer::new_for_http().make_span_with(make_request_span as fn(&Request<Body>) -> Span)
}

fn make_request_span(request: &Request<Body>) -> Span {
    info_span!(
        "http_request",
        method = %request.method(),
        uri = %request.uri(),
        version = ?request.version(),
        user_agent = request
            .headers()
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown"),
        delivery = request
            .headers()
            .get("x-github-delivery")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
    )
}

/// Bound a request by `server.request_timeout`
pub async fn request_timeout_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let limit = state.request_timeout();
    match tokio::time::timeout(limit, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            warn!(timeout_secs = limit.as_secs(), "Request exceeded its deadline");
            let body = ErrorResponse::with_message(
                format!("Request timed out after {}s", limit.as_secs()),
                "TIMEOUT",
            );
            (StatusCode::GATEWAY_TIMEOUT, Json(body)).into_response()
        }
    }
}
