use std::time::Instant;

use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Used when `RUST_LOG` is unset. The HTTP client stack is chatty at `info`.
pub const DEFAULT_FILTER: &str = "info,hyper_util=warn,reqwest=warn";

pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started_at = Instant::now();

    let response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = started_at.elapsed().as_millis();

    // health checks hit /health constantly
    if path == "/health" && status.is_success() {
        debug!(method = %method, path = %path, duration_ms = elapsed_ms, "request summary");
        return response;
    }

    info!(
        method = %method,
        path = %path,
        status = status.as_u16(),
        duration_ms = elapsed_ms,
        "request summary"
    );

    if status == StatusCode::UNAUTHORIZED {
        warn!(method = %method, path = %path, "authentication failure");
    } else if status.is_server_error() {
        warn!(method = %method, path = %path, status = status.as_u16(), "request failed");
    }

    response
}
