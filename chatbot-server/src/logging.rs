use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_tracing(default_level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Middleware that logs each HTTP request once its response head is ready.
///
/// For streamed responses the duration is time-to-first-byte; the relay logs
/// stream completion separately.
pub async fn request_logger(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    let status = response.status();
    let duration_ms = start.elapsed().as_millis();

    if status.is_server_error() {
        tracing::warn!(method = %method, path = %path, status = status.as_u16(), duration_ms = %duration_ms, "HTTP request");
    } else {
        tracing::info!(method = %method, path = %path, status = status.as_u16(), duration_ms = %duration_ms, "HTTP request");
    }

    response
}
