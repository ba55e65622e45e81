pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod routes;
pub mod runtime;
pub mod state;
pub mod test_util;
pub mod users;

pub use auth::{AuthUser, JwtAuth};
pub use config::Config;
pub use error::Error;
pub use runtime::{ModelRuntime, OllamaRuntime};
pub use state::AppState;
pub use users::SqliteUserStore;

use std::sync::Arc;

use axum::http::header;
use axum::{middleware, Router};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the full HTTP application: health probe at `/`, everything else
/// under `/api/v1`.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::health::router())
        .nest("/api/v1", routes::api_router(state.clone()))
        .layer(middleware::from_fn(logging::request_logger))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(state)
}

/// Permissive CORS that still allows credentials: the request's origin,
/// method and headers are echoed back.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
        .expose_headers([header::CONTENT_TYPE])
}
