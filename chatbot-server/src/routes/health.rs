use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

use crate::AppState;

/// GET / - liveness probe. Fixed body, never touches the runtime.
async fn health() -> Json<Value> {
    Json(json!({ "HEALTH_CHECK": "OK", "CONNECTION": "OK" }))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(health))
}
