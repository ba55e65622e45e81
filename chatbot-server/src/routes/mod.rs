//! HTTP route table.

pub mod chat;
pub mod health;
pub mod user;

use std::sync::Arc;

use axum::Router;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::AppState;

/// Routes mounted under `/api/v1`.
pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .merge(user::router())
        .merge(chat::router(state))
}

/// Decode a JSON request body, reporting any failure as a validation error.
pub(crate) fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    if body.is_empty() {
        return Err(Error::Validation("missing request body".to_string()));
    }
    serde_json::from_slice(body)
        .map_err(|e| Error::Validation(format!("malformed JSON body: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatbot_common::ChatRequest;

    #[test]
    fn test_parse_json_empty_body() {
        let err = parse_json::<ChatRequest>(b"").unwrap_err();
        assert_eq!(err.to_string(), "Invalid request: missing request body");
    }

    #[test]
    fn test_parse_json_malformed() {
        let err = parse_json::<ChatRequest>(b"{\"model\":").unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.starts_with("malformed JSON body")));
    }

    #[test]
    fn test_parse_json_missing_field() {
        let err = parse_json::<ChatRequest>(br#"{"messages":[]}"#).unwrap_err();
        assert!(err.to_string().contains("missing field `model`"));
    }
}
