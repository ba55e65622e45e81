//! Error types for the chat relay.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::auth::AuthError;
use crate::users::StoreError;

/// Errors surfaced by the relay, the runtime client and the account endpoints.
///
/// Anything raised before a response has started is rendered as a JSON body
/// with a matching status. Once a stream has begun the status is committed,
/// so the error can only end the body early.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Runtime unreachable: {0}")]
    Connection(String),

    #[error("Malformed runtime payload: {0}")]
    Protocol(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Caller disconnected before the stream finished")]
    StreamAborted,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::ModelNotFound(_) => StatusCode::NOT_FOUND,
            Error::Connection(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Protocol(_) => StatusCode::BAD_GATEWAY,
            Error::Runtime(_) => StatusCode::BAD_GATEWAY,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::StreamAborted => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::Unauthorized(_) => "unauthorized",
            Error::Conflict(_) => "conflict",
            Error::ModelNotFound(_) => "model_not_found",
            Error::Connection(_) => "runtime_unreachable",
            Error::Protocol(_) => "protocol_error",
            Error::Runtime(_) => "runtime_error",
            Error::Timeout(_) => "timeout",
            Error::StreamAborted => "stream_aborted",
            Error::Storage(_) => "storage_error",
            Error::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        let body = Json(json!({
            "error": {
                "type": self.error_type(),
                "message": self.to_string()
            }
        }));

        (status, body).into_response()
    }
}

impl From<AuthError> for Error {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::TokenCreation(msg) => Error::Internal(msg),
            other => Error::Unauthorized(other.to_string()),
        }
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateEmail(email) => {
                Error::Conflict(format!("user with email {} already exists", email))
            }
            other => Error::Storage(other.to_string()),
        }
    }
}

impl From<chatbot_common::InvalidRequest> for Error {
    fn from(err: chatbot_common::InvalidRequest) -> Self {
        Error::Validation(err.0)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(Error::Validation("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::Unauthorized("x".into()).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(Error::ModelNotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(Error::Connection("x".into()).status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(Error::Protocol("x".into()).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(Error::Timeout("x".into()).status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_auth_error_becomes_unauthorized() {
        let err: Error = AuthError::MissingHeader.into();
        assert!(matches!(err, Error::Unauthorized(_)));
        assert_eq!(err.error_type(), "unauthorized");
    }

    #[test]
    fn test_duplicate_email_becomes_conflict() {
        let err: Error = StoreError::DuplicateEmail("a@b.c".to_string()).into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert!(err.to_string().contains("a@b.c"));
    }

    #[test]
    fn test_invalid_request_becomes_validation() {
        let err: Error = chatbot_common::InvalidRequest("messages must not be empty".into()).into();
        assert_eq!(err.to_string(), "Invalid request: messages must not be empty");
    }

    #[tokio::test]
    async fn test_error_response_body() {
        let response = Error::ModelNotFound("nope:1b".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["type"], "model_not_found");
        assert_eq!(json["error"]["message"], "Model not found: nope:1b");
    }
}
