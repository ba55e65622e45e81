//! Caller authentication.

mod jwt;

pub use jwt::{AuthError, AuthUser, JwtAuth};

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::Error;
use crate::AppState;

/// Route precondition: reject the request unless it carries a valid token
/// for a user that still exists.
///
/// On success the `AuthUser` is placed in the request extensions for the
/// handler to pick up.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, Error> {
    let auth_user = state.auth.authenticate(request.headers()).map_err(|e| {
        tracing::info!("Rejected {}: {}", request.uri().path(), e);
        e
    })?;

    if state.users.find_by_id(&auth_user.id)?.is_none() {
        tracing::info!("Rejected {}: unknown user {}", request.uri().path(), auth_user.id);
        return Err(AuthError::UnknownUser(auth_user.id).into());
    }

    request.extensions_mut().insert(auth_user);
    Ok(next.run(request).await)
}
