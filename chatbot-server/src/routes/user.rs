//! Account endpoints: registration and login.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use chatbot_common::ApiResponse;
use serde::{Deserialize, Serialize};

use super::parse_json;
use crate::error::{Error, Result};
use crate::models::user::{NewUser, UserProfile};
use crate::users::password::{hash_password, verify_password};
use crate::AppState;

const PASSWORD_MIN_LEN: usize = 8;
const PASSWORD_MAX_LEN: usize = 16;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterUserPayload {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginUserPayload {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginData {
    pub access_token: String,
}

impl RegisterUserPayload {
    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("firstName", &self.first_name),
            ("lastName", &self.last_name),
            ("email", &self.email),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Validation(format!("{} is required", field)));
            }
        }
        if !looks_like_email(self.email.trim()) {
            return Err(Error::Validation(format!("invalid email: {}", self.email)));
        }
        let len = self.password.chars().count();
        if !(PASSWORD_MIN_LEN..=PASSWORD_MAX_LEN).contains(&len) {
            return Err(Error::Validation(format!(
                "password must be {} to {} characters",
                PASSWORD_MIN_LEN, PASSWORD_MAX_LEN
            )));
        }
        Ok(())
    }
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Caller address: first `X-Forwarded-For` hop, else the socket peer.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}

/// POST /api/v1/create - register a new user.
async fn create(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse<UserProfile>>> {
    let payload: RegisterUserPayload = parse_json(&body)?;
    payload.validate()?;

    let email = normalize_email(&payload.email);
    if state.users.find_by_email(&email)?.is_some() {
        return Err(Error::Conflict(format!("user with email {} already exists", email)));
    }

    let user = state.users.create_user(NewUser {
        first_name: payload.first_name.trim().to_string(),
        last_name: payload.last_name.trim().to_string(),
        email,
        password_hash: hash_password(&payload.password)?,
        last_session_ip: client_ip(&headers, peer.map(|ConnectInfo(addr)| addr)),
    })?;

    Ok(Json(ApiResponse::ok(
        "User successfully registered",
        UserProfile::from(&user),
    )))
}

/// POST /api/v1/login - exchange credentials for an access token.
async fn login(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse<LoginData>>> {
    let payload: LoginUserPayload = parse_json(&body)?;
    if payload.email.trim().is_empty() || payload.password.is_empty() {
        return Err(Error::Validation("email and password are required".to_string()));
    }

    let invalid = || Error::Unauthorized("invalid email or password".to_string());

    let user = state
        .users
        .find_by_email(&normalize_email(&payload.email))?
        .ok_or_else(invalid)?;

    if !verify_password(&payload.password, &user.password_hash) {
        return Err(invalid());
    }

    let access_token = state.auth.issue_token(&user.id, &user.email)?;
    state.users.record_login(
        &user.id,
        client_ip(&headers, peer.map(|ConnectInfo(addr)| addr)).as_deref(),
    )?;

    tracing::info!("User {} logged in", user.id);

    Ok(Json(ApiResponse::ok("Login successful", LoginData { access_token })))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/create", post(create))
        .route("/login", post(login))
}
