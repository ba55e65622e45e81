use chrono::{DateTime, Utc};
use serde::Serialize;

/// Role assigned to self-registered accounts.
pub const DEFAULT_ROLE: &str = "user";

/// Registered account.
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    /// Lower-cased, unique.
    pub email: String,
    /// Argon2 PHC string, see [`crate::users::password`].
    pub password_hash: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
    /// `None` until the first successful login.
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_session_ip: Option<String>,
}

/// Fields supplied when registering a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password_hash: String,
    pub last_session_ip: Option<String>,
}

/// Public view of a user, safe to return to callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            email: user.email.clone(),
            role: user.role.clone(),
            created_at: user.created_at,
        }
    }
}
