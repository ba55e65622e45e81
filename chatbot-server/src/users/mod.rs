//! Registered user persistence.

pub mod password;
mod sqlite;

pub use sqlite::SqliteUserStore;

use crate::models::user::{NewUser, User};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Email already registered: {0}")]
    DuplicateEmail(String),
}

/// Storage for user accounts.
///
/// Implementations are synchronous; callers hold no lock across awaits.
pub trait UserStore: Send + Sync {
    /// Insert a user. Fails with `DuplicateEmail` if the email is taken.
    fn create_user(&self, user: NewUser) -> Result<User, StoreError>;

    fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError>;

    /// Stamp a successful login with the current time and caller address.
    fn record_login(&self, id: &str, ip: Option<&str>) -> Result<(), StoreError>;
}
