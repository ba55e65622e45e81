use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use super::{StoreError, UserStore};
use crate::models::user::{NewUser, User, DEFAULT_ROLE};

const USER_COLUMNS: &str =
    "id, first_name, last_name, email, password_hash, role, created_at, last_login_at, last_session_ip";

/// SQLite-backed user store.
pub struct SqliteUserStore {
    conn: Mutex<Connection>,
}

impl SqliteUserStore {
    /// Open (or create) the database at `path`. `:memory:` gives an
    /// ephemeral store.
    pub fn new(path: &str) -> Result<Self, StoreError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()
        } else {
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::IoError(e.to_string()))?;
            }
            Connection::open(path)
        }
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_login_at TEXT,
                last_session_ip TEXT
            )",
            [],
        )
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        tracing::info!("User store initialized with database: {}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn find_one(&self, column: &str, value: &str) -> Result<Option<User>, StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        conn.query_row(
            &format!("SELECT {} FROM users WHERE {} = ?1", USER_COLUMNS, column),
            params![value],
            row_to_user,
        )
        .optional()
        .map_err(|e| StoreError::DatabaseError(e.to_string()))
    }
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    let created_at: String = row.get(6)?;
    let last_login_at: Option<String> = row.get(7)?;
    Ok(User {
        id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        email: row.get(3)?,
        password_hash: row.get(4)?,
        role: row.get(5)?,
        created_at: parse_timestamp(&created_at),
        last_login_at: last_login_at.as_deref().map(parse_timestamp),
        last_session_ip: row.get(8)?,
    })
}

impl UserStore for SqliteUserStore {
    fn create_user(&self, new_user: NewUser) -> Result<User, StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            email: new_user.email,
            password_hash: new_user.password_hash,
            role: DEFAULT_ROLE.to_string(),
            created_at: Utc::now(),
            last_login_at: None,
            last_session_ip: new_user.last_session_ip,
        };

        conn.execute(
            "INSERT INTO users (id, first_name, last_name, email, password_hash, role, created_at, last_session_ip)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                user.id,
                user.first_name,
                user.last_name,
                user.email,
                user.password_hash,
                user.role,
                user.created_at.to_rfc3339(),
                user.last_session_ip,
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(ref err, _)
                if err.code == ErrorCode::ConstraintViolation =>
            {
                StoreError::DuplicateEmail(user.email.clone())
            }
            other => StoreError::DatabaseError(other.to_string()),
        })?;

        tracing::info!("Created new user: {} ({})", user.id, user.email);
        Ok(user)
    }

    fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.find_one("email", email)
    }

    fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        self.find_one("id", id)
    }

    fn record_login(&self, id: &str, ip: Option<&str>) -> Result<(), StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        conn.execute(
            "UPDATE users SET last_login_at = ?1, last_session_ip = COALESCE(?2, last_session_ip) WHERE id = ?3",
            params![Utc::now().to_rfc3339(), ip, id],
        )
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        tracing::debug!("Recorded login for user: {}", id);
        Ok(())
    }
}
