//! Common error types for tentwatch

use thiserror::Error;

/// Common result type for tentwatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across tentwatch services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unregistered device, unknown site or record
    #[error("Not found: {0}")]
    NotFound(String),

    /// Missing or malformed input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Access to a site owned by another tenant
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Lost a race on a uniquely keyed row. Retried internally.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the database rejected a write on a UNIQUE constraint.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db_err)) => db_err.is_unique_violation(),
            _ => false,
        }
    }

    /// True for SQLite writer contention ("database is locked" / busy).
    pub fn is_lock_contention(&self) -> bool {
        match self {
            Error::Database(db_err) => {
                let msg = db_err.to_string();
                msg.contains("database is locked") || msg.contains("database table is locked")
            }
            _ => false,
        }
    }
}
