//! Error kinds surfaced by the repository and the storage backends.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A required field is missing or malformed, e.g. an empty base code.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The targeted entry code (or user) does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The key is already taken. Raised when two allocations race to the
    /// same suffix, or when an entry code is inserted twice.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Connection, pool, timeout or any other backend fault.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) if is_unique_violation(db_err.as_ref()) => {
                Error::DuplicateKey(db_err.message().to_string())
            }
            // string_data_right_truncation: a value wider than its column.
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("22001") => {
                Error::InvalidInput(db_err.message().to_string())
            }
            sqlx::Error::RowNotFound => Error::NotFound("no matching row".to_string()),
            sqlx::Error::Configuration(e) => Error::Config(e.to_string()),
            other => Error::StorageUnavailable(other.to_string()),
        }
    }
}

// SQLite reports primary key and unique collisions under separate extended codes.
fn is_unique_violation(err: &dyn sqlx::error::DatabaseError) -> bool {
    err.is_unique_violation()
        || matches!(err.code().as_deref(), Some("1555") | Some("2067") | Some("23505"))
}
