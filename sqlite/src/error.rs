//! Error types for the SQLite inventory store.
//!
//! One error type covers identity, schema, entity and storage failures so
//! callers can match on the outcome of any store operation.

use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Registration with a username that is already taken.
    #[error("username '{0}' is already taken")]
    DuplicateUsername(String),

    /// Unknown user, deactivated user, or wrong password.
    #[error("invalid username or password")]
    InvalidCredentials,

    /// Session token is unknown, expired, or belongs to a deactivated user.
    #[error("session expired or invalid")]
    SessionExpired,

    /// The principal's role does not grant the required permission.
    #[error("permission denied: requires '{0}'")]
    PermissionDenied(String),

    /// ADD of a column name that is already live.
    #[error("column '{0}' already exists")]
    DuplicateColumn(String),

    /// Reference to a column that is not live.
    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    /// No entity with this id (or no live one, for mutations).
    #[error("entity {0} not found")]
    NotFound(i64),

    /// A value violates its column definition.
    #[error("invalid value for column '{column}': {reason}")]
    InvalidValue { column: String, reason: String },

    /// A column definition is rejected.
    #[error("invalid column definition: {0}")]
    InvalidDefinition(String),

    /// Malformed caller input outside column values (usernames, setting names).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Referenced user does not exist or is already deactivated.
    #[error("user '{0}' not found")]
    UserNotFound(String),

    /// Referenced role does not exist.
    #[error("role '{0}' not found")]
    RoleNotFound(String),

    /// The `allow_registration` setting is off.
    #[error("registration is disabled")]
    RegistrationDisabled,

    /// The database is locked by another writer; the operation may be retried.
    #[error("storage busy: {0}")]
    StorageBusy(String),

    /// Live state and logs disagree.
    #[error("storage corrupt: {0}")]
    StorageCorrupt(String),

    /// Any other SQLite failure.
    #[error("database error: {0}")]
    Storage(rusqlite::Error),

    /// Password hashing failure.
    #[error("password hashing error: {0}")]
    Password(String),

    /// JSON encoding of a stored definition failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Table prefix contains invalid characters.
    #[error("invalid prefix '{0}': must contain only alphanumeric characters and underscores")]
    InvalidPrefix(String),

    /// Migration lifecycle operation failure.
    #[error("migration error: {0}")]
    MigrationError(String),
}

impl StoreError {
    /// Returns `true` if the operation failed only because of lock contention.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageBusy(_))
    }

    pub(crate) fn invalid_value(column: &str, reason: impl ToString) -> Self {
        Self::InvalidValue {
            column: column.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
                Self::StorageBusy(err.to_string())
            }
            _ => Self::Storage(err),
        }
    }
}

/// Convenience alias for results with [`StoreError`].
pub type Result<T> = std::result::Result<T, StoreError>;
