//! # Database Errors
//!
//! [`DbError`] is what every repository, the POS source and the report
//! builder return. Accounting failures from `backoffice-core` pass through
//! as [`DbError::Core`] untouched, so a caller can still match on
//! `AssignmentConflict` or `ImmutableReturn` after a database round trip:
//!
//! ```rust,ignore
//! if let Err(e) = db.vat_returns().remove_invoice(&id, &invoice).await {
//!     if matches!(e.as_core(), Some(CoreError::ImmutableReturn { .. })) {
//!         // already filed
//!     }
//! }
//! ```

use backoffice_core::{CoreError, ValidationError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    /// A row looked up by ID doesn't exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A UNIQUE index rejected the write. `constraint` is SQLite's
    /// `table.column` list, e.g. `invoices.external_id`.
    #[error("Duplicate value for {constraint}")]
    UniqueViolation { constraint: String },

    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// A stored value no longer parses, e.g. a TEXT amount that isn't a
    /// decimal or a department outside the known set.
    #[error("Cannot decode column {column}: '{value}'")]
    Decode { column: String, value: String },

    /// An accounting rule rejected the operation.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The file couldn't be opened, or the pool is closed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Every connection stayed busy past the acquire timeout.
    #[error("Connection pool exhausted")]
    PoolExhausted,

    #[error("Query failed: {0}")]
    Query(String),
}

impl DbError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn decode(column: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::Decode {
            column: column.into(),
            value: value.into(),
        }
    }

    /// The wrapped accounting error, if this is one.
    pub fn as_core(&self) -> Option<&CoreError> {
        match self {
            DbError::Core(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DbError::NotFound { .. } | DbError::Core(CoreError::NotFound { .. })
        )
    }
}

impl From<ValidationError> for DbError {
    fn from(err: ValidationError) -> Self {
        DbError::Core(CoreError::Validation(err))
    }
}

const UNIQUE_PREFIX: &str = "UNIQUE constraint failed: ";

/// ```text
/// RowNotFound                         → NotFound
/// "UNIQUE constraint failed: t.c"     → UniqueViolation { constraint: "t.c" }
/// "FOREIGN KEY constraint failed"     → ForeignKeyViolation
/// PoolTimedOut                        → PoolExhausted
/// PoolClosed                          → ConnectionFailed
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::not_found("Row", "unknown"),
            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();
                if let Some(constraint) = msg.strip_prefix(UNIQUE_PREFIX) {
                    DbError::UniqueViolation {
                        constraint: constraint.to_string(),
                    }
                } else if msg.starts_with("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation(msg.to_string())
                } else {
                    DbError::Query(msg.to_string())
                }
            }
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            sqlx::Error::PoolClosed => DbError::ConnectionFailed("pool is closed".to_string()),
            other => DbError::Query(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

pub type DbResult<T> = Result<T, DbError>;
