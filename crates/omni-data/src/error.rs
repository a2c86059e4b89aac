//! Error types for the data layer.

use thiserror::Error;

/// Primary error type for data-layer operations.
#[derive(Debug, Error)]
pub enum DataError {
    /// Underlying database operation failed.
    #[error("database operation failed")]
    Database {
        /// Operation identifier.
        operation: &'static str,
        /// Source database error.
        source: sqlx::Error,
    },
    /// Schema migration failed.
    #[error("migration failed")]
    Migrate {
        /// Source migration error.
        source: sqlx::migrate::MigrateError,
    },
    /// The requested row does not exist.
    #[error("row not found")]
    NotFound {
        /// Entity label for diagnostics.
        entity: &'static str,
    },
    /// The operation conflicts with current state (lost race, guarded
    /// transition refused, duplicate claim).
    #[error("conflicting state")]
    Conflict {
        /// Machine-readable reason.
        reason: &'static str,
    },
    /// A stored status label was not recognized.
    #[error("unknown status label")]
    UnknownStatus {
        /// Offending label.
        value: String,
    },
}

/// Convenience alias for data-layer results.
pub type DataResult<T> = Result<T, DataError>;

/// Wrap an `sqlx::Error` with the operation tag.
pub(crate) fn db(operation: &'static str) -> impl FnOnce(sqlx::Error) -> DataError {
    move |source| DataError::Database { operation, source }
}
