//! Backend error types

use thiserror::Error;

/// Errors raised by storage backends
#[derive(Error, Debug)]
pub enum BackendError {
    /// SQLite call failed
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Schema gate refused to operate
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Connection pool unusable
    #[error("Pool error: {0}")]
    Pool(String),

    /// Blocking task was cancelled or panicked
    #[error("Backend task failed: {0}")]
    Task(String),

    /// Label ID list could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No free physical table name could be allocated
    #[error("Could not allocate a table name for metric {0:?}")]
    TableNameConflict(String),

    /// Requested catalog entry does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Chunk intervals must be at least one millisecond
    #[error("Invalid chunk interval: {0:?}")]
    InvalidChunkInterval(std::time::Duration),

    /// Parallel key and value arrays of different lengths
    #[error("Got {keys} label keys but {values} values")]
    KeyValueMismatch { keys: usize, values: usize },

    /// Any other backend-side failure
    #[error("Backend error: {0}")]
    Internal(String),
}

/// Errors raised by the schema version gate
#[derive(Error, Debug)]
pub enum SchemaError {
    /// A previous migration did not finish
    #[error("Schema is dirty at version {0}, manual repair required")]
    Dirty(i64),

    /// Schema is at a version this build does not understand
    #[error("Unexpected schema version: found {found}, expected {expected}")]
    UnexpectedVersion { found: i64, expected: i64 },

    /// No migration has ever been applied
    #[error("Schema is not initialized, run migrations first")]
    Uninitialized,
}

impl From<tokio::task::JoinError> for BackendError {
    fn from(err: tokio::task::JoinError) -> Self {
        BackendError::Task(err.to_string())
    }
}

/// Result type alias for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BackendError::Schema(SchemaError::Dirty(1));
        assert_eq!(
            err.to_string(),
            "Schema error: Schema is dirty at version 1, manual repair required"
        );

        let err = BackendError::Schema(SchemaError::UnexpectedVersion {
            found: 3,
            expected: 1,
        });
        assert_eq!(
            err.to_string(),
            "Schema error: Unexpected schema version: found 3, expected 1"
        );
    }

    #[test]
    fn test_sqlite_error_conversion() {
        let err: BackendError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, BackendError::Database(_)));
    }
}
