//! Unified error type for the data layer
//!
//! Wraps backend-specific errors while preserving which backend produced them.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    /// SQLite database error
    #[error("SQLite error: {0}")]
    Sqlite(sqlx::Error),

    /// Migration failed
    #[error("Migration {version} ({name}) failed on {backend}: {error}")]
    MigrationFailed {
        backend: &'static str,
        version: i32,
        name: String,
        error: String,
    },

    /// A stored JSON column could not be encoded or decoded
    #[error("Serialization error on {backend}: {message}")]
    Serialization {
        backend: &'static str,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DataError {
    pub fn from_sqlite(e: sqlx::Error) -> Self {
        Self::Sqlite(e)
    }

    /// Check if this is a connection-related error that might be transient
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Sqlite(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            _ => false,
        }
    }

    /// Get the backend name that generated this error
    pub fn backend(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "sqlite",
            Self::MigrationFailed { backend, .. } => backend,
            Self::Serialization { backend, .. } => backend,
            Self::Config(_) | Self::Io(_) => "unknown",
        }
    }
}

impl From<crate::data::sqlite::SqliteError> for DataError {
    fn from(e: crate::data::sqlite::SqliteError) -> Self {
        match e {
            crate::data::sqlite::SqliteError::Database(e) => Self::Sqlite(e),
            crate::data::sqlite::SqliteError::MigrationFailed {
                version,
                name,
                error,
            } => Self::MigrationFailed {
                backend: "sqlite",
                version,
                name,
                error,
            },
            crate::data::sqlite::SqliteError::Json(e) => Self::Serialization {
                backend: "sqlite",
                message: e.to_string(),
            },
            crate::data::sqlite::SqliteError::Io(e) => Self::Io(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sqlite::SqliteError;

    #[test]
    fn test_sqlite_error_conversion() {
        let err: DataError = SqliteError::MigrationFailed {
            version: 2,
            name: "add_index".to_string(),
            error: "boom".to_string(),
        }
        .into();
        assert_eq!(err.backend(), "sqlite");
        assert_eq!(
            err.to_string(),
            "Migration 2 (add_index) failed on sqlite: boom"
        );
    }

    #[test]
    fn test_is_transient() {
        assert!(DataError::from_sqlite(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!DataError::from_sqlite(sqlx::Error::RowNotFound).is_transient());
        assert!(!DataError::Config("x".into()).is_transient());
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: DataError = SqliteError::Json(json_err).into();
        assert!(matches!(err, DataError::Serialization { backend: "sqlite", .. }));
    }
}
