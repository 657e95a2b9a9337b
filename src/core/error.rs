/// dbpeek Error Module
///
/// This module defines the error taxonomy shared by the connector, the query
/// executor, the export service and the history store. Every failure the
/// shell can report to the user is one of these variants.
use std::time::Duration;
use thiserror::Error;

/// Comprehensive error type for dbpeek.
///
/// The variants follow the categories a user can act on:
/// - connection failures (file missing, not a database, already open)
/// - lookups of tables or columns that do not exist
/// - query failures (syntax or runtime) and timeouts
/// - export and other file system failures
/// - executor contention
#[derive(Error, Debug)]
pub enum DbPeekError {
    /// The database could not be opened, or the connector is not connected
    #[error("Connection error: {0}")]
    Connection(String),

    /// A named table, view or column does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// SQL syntax or runtime failure
    #[error("Query error: {0}")]
    Query(String),

    /// The statement ran past its deadline and was interrupted
    #[error("Query timed out after {:.1}s", .0.as_secs_f64())]
    Timeout(Duration),

    /// Another query is already running on this connection
    #[error("Executor busy: {0}")]
    Busy(String),

    /// The file extension maps to no known connector
    #[error("Unsupported database: {0}")]
    UnsupportedDatabase(String),

    /// Raw SQLite failures outside of user queries (history store, metadata)
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV serialization errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DbPeekError {
    /// Whether the connection must be reopened before it can be used again.
    ///
    /// Only connection failures are unrecoverable; after any other error the
    /// connection stays open for a retry.
    pub fn requires_reconnect(&self) -> bool {
        matches!(self, DbPeekError::Connection(_))
    }
}

/// Type alias for Result to use DbPeekError as the error type.
pub type Result<T> = std::result::Result<T, DbPeekError>;
