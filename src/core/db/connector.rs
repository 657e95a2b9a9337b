/// Connector Contract Module
///
/// Defines the `Connector` trait every database backend implements, the
/// `DatabaseKind` tag used to pick a backend from a file path, and the small
/// value types shared by all connectors.

use crate::core::db::query::QueryResult;
use crate::core::db::schema::TableSchema;
use crate::core::db::sqlite::SqliteConnector;
use crate::core::{DbPeekError, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Database engines dbpeek can open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseKind {
    /// SQLite 3 database files
    Sqlite,
}

impl DatabaseKind {
    /// All kinds, in the order they are probed
    pub const ALL: [DatabaseKind; 1] = [DatabaseKind::Sqlite];

    /// Human readable engine name
    pub fn name(self) -> &'static str {
        match self {
            DatabaseKind::Sqlite => "SQLite",
        }
    }

    /// File extensions (lowercase, with leading dot) handled by this kind
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            DatabaseKind::Sqlite => &[".db", ".sqlite", ".sqlite3"],
        }
    }

    /// Picks the database kind from the extension of `path`.
    ///
    /// # Errors
    ///
    /// Returns `DbPeekError::UnsupportedDatabase` when no kind claims the
    /// extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_lowercase()))
            .unwrap_or_default();

        DatabaseKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.extensions().contains(&ext.as_str()))
            .ok_or_else(|| {
                DbPeekError::UnsupportedDatabase(format!(
                    "Unsupported file type: '{}'. Supported types: {}",
                    ext,
                    supported_extensions().join(", ")
                ))
            })
    }

    /// Creates a disconnected connector for this kind
    pub fn create_connector(self) -> Box<dyn Connector> {
        match self {
            DatabaseKind::Sqlite => Box::new(SqliteConnector::new()),
        }
    }
}

/// Every extension any connector accepts
pub fn supported_extensions() -> Vec<&'static str> {
    DatabaseKind::ALL
        .iter()
        .flat_map(|kind| kind.extensions().iter().copied())
        .collect()
}

/// Whether some connector can open `path`, judging by its extension only
pub fn is_supported(path: &Path) -> bool {
    DatabaseKind::from_path(path).is_ok()
}

/// Creates the matching connector for `path` and connects it.
pub fn open_connector(path: &Path) -> Result<Box<dyn Connector>> {
    let mut connector = DatabaseKind::from_path(path)?.create_connector();
    connector.connect(path)?;
    Ok(connector)
}

/// Sort key for table paging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    /// Column to order by
    pub column: String,
    /// Descending instead of ascending order
    pub descending: bool,
}

impl SortKey {
    pub fn ascending(column: impl Into<String>) -> Self {
        SortKey {
            column: column.into(),
            descending: false,
        }
    }

    pub fn descending(column: impl Into<String>) -> Self {
        SortKey {
            column: column.into(),
            descending: true,
        }
    }
}

/// File level metadata of an open database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseInfo {
    pub engine_version: String,
    pub page_size: u64,
    pub page_count: u64,
    /// page_size * page_count
    pub file_size: u64,
    pub encoding: String,
}

/// Interrupts whatever statement is running on a connection.
///
/// Implementations must be callable from any thread while the connection
/// itself is in use elsewhere.
pub trait Interrupt: Send + Sync {
    fn interrupt(&self);
}

impl Interrupt for rusqlite::InterruptHandle {
    fn interrupt(&self) {
        rusqlite::InterruptHandle::interrupt(self)
    }
}

/// Access to one database file.
///
/// All operations except `connect` and `disconnect` fail with
/// `DbPeekError::Connection` while disconnected.
pub trait Connector: Send {
    /// The engine behind this connector
    fn kind(&self) -> DatabaseKind;

    /// Opens `path`, closing any connection this connector already holds.
    fn connect(&mut self, path: &Path) -> Result<()>;

    /// Closes the connection. Calling it while disconnected is a no-op.
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// Path of the open database file
    fn file_path(&self) -> Option<&Path>;

    /// User tables, sorted by name
    fn get_tables(&self) -> Result<Vec<String>>;

    /// Views, sorted by name
    fn get_views(&self) -> Result<Vec<String>>;

    /// Columns, keys, indexes, row count and DDL of `table`.
    ///
    /// Fails with `DbPeekError::NotFound` if no such table or view exists.
    fn get_schema(&self, table: &str) -> Result<TableSchema>;

    /// Number of rows in `table`
    fn get_row_count(&self, table: &str) -> Result<u64>;

    /// One page of rows from `table`.
    ///
    /// Without a sort key the row order is whatever the engine produces and
    /// is not guaranteed to be stable between calls.
    fn get_table_data(
        &self,
        table: &str,
        offset: u64,
        limit: u64,
        sort: Option<&SortKey>,
    ) -> Result<QueryResult>;

    /// Runs a single SQL statement, interrupting it after `timeout`.
    ///
    /// Side effects are committed by the engine immediately.
    fn execute_query(&mut self, sql: &str, timeout: Duration) -> Result<QueryResult>;

    /// File level metadata
    fn database_info(&self) -> Result<DatabaseInfo>;

    /// Handle that interrupts the running statement, if the engine can
    fn interrupter(&self) -> Option<Arc<dyn Interrupt>>;
}
