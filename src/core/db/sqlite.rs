/// SQLite Connector Module
///
/// This module implements the `Connector` contract for SQLite files:
/// connection lifecycle, table listing and paging, metadata and statement
/// execution.

use crate::core::db::connector::{Connector, DatabaseInfo, DatabaseKind, Interrupt, SortKey};
use crate::core::db::query::{execute_statement, quote_identifier, with_deadline, QueryResult};
use crate::core::db::schema::{self, TableSchema};
use crate::core::{DbPeekError, Result};
use once_cell::sync::OnceCell;
use rusqlite::{Connection, OpenFlags};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Deadline for the internal statements behind table paging
const TABLE_DATA_TIMEOUT: Duration = Duration::from_secs(30);

/// Canonical paths of every database file opened in this process.
///
/// A file may be held by at most one connector at a time.
static OPEN_FILES: OnceCell<Mutex<HashSet<PathBuf>>> = OnceCell::new();

fn open_files() -> &'static Mutex<HashSet<PathBuf>> {
    OPEN_FILES.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Claims `path` for this process, failing if another connector holds it.
fn claim(path: &Path) -> Result<()> {
    let mut files = open_files()
        .lock()
        .map_err(|_| DbPeekError::Connection("Failed to acquire open file registry".to_string()))?;
    if !files.insert(path.to_path_buf()) {
        return Err(DbPeekError::Connection(format!(
            "Database is already open: {}",
            path.display()
        )));
    }
    Ok(())
}

fn release(path: &Path) {
    match open_files().lock() {
        Ok(mut files) => {
            files.remove(path);
        }
        Err(_) => warn!(path = %path.display(), "open file registry poisoned; claim not released"),
    }
}

/// An open SQLite database and the path it was opened from
#[derive(Debug)]
struct OpenDatabase {
    connection: Connection,
    /// Path as passed to `connect`
    path: PathBuf,
    /// Canonical path, the key in the open file registry
    canonical: PathBuf,
}

/// Connector for SQLite database files
#[derive(Debug, Default)]
pub struct SqliteConnector {
    db: Option<OpenDatabase>,
}

impl SqliteConnector {
    /// Creates a disconnected connector
    pub fn new() -> Self {
        SqliteConnector { db: None }
    }

    fn connection(&self) -> Result<&Connection> {
        self.db
            .as_ref()
            .map(|db| &db.connection)
            .ok_or_else(|| DbPeekError::Connection("Not connected to database".to_string()))
    }

    /// Checks the file before handing it to SQLite so that the error names
    /// the actual problem.
    fn validate_path(path: &Path) -> Result<PathBuf> {
        if !path.is_file() {
            return Err(DbPeekError::Connection(format!(
                "File not found: {}",
                path.display()
            )));
        }
        match DatabaseKind::from_path(path) {
            Ok(DatabaseKind::Sqlite) => {}
            Err(e) => return Err(DbPeekError::Connection(e.to_string())),
        }
        Ok(path.canonicalize()?)
    }

    /// Opens the file without ever creating it and proves it is a database
    fn open(path: &Path) -> Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)
            .map_err(|e| DbPeekError::Connection(format!("Failed to open database: {}", e)))?;

        // SQLite opens lazily; the first read of the schema fails on files
        // that are not databases.
        conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))
            .map_err(|e| DbPeekError::Connection(format!("Not a valid SQLite database: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| DbPeekError::Connection(format!("Failed to configure connection: {}", e)))?;
        Ok(conn)
    }

    fn require_table(&self, conn: &Connection, table: &str) -> Result<()> {
        match schema::table_ddl(conn, table)? {
            Some(_) => Ok(()),
            None => Err(DbPeekError::NotFound(format!("table '{}' does not exist", table))),
        }
    }
}

impl Connector for SqliteConnector {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Sqlite
    }

    fn connect(&mut self, path: &Path) -> Result<()> {
        let canonical = Self::validate_path(path)?;

        // Reconnecting to the file already held is allowed
        if self.db.as_ref().map(|db| &db.canonical) == Some(&canonical) {
            self.disconnect();
        }

        claim(&canonical)?;
        let connection = match Self::open(path) {
            Ok(conn) => conn,
            Err(e) => {
                release(&canonical);
                return Err(e);
            }
        };

        self.disconnect();
        info!(path = %path.display(), "connected to SQLite database");
        self.db = Some(OpenDatabase {
            connection,
            path: path.to_path_buf(),
            canonical,
        });
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(db) = self.db.take() {
            if let Err((_, e)) = db.connection.close() {
                warn!(error = %e, "error while closing database");
            }
            release(&db.canonical);
            info!(path = %db.path.display(), "disconnected");
        }
    }

    fn is_connected(&self) -> bool {
        self.db.is_some()
    }

    fn file_path(&self) -> Option<&Path> {
        self.db.as_ref().map(|db| db.path.as_path())
    }

    fn get_tables(&self) -> Result<Vec<String>> {
        schema::list_objects(self.connection()?, "table")
    }

    fn get_views(&self) -> Result<Vec<String>> {
        schema::list_objects(self.connection()?, "view")
    }

    fn get_schema(&self, table: &str) -> Result<TableSchema> {
        TableSchema::from_connection(self.connection()?, table)
    }

    fn get_row_count(&self, table: &str) -> Result<u64> {
        let conn = self.connection()?;
        self.require_table(conn, table)?;
        schema::count_rows(conn, table)
    }

    fn get_table_data(
        &self,
        table: &str,
        offset: u64,
        limit: u64,
        sort: Option<&SortKey>,
    ) -> Result<QueryResult> {
        let conn = self.connection()?;
        self.require_table(conn, table)?;

        let mut sql = format!("SELECT * FROM {}", quote_identifier(table));
        if let Some(sort) = sort {
            let known = schema::get_table_columns(conn, table)?
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(&sort.column));
            if !known {
                return Err(DbPeekError::NotFound(format!(
                    "column '{}' does not exist in table '{}'",
                    sort.column, table
                )));
            }
            let direction = if sort.descending { "DESC" } else { "ASC" };
            sql.push_str(&format!(" ORDER BY {} {}", quote_identifier(&sort.column), direction));
        }
        // SQLite takes LIMIT as a signed 64-bit integer
        let limit = limit.min(i64::MAX as u64);
        let offset = offset.min(i64::MAX as u64);
        sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset));

        debug!(table, offset, limit, "fetching table page");
        execute_statement(conn, &sql, TABLE_DATA_TIMEOUT)
    }

    fn execute_query(&mut self, sql: &str, timeout: Duration) -> Result<QueryResult> {
        execute_statement(self.connection()?, sql, timeout)
    }

    fn database_info(&self) -> Result<DatabaseInfo> {
        let conn = self.connection()?;
        let started = Instant::now();
        let info = with_deadline(conn, TABLE_DATA_TIMEOUT, |conn| {
            let engine_version: String = conn.query_row("SELECT sqlite_version()", [], |r| r.get(0))?;
            let page_size: i64 = conn.query_row("PRAGMA page_size", [], |r| r.get(0))?;
            let page_count: i64 = conn.query_row("PRAGMA page_count", [], |r| r.get(0))?;
            let encoding: String = conn.query_row("PRAGMA encoding", [], |r| r.get(0))?;
            Ok(DatabaseInfo {
                engine_version,
                page_size: page_size.max(0) as u64,
                page_count: page_count.max(0) as u64,
                file_size: (page_size.max(0) as u64) * (page_count.max(0) as u64),
                encoding,
            })
        })?;
        debug!(elapsed_us = started.elapsed().as_micros() as u64, "read database info");
        Ok(info)
    }

    fn interrupter(&self) -> Option<Arc<dyn Interrupt>> {
        let conn = self.connection().ok()?;
        Some(Arc::new(conn.get_interrupt_handle()))
    }
}

impl Drop for SqliteConnector {
    fn drop(&mut self) {
        self.disconnect();
    }
}
