/// Query Execution Module
///
/// This module executes single SQL statements against a SQLite connection
/// under a deadline and turns rows into owned `Value`s.
///
/// The deadline is enforced by a watchdog thread that calls SQLite's
/// interrupt handle. The watchdog is joined before the statement's result is
/// returned, so an interrupt can never hit the next statement on the same
/// connection.

use crate::core::{DbPeekError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::ValueRef;
use rusqlite::{Batch, Connection, ErrorCode};
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Column name used for the result of statements that return no rows
pub const AFFECTED_ROWS_COLUMN: &str = "affected_rows";

/// Longest lock wait SQLite accepts (`sqlite3_busy_timeout` takes an `i32` of ms)
const MAX_BUSY_TIMEOUT: Duration = Duration::from_millis(i32::MAX as u64);

/// A single cell of a result set
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    fn from_ref(value: ValueRef) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Formats the value the way it is written into exported files: NULL
    /// becomes the empty string, blobs become lowercase hex.
    pub fn to_export_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// Formats a real the way SQLite prints it: integral values keep a `.0`.
fn format_real(f: f64) -> String {
    let s = f.to_string();
    if f.is_finite() && !s.contains('.') {
        format!("{}.0", s)
    } else {
        s
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => f.write_str(&format_real(*r)),
            Value::Text(t) => f.write_str(t),
            Value::Blob(b) => f.write_str(&hex::encode(b)),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Integer(i) => serializer.serialize_i64(*i),
            Value::Real(r) if r.is_finite() => serializer.serialize_f64(*r),
            Value::Real(_) => serializer.serialize_none(),
            Value::Text(t) => serializer.serialize_str(t),
            Value::Blob(b) => serializer.serialize_str(&hex::encode(b)),
        }
    }
}

/// Represents the result of a SQL statement
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// Column names from the query result
    pub columns: Vec<String>,
    /// Rows of data, each exactly `columns.len()` long
    pub rows: Vec<Vec<Value>>,
    /// Number of rows returned, or rows changed for statements without columns
    pub row_count: usize,
    /// Wall time spent executing the statement
    pub elapsed: Duration,
    /// Set for INSERT/UPDATE/DELETE/DDL statements
    pub affected_rows: Option<usize>,
}

impl QueryResult {
    /// Creates a new QueryResult from column names and row data
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>, elapsed: Duration) -> Self {
        let row_count = rows.len();
        QueryResult {
            columns,
            rows,
            row_count,
            elapsed,
            affected_rows: None,
        }
    }

    /// Result of a statement that returns no columns
    pub fn affected(changes: usize, elapsed: Duration) -> Self {
        QueryResult {
            columns: vec![AFFECTED_ROWS_COLUMN.to_string()],
            rows: vec![vec![Value::Integer(changes as i64)]],
            row_count: changes,
            elapsed,
            affected_rows: Some(changes),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Represents different SQL statement types for introspection
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatementType {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Drop,
    Alter,
    /// BEGIN/COMMIT/ROLLBACK/SAVEPOINT/RELEASE
    Transaction,
    Pragma,
    Other,
}

/// First keyword of a statement, skipping whitespace and comments
static LEADING_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^(?:\s+|--[^\n]*(?:\n|$)|/\*.*?\*/)*([A-Za-z]+)")
        .expect("leading keyword pattern is valid")
});

impl StatementType {
    /// Classifies a statement by its first keyword.
    ///
    /// `WITH` is treated as a SELECT, which holds for the common-table
    /// expressions users type into a viewer.
    pub fn from_sql(sql: &str) -> Self {
        let keyword = LEADING_KEYWORD
            .captures(sql)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_uppercase())
            .unwrap_or_default();

        match keyword.as_str() {
            "SELECT" | "WITH" | "VALUES" => StatementType::Select,
            "INSERT" | "REPLACE" => StatementType::Insert,
            "UPDATE" => StatementType::Update,
            "DELETE" => StatementType::Delete,
            "CREATE" => StatementType::Create,
            "DROP" => StatementType::Drop,
            "ALTER" => StatementType::Alter,
            "BEGIN" | "COMMIT" | "END" | "ROLLBACK" | "SAVEPOINT" | "RELEASE" => {
                StatementType::Transaction
            }
            "PRAGMA" => StatementType::Pragma,
            _ => StatementType::Other,
        }
    }

    /// Whether `sqlite3_changes()` describes this statement. Schema,
    /// transaction and pragma statements leave the previous count in place.
    pub fn reports_changes(self) -> bool {
        !matches!(
            self,
            StatementType::Create
                | StatementType::Drop
                | StatementType::Alter
                | StatementType::Transaction
                | StatementType::Pragma
        )
    }
}

/// Quotes an identifier for interpolation into SQL
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn is_interrupt(err: &rusqlite::Error) -> bool {
    err.sqlite_error_code() == Some(ErrorCode::OperationInterrupted)
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}

/// Runs `work` on `conn`, interrupting it once `timeout` has elapsed.
///
/// An interrupt caused by the deadline is reported as
/// `DbPeekError::Timeout`; an interrupt from anywhere else (a user
/// cancellation) stays a `Query` error.
pub fn with_deadline<T>(
    conn: &Connection,
    timeout: Duration,
    work: impl FnOnce(&Connection) -> rusqlite::Result<T>,
) -> Result<T> {
    let interrupt = conn.get_interrupt_handle();
    let fired = Arc::new(AtomicBool::new(false));
    let (done_tx, done_rx) = mpsc::channel::<()>();

    let watchdog = {
        let fired = Arc::clone(&fired);
        thread::Builder::new()
            .name("query-deadline".to_string())
            .spawn(move || {
                if let Err(mpsc::RecvTimeoutError::Timeout) = done_rx.recv_timeout(timeout) {
                    fired.store(true, Ordering::SeqCst);
                    interrupt.interrupt();
                }
            })?
    };

    let outcome = work(conn);

    // Wakes the watchdog; it is gone already if the deadline passed.
    let _ = done_tx.send(());
    if watchdog.join().is_err() {
        warn!("query deadline watchdog panicked");
    }

    outcome.map_err(|e| {
        if is_busy(&e) || (is_interrupt(&e) && fired.load(Ordering::SeqCst)) {
            DbPeekError::Timeout(timeout)
        } else if is_interrupt(&e) {
            DbPeekError::Query("Query interrupted".to_string())
        } else {
            DbPeekError::Query(e.to_string())
        }
    })
}

fn empty_query() -> DbPeekError {
    DbPeekError::Query(
        "Cannot execute empty SQL query - please provide a valid SQL statement".to_string(),
    )
}

/// Collects every row of an already prepared statement
fn collect_rows(stmt: &mut rusqlite::Statement<'_>) -> rusqlite::Result<Vec<Vec<Value>>> {
    let column_count = stmt.column_count();
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(column_count);
        for i in 0..column_count {
            values.push(Value::from_ref(row.get_ref(i)?));
        }
        out.push(values);
    }
    Ok(out)
}

/// Executes one SQL statement and collects its result.
///
/// Statements that produce columns (SELECT, PRAGMA, `RETURNING` clauses) are
/// returned as rows; all other statements report the number of changed rows
/// in a single `affected_rows` column.
///
/// # Errors
///
/// - `DbPeekError::Query` for empty input, more than one statement, syntax
///   and runtime errors
/// - `DbPeekError::Timeout` when the statement outlives `timeout`
pub fn execute_statement(conn: &Connection, sql: &str, timeout: Duration) -> Result<QueryResult> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err(empty_query());
    }

    let kind = StatementType::from_sql(trimmed);
    debug!(statement = ?kind, "executing statement");
    if let Err(e) = conn.busy_timeout(timeout.min(MAX_BUSY_TIMEOUT)) {
        warn!(error = %e, "failed to set busy timeout");
    }

    let start = Instant::now();
    let result = with_deadline(conn, timeout, |conn| {
        let mut batch = Batch::new(conn, trimmed);
        let Some(mut stmt) = batch.next()? else {
            return Ok(None);
        };
        // Anything after the first statement other than whitespace and
        // comments is rejected without running any of it.
        if !matches!(batch.next(), Ok(None)) {
            return Err(rusqlite::Error::MultipleStatement);
        }
        if stmt.column_count() == 0 {
            let changes = stmt.execute([])?;
            let changes = if kind.reports_changes() { changes } else { 0 };
            return Ok(Some(QueryResult::affected(changes, Duration::ZERO)));
        }
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let rows = collect_rows(&mut stmt)?;
        Ok(Some(QueryResult::new(columns, rows, Duration::ZERO)))
    });

    let elapsed = start.elapsed();
    match result {
        // only comments
        Ok(None) => Err(empty_query()),
        Ok(Some(mut result)) => {
            result.elapsed = elapsed;
            debug!(rows = result.row_count, elapsed_ms = elapsed.as_millis() as u64, "statement finished");
            Ok(result)
        }
        Err(e) => {
            debug!(error = %e, elapsed_ms = elapsed.as_millis() as u64, "statement failed");
            Err(e)
        }
    }
}
