//! Storage module for the persisted query history
use crate::core::{DbPeekError, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, Row};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info};

const HISTORY_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS query_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    database_path TEXT NOT NULL,
    query_text TEXT NOT NULL,
    executed_at_ms INTEGER NOT NULL,
    elapsed_ms INTEGER NOT NULL,
    row_count INTEGER NOT NULL,
    success BOOLEAN NOT NULL,
    error_message TEXT
);
CREATE INDEX IF NOT EXISTS idx_query_history_executed_at ON query_history (executed_at_ms);
CREATE INDEX IF NOT EXISTS idx_query_history_database ON query_history (database_path);
"#;

const ENTRY_COLUMNS: &str =
    "id, database_path, query_text, executed_at_ms, elapsed_ms, row_count, success, error_message";

/// How a recorded query ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Error(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// One executed query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Assigned by the store; 0 until recorded
    pub id: i64,
    pub database_path: String,
    pub query: String,
    pub executed_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub row_count: u64,
    pub outcome: Outcome,
}

impl HistoryEntry {
    /// An entry for a query that completed, stamped with the current time
    pub fn success(
        database_path: impl Into<String>,
        query: impl Into<String>,
        elapsed: Duration,
        row_count: u64,
    ) -> Self {
        Self {
            id: 0,
            database_path: database_path.into(),
            query: query.into(),
            executed_at: Utc::now(),
            elapsed,
            row_count,
            outcome: Outcome::Success,
        }
    }

    /// An entry for a query that failed with `message`
    pub fn failure(
        database_path: impl Into<String>,
        query: impl Into<String>,
        elapsed: Duration,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            database_path: database_path.into(),
            query: query.into(),
            executed_at: Utc::now(),
            elapsed,
            row_count: 0,
            outcome: Outcome::Error(message.into()),
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Success => None,
            Outcome::Error(msg) => Some(msg),
        }
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let executed_at_ms: i64 = row.get(3)?;
        let elapsed_ms: i64 = row.get(4)?;
        let row_count: i64 = row.get(5)?;
        let success: bool = row.get(6)?;
        let error_message: Option<String> = row.get(7)?;
        Ok(Self {
            id: row.get(0)?,
            database_path: row.get(1)?,
            query: row.get(2)?,
            executed_at: Utc
                .timestamp_millis_opt(executed_at_ms)
                .single()
                .unwrap_or_default(),
            elapsed: Duration::from_millis(elapsed_ms.max(0) as u64),
            row_count: row_count.max(0) as u64,
            outcome: if success {
                Outcome::Success
            } else {
                Outcome::Error(error_message.unwrap_or_default())
            },
        })
    }
}

/// Aggregate figures over the whole history
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryStatistics {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Mean elapsed time of successful queries
    pub average_elapsed: Duration,
    pub databases: u64,
}

/// Escapes LIKE wildcards so the keyword matches literally with `ESCAPE '\'`
fn like_pattern(keyword: &str) -> String {
    let mut pattern = String::with_capacity(keyword.len() + 2);
    pattern.push('%');
    for c in keyword.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Append-only log of executed queries backed by its own SQLite file
pub struct HistoryStore {
    conn: Connection,
    path: PathBuf,
}

impl HistoryStore {
    /// Opens (creating if needed) the history database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        debug!("Initializing history store at {:?}", path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&path)?;
        let store = Self { conn, path };
        store.init()?;
        Ok(store)
    }

    /// Opens the history database at its default location
    pub fn open_default() -> Result<Self> {
        let path = crate::config::default_history_path().ok_or_else(|| {
            DbPeekError::Config("could not determine a data directory for the history".into())
        })?;
        Self::open(path)
    }

    fn init(&self) -> Result<()> {
        self.conn.execute_batch(HISTORY_TABLE_SQL)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `entry` and returns its id
    pub fn record(&self, entry: &HistoryEntry) -> Result<i64> {
        let result = self.conn.execute(
            "INSERT INTO query_history
                (database_path, query_text, executed_at_ms, elapsed_ms, row_count, success, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.database_path,
                entry.query,
                entry.executed_at.timestamp_millis(),
                entry.elapsed.as_millis() as i64,
                entry.row_count as i64,
                entry.outcome.is_success(),
                entry.error_message(),
            ],
        );

        match result {
            Ok(_) => {
                let id = self.conn.last_insert_rowid();
                debug!("Added history entry with id {}", id);
                Ok(id)
            }
            Err(e) => {
                error!("Failed to add history entry: {}", e);
                Err(e.into())
            }
        }
    }

    fn query_entries<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<HistoryEntry>> {
        let mut stmt = self.conn.prepare(sql)?;
        let entries = stmt
            .query_map(params, HistoryEntry::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// The `limit` most recent entries, newest first
    pub fn recent(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        self.query_entries(
            &format!(
                "SELECT {} FROM query_history
                 ORDER BY executed_at_ms DESC, id DESC
                 LIMIT ?1",
                ENTRY_COLUMNS
            ),
            [limit as i64],
        )
    }

    /// The `limit` most recent entries run against `database_path`
    pub fn for_database(&self, database_path: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
        self.query_entries(
            &format!(
                "SELECT {} FROM query_history
                 WHERE database_path = ?1
                 ORDER BY executed_at_ms DESC, id DESC
                 LIMIT ?2",
                ENTRY_COLUMNS
            ),
            params![database_path, limit as i64],
        )
    }

    /// Entries whose query text contains `keyword`, ignoring ASCII case.
    /// An empty keyword matches every entry.
    pub fn search(&self, keyword: &str) -> Result<Vec<HistoryEntry>> {
        self.query_entries(
            &format!(
                "SELECT {} FROM query_history
                 WHERE query_text LIKE ?1 ESCAPE '\\'
                 ORDER BY executed_at_ms DESC, id DESC",
                ENTRY_COLUMNS
            ),
            [like_pattern(keyword)],
        )
    }

    /// Get a specific history entry by ID
    pub fn get(&self, id: i64) -> Result<Option<HistoryEntry>> {
        let mut entries = self.query_entries(
            &format!("SELECT {} FROM query_history WHERE id = ?1", ENTRY_COLUMNS),
            [id],
        )?;
        Ok(entries.pop())
    }

    pub fn statistics(&self) -> Result<HistoryStatistics> {
        let stats = self.conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(success), 0),
                    COALESCE(AVG(CASE WHEN success THEN elapsed_ms END), 0),
                    COUNT(DISTINCT database_path)
             FROM query_history",
            [],
            |row| {
                let total: i64 = row.get(0)?;
                let succeeded: i64 = row.get(1)?;
                let average_ms: f64 = row.get(2)?;
                let databases: i64 = row.get(3)?;
                Ok(HistoryStatistics {
                    total: total as u64,
                    succeeded: succeeded as u64,
                    failed: (total - succeeded) as u64,
                    average_elapsed: Duration::from_micros((average_ms.max(0.0) * 1000.0).round() as u64),
                    databases: databases as u64,
                })
            },
        )?;
        Ok(stats)
    }

    /// Deletes every entry and returns how many were removed
    pub fn clear(&self) -> Result<usize> {
        let removed = self.conn.execute("DELETE FROM query_history", [])?;
        info!("Cleared {} history entries", removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::env::temp_dir;
    use uuid::Uuid;

    fn create_test_store() -> HistoryStore {
        let mut path = temp_dir();
        path.push(format!("test_history_{}.db", Uuid::new_v4()));
        HistoryStore::open(path).unwrap()
    }

    fn entry(query: &str) -> HistoryEntry {
        HistoryEntry::success("test.db", query, Duration::from_millis(100), 10)
    }

    #[test]
    fn test_record_and_get() {
        let store = create_test_store();
        let original = entry("SELECT * FROM test");

        let id = store.record(&original).unwrap();
        let retrieved = store.get(id).unwrap().unwrap();

        assert_eq!(retrieved.id, id);
        assert_eq!(retrieved.query, original.query);
        assert_eq!(retrieved.database_path, original.database_path);
        assert_eq!(retrieved.elapsed, original.elapsed);
        assert_eq!(retrieved.row_count, 10);
        assert_eq!(retrieved.outcome, Outcome::Success);
        assert_eq!(
            retrieved.executed_at.timestamp_millis(),
            original.executed_at.timestamp_millis()
        );
        assert!(store.get(id + 1).unwrap().is_none());
    }

    #[test]
    fn test_failure_keeps_message() {
        let store = create_test_store();
        let id = store
            .record(&HistoryEntry::failure(
                "test.db",
                "SELEC 1",
                Duration::from_millis(2),
                "near \"SELEC\": syntax error",
            ))
            .unwrap();

        let retrieved = store.get(id).unwrap().unwrap();
        assert_eq!(retrieved.error_message(), Some("near \"SELEC\": syntax error"));
        assert_eq!(retrieved.row_count, 0);
    }

    #[test]
    fn test_recent_is_newest_first() {
        let store = create_test_store();
        let base = Utc::now();

        for i in 0..5 {
            let mut e = entry(&format!("SELECT * FROM test{}", i));
            e.executed_at = base + ChronoDuration::seconds(i);
            store.record(&e).unwrap();
        }

        let entries = store.recent(3).unwrap();
        let queries: Vec<_> = entries.iter().map(|e| e.query.as_str()).collect();
        assert_eq!(
            queries,
            vec!["SELECT * FROM test4", "SELECT * FROM test3", "SELECT * FROM test2"]
        );
    }

    #[test]
    fn test_search_history() {
        let store = create_test_store();

        let queries = vec![
            "SELECT * FROM users",
            "INSERT INTO users VALUES (1)",
            "SELECT * FROM posts",
            "UPDATE Users SET name = 'test'",
        ];
        for query in queries {
            store.record(&entry(query)).unwrap();
        }

        let results = store.search("users").unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].query, "UPDATE Users SET name = 'test'");

        assert_eq!(store.search("posts").unwrap().len(), 1);
        assert_eq!(store.search("nonexistent").unwrap().len(), 0);
        assert_eq!(store.search("").unwrap().len(), 4);
    }

    #[test]
    fn test_search_wildcards_match_literally() {
        let store = create_test_store();
        store.record(&entry("SELECT '100%' AS pct")).unwrap();
        store.record(&entry("SELECT 100 AS pct")).unwrap();
        store.record(&entry("SELECT snake_case FROM t")).unwrap();
        store.record(&entry("SELECT snakeXcase FROM t")).unwrap();

        let pct = store.search("100%").unwrap();
        assert_eq!(pct.len(), 1);
        assert_eq!(pct[0].query, "SELECT '100%' AS pct");

        let snake = store.search("snake_case").unwrap();
        assert_eq!(snake.len(), 1);
        assert_eq!(snake[0].query, "SELECT snake_case FROM t");
    }

    #[test]
    fn test_for_database_filters() {
        let store = create_test_store();
        store.record(&HistoryEntry::success("a.db", "SELECT 1", Duration::ZERO, 1)).unwrap();
        store.record(&HistoryEntry::success("b.db", "SELECT 2", Duration::ZERO, 1)).unwrap();
        store.record(&HistoryEntry::success("a.db", "SELECT 3", Duration::ZERO, 1)).unwrap();

        let a = store.for_database("a.db", 10).unwrap();
        assert_eq!(a.len(), 2);
        assert!(a.iter().all(|e| e.database_path == "a.db"));
        assert_eq!(a[0].query, "SELECT 3");

        assert_eq!(store.for_database("a.db", 1).unwrap().len(), 1);
    }

    #[test]
    fn test_statistics_and_clear() {
        let store = create_test_store();
        assert_eq!(store.statistics().unwrap().total, 0);

        store.record(&HistoryEntry::success("a.db", "SELECT 1", Duration::from_millis(10), 1)).unwrap();
        store.record(&HistoryEntry::success("b.db", "SELECT 2", Duration::from_millis(30), 1)).unwrap();
        store.record(&HistoryEntry::failure("a.db", "SELEC", Duration::from_millis(500), "syntax")).unwrap();

        let stats = store.statistics().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.average_elapsed, Duration::from_millis(20));
        assert_eq!(stats.databases, 2);

        assert_eq!(store.clear().unwrap(), 3);
        assert!(store.recent(10).unwrap().is_empty());
        assert_eq!(store.clear().unwrap(), 0);
    }

    #[test]
    fn test_history_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("history.db");
        {
            let store = HistoryStore::open(&path).unwrap();
            store.record(&entry("SELECT 42")).unwrap();
        }
        let store = HistoryStore::open(&path).unwrap();
        assert_eq!(store.recent(10).unwrap()[0].query, "SELECT 42");
    }

    #[test]
    fn test_like_pattern_escaping() {
        assert_eq!(like_pattern("a%b_c\\d"), "%a\\%b\\_c\\\\d%");
        assert_eq!(like_pattern(""), "%%");
    }
}
