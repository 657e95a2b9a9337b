/// # Test Utilities Module
///
/// Fixtures shared by the unit tests: a small sample database written to a
/// private temporary directory, so tests never contend for the same file.

use crate::core::db::{Connector, SqliteConnector};
use crate::core::Result;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const SAMPLE_SCHEMA: &str = "
    CREATE TABLE users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE,
        email TEXT NOT NULL,
        age INTEGER
    );

    CREATE TABLE posts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        title TEXT NOT NULL,
        published BOOLEAN DEFAULT FALSE,
        FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE
    );

    CREATE TABLE categories (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE
    );

    CREATE INDEX idx_posts_user_id ON posts (user_id);
    CREATE VIEW published_posts AS SELECT * FROM posts WHERE published = 1;

    INSERT INTO users (username, email, age) VALUES
        ('alice', 'alice@example.com', 34),
        ('bob', 'bob@example.com', 41),
        ('carol', 'carol@example.com', NULL);

    INSERT INTO posts (user_id, title, published) VALUES
        (1, 'Welcome, friends', 1),
        (2, 'Draft \"quoted\" title', 0),
        (1, 'Second post', 1);

    INSERT INTO categories (name) VALUES ('Technology'), ('Travel');
";

/// A populated SQLite file that is deleted when the fixture is dropped
pub struct SampleDatabase {
    dir: TempDir,
    path: PathBuf,
}

impl SampleDatabase {
    /// Writes the sample schema and data to `<tempdir>/sample.db`
    pub fn new() -> Result<Self> {
        let dir = TempDir::new()?;
        let path = dir.path().join("sample.db");
        let conn = Connection::open(&path)?;
        conn.execute_batch(SAMPLE_SCHEMA)?;
        drop(conn);
        Ok(SampleDatabase { dir, path })
    }

    /// A sample database with one extra table of `rows` sequential integers
    pub fn with_numbers(rows: usize) -> Result<Self> {
        let sample = Self::new()?;
        let conn = Connection::open(&sample.path)?;
        conn.execute_batch(
            "CREATE TABLE numbers (n INTEGER PRIMARY KEY, label TEXT);",
        )?;
        {
            let mut stmt = conn.prepare("INSERT INTO numbers (n, label) VALUES (?1, ?2)")?;
            for n in 0..rows {
                stmt.execute((n as i64, format!("row {}", n)))?;
            }
        }
        drop(conn);
        Ok(sample)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// A connector already connected to the sample file
    pub fn connector(&self) -> Result<SqliteConnector> {
        let mut connector = SqliteConnector::new();
        connector.connect(&self.path)?;
        Ok(connector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_database_creation() {
        let sample = SampleDatabase::new().unwrap();
        assert!(sample.path().exists());

        let conn = Connection::open(sample.path()).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_numbers_fixture() {
        let sample = SampleDatabase::with_numbers(25).unwrap();
        let connector = sample.connector().unwrap();
        assert_eq!(connector.get_row_count("numbers").unwrap(), 25);
    }
}
