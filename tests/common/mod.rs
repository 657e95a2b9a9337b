//! Fixtures shared by the integration tests
#![allow(dead_code)]

use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// Endless recursive query, only stopped by an interrupt
pub const ENDLESS_QUERY: &str =
    "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT COUNT(*) FROM c";

/// Creates `<dir>/numbers.db` with table `numbers(n, label)` holding `rows` rows
pub fn numbers_db(dir: &Path, rows: usize) -> PathBuf {
    let path = dir.join("numbers.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("CREATE TABLE numbers (n INTEGER PRIMARY KEY, label TEXT NOT NULL);")
        .unwrap();
    {
        let mut stmt = conn
            .prepare("INSERT INTO numbers (n, label) VALUES (?1, ?2)")
            .unwrap();
        for n in 0..rows {
            stmt.execute((n as i64, format!("row {}", n))).unwrap();
        }
    }
    path
}

/// Creates `<dir>/shop.db` with a small `items` table covering every value type
pub fn shop_db(dir: &Path) -> PathBuf {
    let path = dir.join("shop.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "
        CREATE TABLE items (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            price REAL,
            note TEXT,
            thumb BLOB
        );
        INSERT INTO items (name, price, note, thumb) VALUES
            ('kettle', 24.5, NULL, x'cafe'),
            ('mug, large', 8.0, 'says \"hi\"', NULL),
            ('teapot', NULL, 'line one
line two', NULL);
        CREATE VIEW cheap_items AS SELECT * FROM items WHERE price < 10;
        ",
    )
    .unwrap();
    path
}
