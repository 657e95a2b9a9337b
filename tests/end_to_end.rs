//! End-to-end tests across connector, executor, export and history

mod common;

use common::{numbers_db, shop_db, ENDLESS_QUERY};
use dbpeek::core::db::{open_connector, Connector, SqliteConnector};
use dbpeek::core::DbPeekError;
use dbpeek::executor::{QueryEvent, QueryExecutor};
use dbpeek::export::{export, ExportFormat, ExportOptions};
use dbpeek::storage::{HistoryEntry, HistoryStore};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(20);

#[test]
fn test_non_database_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("notes.db");
    fs::write(&path, "definitely not a database\n".repeat(40)).unwrap();

    match open_connector(&path) {
        Err(e @ DbPeekError::Connection(_)) => assert!(e.requires_reconnect()),
        Err(other) => panic!("Expected Connection error, got {:?}", other),
        Ok(_) => panic!("Expected Connection error, got a connector"),
    }
}

#[test]
fn test_missing_file_and_second_open() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("missing.sqlite");
    assert!(matches!(open_connector(&missing), Err(DbPeekError::Connection(_))));
    assert!(!missing.exists());

    let path = shop_db(dir.path());
    let first = open_connector(&path).unwrap();
    assert!(matches!(open_connector(&path), Err(DbPeekError::Connection(_))));

    drop(first);
    let again = open_connector(&path).unwrap();
    assert!(again.is_connected());
}

#[test]
fn test_unsupported_extension() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data.csv");
    fs::write(&path, "a,b\n").unwrap();
    assert!(matches!(
        open_connector(&path),
        Err(DbPeekError::UnsupportedDatabase(_))
    ));
}

#[test]
fn test_schema_browsing() {
    let dir = TempDir::new().unwrap();
    let path = shop_db(dir.path());
    let connector = open_connector(&path).unwrap();

    assert_eq!(connector.get_tables().unwrap(), vec!["items"]);
    assert_eq!(connector.get_views().unwrap(), vec!["cheap_items"]);

    let schema = connector.get_schema("items").unwrap();
    assert_eq!(schema.primary_keys, vec!["id"]);
    assert_eq!(schema.row_count, 3);
    assert_eq!(schema.column("thumb").unwrap().data_type, "BLOB");

    assert!(matches!(
        connector.get_schema("nonexistent"),
        Err(DbPeekError::NotFound(_))
    ));
    assert!(matches!(
        connector.get_row_count("nonexistent"),
        Err(DbPeekError::NotFound(_))
    ));
}

#[test]
fn test_timeout_then_connection_is_reusable() {
    let dir = TempDir::new().unwrap();
    let path = numbers_db(dir.path(), 50);
    let executor = QueryExecutor::new(open_connector(&path).unwrap(), Duration::from_secs(30));

    executor
        .submit_with_timeout(ENDLESS_QUERY, Duration::from_millis(200))
        .unwrap();
    match executor.next_event_timeout(WAIT) {
        Some(QueryEvent::Failed { error, .. }) => {
            assert!(matches!(error, DbPeekError::Timeout(_)));
            assert!(!error.requires_reconnect());
        }
        other => panic!("Expected timeout failure, got {:?}", other),
    }

    executor.submit("SELECT COUNT(*) FROM numbers").unwrap();
    match executor.next_event_timeout(WAIT) {
        Some(QueryEvent::Completed { result, .. }) => {
            assert_eq!(result.rows[0][0].to_string(), "50");
        }
        other => panic!("Expected completion, got {:?}", other),
    }
}

#[test]
fn test_second_submission_rejected_and_cancel() {
    let dir = TempDir::new().unwrap();
    let path = numbers_db(dir.path(), 1);
    let executor = QueryExecutor::new(open_connector(&path).unwrap(), Duration::from_secs(10));

    let ticket = executor.submit(ENDLESS_QUERY).unwrap();
    assert!(executor.is_busy());
    assert!(matches!(executor.submit("SELECT 1"), Err(DbPeekError::Busy(_))));
    assert!(matches!(
        executor.with_connector(|c| c.get_tables()),
        Err(DbPeekError::Busy(_))
    ));

    // let the statement start so the interrupt lands on it
    std::thread::sleep(Duration::from_millis(100));
    assert!(executor.cancel());
    match executor.next_event_timeout(WAIT) {
        Some(QueryEvent::Cancelled { ticket: t, .. }) => assert_eq!(t, ticket),
        other => panic!("Expected cancellation, got {:?}", other),
    }
    assert!(!executor.is_busy());
    assert_eq!(
        executor.with_connector(|c| c.get_tables()).unwrap(),
        vec!["numbers"]
    );
}

#[test]
fn test_csv_export_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = shop_db(dir.path());
    let mut connector = SqliteConnector::new();
    connector.connect(&path).unwrap();

    let result = connector
        .execute_query("SELECT * FROM items ORDER BY id", Duration::from_secs(5))
        .unwrap();
    let destination = dir.path().join("items.csv");
    export(&result, ExportFormat::Csv, &destination, ExportOptions::default()).unwrap();

    let mut reader = csv::Reader::from_path(&destination).unwrap();
    let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
    assert_eq!(headers, result.columns);

    let records: Vec<Vec<String>> = reader
        .records()
        .map(|r| r.unwrap().iter().map(String::from).collect())
        .collect();
    let expected: Vec<Vec<String>> = result
        .rows
        .iter()
        .map(|row| row.iter().map(|v| v.to_export_string()).collect())
        .collect();
    assert_eq!(records, expected);
    assert_eq!(records[0][4], "cafe");
    assert_eq!(records[0][3], "");
    assert_eq!(records[2][3], "line one\nline two");
}

#[test]
fn test_json_export_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = shop_db(dir.path());
    let mut connector = SqliteConnector::new();
    connector.connect(&path).unwrap();

    let result = connector
        .execute_query("SELECT id, name, price, note FROM items ORDER BY id", Duration::from_secs(5))
        .unwrap();
    let destination = dir.path().join("items.json");
    export(
        &result,
        ExportFormat::from_path(&destination),
        &destination,
        ExportOptions::default(),
    )
    .unwrap();

    let parsed: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&destination).unwrap()).unwrap();
    let rows = parsed.as_array().unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["name"], "kettle");
    assert_eq!(rows[0]["price"], 24.5);
    assert!(rows[0]["note"].is_null());
    assert_eq!(rows[1]["note"], "says \"hi\"");
    assert!(rows[2]["price"].is_null());

    let keys: Vec<&String> = rows[0].as_object().unwrap().keys().collect();
    assert_eq!(keys.len(), 4);
}

#[test]
fn test_history_search_newest_first() {
    let dir = TempDir::new().unwrap();
    let store = HistoryStore::open(dir.path().join("history.db")).unwrap();

    let queries = [
        "SELECT * FROM items",
        "SELECT COUNT(*) FROM numbers",
        "select name from ITEMS where price > 1",
        "DELETE FROM numbers",
    ];
    for (i, query) in queries.iter().enumerate() {
        let mut entry = HistoryEntry::success("shop.db", *query, Duration::from_millis(5), 1);
        entry.executed_at = entry.executed_at + chrono::Duration::milliseconds(i as i64 * 10);
        store.record(&entry).unwrap();
    }

    let found: Vec<String> = store
        .search("items")
        .unwrap()
        .into_iter()
        .map(|e| e.query)
        .collect();
    assert_eq!(
        found,
        vec![
            "select name from ITEMS where price > 1".to_string(),
            "SELECT * FROM items".to_string(),
        ]
    );
}
