//! Property-based tests for table paging
//!
//! Paging through a table with a sort key must visit every row exactly
//! once, in sort order, whatever the page size.

mod common;

#[cfg(test)]
mod tests {
    use super::common::numbers_db;
    use dbpeek::core::db::{Connector, SortKey, SqliteConnector, Value};
    use proptest::prelude::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn page_through(connector: &SqliteConnector, page_size: u64, sort: &SortKey) -> Vec<Vec<Vec<Value>>> {
        let mut pages = Vec::new();
        let mut offset = 0;
        loop {
            let page = connector
                .get_table_data("numbers", offset, page_size, Some(sort))
                .unwrap();
            if page.rows.is_empty() {
                break;
            }
            assert!(page.rows.len() as u64 <= page_size);
            offset += page.rows.len() as u64;
            pages.push(page.rows);
        }
        pages
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Consecutive pages are disjoint and together hold the whole table
        #[test]
        fn prop_pages_partition_table(
            rows in 0usize..120,
            page_size in 1u64..40,
            descending in any::<bool>(),
            by_label in any::<bool>(),
        ) {
            let dir = TempDir::new().unwrap();
            let path = numbers_db(dir.path(), rows);
            let mut connector = SqliteConnector::new();
            connector.connect(&path).unwrap();

            let column = if by_label { "label" } else { "n" };
            let sort = if descending {
                SortKey::descending(column)
            } else {
                SortKey::ascending(column)
            };

            let pages = page_through(&connector, page_size, &sort);
            let expected_pages = (rows as u64 + page_size - 1) / page_size;
            prop_assert_eq!(pages.len() as u64, expected_pages);

            let all: Vec<Vec<Value>> = pages.into_iter().flatten().collect();
            prop_assert_eq!(all.len(), rows);

            let keys: Vec<i64> = all
                .iter()
                .map(|row| match row[0] {
                    Value::Integer(n) => n,
                    ref other => panic!("unexpected key {:?}", other),
                })
                .collect();
            let distinct: HashSet<i64> = keys.iter().copied().collect();
            prop_assert_eq!(distinct.len(), rows, "a row appeared on two pages");
            prop_assert_eq!(distinct, (0..rows as i64).collect::<HashSet<_>>());

            let sort_values: Vec<String> = all.iter().map(|row| row[if by_label { 1 } else { 0 }].to_string()).collect();
            let mut ordered = sort_values.clone();
            if by_label {
                ordered.sort();
            } else {
                ordered.sort_by_key(|v| v.parse::<i64>().unwrap());
            }
            if descending {
                ordered.reverse();
            }
            prop_assert_eq!(sort_values, ordered);
        }

        /// Reading past the end yields an empty page rather than an error
        #[test]
        fn prop_offset_past_end_is_empty(rows in 0usize..30, extra in 0u64..100) {
            let dir = TempDir::new().unwrap();
            let path = numbers_db(dir.path(), rows);
            let mut connector = SqliteConnector::new();
            connector.connect(&path).unwrap();

            let page = connector
                .get_table_data("numbers", rows as u64 + extra, 10, None)
                .unwrap();
            prop_assert!(page.rows.is_empty());
            prop_assert_eq!(page.columns, vec!["n".to_string(), "label".to_string()]);
        }
    }
}
