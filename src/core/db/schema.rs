/// Schema Introspection Module
///
/// This module reads the structure of a single table: its columns, keys,
/// indexes, row count and the `CREATE` statement it was defined with.

use crate::core::db::query::quote_identifier;
use crate::core::{DbPeekError, Result};
use rusqlite::{Connection, OptionalExtension, Row};

/// Represents a foreign key relationship
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    /// The column in this table that is the foreign key
    pub column: String,
    /// The table this foreign key references
    pub ref_table: String,
    /// The referenced column in the foreign table
    pub ref_column: String,
}

/// Represents a table column with its metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    /// Declared type; untyped columns report "BLOB"
    pub data_type: String,
    pub nullable: bool,
    pub primary_key: bool,
    /// Default value expression (if any)
    pub default_value: Option<String>,
    /// `table.column` this column references, if it is a foreign key
    pub foreign_key: Option<String>,
}

impl Column {
    /// Creates a Column from a `pragma_table_info` row
    fn from_pragma_row(row: &Row) -> rusqlite::Result<Self> {
        let declared: Option<String> = row.get("type")?;
        let notnull: bool = row.get("notnull")?;
        let pk: i64 = row.get("pk")?;
        Ok(Column {
            name: row.get("name")?,
            data_type: declared
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "BLOB".to_string()),
            nullable: !notnull,
            primary_key: pk > 0,
            default_value: row.get("dflt_value")?,
            foreign_key: None,
        })
    }
}

/// Represents a table index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub name: String,
    /// Whether this is a UNIQUE index
    pub unique: bool,
    /// Column names that make up this index, in index order
    pub columns: Vec<String>,
}

/// Everything dbpeek shows about one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<Column>,
    /// Primary key columns, in key order
    pub primary_keys: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
    pub indexes: Vec<Index>,
    pub row_count: u64,
    /// The CREATE statement stored in sqlite_master
    pub ddl: String,
}

impl TableSchema {
    /// Introspects `table_name` on `conn`.
    ///
    /// # Errors
    ///
    /// `DbPeekError::NotFound` if there is no table or view with that name.
    pub fn from_connection(conn: &Connection, table_name: &str) -> Result<Self> {
        let ddl = table_ddl(conn, table_name)?
            .ok_or_else(|| DbPeekError::NotFound(format!("table '{}' does not exist", table_name)))?;

        let mut columns = get_table_columns(conn, table_name)?;
        let foreign_keys = get_table_foreign_keys(conn, table_name)?;
        for fk in &foreign_keys {
            if let Some(col) = columns.iter_mut().find(|c| c.name == fk.column) {
                col.foreign_key = Some(format!("{}.{}", fk.ref_table, fk.ref_column));
            }
        }

        Ok(TableSchema {
            name: table_name.to_string(),
            primary_keys: get_primary_keys(conn, table_name)?,
            indexes: get_table_indexes(conn, table_name)?,
            row_count: count_rows(conn, table_name)?,
            columns,
            foreign_keys,
            ddl,
        })
    }

    /// Looks up a column by name
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Returns the CREATE statement of a table or view, or None if it does not exist
pub(crate) fn table_ddl(conn: &Connection, table_name: &str) -> Result<Option<String>> {
    let ddl = conn
        .query_row(
            "SELECT COALESCE(sql, '') FROM sqlite_master
             WHERE type IN ('table', 'view') AND name = ?1 COLLATE NOCASE",
            [table_name],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(ddl)
}

/// Names of objects of the given sqlite_master type, sorted by name
pub(crate) fn list_objects(conn: &Connection, object_type: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = ?1 AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )?;
    let names = stmt
        .query_map([object_type], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

pub(crate) fn count_rows(conn: &Connection, table_name: &str) -> Result<u64> {
    let sql = format!("SELECT COUNT(*) FROM {}", quote_identifier(table_name));
    let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
    Ok(count.max(0) as u64)
}

/// Helper function to retrieve column information for a specific table
pub(crate) fn get_table_columns(conn: &Connection, table_name: &str) -> Result<Vec<Column>> {
    let mut stmt = conn.prepare("SELECT * FROM pragma_table_info(?1) ORDER BY cid")?;
    let columns = stmt
        .query_map([table_name], |row| Column::from_pragma_row(row))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(columns)
}

fn get_primary_keys(conn: &Connection, table_name: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1) WHERE pk > 0 ORDER BY pk")?;
    let keys = stmt
        .query_map([table_name], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(keys)
}

/// Helper function to retrieve index information for a specific table
fn get_table_indexes(conn: &Connection, table_name: &str) -> Result<Vec<Index>> {
    let mut stmt = conn.prepare("SELECT name, \"unique\" FROM pragma_index_list(?1) ORDER BY seq")?;
    let listed = stmt
        .query_map([table_name], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut column_stmt = conn.prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")?;
    let mut indexes = Vec::with_capacity(listed.len());
    for (name, unique) in listed {
        // Expression indexes have NULL column names
        let columns = column_stmt
            .query_map([&name], |row| row.get::<_, Option<String>>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .map(|c| c.unwrap_or_else(|| "<expr>".to_string()))
            .collect();
        indexes.push(Index {
            name,
            unique,
            columns,
        });
    }
    Ok(indexes)
}

/// Helper function to retrieve foreign key information for a specific table
fn get_table_foreign_keys(conn: &Connection, table_name: &str) -> Result<Vec<ForeignKey>> {
    let mut stmt = conn.prepare(
        "SELECT \"from\", \"table\", \"to\" FROM pragma_foreign_key_list(?1) ORDER BY id, seq",
    )?;
    let keys = stmt
        .query_map([table_name], |row| {
            Ok(ForeignKey {
                column: row.get(0)?,
                ref_table: row.get(1)?,
                // NULL when the key references the parent's primary key implicitly
                ref_column: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(keys)
}
