/// Database Module
///
/// This module provides the connector layer for dbpeek, organized into
/// focused submodules.
///
/// ## Architecture
///
/// - **Connector contract** (`connector.rs`): the `Connector` trait and the
///   `DatabaseKind` tag that picks an implementation from a file extension
/// - **SQLite connector** (`sqlite.rs`): connection lifecycle, table paging
///   and metadata for SQLite files
/// - **Schema Introspection** (`schema.rs`): columns, keys and indexes of a table
/// - **Query Execution** (`query.rs`): statement execution under a timeout and
///   result values
///
/// ## Error Handling
///
/// All operations use `DbPeekError`; lookups of missing tables are
/// `NotFound`, statement failures are `Query` or `Timeout`.
pub mod connector;
pub mod query;
pub mod schema;
pub mod sqlite;

pub use connector::*;
pub use query::*;
pub use schema::*;
pub use sqlite::SqliteConnector;
