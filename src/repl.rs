use crate::config::{self, Config};
use crate::core::db::{open_connector, QueryResult, SortKey, TableSchema};
use crate::core::{DbPeekError, Result};
use crate::executor::{QueryEvent, QueryExecutor};
use crate::export::{self, ExportFormat};
use crate::storage::{HistoryEntry, HistoryStore};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Represents a parsed REPL command.
#[derive(Debug, PartialEq)]
pub enum Command {
    Open(String),
    Close,
    Tables,
    Views,
    Schema(String),
    Count(String),
    Data {
        table: String,
        /// 1-based page number
        page: u64,
        sort: Option<SortKey>,
    },
    Info,
    /// Shows the timeout, or sets it in seconds
    Timeout(Option<f64>),
    Export {
        path: String,
        format: Option<String>,
    },
    Hist(Option<String>),
    HistClear,
    Stats,
    Help,
    Quit,
    Sql(String),
    Unknown(String),
}

fn parse_data_command(args: &[&str]) -> Option<Command> {
    let (table, mut rest) = args.split_first()?;
    let mut page = 1;
    if let Some(first) = rest.first() {
        if let Ok(n) = first.parse::<u64>() {
            if n == 0 {
                return None;
            }
            page = n;
            rest = &rest[1..];
        }
    }
    let sort = match rest {
        [] => None,
        [column] => Some(SortKey::ascending(*column)),
        [column, dir] if dir.eq_ignore_ascii_case("asc") => Some(SortKey::ascending(*column)),
        [column, dir] if dir.eq_ignore_ascii_case("desc") => Some(SortKey::descending(*column)),
        _ => return None,
    };
    Some(Command::Data {
        table: table.to_string(),
        page,
        sort,
    })
}

/// Parses a user input string into a corresponding `Command`.
///
/// If the input starts with a colon (`:`), it is interpreted as a command.
/// Otherwise, it is treated as a SQL query.
pub fn parse_command(input: &str) -> Command {
    let input = input.trim();
    if !input.starts_with(':') {
        return Command::Sql(input.to_string());
    }
    let trimmed = &input[1..];
    let parts: Vec<&str> = trimmed.split_whitespace().collect();
    let Some((name, args)) = parts.split_first() else {
        return Command::Unknown(input.to_string());
    };
    let unknown = || Command::Unknown(input.to_string());
    match (*name, args) {
        ("open", [path]) => Command::Open(path.to_string()),
        ("close", []) => Command::Close,
        ("tables", []) => Command::Tables,
        ("views", []) => Command::Views,
        ("schema", [table]) => Command::Schema(table.to_string()),
        ("count", [table]) => Command::Count(table.to_string()),
        ("data", args) => parse_data_command(args).unwrap_or_else(unknown),
        ("info", []) => Command::Info,
        ("timeout", []) => Command::Timeout(None),
        ("timeout", [secs]) => match secs.parse::<f64>() {
            Ok(secs) if secs.is_finite() && secs > 0.0 => Command::Timeout(Some(secs)),
            _ => unknown(),
        },
        ("export", [path]) => Command::Export {
            path: path.to_string(),
            format: None,
        },
        ("export", [path, format]) => Command::Export {
            path: path.to_string(),
            format: Some(format.to_string()),
        },
        // keywords may contain spaces
        ("hist", []) => Command::Hist(None),
        ("hist", _) => Command::Hist(Some(trimmed.trim_start()["hist".len()..].trim().to_string())),
        ("hist-clear", []) => Command::HistClear,
        ("stats", []) => Command::Stats,
        ("help", []) => Command::Help,
        ("quit", []) | ("q", []) => Command::Quit,
        _ => unknown(),
    }
}

/// Used when the configured timeout is out of range
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const HELP: &str = "Available commands:
  :open <path>                          Open a database file (.db, .sqlite, .sqlite3)
  :close                                Close the current database
  :tables                               List tables
  :views                                List views
  :schema <table>                       Show columns, keys, indexes and DDL
  :count <table>                        Count rows
  :data <table> [page] [column] [asc|desc]
                                        Browse a table page by page
  :info                                 Show database file information
  :timeout [secs]                       Show or set the query timeout
  :export <path> [csv|json]             Export the last result
  :hist [keyword]                       Show or search query history
  :hist-clear                           Delete all query history
  :stats                                Show history statistics
  :help                                 Show this help
  :quit                                 Exit

Or enter SQL queries directly without any prefix.";

/// Renders a result as an aligned text table followed by a row count
pub fn render_table(result: &QueryResult) -> String {
    if let Some(affected) = result.affected_rows {
        return format!("({} rows affected)", affected);
    }

    let cells: Vec<Vec<String>> = result
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|v| v.to_string().replace('\n', "\\n"))
                .collect()
        })
        .collect();
    let mut widths: Vec<usize> = result.columns.iter().map(|c| c.chars().count()).collect();
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |values: &[String]| -> String {
        values
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!("{:<w$}", v, w = *w))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut out = String::new();
    out.push_str(&line(&result.columns));
    out.push('\n');
    out.push_str(
        &widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    out.push('\n');
    for row in &cells {
        out.push_str(&line(row));
        out.push('\n');
    }
    out.push_str(&format!("({} rows)", result.row_count));
    out
}

/// Renders a table's structure
pub fn render_schema(schema: &TableSchema) -> String {
    let mut out = format!("Table: {} ({} rows)\n", schema.name, schema.row_count);
    for column in &schema.columns {
        let mut flags = Vec::new();
        if column.primary_key {
            flags.push("PK".to_string());
        }
        if !column.nullable {
            flags.push("NOT NULL".to_string());
        }
        if let Some(default) = &column.default_value {
            flags.push(format!("DEFAULT {}", default));
        }
        if let Some(target) = &column.foreign_key {
            flags.push(format!("-> {}", target));
        }
        out.push_str(&format!("  {} {} {}", column.name, column.data_type, flags.join(" ")).trim_end());
        out.push('\n');
    }
    if !schema.indexes.is_empty() {
        out.push_str("Indexes:\n");
        for index in &schema.indexes {
            out.push_str(&format!(
                "  {}{} ({})\n",
                index.name,
                if index.unique { " UNIQUE" } else { "" },
                index.columns.join(", ")
            ));
        }
    }
    out.push_str(&schema.ddl);
    out
}

/// An interactive session: at most one open database plus the history
pub struct Session {
    executor: Option<QueryExecutor>,
    database: Option<PathBuf>,
    history: HistoryStore,
    config: Config,
    timeout: Duration,
    last_result: Option<QueryResult>,
}

impl Session {
    pub fn new(config: Config, history: HistoryStore) -> Self {
        let timeout = config.query.timeout().unwrap_or_else(|e| {
            warn!(error = %e, "invalid query timeout, using {}s", DEFAULT_TIMEOUT.as_secs());
            DEFAULT_TIMEOUT
        });
        Session {
            executor: None,
            database: None,
            history,
            config,
            timeout,
            last_result: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.executor.is_some()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn last_result(&self) -> Option<&QueryResult> {
        self.last_result.as_ref()
    }

    /// Opens `path`, closing whatever was open before
    pub fn open(&mut self, path: &Path) -> Result<()> {
        self.close();
        let connector = open_connector(path)?;
        self.executor = Some(QueryExecutor::new(connector, self.timeout));
        self.database = Some(path.canonicalize().unwrap_or_else(|_| path.to_path_buf()));
        self.last_result = None;
        Ok(())
    }

    pub fn close(&mut self) {
        if let Some(executor) = self.executor.take() {
            if let Err(e) = executor.with_connector(|c| {
                c.disconnect();
                Ok(())
            }) {
                warn!(error = %e, "closing database while busy");
            }
        }
        self.database = None;
    }

    fn executor(&self) -> Result<&QueryExecutor> {
        self.executor
            .as_ref()
            .ok_or_else(|| DbPeekError::Connection("not connected; use :open <path>".to_string()))
    }

    fn database_label(&self) -> String {
        self.database
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    }

    /// Runs `sql` on the worker, waits for it and records it in history
    pub fn run_sql(&mut self, sql: &str) -> Result<QueryResult> {
        let executor = self.executor()?;
        let ticket = executor.submit_with_timeout(sql, self.timeout)?;
        let event = loop {
            let event = executor
                .next_event()
                .ok_or_else(|| DbPeekError::Query("query worker disappeared".to_string()))?;
            if event.ticket() == ticket {
                break event;
            }
            debug!(ticket = %event.ticket(), "skipping event of an earlier query");
        };

        let database = self.database_label();
        let (entry, outcome) = match event {
            QueryEvent::Completed { sql, result, .. } => (
                HistoryEntry::success(database, sql, result.elapsed, result.row_count as u64),
                Ok(result),
            ),
            QueryEvent::Failed {
                sql, error, elapsed, ..
            } => (
                HistoryEntry::failure(database, sql, elapsed, error.to_string()),
                Err(error),
            ),
            QueryEvent::Cancelled { sql, .. } => (
                HistoryEntry::failure(database, sql, Duration::ZERO, "cancelled"),
                Err(DbPeekError::Query("Query cancelled".to_string())),
            ),
        };
        if let Err(e) = self.history.record(&entry) {
            warn!(error = %e, "could not record query in history");
        }

        let result = outcome?;
        self.last_result = Some(result.clone());
        Ok(result)
    }

    /// Executes one command and returns the text to show
    pub fn handle(&mut self, command: Command) -> Result<String> {
        debug!(?command, "handling command");
        match command {
            Command::Open(path) => {
                self.open(Path::new(&path))?;
                Ok(format!("Opened {}", path))
            }
            Command::Close => {
                if self.is_open() {
                    self.close();
                    Ok("Closed database".to_string())
                } else {
                    Ok("No database open".to_string())
                }
            }
            Command::Tables => {
                let tables = self.executor()?.with_connector(|c| c.get_tables())?;
                Ok(list_or_none(&tables, "(no tables)"))
            }
            Command::Views => {
                let views = self.executor()?.with_connector(|c| c.get_views())?;
                Ok(list_or_none(&views, "(no views)"))
            }
            Command::Schema(table) => {
                let schema = self.executor()?.with_connector(|c| c.get_schema(&table))?;
                Ok(render_schema(&schema))
            }
            Command::Count(table) => {
                let count = self.executor()?.with_connector(|c| c.get_row_count(&table))?;
                Ok(count.to_string())
            }
            Command::Data { table, page, sort } => {
                let page_size = self.config.query.page_size.max(1) as u64;
                let offset = (page - 1).saturating_mul(page_size);
                let (result, total) = self.executor()?.with_connector(|c| {
                    let total = c.get_row_count(&table)?;
                    let result = c.get_table_data(&table, offset, page_size, sort.as_ref())?;
                    Ok((result, total))
                })?;
                let pages = ((total + page_size - 1) / page_size).max(1);
                let text = format!("{}\nPage {} of {}", render_table(&result), page, pages);
                self.last_result = Some(result);
                Ok(text)
            }
            Command::Info => {
                let info = self.executor()?.with_connector(|c| c.database_info())?;
                Ok(format!(
                    "File: {}\nSQLite version: {}\nPage size: {}\nPage count: {}\nFile size: {} bytes\nEncoding: {}",
                    self.database_label(),
                    info.engine_version,
                    info.page_size,
                    info.page_count,
                    info.file_size,
                    info.encoding
                ))
            }
            Command::Timeout(None) => {
                let timeout = self.executor.as_ref().map_or(self.timeout, QueryExecutor::default_timeout);
                Ok(format!("Query timeout: {:.1}s", timeout.as_secs_f64()))
            }
            Command::Timeout(Some(secs)) => {
                self.timeout = config::timeout_from_secs(secs)?;
                if let Some(executor) = self.executor.as_mut() {
                    executor.set_default_timeout(self.timeout);
                }
                Ok(format!("Query timeout set to {:.1}s", secs))
            }
            Command::Export { path, format } => {
                let result = self.last_result.as_ref().ok_or_else(|| {
                    DbPeekError::Query("no result to export; run a query first".to_string())
                })?;
                let destination = PathBuf::from(&path);
                let format = match format {
                    Some(name) => name.parse::<ExportFormat>()?,
                    None => ExportFormat::from_path(&destination),
                };
                export::export(result, format, &destination, (&self.config.export).into())?;
                Ok(format!("Exported {} rows to {} ({})", result.rows.len(), path, format))
            }
            Command::Hist(keyword) => {
                let limit = self.config.history.limit;
                let entries = match keyword {
                    Some(keyword) => {
                        let mut found = self.history.search(&keyword)?;
                        found.truncate(limit);
                        found
                    }
                    None => self.history.recent(limit)?,
                };
                if entries.is_empty() {
                    return Ok("(no history)".to_string());
                }
                Ok(entries
                    .iter()
                    .map(|e| {
                        format!(
                            "#{} {} [{}] {}",
                            e.id,
                            e.executed_at.format("%Y-%m-%d %H:%M:%S"),
                            if e.outcome.is_success() { "ok" } else { "error" },
                            e.query
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
            Command::HistClear => {
                let removed = self.history.clear()?;
                Ok(format!("Removed {} history entries", removed))
            }
            Command::Stats => {
                let stats = self.history.statistics()?;
                Ok(format!(
                    "Queries: {}\nSucceeded: {}\nFailed: {}\nAverage time: {:.1} ms\nDatabases: {}",
                    stats.total,
                    stats.succeeded,
                    stats.failed,
                    stats.average_elapsed.as_secs_f64() * 1000.0,
                    stats.databases
                ))
            }
            Command::Help => Ok(HELP.to_string()),
            Command::Quit => Ok(String::new()),
            Command::Sql(sql) => {
                let result = self.run_sql(&sql)?;
                Ok(format!(
                    "{}\nTime: {:.1} ms",
                    render_table(&result),
                    result.elapsed.as_secs_f64() * 1000.0
                ))
            }
            Command::Unknown(input) => Err(DbPeekError::Query(format!(
                "Unknown command: {}. Type :help for a list of commands",
                input
            ))),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

fn list_or_none(items: &[String], empty: &str) -> String {
    if items.is_empty() {
        empty.to_string()
    } else {
        items.join("\n")
    }
}

/// Reads commands line by line from `input` until `:quit` or end of input,
/// writing results and errors to `output`.
pub fn run_repl<R: BufRead, W: Write>(session: &mut Session, input: R, mut output: W) -> io::Result<()> {
    writeln!(output, "dbpeek - type :help for commands, :quit to exit.")?;
    for line in input.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let command = parse_command(trimmed);
        if command == Command::Quit {
            break;
        }
        match session.handle(command) {
            Ok(text) => writeln!(output, "{}", text)?,
            Err(e) => writeln!(output, "Error: {}", e)?,
        }
        output.flush()?;
    }
    info!("leaving shell");
    Ok(())
}
