/// Export Module
///
/// Serializes a `QueryResult` to CSV or JSON. Files are written to a
/// temporary file next to the destination and renamed into place only once
/// everything has been flushed, so a failed export never leaves a truncated
/// file behind.

use crate::core::db::{QueryResult, Value};
use crate::core::{DbPeekError, Result};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::fmt;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Output formats supported by `export`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    /// `.json` files export as JSON, everything else as CSV
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ExportFormat::Json,
            _ => ExportFormat::Csv,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = DbPeekError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            _ => Err(DbPeekError::Config(format!(
                "Unsupported export format: '{}'. Supported formats: csv, json",
                s
            ))),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Options that change how results are written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportOptions {
    /// Indent JSON output
    pub pretty_json: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        ExportOptions { pretty_json: true }
    }
}

/// Writes `result` as CSV: header row of column names, one record per row,
/// NULL as an empty field.
pub fn write_csv<W: Write>(result: &QueryResult, writer: W) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(&result.columns).map_err(csv_error)?;
    for row in &result.rows {
        csv.write_record(row.iter().map(Value::to_export_string))
            .map_err(csv_error)?;
    }
    csv.flush()?;
    Ok(())
}

fn csv_error(e: csv::Error) -> DbPeekError {
    if e.is_io_error() {
        DbPeekError::Io(e.into())
    } else {
        DbPeekError::Csv(e)
    }
}

fn json_error(e: serde_json::Error) -> DbPeekError {
    if e.is_io() {
        DbPeekError::Io(e.into())
    } else {
        DbPeekError::Json(e)
    }
}

/// One row serialized as an object whose keys follow column order
struct JsonRow<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl Serialize for JsonRow<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (column, value) in self.columns.iter().zip(self.values) {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// The whole result as an array of row objects
struct JsonRows<'a>(&'a QueryResult);

impl Serialize for JsonRows<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.rows.len()))?;
        for values in &self.0.rows {
            seq.serialize_element(&JsonRow {
                columns: &self.0.columns,
                values,
            })?;
        }
        seq.end()
    }
}

/// Writes `result` as a JSON array of objects keyed by column name
pub fn write_json<W: Write>(result: &QueryResult, mut writer: W, pretty: bool) -> Result<()> {
    let rows = JsonRows(result);
    if pretty {
        serde_json::to_writer_pretty(&mut writer, &rows).map_err(json_error)?;
    } else {
        serde_json::to_writer(&mut writer, &rows).map_err(json_error)?;
    }
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Renders `result` in `format` to a string
pub fn render(result: &QueryResult, format: ExportFormat, options: ExportOptions) -> Result<String> {
    let mut buf = Vec::new();
    match format {
        ExportFormat::Csv => write_csv(result, &mut buf)?,
        ExportFormat::Json => write_json(result, &mut buf, options.pretty_json)?,
    }
    String::from_utf8(buf).map_err(|e| DbPeekError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}

/// Exports `result` to `destination`.
///
/// The data goes to a temporary file in the destination's directory, which
/// replaces `destination` only after a successful write.
///
/// # Errors
///
/// `DbPeekError::Io` when the directory is missing or not writable; no file
/// is created at `destination` in that case.
pub fn export(
    result: &QueryResult,
    format: ExportFormat,
    destination: &Path,
    options: ExportOptions,
) -> Result<()> {
    let dir = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };

    let mut temp = NamedTempFile::new_in(&dir)?;
    debug!(temp = %temp.path().display(), %format, "writing export");
    {
        let writer = BufWriter::new(temp.as_file_mut());
        match format {
            ExportFormat::Csv => write_csv(result, writer)?,
            ExportFormat::Json => write_json(result, writer, options.pretty_json)?,
        }
    }
    // NamedTempFile creates files readable by the owner only. A replaced
    // file keeps its own mode.
    #[cfg(unix)]
    {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        let permissions = match fs::metadata(destination) {
            Ok(existing) => existing.permissions(),
            Err(_) => fs::Permissions::from_mode(0o644),
        };
        temp.as_file().set_permissions(permissions)?;
    }
    temp.as_file().sync_all()?;
    temp.persist(destination).map_err(|e| DbPeekError::Io(e.error))?;

    info!(
        path = %destination.display(),
        %format,
        rows = result.rows.len(),
        "exported results"
    );
    Ok(())
}
