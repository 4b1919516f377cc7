//! Delivery log export: two CSV tables packed into one ZIP archive.
//!
//! | file         | columns                          |
//! |--------------|----------------------------------|
//! | `logs.csv`   | timestamp, message, file, email  |
//! | `errors.csv` | timestamp, file, email, error    |
//!
//! Rows end in CRLF and fields are quoted only when they contain a comma,
//! a quote or a line break.

use crate::error::DispatchError;
use crate::tracker::DeliveryState;
use std::io::{Cursor, Write};
use std::path::{is_separator, Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const LOGS_FILE: &str = "logs.csv";
pub const ERRORS_FILE: &str = "errors.csv";

const LOG_COLUMNS: [&str; 4] = ["timestamp", "message", "file", "email"];
const ERROR_COLUMNS: [&str; 4] = ["timestamp", "file", "email", "error"];

fn quote(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn push_row(out: &mut String, fields: &[&str]) {
    let row: Vec<String> = fields.iter().map(|f| quote(f)).collect();
    out.push_str(&row.join(","));
    out.push_str("\r\n");
}

pub fn logs_csv(state: &DeliveryState) -> String {
    let mut out = String::new();
    push_row(&mut out, &LOG_COLUMNS);
    for log in &state.logs {
        push_row(&mut out, &[&log.timestamp, &log.message, &log.file, &log.email]);
    }
    out
}

pub fn errors_csv(state: &DeliveryState) -> String {
    let mut out = String::new();
    push_row(&mut out, &ERROR_COLUMNS);
    for error in &state.errors {
        push_row(
            &mut out,
            &[&error.timestamp, &error.file, &error.email, &error.error],
        );
    }
    out
}

/// ZIP bytes holding [`LOGS_FILE`] and [`ERRORS_FILE`].
pub fn export_archive(state: &DeliveryState) -> Result<Vec<u8>, DispatchError> {
    let failed = |e: &dyn std::fmt::Display| DispatchError::ExportFailed(e.to_string());

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, body) in [(LOGS_FILE, logs_csv(state)), (ERRORS_FILE, errors_csv(state))] {
        zip.start_file(name, options).map_err(|e| failed(&e))?;
        zip.write_all(body.as_bytes()).map_err(|e| failed(&e))?;
    }

    let cursor = zip.finish().map_err(|e| failed(&e))?;
    Ok(cursor.into_inner())
}

/// Download name for an archive produced now, e.g. `logs_and_errors_2024-03-01_141502.zip`.
pub fn archive_name() -> String {
    format!(
        "logs_and_errors_{}.zip",
        chrono::Local::now().format("%Y-%m-%d_%H%M%S")
    )
}

/// Where an archive for `target` should be written.
///
/// An existing directory, or a path ending in a separator, gets a fresh
/// [`archive_name`] inside it. Missing parent directories are created.
pub fn archive_path(target: &Path) -> std::io::Result<PathBuf> {
    let names_dir = target.as_os_str().to_string_lossy().ends_with(is_separator);
    if target.is_dir() || names_dir {
        std::fs::create_dir_all(target)?;
        return Ok(target.join(archive_name()));
    }
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(target.to_path_buf())
}
