// crates/core/src/parser.rs
//! Async JSONL reader for Claude log files.
//!
//! Each non-empty line is one record. Lines that are not valid JSON, carry an
//! unknown `type`, or do not fit the record shape are skipped with a debug
//! log; only I/O failures fail the whole file.

use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::error::ParseError;
use crate::types::{EntryType, LogEntry};

/// Parse every usable record of a JSONL log file, in on-disk order.
///
/// # Errors
/// - `ParseError::NotFound` if the file doesn't exist
/// - `ParseError::PermissionDenied` if the file can't be read
/// - `ParseError::Io` for other I/O errors (including invalid UTF-8)
pub async fn parse_log_file(file_path: &Path) -> Result<Vec<LogEntry>, ParseError> {
    let file = File::open(file_path)
        .await
        .map_err(|e| ParseError::io(file_path, e))?;

    let mut lines = BufReader::new(file).lines();
    let mut entries = Vec::new();
    let mut line_number: usize = 0;
    let mut skipped: usize = 0;

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| ParseError::io(file_path, e))?
    {
        line_number += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_log_line(line) {
            Ok(Some(entry)) => entries.push(entry),
            Ok(None) => {}
            Err(e) => {
                skipped += 1;
                debug!(
                    path = %file_path.display(),
                    line = line_number,
                    error = %e,
                    "Skipping malformed log line"
                );
            }
        }
    }

    debug!(
        path = %file_path.display(),
        entries = entries.len(),
        skipped,
        "Parsed log file"
    );
    Ok(entries)
}

/// Parse a single log line.
///
/// Returns `Ok(None)` for well-formed records of a type this crate doesn't
/// track (file snapshots, progress markers, ...).
pub fn parse_log_line(line: &str) -> Result<Option<LogEntry>, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(line)?;

    let known = value
        .get("type")
        .and_then(|t| t.as_str())
        .and_then(EntryType::from_wire)
        .is_some();
    if !known {
        return Ok(None);
    }

    serde_json::from_value(value).map(Some)
}
