//! Append-only writer for the daily Markdown logs.
//!
//! Each workspace gets one file per calendar day, named
//! `<name>-<YYYYMMDD>.md` inside the configured log directory. The first
//! write to a new file lays down a title and generation timestamp.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate, SecondsFormat};

use crate::format::LogEntry;

/// Extension of every log file.
pub const LOG_FILE_EXTENSION: &str = "md";

/// Errors from writing a log entry.
#[derive(Debug, thiserror::Error)]
pub enum AppendError {
    #[error("could not create log directory {}: {source}", path.display())]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("could not write log file {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
}

/// Writes formatted entries to per-name, per-day files.
#[derive(Debug, Clone)]
pub struct LogAppender {
    log_dir: PathBuf,
}

impl LogAppender {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
        }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Create the log directory if it does not exist yet.
    pub fn ensure_log_dir(&self) -> Result<(), AppendError> {
        std::fs::create_dir_all(&self.log_dir).map_err(|source| AppendError::CreateDir {
            path: self.log_dir.clone(),
            source,
        })
    }

    /// Path of the log file for `name` on `date`.
    pub fn log_file_path(&self, name: &str, date: NaiveDate) -> PathBuf {
        self.log_dir.join(log_file_name(name, date))
    }

    /// Append `entry` to today's file for `name`.
    pub fn append(&self, name: &str, entry: LogEntry) -> Result<PathBuf, AppendError> {
        self.append_at(name, entry, Local::now())
    }

    /// Append `entry` to the file for `name` on the date of `now`.
    ///
    /// Empty entries are not written. A header is written first if the
    /// file does not exist yet.
    pub fn append_at(
        &self,
        name: &str,
        entry: LogEntry,
        now: DateTime<Local>,
    ) -> Result<PathBuf, AppendError> {
        let path = self.log_file_path(name, now.date_naive());
        if entry.is_empty() {
            return Ok(path);
        }

        let write_err = |source: io::Error| AppendError::Write {
            path: path.clone(),
            source,
        };

        // create_new decides atomically which writer lays down the header.
        match OpenOptions::new().append(true).create_new(true).open(&path) {
            Ok(mut file) => file
                .write_all(header(name, now).as_bytes())
                .map_err(write_err)?,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(write_err(e)),
        }

        let mut file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(write_err)?;
        file.write_all(entry.into_string().as_bytes())
            .map_err(write_err)?;

        Ok(path)
    }
}

/// `<name>-<YYYYMMDD>.md`, with path separators and other characters that
/// are unsafe in file names replaced by `_`.
pub fn log_file_name(name: &str, date: NaiveDate) -> String {
    format!(
        "{}-{}.{}",
        sanitize_name(name),
        date.format("%Y%m%d"),
        LOG_FILE_EXTENSION
    )
}

fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "untitled".to_string()
    } else {
        cleaned
    }
}

fn header(name: &str, now: DateTime<Local>) -> String {
    format!(
        "# Copilot Chat Log - {}\n\nGenerated: {}\n",
        sanitize_name(name),
        now.to_rfc3339_opts(SecondsFormat::Secs, false)
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
