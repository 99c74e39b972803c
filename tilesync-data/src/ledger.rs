//! The `state.csv` ledger of known replication states.
//!
//! Each row records a sequence number and its timestamp, for example
//! `5001,2020-01-02T00-00-00`. Rows are appended as soon as a state is
//! learned from the feed, so an interrupted discovery keeps what it found.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::timestamp::{TimestampError, format_ledger, parse_timestamp};

/// File name of the ledger inside the diffs directory.
pub const LEDGER_FILE: &str = "state.csv";

/// One known replication state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LedgerRow {
    /// Replication sequence number.
    pub sequence: u64,
    /// Timestamp the state is current to.
    pub timestamp: DateTime<Utc>,
}

/// Errors raised by [`DiffLedger`].
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Reading or appending failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// The `state.csv` file.
        path: Utf8PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
    /// A row was not `sequence,timestamp`.
    #[error("{path}:{line}: malformed row {row:?}")]
    MalformedRow {
        /// The `state.csv` file.
        path: Utf8PathBuf,
        /// One-based line number.
        line: usize,
        /// The offending text.
        row: String,
    },
    /// A row carried an unparseable timestamp.
    #[error("{path}:{line}: {source}")]
    MalformedTimestamp {
        /// The `state.csv` file.
        path: Utf8PathBuf,
        /// One-based line number.
        line: usize,
        /// Parse failure.
        #[source]
        source: TimestampError,
    },
}

/// Append-only ledger stored next to the downloaded diffs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLedger {
    path: Utf8PathBuf,
}

impl DiffLedger {
    /// Ledger for the diffs directory `diffs_location`.
    #[must_use]
    pub fn in_directory(diffs_location: &Utf8Path) -> Self {
        Self {
            path: diffs_location.join(LEDGER_FILE),
        }
    }

    /// Path of the ledger file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// All rows in file order; a missing ledger is empty.
    pub fn load(&self) -> Result<Vec<LedgerRow>, LedgerError> {
        let exists = tilesync_fs::file_is_file(&self.path).map_err(|source| self.io(source))?;
        if !exists {
            return Ok(Vec::new());
        }
        let text = tilesync_fs::read_to_string(&self.path).map_err(|source| self.io(source))?;
        text.lines()
            .enumerate()
            .filter(|(_, row)| !row.trim().is_empty())
            .map(|(index, row)| self.parse_row(index + 1, row))
            .collect()
    }

    /// Append rows, in order.
    pub fn append(&self, rows: &[LedgerRow]) -> Result<(), LedgerError> {
        if rows.is_empty() {
            return Ok(());
        }
        let body = rows
            .iter()
            .map(|row| format!("{},{}\n", row.sequence, format_ledger(row.timestamp)))
            .collect::<String>();
        tilesync_fs::append(&self.path, body.as_bytes()).map_err(|source| self.io(source))
    }

    fn parse_row(&self, line: usize, row: &str) -> Result<LedgerRow, LedgerError> {
        let malformed = || LedgerError::MalformedRow {
            path: self.path.clone(),
            line,
            row: row.to_owned(),
        };
        let (sequence_text, timestamp_text) = row.split_once(',').ok_or_else(malformed)?;
        let sequence = sequence_text.trim().parse::<u64>().map_err(|_| malformed())?;
        let timestamp =
            parse_timestamp(timestamp_text).map_err(|source| LedgerError::MalformedTimestamp {
                path: self.path.clone(),
                line,
                source,
            })?;
        Ok(LedgerRow {
            sequence,
            timestamp,
        })
    }

    fn io(&self, source: std::io::Error) -> LedgerError {
        LedgerError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
