//! Error types for airq-store.

use std::io;
use std::path::PathBuf;

use rusqlite::ErrorCode;

/// Result type for airq-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in airq-store.
///
/// Backends map their native failures onto two broad classes: the medium
/// could not be reached ([`Error::Unavailable`]), or it was reached but the
/// batch could not be committed ([`Error::WriteRejected`]). Every query
/// failure is reported as `Unavailable`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The underlying medium cannot be reached or opened.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A well-formed batch could not be committed.
    #[error("Write rejected: {0}")]
    WriteRejected(String),

    /// The backend does not provide this capability.
    #[error("{operation} is not supported by the {backend} store")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },

    /// A persisted line could not be parsed back into a record.
    #[error("Malformed record at line {line}: {message}")]
    MalformedRecord { line: u64, message: String },

    /// Failed to create the store directory.
    #[error("Failed to create store directory {path}: {source}")]
    CreateDirectory { path: PathBuf, source: io::Error },
}

impl Error {
    /// Whether this error means the medium itself could not be reached.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Error::Unavailable(_) | Error::CreateDirectory { .. })
    }

    /// Classify an I/O error raised while reading.
    pub(crate) fn io_read(err: io::Error) -> Self {
        Error::Unavailable(err.to_string())
    }

    /// Classify an I/O error raised while writing.
    pub(crate) fn io_write(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound
            | io::ErrorKind::PermissionDenied
            | io::ErrorKind::NotConnected
            | io::ErrorKind::ConnectionRefused => Error::Unavailable(err.to_string()),
            _ => Error::WriteRejected(err.to_string()),
        }
    }

    /// Classify a SQLite error raised while reading or opening.
    pub(crate) fn sqlite_read(err: rusqlite::Error) -> Self {
        Error::Unavailable(err.to_string())
    }

    /// Classify a SQLite error raised while writing.
    pub(crate) fn sqlite_write(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(
                ErrorCode::CannotOpen
                | ErrorCode::NotADatabase
                | ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::PermissionDenied,
            ) => Error::Unavailable(err.to_string()),
            _ => Error::WriteRejected(err.to_string()),
        }
    }

    /// Classify an error from the csv crate.
    pub(crate) fn csv_read(err: csv::Error) -> Self {
        let line = err.position().map(|p| p.line()).unwrap_or(0);
        match err.into_kind() {
            csv::ErrorKind::Io(e) => Error::io_read(e),
            other => Error::MalformedRecord {
                line,
                message: format!("{:?}", other),
            },
        }
    }
}
