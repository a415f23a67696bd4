//! SQLite-backed persistent store shared by every session of a stack.
//!
//! # Responsibility
//! - Open, migrate and destroy the store file for one schema.
//! - Execute fetch/count reads and apply root-session change sets.
//!
//! # Invariants
//! - Store layout version is tracked via `PRAGMA user_version`.
//! - Only sessions touch the store; nothing else reads or writes it.
//!
//! # See also
//! - `session` for the overlay applied on top of store rows.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;
mod store;

pub use open::{destroy_store_files, open_store, StoreLocation};
pub use store::{ChangeSet, PersistentStore, RecordWrite, StoreRow};
pub(crate) use store::StoreQuery;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    Io(std::io::Error),
    /// No schema with this name is registered.
    SchemaNotFound(String),
    /// Store exists but cannot be used with the requested schema.
    Corrupt(String),
    UnsupportedStoreVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// Persisted row cannot be decoded.
    InvalidData(String),
    /// Store has been closed by teardown.
    Closed,
}

impl StoreError {
    /// Whether the failure indicates an unusable store file rather than a
    /// transient I/O problem.
    pub fn is_corruption(&self) -> bool {
        match self {
            Self::Corrupt(_) | Self::UnsupportedStoreVersion { .. } => true,
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::NotADatabase | rusqlite::ErrorCode::DatabaseCorrupt
            ),
            _ => false,
        }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "store i/o failed: {err}"),
            Self::SchemaNotFound(name) => write!(f, "schema `{name}` not found"),
            Self::Corrupt(message) => write!(f, "store is corrupt: {message}"),
            Self::UnsupportedStoreVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "store layout version {db_version} is newer than supported {latest_supported}"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted record data: {message}"),
            Self::Closed => write!(f, "store is closed"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}
