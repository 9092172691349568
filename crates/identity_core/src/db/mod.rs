//! SQLite bootstrap for the contact store.
//!
//! Every connection handed out by [`open_db`] or [`open_db_in_memory`] has
//! foreign keys on, a busy timeout, and the `contacts` schema at
//! [`migrations::latest_version`]. The schema version is kept in
//! `PRAGMA user_version`; a file stamped by a newer binary is refused rather
//! than downgraded.

use rusqlite::ErrorCode;
use std::fmt;

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}

impl DbError {
    /// Log code distinguishing lock contention and unreadable files from
    /// other driver failures.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(failure, _)) => match failure.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => "sqlite_busy",
                ErrorCode::CannotOpen | ErrorCode::PermissionDenied => "sqlite_cannot_open",
                ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt => "sqlite_not_a_database",
                _ => "sqlite_error",
            },
            Self::Sqlite(_) => "sqlite_error",
            Self::UnsupportedSchemaVersion { .. } => "schema_too_new",
        }
    }

    /// Whether retrying after the competing writer finishes could succeed.
    pub fn is_busy(&self) -> bool {
        self.code() == "sqlite_busy"
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "sqlite error: {err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "contact database schema version {db_version} is newer than supported {latest_supported}"
            ),
        }
    }
}

impl std::error::Error for DbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
