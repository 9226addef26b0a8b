//! attend-store: the accounts and attendance side of the system.
//!
//! A single SQLite database holds login accounts (with their enrolled
//! subject id), the subject → display name mapping, and one attendance row
//! per subject per day. [`Store`] implements
//! [`attend_core::AccountDirectory`] so the recognition core can check and
//! record attendance without knowing about SQL.

pub mod accounts;
pub mod attendance;
pub mod export;
mod schema;

pub use accounts::{Account, AccountDetails, NewAccount, Role};
pub use attendance::AttendanceRecord;
pub use export::export_csv;

use attend_core::{AccountDirectory, SubjectId};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("account '{0}' already exists")]
    DuplicateAccount(String),
    #[error("user not found: {0}")]
    UnknownAccount(String),
    #[error("incorrect password")]
    WrongPassword,
    #[error("no account with id {0}")]
    AccountNotFound(i64),
    #[error("invalid stored value: {0}")]
    InvalidValue(String),
}

/// Handle to the attendance database.
pub struct Store {
    conn: Connection,
    /// Daily `<date>.csv` files are appended here when set.
    attendance_dir: Option<PathBuf>,
}

impl Store {
    /// Open (or create) the database file, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        tracing::debug!(path = %path.display(), "database opened");
        Ok(Self {
            conn,
            attendance_dir: None,
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
            attendance_dir: None,
        })
    }

    /// Mirror every recorded attendance to `<dir>/<YYYY-MM-DD>.csv`.
    pub fn with_attendance_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.attendance_dir = Some(dir.into());
        self
    }

    /// Create tables that do not exist yet.
    pub fn initialize(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(schema::SCHEMA)?;
        Ok(())
    }
}

impl AccountDirectory for Store {
    type Error = StoreError;

    fn subject_for_account(&self, account: &str) -> Result<Option<SubjectId>, StoreError> {
        Ok(self.account_by_username(account)?.and_then(|a| a.subject))
    }

    fn display_name(&self, subject: SubjectId) -> Result<Option<String>, StoreError> {
        self.face_name(subject)
    }

    fn record_attendance(&self, subject: SubjectId, name: &str) -> Result<(), StoreError> {
        Store::record_attendance(self, subject, name).map(|_| ())
    }
}
