//! Login accounts and the subject → display name mapping.

use crate::{Store, StoreError};
use attend_core::SubjectId;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, ErrorCode, OptionalExtension, Row};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

const ACCOUNT_COLUMNS: &str = "id, username, role, subject, name, uid, section, course, created_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            other => Err(format!("unknown role '{other}' (expected admin or user)")),
        }
    }
}

impl ToSql for Role {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

/// A stored login account. The password hash never leaves the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Account {
    pub id: i64,
    pub username: String,
    pub role: Role,
    /// Enrolled face subject, if one has been assigned.
    pub subject: Option<SubjectId>,
    pub name: Option<String>,
    pub uid: Option<String>,
    pub section: Option<String>,
    pub course: Option<String>,
    pub created_at: String,
}

impl Account {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            username: row.get(1)?,
            role: row.get(2)?,
            subject: row.get::<_, Option<u32>>(3)?.map(SubjectId),
            name: row.get(4)?,
            uid: row.get(5)?,
            section: row.get(6)?,
            course: row.get(7)?,
            created_at: row.get(8)?,
        })
    }
}

/// Profile fields an administrator may edit after signup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountDetails {
    pub role: Role,
    pub subject: Option<SubjectId>,
    pub name: Option<String>,
    pub uid: Option<String>,
    pub section: Option<String>,
    pub course: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewAccount {
    pub username: String,
    pub password: String,
    pub details: AccountDetails,
}

/// Hex-encoded SHA-256 of the password.
pub fn hash_password(password: &str) -> String {
    Sha256::digest(password.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

impl Store {
    /// Insert an account and return its id.
    pub fn create_account(&self, account: &NewAccount) -> Result<i64, StoreError> {
        let d = &account.details;
        let inserted = self.conn.execute(
            "INSERT INTO accounts (username, password_hash, role, subject, name, uid, section, course)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                account.username,
                hash_password(&account.password),
                d.role,
                d.subject.map(|s| s.0),
                d.name,
                d.uid,
                d.section,
                d.course,
            ],
        );
        match inserted {
            Ok(_) => {
                let id = self.conn.last_insert_rowid();
                tracing::info!(id, username = %account.username, role = %d.role, "account created");
                Ok(id)
            }
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(StoreError::DuplicateAccount(account.username.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Check a username/password pair.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<Account, StoreError> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {ACCOUNT_COLUMNS}, password_hash FROM accounts WHERE username = ?1"),
                [username],
                |row| Ok((Account::from_row(row)?, row.get::<_, String>(9)?)),
            )
            .optional()?;
        let Some((account, stored_hash)) = row else {
            return Err(StoreError::UnknownAccount(username.to_string()));
        };
        if hash_password(password) != stored_hash {
            tracing::warn!(username, "authentication failed");
            return Err(StoreError::WrongPassword);
        }
        Ok(account)
    }

    /// All accounts ordered by id.
    pub fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY id"))?;
        let rows = stmt.query_map([], Account::from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn account_by_username(&self, username: &str) -> Result<Option<Account>, StoreError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE username = ?1"),
                [username],
                Account::from_row,
            )
            .optional()?)
    }

    /// First account (lowest id) enrolled as `subject`.
    pub fn account_by_subject(&self, subject: SubjectId) -> Result<Option<Account>, StoreError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE subject = ?1 ORDER BY id LIMIT 1"),
                [subject.0],
                Account::from_row,
            )
            .optional()?)
    }

    pub fn assign_subject(&self, account_id: i64, subject: SubjectId) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE accounts SET subject = ?1 WHERE id = ?2",
            params![subject.0, account_id],
        )?;
        if changed == 0 {
            return Err(StoreError::AccountNotFound(account_id));
        }
        tracing::info!(account_id, subject = %subject, "subject assigned");
        Ok(())
    }

    /// Overwrite every editable profile field.
    pub fn update_details(&self, account_id: i64, details: &AccountDetails) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE accounts SET role = ?1, subject = ?2, name = ?3, uid = ?4, section = ?5, course = ?6
             WHERE id = ?7",
            params![
                details.role,
                details.subject.map(|s| s.0),
                details.name,
                details.uid,
                details.section,
                details.course,
                account_id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::AccountNotFound(account_id));
        }
        Ok(())
    }

    /// Set the display name for a subject, replacing any previous one.
    pub fn set_face_name(&self, subject: SubjectId, name: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO faces (subject, name) VALUES (?1, ?2)",
            params![subject.0, name],
        )?;
        Ok(())
    }

    pub fn face_name(&self, subject: SubjectId) -> Result<Option<String>, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT name FROM faces WHERE subject = ?1", [subject.0], |row| row.get(0))
            .optional()?)
    }
}
