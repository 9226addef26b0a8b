//! Daily attendance rows: at most one per subject per local date.

use crate::{Store, StoreError};
use attend_core::SubjectId;
use chrono::{Local, NaiveDate, NaiveDateTime};
use rusqlite::{params, Row};
use serde::Serialize;
use std::fs::OpenOptions;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRecord {
    pub id: i64,
    pub subject: SubjectId,
    pub name: String,
    pub timestamp: NaiveDateTime,
    pub date: NaiveDate,
}

impl AttendanceRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let timestamp: String = row.get(3)?;
        let date: String = row.get(4)?;
        Ok(Self {
            id: row.get(0)?,
            subject: SubjectId(row.get(1)?),
            name: row.get(2)?,
            timestamp: NaiveDateTime::parse_from_str(&timestamp, TIMESTAMP_FORMAT)
                .map_err(|e| conversion_error(3, e))?,
            date: NaiveDate::parse_from_str(&date, DATE_FORMAT).map_err(|e| conversion_error(4, e))?,
        })
    }
}

fn conversion_error(column: usize, e: chrono::ParseError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
}

impl Store {
    /// Record attendance now, in local time.
    pub fn record_attendance(&self, subject: SubjectId, name: &str) -> Result<AttendanceRecord, StoreError> {
        self.record_attendance_at(subject, name, Local::now().naive_local())
    }

    /// Record attendance at `at`.
    ///
    /// A second record for the same subject on the same date replaces the
    /// name and timestamp of the first instead of adding a row. When an
    /// attendance directory is configured, every call also appends
    /// `subject,name,timestamp` to that day's CSV file. The database row is
    /// authoritative: a failed CSV append is logged and does not fail the
    /// call.
    pub fn record_attendance_at(
        &self,
        subject: SubjectId,
        name: &str,
        at: NaiveDateTime,
    ) -> Result<AttendanceRecord, StoreError> {
        let timestamp = at.format(TIMESTAMP_FORMAT).to_string();
        let date = at.date().format(DATE_FORMAT).to_string();

        self.conn.execute(
            "INSERT INTO attendance (subject, name, timestamp, date) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (subject, date) DO UPDATE SET name = excluded.name, timestamp = excluded.timestamp",
            params![subject.0, name, timestamp, date],
        )?;
        let record = self.conn.query_row(
            "SELECT id, subject, name, timestamp, date FROM attendance WHERE subject = ?1 AND date = ?2",
            params![subject.0, date],
            AttendanceRecord::from_row,
        )?;

        if let Some(dir) = &self.attendance_dir {
            if let Err(e) = self.append_daily_csv(dir, &date, subject, name, &timestamp) {
                tracing::warn!(subject = %subject, date = %date, error = %e, "daily CSV append failed");
            }
        }

        tracing::info!(subject = %subject, name, date = %date, "attendance stored");
        Ok(record)
    }

    /// Rows for one date, or for all dates, newest first.
    pub fn read_attendance(&self, date: Option<NaiveDate>) -> Result<Vec<AttendanceRecord>, StoreError> {
        let rows = match date {
            Some(d) => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, subject, name, timestamp, date FROM attendance
                     WHERE date = ?1 ORDER BY timestamp DESC, id DESC",
                )?;
                let rows = stmt.query_map([d.format(DATE_FORMAT).to_string()], AttendanceRecord::from_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, subject, name, timestamp, date FROM attendance
                     ORDER BY timestamp DESC, id DESC",
                )?;
                let rows = stmt.query_map([], AttendanceRecord::from_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(rows)
    }

    /// One subject's rows, optionally limited to a date, newest first.
    pub fn read_subject_attendance(
        &self,
        subject: SubjectId,
        date: Option<NaiveDate>,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, subject, name, timestamp, date FROM attendance
             WHERE subject = ?1 AND (?2 IS NULL OR date = ?2)
             ORDER BY timestamp DESC, id DESC",
        )?;
        let date = date.map(|d| d.format(DATE_FORMAT).to_string());
        let rows = stmt.query_map(params![subject.0, date], AttendanceRecord::from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Delete rows for one date, or all rows; returns how many were removed.
    /// Daily CSV files are left alone.
    pub fn clear_attendance(&self, date: Option<NaiveDate>) -> Result<usize, StoreError> {
        let removed = match date {
            Some(d) => self.conn.execute(
                "DELETE FROM attendance WHERE date = ?1",
                [d.format(DATE_FORMAT).to_string()],
            )?,
            None => self.conn.execute("DELETE FROM attendance", [])?,
        };
        tracing::info!(removed, date = ?date, "attendance cleared");
        Ok(removed)
    }

    fn append_daily_csv(
        &self,
        dir: &std::path::Path,
        date: &str,
        subject: SubjectId,
        name: &str,
        timestamp: &str,
    ) -> Result<(), StoreError> {
        let io_err = |path: &std::path::Path| {
            let path = path.to_path_buf();
            move |source| StoreError::Io { path, source }
        };
        std::fs::create_dir_all(dir).map_err(io_err(dir))?;
        let path = dir.join(format!("{date}.csv"));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err(&path))?;
        let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        wtr.write_record([subject.to_string().as_str(), name, timestamp])?;
        wtr.flush().map_err(io_err(&path))?;
        Ok(())
    }
}
