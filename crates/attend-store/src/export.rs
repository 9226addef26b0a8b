use crate::attendance::{AttendanceRecord, DATE_FORMAT, TIMESTAMP_FORMAT};
use crate::StoreError;
use std::io::Write;

/// Write attendance rows as CSV with an `id,subject,name,timestamp,date`
/// header.
pub fn export_csv<W: Write>(rows: &[AttendanceRecord], writer: W) -> Result<(), StoreError> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(["id", "subject", "name", "timestamp", "date"])?;
    for row in rows {
        wtr.write_record([
            row.id.to_string(),
            row.subject.to_string(),
            row.name.clone(),
            row.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            row.date.format(DATE_FORMAT).to_string(),
        ])?;
    }
    wtr.flush().map_err(csv::Error::from)?;
    Ok(())
}
