//! Append-only prediction log for offline threshold tuning.
//!
//! Never read back, and a failed write never changes a prediction outcome.

use crate::types::{Prediction, SubjectId};
use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct DebugLog {
    path: PathBuf,
}

impl DebugLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line:
    /// `<timestamp> | <description> | pred=<id> | conf=<score> | expected=<id|None>`.
    pub fn append(&self, description: &str, prediction: &Prediction, expected: Option<SubjectId>) {
        let line = format_line(
            &Local::now().to_rfc3339(),
            description,
            prediction,
            expected,
        );
        if let Err(e) = self.write_line(&line) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to append prediction debug log");
        }
    }

    fn write_line(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{line}")
    }
}

fn format_line(timestamp: &str, description: &str, prediction: &Prediction, expected: Option<SubjectId>) -> String {
    let expected = expected.map_or_else(|| "None".to_string(), |id| id.to_string());
    format!(
        "{timestamp} | {description} | pred={} | conf={:.4} | expected={expected}",
        prediction.subject, prediction.score
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BackendKind;

    fn prediction() -> Prediction {
        Prediction {
            subject: SubjectId(7),
            score: 41.23456,
            accepted: true,
            kind: BackendKind::Histogram,
            threshold: 100.0,
        }
    }

    #[test]
    fn test_format_line() {
        assert_eq!(
            format_line("2024-05-01T09:00:00+00:00", "upload:ada", &prediction(), Some(SubjectId(7))),
            "2024-05-01T09:00:00+00:00 | upload:ada | pred=7 | conf=41.2346 | expected=7"
        );
        assert!(format_line("t", "d", &prediction(), None).ends_with("expected=None"));
    }

    #[test]
    fn test_append_creates_file_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let log = DebugLog::new(dir.path().join("debug_logs/predictions.log"));
        log.append("first", &prediction(), None);
        log.append("second", &prediction(), Some(SubjectId(3)));

        let text = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("| first | pred=7 |"));
        assert!(lines[1].ends_with("expected=3"));
    }

    #[test]
    fn test_append_failure_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the log file should be.
        let log = DebugLog::new(dir.path());
        log.append("ignored", &prediction(), None);
        assert!(dir.path().is_dir());
    }
}
