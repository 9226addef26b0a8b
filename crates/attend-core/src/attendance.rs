//! Attendance marking: recognize a photo and record attendance only for a
//! confident match against the caller's own enrolled subject.

use crate::config::RecognitionConfig;
use crate::debug_log::DebugLog;
use crate::detector::FaceDetector;
use crate::normalizer::{decode_image, NormalizeError, Normalizer};
use crate::predictor::{Predictor, PredictorError};
use crate::types::{Prediction, SubjectId};
use image::DynamicImage;
use thiserror::Error;

/// Read accessors and the one write effect the attendance flow needs from
/// the accounts store.
pub trait AccountDirectory {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Subject enrolled for a login account, if any.
    fn subject_for_account(&self, account: &str) -> Result<Option<SubjectId>, Self::Error>;

    fn display_name(&self, subject: SubjectId) -> Result<Option<String>, Self::Error>;

    fn record_attendance(&self, subject: SubjectId, name: &str) -> Result<(), Self::Error>;
}

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error(transparent)]
    Predictor(#[from] PredictorError),
    #[error("account directory error: {0}")]
    Directory(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Business result of a marking attempt. Only `Recorded` wrote anything.
#[derive(Debug, Clone, PartialEq)]
pub enum AttendanceOutcome {
    /// The score did not clear the backend's gate.
    LowConfidence { prediction: Prediction },
    /// The account has no subject id assigned.
    NotEnrolled { prediction: Prediction },
    /// Confident, but for someone else.
    IdentityMismatch {
        prediction: Prediction,
        enrolled: SubjectId,
    },
    Recorded { prediction: Prediction, name: String },
}

impl AttendanceOutcome {
    pub fn prediction(&self) -> &Prediction {
        match self {
            AttendanceOutcome::LowConfidence { prediction }
            | AttendanceOutcome::NotEnrolled { prediction }
            | AttendanceOutcome::IdentityMismatch { prediction, .. }
            | AttendanceOutcome::Recorded { prediction, .. } => prediction,
        }
    }

    pub fn is_recorded(&self) -> bool {
        matches!(self, AttendanceOutcome::Recorded { .. })
    }

    /// Message for the person marking attendance.
    pub fn message(&self) -> String {
        match self {
            AttendanceOutcome::LowConfidence { .. } => "Not confident enough to mark attendance".to_string(),
            AttendanceOutcome::NotEnrolled { .. } => "No face id assigned to your account".to_string(),
            AttendanceOutcome::IdentityMismatch { prediction, enrolled } => format!(
                "Recognized as id {}, which does not match your assigned id {enrolled}",
                prediction.subject
            ),
            AttendanceOutcome::Recorded { name, .. } => {
                format!("Recognized as {name}: attendance recorded")
            }
        }
    }
}

/// Runs the marking flow against a normalizer, the model registry and an
/// account directory.
pub struct AttendanceDesk<'a, D, A> {
    normalizer: &'a Normalizer<D>,
    config: &'a RecognitionConfig,
    directory: &'a A,
    debug_log: Option<DebugLog>,
}

impl<'a, D: FaceDetector, A: AccountDirectory> AttendanceDesk<'a, D, A> {
    pub fn new(normalizer: &'a Normalizer<D>, config: &'a RecognitionConfig, directory: &'a A) -> Self {
        Self {
            normalizer,
            config,
            directory,
            debug_log: None,
        }
    }

    pub fn with_debug_log(mut self, log: DebugLog) -> Self {
        self.debug_log = Some(log);
        self
    }

    /// Recognize `image` for `account`.
    ///
    /// The model registry is reloaded on every call so a retrain is picked up
    /// without restarting. Attendance is written only when the prediction is
    /// accepted and names the account's own subject.
    pub fn mark(&self, account: &str, image: &DynamicImage) -> Result<AttendanceOutcome, AttendanceError> {
        let sample = self.normalizer.normalize(image)?;
        let predictor = Predictor::load(self.config)?;
        let prediction = predictor.predict(&sample);

        let enrolled = self
            .directory
            .subject_for_account(account)
            .map_err(directory_error)?;

        if let Some(log) = &self.debug_log {
            log.append(&format!("upload:{account}"), &prediction, enrolled);
        }
        tracing::info!(
            account,
            subject = %prediction.subject,
            score = prediction.score,
            accepted = prediction.accepted,
            kind = %prediction.kind,
            "attendance prediction"
        );

        if !prediction.accepted {
            return Ok(AttendanceOutcome::LowConfidence { prediction });
        }
        let Some(enrolled) = enrolled else {
            return Ok(AttendanceOutcome::NotEnrolled { prediction });
        };
        if prediction.subject != enrolled {
            return Ok(AttendanceOutcome::IdentityMismatch { prediction, enrolled });
        }

        let name = self
            .directory
            .display_name(prediction.subject)
            .map_err(directory_error)?
            .unwrap_or_else(|| format!("User{}", prediction.subject));
        self.directory
            .record_attendance(prediction.subject, &name)
            .map_err(directory_error)?;
        tracing::info!(subject = %prediction.subject, name = %name, "attendance recorded");

        Ok(AttendanceOutcome::Recorded { prediction, name })
    }

    /// [`mark`](Self::mark) over an encoded image buffer.
    pub fn mark_bytes(&self, account: &str, bytes: &[u8]) -> Result<AttendanceOutcome, AttendanceError> {
        let image = decode_image(bytes)?;
        self.mark(account, &image)
    }
}

fn directory_error<E: std::error::Error + Send + Sync + 'static>(e: E) -> AttendanceError {
    AttendanceError::Directory(Box::new(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BackendKind;

    fn prediction(subject: u32) -> Prediction {
        Prediction {
            subject: SubjectId(subject),
            score: 12.0,
            accepted: true,
            kind: BackendKind::Histogram,
            threshold: 100.0,
        }
    }

    #[test]
    fn test_outcome_messages() {
        let mismatch = AttendanceOutcome::IdentityMismatch {
            prediction: prediction(9),
            enrolled: SubjectId(7),
        };
        assert_eq!(
            mismatch.message(),
            "Recognized as id 9, which does not match your assigned id 7"
        );
        assert!(!mismatch.is_recorded());

        let recorded = AttendanceOutcome::Recorded {
            prediction: prediction(7),
            name: "Ada".into(),
        };
        assert!(recorded.is_recorded());
        assert_eq!(recorded.prediction().subject, SubjectId(7));
        assert_eq!(recorded.message(), "Recognized as Ada: attendance recorded");
    }
}
