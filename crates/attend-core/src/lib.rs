//! attend-core: face recognition engine for attendance capture.
//!
//! Normalizes photos to a canonical grayscale face crop, keeps a gallery of
//! labelled crops on disk, trains a local-binary-pattern histogram model with
//! a nearest-neighbour fallback, and gates every prediction on a
//! backend-specific confidence threshold.

pub mod attendance;
pub mod config;
pub mod debug_log;
pub mod detector;
pub mod equalize;
pub mod evaluator;
pub mod gallery;
pub mod knn;
pub mod lbph;
pub mod normalizer;
pub mod persist;
pub mod predictor;
pub mod trainer;
pub mod types;

pub use attendance::{AccountDirectory, AttendanceDesk, AttendanceError, AttendanceOutcome};
pub use config::{GalleryConfig, RecognitionConfig};
pub use debug_log::DebugLog;
pub use detector::{CascadeDetector, FaceDetector};
pub use evaluator::{evaluate_gallery, EvaluationReport};
pub use gallery::{Gallery, GalleryEntry, GalleryError};
pub use normalizer::{NormalizeError, Normalizer};
pub use predictor::{Predictor, PredictorError};
pub use trainer::{TrainError, TrainReport, Trainer};
pub use types::{BackendKind, FaceRect, FaceSample, LabeledSample, Prediction, SubjectId};
