//! Builds both recognizers from the gallery and writes them to the model
//! registry.
//!
//! The histogram model is the primary backend and the neighbor model the
//! fallback. Both are attempted on every run; a failure in one never stops
//! the other, and the run succeeds if either one was written.

use crate::config::RecognitionConfig;
use crate::gallery::{load_sample, Gallery, GalleryError};
use crate::knn::NeighborModel;
use crate::lbph::HistogramModel;
use crate::persist::ModelError;
use crate::types::LabeledSample;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Serialises training runs within this process. Model files are still
/// overwritten in place, so another process training concurrently can race.
static TRAIN_LOCK: Mutex<()> = Mutex::new(());

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("no training images found in {0}")]
    NoTrainingData(PathBuf),
    #[error("gallery error: {0}")]
    Gallery(#[from] GalleryError),
}

/// Result of one backend's training attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendOutcome {
    Trained { path: PathBuf, samples: usize },
    InsufficientSamples { required: usize, actual: usize },
    Failed(String),
}

impl BackendOutcome {
    pub fn is_trained(&self) -> bool {
        matches!(self, BackendOutcome::Trained { .. })
    }

    fn from_result(result: Result<(PathBuf, usize), ModelError>) -> Self {
        match result {
            Ok((path, samples)) => BackendOutcome::Trained { path, samples },
            Err(ModelError::InsufficientSamples { required, actual }) => {
                BackendOutcome::InsufficientSamples { required, actual }
            }
            Err(e) => BackendOutcome::Failed(e.to_string()),
        }
    }
}

impl fmt::Display for BackendOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendOutcome::Trained { path, samples } => {
                write!(f, "trained and saved to {} (samples={samples})", path.display())
            }
            BackendOutcome::InsufficientSamples { required, actual } => {
                write!(f, "not enough images (need at least {required}, have {actual})")
            }
            BackendOutcome::Failed(reason) => write!(f, "training failed: {reason}"),
        }
    }
}

/// Outcome of a full training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
    pub histogram: BackendOutcome,
    pub neighbor: BackendOutcome,
    /// Gallery files that could not be decoded.
    pub skipped: usize,
}

impl TrainReport {
    /// At least one backend was written.
    pub fn ok(&self) -> bool {
        self.histogram.is_trained() || self.neighbor.is_trained()
    }

    /// Operator-facing summary covering both backends.
    pub fn message(&self) -> String {
        if self.ok() {
            format!(
                "Histogram model {} | Neighbor model {}",
                self.histogram, self.neighbor
            )
        } else {
            format!(
                "Training failed. Histogram: {}; Neighbor: {}",
                self.histogram, self.neighbor
            )
        }
    }
}

/// Trains both backends from a gallery.
pub struct Trainer<'a> {
    gallery: &'a Gallery,
    config: &'a RecognitionConfig,
}

impl<'a> Trainer<'a> {
    pub fn new(gallery: &'a Gallery, config: &'a RecognitionConfig) -> Self {
        Self { gallery, config }
    }

    /// Retrain from scratch, overwriting both model files.
    ///
    /// Only an empty gallery is an error; backend failures are reported in
    /// the returned [`TrainReport`].
    pub fn train(&self) -> Result<TrainReport, TrainError> {
        let _guard = TRAIN_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let entries = self.gallery.entries()?;
        if entries.is_empty() {
            return Err(TrainError::NoTrainingData(self.gallery.dir().to_path_buf()));
        }

        let canonical = self.config.canonical_size;
        let mut samples = Vec::with_capacity(entries.len());
        let mut skipped = 0;
        for entry in &entries {
            match load_sample(&entry.path, canonical) {
                Ok(sample) => samples.push(LabeledSample {
                    subject: entry.subject,
                    sample,
                }),
                Err(e) => {
                    tracing::warn!(path = %entry.path.display(), error = %e, "skipping undecodable gallery file");
                    skipped += 1;
                }
            }
        }
        tracing::debug!(samples = samples.len(), skipped, "gallery loaded for training");

        let histogram = BackendOutcome::from_result(self.train_histogram(&samples));
        if !histogram.is_trained() {
            tracing::warn!(outcome = %histogram, "histogram backend not trained");
            discard_stale_model(&self.config.histogram_model_path);
        }
        let neighbor = BackendOutcome::from_result(self.train_neighbor(&samples));
        if !neighbor.is_trained() {
            tracing::warn!(outcome = %neighbor, "neighbor backend not trained");
            discard_stale_model(&self.config.neighbor_model_path);
        }

        let report = TrainReport {
            histogram,
            neighbor,
            skipped,
        };
        tracing::info!(ok = report.ok(), samples = samples.len(), skipped, "training finished");
        Ok(report)
    }

    fn train_histogram(&self, samples: &[LabeledSample]) -> Result<(PathBuf, usize), ModelError> {
        let model = HistogramModel::train(
            samples,
            self.config.lbp,
            self.config.canonical_size,
            self.config.min_samples,
        )?;
        let path = self.config.histogram_model_path.clone();
        model.save(&path)?;
        tracing::info!(path = %path.display(), samples = model.len(), "histogram model trained");
        Ok((path, model.len()))
    }

    fn train_neighbor(&self, samples: &[LabeledSample]) -> Result<(PathBuf, usize), ModelError> {
        let model = NeighborModel::fit(
            samples,
            self.config.neighbors,
            self.config.neighbor_weighting,
            self.config.min_samples,
        )?;
        let path = self.config.neighbor_model_path.clone();
        model.save(&path)?;
        tracing::info!(path = %path.display(), samples = model.len(), k = model.k(), "neighbor model trained");
        Ok((path, model.len()))
    }
}

/// Remove a model left over from an earlier run so the predictor cannot load
/// a backend that no longer reflects the gallery.
fn discard_stale_model(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::info!(path = %path.display(), "removed stale model"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "could not remove stale model"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GalleryConfig;
    use crate::types::{FaceSample, SubjectId};
    use crate::predictor::Predictor;
    use crate::types::BackendKind;
    use image::{GrayImage, Luma};

    fn stripes(phase: u32, vertical: bool) -> FaceSample {
        FaceSample::new(GrayImage::from_fn(200, 200, |x, y| {
            let t = if vertical { x } else { y };
            Luma([if ((t + phase) / 20) % 2 == 0 { 40 } else { 210 }])
        }))
    }

    fn setup(dir: &Path) -> (Gallery, RecognitionConfig) {
        let mut gc = GalleryConfig::in_dir(dir.join("training_images"));
        gc.extension = "png".into();
        let gallery = Gallery::open(gc).unwrap();
        let config = RecognitionConfig::default().with_model_dir(dir.join("models"));
        (gallery, config)
    }

    #[test]
    fn test_empty_gallery_is_no_training_data() {
        let dir = tempfile::tempdir().unwrap();
        let (gallery, config) = setup(dir.path());
        let err = Trainer::new(&gallery, &config).train().unwrap_err();
        assert!(matches!(err, TrainError::NoTrainingData(_)));
    }

    #[test]
    fn test_single_sample_fails_both_backends() {
        let dir = tempfile::tempdir().unwrap();
        let (gallery, config) = setup(dir.path());
        gallery.save(SubjectId(1), &stripes(0, true), None).unwrap();

        let report = Trainer::new(&gallery, &config).train().unwrap();
        assert!(!report.ok());
        assert_eq!(
            report.histogram,
            BackendOutcome::InsufficientSamples { required: 2, actual: 1 }
        );
        assert_eq!(
            report.neighbor,
            BackendOutcome::InsufficientSamples { required: 2, actual: 1 }
        );
        assert!(report.message().starts_with("Training failed. Histogram: not enough images"));
        assert!(!config.histogram_model_path.exists());
        assert!(!config.neighbor_model_path.exists());
    }

    #[test]
    fn test_two_samples_one_subject_is_enough() {
        let dir = tempfile::tempdir().unwrap();
        let (gallery, config) = setup(dir.path());
        gallery.save(SubjectId(1), &stripes(0, true), None).unwrap();
        gallery.save(SubjectId(1), &stripes(1, true), None).unwrap();

        let report = Trainer::new(&gallery, &config).train().unwrap();
        assert!(report.ok());
        assert!(report.histogram.is_trained());
        assert!(report.neighbor.is_trained());
        assert!(config.histogram_model_path.exists());
        assert!(config.neighbor_model_path.exists());
    }

    #[test]
    fn test_undecodable_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (gallery, config) = setup(dir.path());
        gallery.save(SubjectId(1), &stripes(0, true), None).unwrap();
        std::fs::write(gallery.dir().join("User.1.99.png"), b"garbage").unwrap();

        let report = Trainer::new(&gallery, &config).train().unwrap();
        assert_eq!(report.skipped, 1);
        assert!(!report.ok());
    }

    #[test]
    fn test_self_match_distance_near_zero() {
        let dir = tempfile::tempdir().unwrap();
        let (gallery, config) = setup(dir.path());
        for phase in 0..3 {
            gallery.save(SubjectId(7), &stripes(phase, true), None).unwrap();
            gallery.save(SubjectId(9), &stripes(phase, false), None).unwrap();
        }
        let report = Trainer::new(&gallery, &config).train().unwrap();
        assert!(report.ok());
        assert_eq!(
            report.histogram,
            BackendOutcome::Trained {
                path: config.histogram_model_path.clone(),
                samples: 6
            }
        );

        let model = HistogramModel::load(&config.histogram_model_path).unwrap();
        for entry in gallery.entries().unwrap() {
            let sample = load_sample(&entry.path, 200).unwrap();
            let (label, dist) = model.predict(&sample);
            assert_eq!(label, entry.subject);
            assert!(dist < 1e-6, "self distance {dist}");
        }
    }

    #[test]
    fn test_retrain_overwrites_models() {
        let dir = tempfile::tempdir().unwrap();
        let (gallery, config) = setup(dir.path());
        gallery.save(SubjectId(1), &stripes(0, true), None).unwrap();
        gallery.save(SubjectId(2), &stripes(0, false), None).unwrap();
        Trainer::new(&gallery, &config).train().unwrap();
        gallery.save(SubjectId(3), &stripes(5, true), None).unwrap();
        Trainer::new(&gallery, &config).train().unwrap();

        assert_eq!(HistogramModel::load(&config.histogram_model_path).unwrap().len(), 3);
        assert_eq!(NeighborModel::load(&config.neighbor_model_path).unwrap().len(), 3);
    }

    #[test]
    fn test_failed_histogram_retrain_drops_stale_model() {
        let dir = tempfile::tempdir().unwrap();
        let (gallery, mut config) = setup(dir.path());
        gallery.save(SubjectId(1), &stripes(0, true), None).unwrap();
        gallery.save(SubjectId(2), &stripes(0, false), None).unwrap();
        assert!(Trainer::new(&gallery, &config).train().unwrap().histogram.is_trained());
        assert!(config.histogram_model_path.exists());

        let newcomer = stripes(5, true);
        gallery.save(SubjectId(3), &newcomer, None).unwrap();
        config.lbp.grid_x = 500;
        let report = Trainer::new(&gallery, &config).train().unwrap();
        assert!(report.ok());
        assert!(matches!(report.histogram, BackendOutcome::Failed(_)));
        assert!(!config.histogram_model_path.exists());

        let predictor = Predictor::load(&config).unwrap();
        assert_eq!(predictor.kind(), BackendKind::Neighbor);
        let prediction = predictor.predict(&newcomer);
        assert_eq!(prediction.subject, SubjectId(3));
        assert!(prediction.accepted);
    }

    #[test]
    fn test_total_failure_removes_both_models() {
        let dir = tempfile::tempdir().unwrap();
        let (gallery, config) = setup(dir.path());
        let first = gallery.save(SubjectId(1), &stripes(0, true), None).unwrap();
        gallery.save(SubjectId(2), &stripes(0, false), None).unwrap();
        Trainer::new(&gallery, &config).train().unwrap();

        gallery.delete(&first).unwrap();
        let report = Trainer::new(&gallery, &config).train().unwrap();
        assert!(!report.ok());
        assert!(!config.histogram_model_path.exists());
        assert!(!config.neighbor_model_path.exists());
    }

    #[test]
    fn test_report_message_joins_outcomes() {
        let report = TrainReport {
            histogram: BackendOutcome::Failed("bad grid".into()),
            neighbor: BackendOutcome::Trained {
                path: PathBuf::from("m/knn.json"),
                samples: 4,
            },
            skipped: 0,
        };
        assert!(report.ok());
        assert_eq!(
            report.message(),
            "Histogram model training failed: bad grid | Neighbor model trained and saved to m/knn.json (samples=4)"
        );
    }
}
