//! Confidence-gated prediction over whichever model is available.

use crate::config::RecognitionConfig;
use crate::knn::NeighborModel;
use crate::lbph::HistogramModel;
use crate::types::{BackendKind, FaceSample, Prediction};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PredictorError {
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("{kind} model at {path} could not be loaded: {reason}")]
    BackendLoadFailure {
        kind: BackendKind,
        path: PathBuf,
        reason: String,
    },
}

/// The loaded recognizer, chosen once at load time.
#[derive(Debug, Clone)]
pub enum Backend {
    Histogram(HistogramModel),
    Neighbor(NeighborModel),
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Histogram(_) => BackendKind::Histogram,
            Backend::Neighbor(_) => BackendKind::Neighbor,
        }
    }
}

/// A loaded model plus the acceptance gate for its score.
#[derive(Debug, Clone)]
pub struct Predictor {
    backend: Backend,
    confidence_threshold: f64,
    proba_threshold: f64,
}

impl Predictor {
    /// Load the histogram model if present and valid, else the neighbor
    /// model.
    ///
    /// Reads only. A model trained at a different canonical size than
    /// `config.canonical_size` counts as a load failure.
    pub fn load(config: &RecognitionConfig) -> Result<Self, PredictorError> {
        let mut last_failure = None;

        let path = &config.histogram_model_path;
        if path.exists() {
            match load_histogram(path, config.canonical_size) {
                Ok(model) => {
                    tracing::info!(path = %path.display(), samples = model.len(), "histogram model loaded");
                    return Ok(Self::from_backend(Backend::Histogram(model), config));
                }
                Err(reason) => {
                    tracing::warn!(path = %path.display(), %reason, "histogram model unusable, trying neighbor model");
                    last_failure = Some((BackendKind::Histogram, path.clone(), reason));
                }
            }
        }

        let path = &config.neighbor_model_path;
        if path.exists() {
            match load_neighbor(path, config.canonical_size) {
                Ok(model) => {
                    tracing::info!(path = %path.display(), samples = model.len(), "neighbor model loaded");
                    return Ok(Self::from_backend(Backend::Neighbor(model), config));
                }
                Err(reason) => {
                    tracing::warn!(path = %path.display(), %reason, "neighbor model unusable");
                    last_failure = Some((BackendKind::Neighbor, path.clone(), reason));
                }
            }
        }

        match last_failure {
            Some((kind, path, reason)) => Err(PredictorError::BackendLoadFailure { kind, path, reason }),
            None => Err(PredictorError::ModelUnavailable("no trained model found".into())),
        }
    }

    /// Wrap an already-loaded backend with the thresholds from `config`.
    pub fn from_backend(backend: Backend, config: &RecognitionConfig) -> Self {
        Self {
            backend,
            confidence_threshold: config.confidence_threshold,
            proba_threshold: config.proba_threshold,
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Classify a canonical sample and apply the backend's gate.
    pub fn predict(&self, sample: &FaceSample) -> Prediction {
        match &self.backend {
            Backend::Histogram(model) => {
                let (subject, distance) = model.predict(sample);
                Prediction {
                    subject,
                    score: distance,
                    accepted: distance < self.confidence_threshold,
                    kind: BackendKind::Histogram,
                    threshold: self.confidence_threshold,
                }
            }
            Backend::Neighbor(model) => {
                let (subject, probability) = model.predict(sample);
                Prediction {
                    subject,
                    score: probability,
                    accepted: probability >= self.proba_threshold,
                    kind: BackendKind::Neighbor,
                    threshold: self.proba_threshold,
                }
            }
        }
    }
}

fn load_histogram(path: &Path, canonical_size: u32) -> Result<HistogramModel, String> {
    let model = HistogramModel::load(path).map_err(|e| e.to_string())?;
    if model.sample_size() != canonical_size {
        return Err(format!(
            "trained at {0}x{0}, expected {1}x{1}",
            model.sample_size(),
            canonical_size
        ));
    }
    Ok(model)
}

fn load_neighbor(path: &Path, canonical_size: u32) -> Result<NeighborModel, String> {
    let model = NeighborModel::load(path).map_err(|e| e.to_string())?;
    let expected = (canonical_size as usize) * (canonical_size as usize);
    if model.dim() != expected {
        return Err(format!("feature length {}, expected {expected}", model.dim()));
    }
    Ok(model)
}
