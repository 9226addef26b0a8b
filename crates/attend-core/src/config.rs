//! Recognition and gallery settings.
//!
//! Every stage of the pipeline takes its parameters from these structs
//! instead of module-level constants. Both deserialize from TOML/JSON with
//! missing keys falling back to the defaults below.

use crate::knn::Weighting;
use crate::lbph::LbpParams;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CANONICAL_SIZE: u32 = 200;
pub const DEFAULT_PADDING: f32 = 0.15;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 100.0;
pub const DEFAULT_PROBA_THRESHOLD: f64 = 0.80;
pub const DEFAULT_NEIGHBORS: usize = 3;
pub const DEFAULT_MIN_SAMPLES: usize = 2;

/// Parameters shared by the normalizer, trainer and predictor.
///
/// `canonical_size` must be identical at enrollment, training and prediction
/// time: models record the size they were trained at and refuse to load under
/// a different one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Side length of the square face crop, in pixels.
    pub canonical_size: u32,
    /// Fraction of the detected face size added on each side (recognition path).
    pub padding: f32,
    /// Padding applied on the enrollment path; 0 keeps the raw detector box.
    pub enroll_padding: f32,
    /// Histogram backend accepts when `distance < confidence_threshold`.
    pub confidence_threshold: f64,
    /// Neighbor backend accepts when `probability >= proba_threshold`.
    pub proba_threshold: f64,
    pub histogram_model_path: PathBuf,
    pub neighbor_model_path: PathBuf,
    /// k for the nearest-neighbour classifier.
    pub neighbors: usize,
    pub neighbor_weighting: Weighting,
    /// Minimum number of gallery samples (all subjects combined) to train.
    pub min_samples: usize,
    pub lbp: LbpParams,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            canonical_size: DEFAULT_CANONICAL_SIZE,
            padding: DEFAULT_PADDING,
            enroll_padding: 0.0,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            proba_threshold: DEFAULT_PROBA_THRESHOLD,
            histogram_model_path: PathBuf::from("models/trained_model.json"),
            neighbor_model_path: PathBuf::from("models/neighbor_model.json"),
            neighbors: DEFAULT_NEIGHBORS,
            neighbor_weighting: Weighting::default(),
            min_samples: DEFAULT_MIN_SAMPLES,
            lbp: LbpParams::default(),
        }
    }
}

impl RecognitionConfig {
    /// Place both model files in `dir`, keeping their file names.
    pub fn with_model_dir(mut self, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        self.histogram_model_path = dir.join(file_name_or(&self.histogram_model_path, "trained_model.json"));
        self.neighbor_model_path = dir.join(file_name_or(&self.neighbor_model_path, "neighbor_model.json"));
        self
    }

    /// Resolve relative model paths against `base`.
    pub fn rooted_at(mut self, base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        self.histogram_model_path = root(base, &self.histogram_model_path);
        self.neighbor_model_path = root(base, &self.neighbor_model_path);
        self
    }
}

/// Location and naming of the training image store.
///
/// Files are named `<prefix>.<subject>.[<fragment>.]<sequence>.<extension>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GalleryConfig {
    pub dir: PathBuf,
    pub prefix: String,
    /// Image format for new samples, chosen by extension (`jpg`, `png`).
    pub extension: String,
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("training_images"),
            prefix: "User".to_string(),
            extension: "jpg".to_string(),
        }
    }
}

impl GalleryConfig {
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    /// Resolve a relative gallery directory against `base`.
    pub fn rooted_at(mut self, base: impl AsRef<Path>) -> Self {
        self.dir = root(base.as_ref(), &self.dir);
        self
    }
}

fn file_name_or<'a>(path: &'a Path, fallback: &'a str) -> &'a Path {
    path.file_name().map(Path::new).unwrap_or_else(|| Path::new(fallback))
}

fn root(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = RecognitionConfig::default();
        assert_eq!(c.canonical_size, 200);
        assert!((c.padding - 0.15).abs() < 1e-6);
        assert_eq!(c.confidence_threshold, 100.0);
        assert!((c.proba_threshold - 0.80).abs() < 1e-9);
        assert_eq!(c.neighbors, 3);
        assert_eq!(c.min_samples, 2);
    }

    #[test]
    fn test_with_model_dir_keeps_file_names() {
        let c = RecognitionConfig::default().with_model_dir("/var/lib/attend/models");
        assert_eq!(
            c.histogram_model_path,
            PathBuf::from("/var/lib/attend/models/trained_model.json")
        );
        assert_eq!(
            c.neighbor_model_path,
            PathBuf::from("/var/lib/attend/models/neighbor_model.json")
        );
    }

    #[test]
    fn test_rooted_at_leaves_absolute_paths() {
        let mut c = RecognitionConfig::default();
        c.neighbor_model_path = PathBuf::from("/abs/knn.json");
        let c = c.rooted_at("/data");
        assert_eq!(c.histogram_model_path, PathBuf::from("/data/models/trained_model.json"));
        assert_eq!(c.neighbor_model_path, PathBuf::from("/abs/knn.json"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let c: RecognitionConfig =
            serde_json::from_str(r#"{"confidence_threshold": 72.5}"#).unwrap();
        assert_eq!(c.confidence_threshold, 72.5);
        assert_eq!(c.canonical_size, 200);

        let g: GalleryConfig = serde_json::from_str(r#"{"extension": "png"}"#).unwrap();
        assert_eq!(g.extension, "png");
        assert_eq!(g.prefix, "User");
    }
}
