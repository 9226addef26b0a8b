//! k-nearest-neighbour classifier over flattened pixel intensities.
//!
//! Fallback recognizer when no histogram model is available. Scores are
//! class probabilities in [0, 1]; higher is better.

use crate::persist::{read_json, write_json, ModelError};
use crate::types::{FaceSample, LabeledSample, SubjectId};
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How neighbours vote for their class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weighting {
    /// Every neighbour counts once.
    Uniform,
    /// Neighbours vote with weight `1/d`; exact matches (d = 0) outvote
    /// everything else.
    #[default]
    Distance,
}

/// On-disk form: features are stored flat, row-major.
#[derive(Serialize, Deserialize)]
struct NeighborModelFile {
    k: usize,
    weighting: Weighting,
    dim: usize,
    labels: Vec<SubjectId>,
    features: Vec<f32>,
}

/// Trained nearest-neighbour classifier.
#[derive(Debug, Clone)]
pub struct NeighborModel {
    k: usize,
    weighting: Weighting,
    labels: Vec<SubjectId>,
    /// One flattened sample per row.
    features: Array2<f32>,
}

impl NeighborModel {
    /// Fit on samples of identical dimensions. `k` is capped at the number
    /// of samples.
    pub fn fit(
        samples: &[LabeledSample],
        k: usize,
        weighting: Weighting,
        min_samples: usize,
    ) -> Result<Self, ModelError> {
        let required = min_samples.max(1);
        if samples.len() < required {
            return Err(ModelError::InsufficientSamples {
                required,
                actual: samples.len(),
            });
        }
        if k == 0 {
            return Err(ModelError::InvalidParams("k must be at least 1".into()));
        }

        let first = &samples[0].sample;
        let dim = first.pixels().len();
        let mut flat = Vec::with_capacity(samples.len() * dim);
        let mut labels = Vec::with_capacity(samples.len());
        for (index, s) in samples.iter().enumerate() {
            if s.sample.width() != first.width() || s.sample.height() != first.height() {
                return Err(ModelError::SizeMismatch {
                    index,
                    width: s.sample.width(),
                    height: s.sample.height(),
                    expected: first.width(),
                });
            }
            flat.extend(s.sample.pixels().iter().map(|&p| p as f32));
            labels.push(s.subject);
        }

        let features = Array2::from_shape_vec((samples.len(), dim), flat)
            .map_err(|e| ModelError::Corrupt(format!("feature matrix: {e}")))?;

        Ok(Self {
            k: k.min(samples.len()),
            weighting,
            labels,
            features,
        })
    }

    /// Class probabilities, sorted by subject id. Only classes present in
    /// the training set are listed.
    pub fn predict_proba(&self, sample: &FaceSample) -> Vec<(SubjectId, f64)> {
        let query: Vec<f32> = sample.pixels().iter().map(|&p| p as f32).collect();

        let mut ranked: Vec<(f64, usize)> = self
            .features
            .rows()
            .into_iter()
            .enumerate()
            .map(|(i, row)| (euclidean(row, &query), i))
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        let nearest = &ranked[..self.k];

        let votes: Vec<(usize, f64)> = match self.weighting {
            Weighting::Uniform => nearest.iter().map(|&(_, i)| (i, 1.0)).collect(),
            Weighting::Distance if nearest.iter().any(|&(d, _)| d == 0.0) => nearest
                .iter()
                .map(|&(d, i)| (i, if d == 0.0 { 1.0 } else { 0.0 }))
                .collect(),
            Weighting::Distance => nearest.iter().map(|&(d, i)| (i, 1.0 / d)).collect(),
        };

        let mut classes: Vec<SubjectId> = self.labels.clone();
        classes.sort_unstable();
        classes.dedup();

        let total: f64 = votes.iter().map(|&(_, w)| w).sum();
        classes
            .into_iter()
            .map(|class| {
                let weight: f64 = votes
                    .iter()
                    .filter(|&&(i, _)| self.labels[i] == class)
                    .map(|&(_, w)| w)
                    .sum();
                let p = if total > 0.0 { weight / total } else { 0.0 };
                (class, p)
            })
            .collect()
    }

    /// Most probable subject and its probability. The smallest subject id
    /// wins ties.
    pub fn predict(&self, sample: &FaceSample) -> (SubjectId, f64) {
        let proba = self.predict_proba(sample);
        let mut best = proba[0];
        for &(class, p) in &proba[1..] {
            if p > best.1 {
                best = (class, p);
            }
        }
        best
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Length of one flattened sample.
    pub fn dim(&self) -> usize {
        self.features.ncols()
    }

    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let file = NeighborModelFile {
            k: self.k,
            weighting: self.weighting,
            dim: self.dim(),
            labels: self.labels.clone(),
            features: self.features.iter().copied().collect(),
        };
        write_json(path, &file)
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let file: NeighborModelFile = read_json(path)?;
        if file.labels.is_empty() {
            return Err(ModelError::Corrupt("no training samples".into()));
        }
        if file.k == 0 || file.k > file.labels.len() {
            return Err(ModelError::Corrupt(format!(
                "k={} with {} samples",
                file.k,
                file.labels.len()
            )));
        }
        let features = Array2::from_shape_vec((file.labels.len(), file.dim), file.features)
            .map_err(|e| ModelError::Corrupt(format!("feature matrix: {e}")))?;
        Ok(Self {
            k: file.k,
            weighting: file.weighting,
            labels: file.labels,
            features,
        })
    }
}

fn euclidean(row: ArrayView1<'_, f32>, query: &[f32]) -> f64 {
    row.iter()
        .zip(query)
        .map(|(&a, &b)| {
            let d = (a - b) as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}
