//! Scores the gallery against the loaded histogram model to help pick an
//! acceptance threshold.

use crate::gallery::{load_sample, Gallery, GalleryError};
use crate::predictor::{Backend, Predictor};
use crate::types::{BackendKind, SubjectId};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EvaluateError {
    #[error("evaluation needs the histogram model, loaded backend is {0}")]
    NotHistogram(BackendKind),
    #[error("no gallery sample could be scored")]
    NoData,
    #[error("gallery error: {0}")]
    Gallery(#[from] GalleryError),
}

/// Summary of a set of distance scores.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreStats {
    pub count: usize,
    pub min: f64,
    pub median: f64,
    pub mean: f64,
    pub max: f64,
}

impl ScoreStats {
    /// `None` for an empty slice.
    pub fn from_scores(scores: &[f64]) -> Option<Self> {
        if scores.is_empty() {
            return None;
        }
        let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
        let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(Self {
            count: scores.len(),
            min,
            median: median(scores)?,
            mean: scores.iter().sum::<f64>() / scores.len() as f64,
            max,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectStats {
    pub subject: SubjectId,
    pub stats: ScoreStats,
}

/// A gallery sample the model assigned to another subject.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mismatch {
    pub path: PathBuf,
    pub expected: SubjectId,
    pub predicted: SubjectId,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub overall: ScoreStats,
    /// Sorted by subject id.
    pub per_subject: Vec<SubjectStats>,
    pub median_of_medians: f64,
    pub mismatches: Vec<Mismatch>,
    /// Gallery files that could not be decoded.
    pub skipped: usize,
    /// Suggested `confidence_threshold`. Never applied automatically.
    pub recommended_threshold: f64,
}

/// `max(1.5 * m, m + 20)` for the median distance `m`.
pub fn recommend_threshold(median_score: f64) -> f64 {
    (median_score * 1.5).max(median_score + 20.0)
}

/// Median of a slice; the mean of the two middle values for even lengths.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// Re-score every gallery sample with the histogram model, resized to the
/// side length the model was trained on.
///
/// Files are visited in file-name order so repeated runs report identical
/// mismatches. Undecodable files are skipped and not counted.
pub fn evaluate_gallery(gallery: &Gallery, predictor: &Predictor) -> Result<EvaluationReport, EvaluateError> {
    let model = match predictor.backend() {
        Backend::Histogram(model) => model,
        Backend::Neighbor(_) => return Err(EvaluateError::NotHistogram(BackendKind::Neighbor)),
    };
    let canonical_size = model.sample_size();

    let mut all = Vec::new();
    let mut by_subject: BTreeMap<SubjectId, Vec<f64>> = BTreeMap::new();
    let mut mismatches = Vec::new();
    let mut skipped = 0;

    for entry in gallery.entries()? {
        let sample = match load_sample(&entry.path, canonical_size) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(path = %entry.path.display(), error = %e, "skipping undecodable gallery file");
                skipped += 1;
                continue;
            }
        };
        let (predicted, score) = model.predict(&sample);
        tracing::debug!(
            path = %entry.path.display(),
            expected = %entry.subject,
            predicted = %predicted,
            score,
            "gallery sample scored"
        );

        all.push(score);
        by_subject.entry(entry.subject).or_default().push(score);
        if predicted != entry.subject {
            mismatches.push(Mismatch {
                path: entry.path,
                expected: entry.subject,
                predicted,
                score,
            });
        }
    }

    let overall = ScoreStats::from_scores(&all).ok_or(EvaluateError::NoData)?;
    let per_subject: Vec<SubjectStats> = by_subject
        .into_iter()
        .filter_map(|(subject, scores)| {
            ScoreStats::from_scores(&scores).map(|stats| SubjectStats { subject, stats })
        })
        .collect();
    let medians: Vec<f64> = per_subject.iter().map(|s| s.stats.median).collect();
    let median_of_medians = median(&medians).unwrap_or(overall.median);

    tracing::info!(
        count = overall.count,
        median = overall.median,
        mismatches = mismatches.len(),
        skipped,
        "gallery evaluated"
    );

    Ok(EvaluationReport {
        recommended_threshold: recommend_threshold(overall.median),
        overall,
        per_subject,
        median_of_medians,
        mismatches,
        skipped,
    })
}
