//! Local binary pattern histogram recognizer.
//!
//! Each face is encoded as circular LBP codes, the code image is split into a
//! grid of cells, and every cell contributes a normalized code histogram.
//! Prediction returns the training sample whose concatenated histogram is
//! closest under the alternative chi-square distance. Lower distance means a
//! better match; the range is unbounded above.

use crate::persist::{read_json, write_json, ModelError};
use crate::types::{FaceSample, LabeledSample, SubjectId};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::path::Path;

const MAX_LBP_NEIGHBORS: u32 = 16;
const LBP_EPSILON: f64 = 1e-9;
const HISTOGRAM_EPSILON: f64 = f64::EPSILON;

/// Circular LBP sampling and spatial grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LbpParams {
    pub radius: u32,
    /// Sample points on the circle; histograms have `2^neighbors` bins.
    pub neighbors: u32,
    pub grid_x: u32,
    pub grid_y: u32,
}

impl Default for LbpParams {
    fn default() -> Self {
        Self {
            radius: 1,
            neighbors: 8,
            grid_x: 8,
            grid_y: 8,
        }
    }
}

impl LbpParams {
    pub fn bins(&self) -> usize {
        1usize << self.neighbors
    }

    /// Length of one face descriptor.
    pub fn descriptor_len(&self) -> usize {
        self.bins() * self.grid_x as usize * self.grid_y as usize
    }

    fn validate(&self, sample_size: u32) -> Result<(), ModelError> {
        if self.radius == 0 {
            return Err(ModelError::InvalidParams("radius must be at least 1".into()));
        }
        if self.neighbors == 0 || self.neighbors > MAX_LBP_NEIGHBORS {
            return Err(ModelError::InvalidParams(format!(
                "neighbors must be in 1..={MAX_LBP_NEIGHBORS}, got {}",
                self.neighbors
            )));
        }
        if self.grid_x == 0 || self.grid_y == 0 {
            return Err(ModelError::InvalidParams("grid must be at least 1x1".into()));
        }
        let code_size = sample_size.saturating_sub(2 * self.radius);
        if code_size < self.grid_x || code_size < self.grid_y {
            return Err(ModelError::InvalidParams(format!(
                "{sample_size}px samples are too small for radius {} and a {}x{} grid",
                self.radius, self.grid_x, self.grid_y
            )));
        }
        Ok(())
    }
}

/// Circular (extended) LBP code image.
///
/// Sample points are bilinearly interpolated. The output loses a `radius`
/// border on every side and is returned row-major with its dimensions.
pub fn lbp_codes(gray: &GrayImage, radius: u32, neighbors: u32) -> (Vec<u32>, u32, u32) {
    let (w, h) = gray.dimensions();
    let r = radius as i64;
    let out_w = w.saturating_sub(2 * radius);
    let out_h = h.saturating_sub(2 * radius);
    let mut codes = vec![0u32; out_w as usize * out_h as usize];
    if codes.is_empty() {
        return (codes, out_w, out_h);
    }

    let src = gray.as_raw();
    let at = |y: i64, x: i64| src[(y * w as i64 + x) as usize] as f64;

    for n in 0..neighbors {
        let angle = 2.0 * PI * n as f64 / neighbors as f64;
        let sx = radius as f64 * angle.cos();
        let sy = -(radius as f64) * angle.sin();

        let fx = sx.floor() as i64;
        let fy = sy.floor() as i64;
        let cx = sx.ceil() as i64;
        let cy = sy.ceil() as i64;

        let tx = sx - fx as f64;
        let ty = sy - fy as f64;
        let w1 = (1.0 - tx) * (1.0 - ty);
        let w2 = tx * (1.0 - ty);
        let w3 = (1.0 - tx) * ty;
        let w4 = tx * ty;

        for y in r..(h as i64 - r) {
            for x in r..(w as i64 - r) {
                let t = w1 * at(y + fy, x + fx)
                    + w2 * at(y + fy, x + cx)
                    + w3 * at(y + cy, x + fx)
                    + w4 * at(y + cy, x + cx);
                let center = at(y, x);
                if t > center || (t - center).abs() < LBP_EPSILON {
                    let idx = ((y - r) * out_w as i64 + (x - r)) as usize;
                    codes[idx] |= 1 << n;
                }
            }
        }
    }

    (codes, out_w, out_h)
}

/// Concatenated per-cell code histograms, each normalized to sum to 1.
///
/// Cells are `width / grid_x` by `height / grid_y`; leftover rows/columns
/// at the right and bottom edges are ignored.
pub fn spatial_histogram(codes: &[u32], width: u32, height: u32, bins: usize, grid_x: u32, grid_y: u32) -> Vec<f32> {
    let cell_w = (width / grid_x) as usize;
    let cell_h = (height / grid_y) as usize;
    let mut out = vec![0f32; bins * grid_x as usize * grid_y as usize];
    if cell_w == 0 || cell_h == 0 {
        return out;
    }
    let cell_pixels = (cell_w * cell_h) as f32;

    for gy in 0..grid_y as usize {
        for gx in 0..grid_x as usize {
            let cell = &mut out[(gy * grid_x as usize + gx) * bins..][..bins];
            for y in gy * cell_h..(gy + 1) * cell_h {
                let row = &codes[y * width as usize..][..width as usize];
                for &code in &row[gx * cell_w..(gx + 1) * cell_w] {
                    cell[code as usize] += 1.0;
                }
            }
            for v in cell.iter_mut() {
                *v /= cell_pixels;
            }
        }
    }

    out
}

/// Alternative chi-square distance: `2 · Σ (a−b)² / (a+b)`.
///
/// Bins where both histograms are empty are skipped.
pub fn chi_square_alt(a: &[f32], b: &[f32]) -> f64 {
    let mut sum = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (x as f64, y as f64);
        let denom = x + y;
        if denom.abs() > HISTOGRAM_EPSILON {
            let d = x - y;
            sum += d * d / denom;
        }
    }
    2.0 * sum
}

/// Trained LBP histogram recognizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramModel {
    params: LbpParams,
    sample_size: u32,
    labels: Vec<SubjectId>,
    histograms: Vec<Vec<f32>>,
}

impl HistogramModel {
    /// Fit on square samples of side `sample_size`.
    pub fn train(
        samples: &[LabeledSample],
        params: LbpParams,
        sample_size: u32,
        min_samples: usize,
    ) -> Result<Self, ModelError> {
        if samples.len() < min_samples.max(1) {
            return Err(ModelError::InsufficientSamples {
                required: min_samples.max(1),
                actual: samples.len(),
            });
        }
        params.validate(sample_size)?;

        let mut labels = Vec::with_capacity(samples.len());
        let mut histograms = Vec::with_capacity(samples.len());
        for (index, s) in samples.iter().enumerate() {
            if s.sample.width() != sample_size || s.sample.height() != sample_size {
                return Err(ModelError::SizeMismatch {
                    index,
                    width: s.sample.width(),
                    height: s.sample.height(),
                    expected: sample_size,
                });
            }
            labels.push(s.subject);
            histograms.push(describe(&params, s.sample.image()));
        }

        tracing::debug!(samples = labels.len(), descriptor_len = params.descriptor_len(), "histogram model fitted");

        Ok(Self {
            params,
            sample_size,
            labels,
            histograms,
        })
    }

    /// Closest training subject and its distance. The first minimum wins ties.
    pub fn predict(&self, sample: &FaceSample) -> (SubjectId, f64) {
        let query = describe(&self.params, sample.image());
        let mut best_dist = f64::INFINITY;
        let mut best_label = self.labels[0];
        for (label, hist) in self.labels.iter().zip(&self.histograms) {
            let dist = chi_square_alt(hist, &query);
            if dist < best_dist {
                best_dist = dist;
                best_label = *label;
            }
        }
        (best_label, best_dist)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn sample_size(&self) -> u32 {
        self.sample_size
    }

    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        write_json(path, self)
    }

    /// Load and structurally validate a saved model.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let model: Self = read_json(path)?;
        model.check()?;
        Ok(model)
    }

    fn check(&self) -> Result<(), ModelError> {
        self.params.validate(self.sample_size)?;
        if self.labels.is_empty() {
            return Err(ModelError::Corrupt("no training histograms".into()));
        }
        if self.labels.len() != self.histograms.len() {
            return Err(ModelError::Corrupt(format!(
                "{} labels but {} histograms",
                self.labels.len(),
                self.histograms.len()
            )));
        }
        let expected = self.params.descriptor_len();
        if let Some(bad) = self.histograms.iter().position(|h| h.len() != expected) {
            return Err(ModelError::Corrupt(format!(
                "histogram {bad} has {} bins, expected {expected}",
                self.histograms[bad].len()
            )));
        }
        Ok(())
    }
}

fn describe(params: &LbpParams, gray: &GrayImage) -> Vec<f32> {
    let (codes, w, h) = lbp_codes(gray, params.radius, params.neighbors);
    spatial_histogram(&codes, w, h, params.bins(), params.grid_x, params.grid_y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn stripes(size: u32, period: u32, phase: u32, vertical: bool) -> FaceSample {
        FaceSample::new(GrayImage::from_fn(size, size, |x, y| {
            let t = if vertical { x } else { y };
            Luma([if ((t + phase) / (period / 2)) % 2 == 0 { 0 } else { 255 }])
        }))
    }

    fn labeled(subject: u32, sample: FaceSample) -> LabeledSample {
        LabeledSample {
            subject: SubjectId(subject),
            sample,
        }
    }

    #[test]
    fn test_lbp_flat_image_all_ones() {
        let gray = GrayImage::from_pixel(5, 5, Luma([90]));
        let (codes, w, h) = lbp_codes(&gray, 1, 8);
        assert_eq!((w, h), (3, 3));
        assert!(codes.iter().all(|&c| c == 0xFF));
    }

    #[test]
    fn test_lbp_bright_center_all_zeros() {
        let mut gray = GrayImage::from_pixel(3, 3, Luma([10]));
        gray.put_pixel(1, 1, Luma([200]));
        let (codes, _, _) = lbp_codes(&gray, 1, 8);
        assert_eq!(codes, vec![0]);
    }

    #[test]
    fn test_lbp_right_neighbor_is_bit_zero() {
        // Only the pixel directly right of center is brighter.
        let mut gray = GrayImage::from_pixel(3, 3, Luma([10]));
        gray.put_pixel(1, 1, Luma([100]));
        gray.put_pixel(2, 1, Luma([250]));
        let (codes, _, _) = lbp_codes(&gray, 1, 8);
        assert_eq!(codes[0] & 1, 1);
    }

    #[test]
    fn test_spatial_histogram_cells_normalized() {
        let codes: Vec<u32> = (0..16 * 16).map(|i| (i % 7) as u32).collect();
        let hist = spatial_histogram(&codes, 16, 16, 256, 4, 4);
        assert_eq!(hist.len(), 256 * 16);
        for cell in hist.chunks(256) {
            let sum: f32 = cell.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_chi_square_identical_is_zero() {
        let a = vec![0.25f32, 0.25, 0.5, 0.0];
        assert_eq!(chi_square_alt(&a, &a), 0.0);
    }

    #[test]
    fn test_chi_square_disjoint() {
        let a = vec![1.0f32, 0.0];
        let b = vec![0.0f32, 1.0];
        // 2 * (1 + 1)
        assert!((chi_square_alt(&a, &b) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_chi_square_symmetric() {
        let a = vec![0.1f32, 0.7, 0.2];
        let b = vec![0.3f32, 0.3, 0.4];
        assert!((chi_square_alt(&a, &b) - chi_square_alt(&b, &a)).abs() < 1e-12);
    }

    #[test]
    fn test_train_requires_min_samples() {
        let samples = vec![labeled(1, stripes(64, 8, 0, true))];
        let err = HistogramModel::train(&samples, LbpParams::default(), 64, 2).unwrap_err();
        assert!(matches!(
            err,
            ModelError::InsufficientSamples { required: 2, actual: 1 }
        ));
    }

    #[test]
    fn test_train_rejects_wrong_size() {
        let samples = vec![
            labeled(1, stripes(64, 8, 0, true)),
            labeled(2, stripes(32, 8, 0, true)),
        ];
        let err = HistogramModel::train(&samples, LbpParams::default(), 64, 2).unwrap_err();
        assert!(matches!(err, ModelError::SizeMismatch { index: 1, .. }));
    }

    #[test]
    fn test_self_match_scores_zero() {
        let samples = vec![
            labeled(7, stripes(64, 8, 0, true)),
            labeled(9, stripes(64, 8, 0, false)),
        ];
        let model = HistogramModel::train(&samples, LbpParams::default(), 64, 2).unwrap();
        let (label, dist) = model.predict(&samples[0].sample);
        assert_eq!(label, SubjectId(7));
        assert!(dist.abs() < 1e-9);
        let (label, dist) = model.predict(&samples[1].sample);
        assert_eq!(label, SubjectId(9));
        assert!(dist.abs() < 1e-9);
    }

    #[test]
    fn test_shifted_pattern_matches_its_subject() {
        let samples = vec![
            labeled(7, stripes(64, 8, 0, true)),
            labeled(9, stripes(64, 8, 0, false)),
        ];
        let model = HistogramModel::train(&samples, LbpParams::default(), 64, 2).unwrap();
        let (label, _) = model.predict(&stripes(64, 8, 3, true));
        assert_eq!(label, SubjectId(7));
        let (label, _) = model.predict(&stripes(64, 8, 2, false));
        assert_eq!(label, SubjectId(9));
    }

    #[test]
    fn test_save_load_roundtrip_preserves_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lbph.json");
        let samples = vec![
            labeled(7, stripes(64, 8, 0, true)),
            labeled(9, stripes(64, 8, 0, false)),
        ];
        let model = HistogramModel::train(&samples, LbpParams::default(), 64, 2).unwrap();
        model.save(&path).unwrap();
        let loaded = HistogramModel::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.sample_size(), 64);
        let query = stripes(64, 8, 1, true);
        let (a_label, a_dist) = model.predict(&query);
        let (b_label, b_dist) = loaded.predict(&query);
        assert_eq!(a_label, b_label);
        assert!((a_dist - b_dist).abs() < 1e-6);
    }

    #[test]
    fn test_load_rejects_inconsistent_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lbph.json");
        std::fs::write(
            &path,
            r#"{"params":{"radius":1,"neighbors":8,"grid_x":8,"grid_y":8},"sample_size":64,"labels":[1,2],"histograms":[[0.5]]}"#,
        )
        .unwrap();
        assert!(matches!(HistogramModel::load(&path), Err(ModelError::Corrupt(_))));
    }

    #[test]
    fn test_params_validation() {
        let mut p = LbpParams::default();
        p.neighbors = 20;
        assert!(p.validate(200).is_err());
        let p = LbpParams::default();
        assert!(p.validate(200).is_ok());
        assert!(p.validate(6).is_err());
    }
}
