//! Frontal face detection.
//!
//! The [`FaceDetector`] trait is the seam between the normalizer and a
//! concrete cascade. [`CascadeDetector`] runs the SeetaFace funnel-structured
//! cascade via `rustface`.

use crate::types::FaceRect;
use image::GrayImage;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;

// Cascade tuning
const MIN_FACE_SIZE: u32 = 20;
const SCORE_THRESHOLD: f64 = 2.0;
const PYRAMID_SCALE_FACTOR: f32 = 0.8;
const SLIDE_WINDOW_STEP: u32 = 4;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model file not found: {0}; download seeta_fd_frontal_v1.0.bin and set ATTEND_DETECTOR_MODEL")]
    ModelNotFound(String),
    #[error("failed to read detector model {path}: {reason}")]
    ModelLoad { path: String, reason: String },
}

/// Locates candidate face rectangles in a grayscale image.
///
/// Implementations return every candidate in their native order; choosing
/// among them is the caller's job.
pub trait FaceDetector {
    fn detect(&self, gray: &GrayImage) -> Vec<FaceRect>;
}

impl<D: FaceDetector + ?Sized> FaceDetector for &D {
    fn detect(&self, gray: &GrayImage) -> Vec<FaceRect> {
        (**self).detect(gray)
    }
}

impl<D: FaceDetector + ?Sized> FaceDetector for Box<D> {
    fn detect(&self, gray: &GrayImage) -> Vec<FaceRect> {
        (**self).detect(gray)
    }
}

/// SeetaFace frontal cascade detector.
pub struct CascadeDetector {
    model: rustface::Model,
}

impl CascadeDetector {
    /// Load the SeetaFace model (`seeta_fd_frontal_v1.0.bin`) from disk.
    pub fn load(model_path: impl AsRef<Path>) -> Result<Self, DetectorError> {
        let model_path = model_path.as_ref();
        let shown = model_path.display().to_string();
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(shown));
        }

        let file = File::open(model_path).map_err(|e| DetectorError::ModelLoad {
            path: shown.clone(),
            reason: e.to_string(),
        })?;
        let model = rustface::read_model(BufReader::new(file)).map_err(|e| DetectorError::ModelLoad {
            path: shown.clone(),
            reason: e.to_string(),
        })?;

        tracing::info!(path = %shown, "loaded SeetaFace cascade model");
        Ok(Self { model })
    }
}

impl FaceDetector for CascadeDetector {
    fn detect(&self, gray: &GrayImage) -> Vec<FaceRect> {
        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 {
            return Vec::new();
        }

        let mut detector = rustface::create_detector_with_model(self.model.clone());
        detector.set_min_face_size(MIN_FACE_SIZE);
        detector.set_score_thresh(SCORE_THRESHOLD);
        detector.set_pyramid_scale_factor(PYRAMID_SCALE_FACTOR);
        detector.set_slide_window_step(SLIDE_WINDOW_STEP, SLIDE_WINDOW_STEP);

        let faces = detector.detect(&rustface::ImageData::new(gray.as_raw(), width, height));

        faces
            .iter()
            .filter_map(|face| {
                let bbox = face.bbox();
                clamp_box(bbox.x(), bbox.y(), bbox.width(), bbox.height(), width, height)
            })
            .collect()
    }
}

/// Clip a possibly out-of-frame detector box to the image. Returns `None`
/// when nothing of the box remains inside.
fn clamp_box(x: i32, y: i32, w: u32, h: u32, img_w: u32, img_h: u32) -> Option<FaceRect> {
    let x0 = x.max(0) as i64;
    let y0 = y.max(0) as i64;
    let x1 = (x as i64 + w as i64).min(img_w as i64);
    let y1 = (y as i64 + h as i64).min(img_h as i64);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(FaceRect::new(
        x0 as u32,
        y0 as u32,
        (x1 - x0) as u32,
        (y1 - y0) as u32,
    ))
}
