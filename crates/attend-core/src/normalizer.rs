//! Raw photo → canonical face sample.
//!
//! Two paths share the same building blocks:
//!
//! * [`Normalizer::normalize`] (recognition): detect, take the largest face,
//!   pad, crop, equalize, resize. No face is an error.
//! * [`Normalizer::normalize_for_enrollment`]: detect, crop the largest face
//!   (or keep the whole frame when nothing is found), resize, equalize.
//!   Operator-supplied enrollment photos are expected to be roughly
//!   face-centred already, so this path never fails for lack of a face.

use crate::config::RecognitionConfig;
use crate::detector::FaceDetector;
use crate::equalize::equalize_histogram;
use crate::types::{FaceRect, FaceSample};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("image has zero width or height")]
    EmptyImage,
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Decode an encoded image (JPEG, PNG, ...) from memory.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, NormalizeError> {
    Ok(image::load_from_memory(bytes)?)
}

/// Pick the candidate with the largest area; the first one wins ties.
pub fn select_largest(faces: &[FaceRect]) -> Option<FaceRect> {
    faces.iter().copied().fold(None, |best, face| match best {
        Some(b) if b.area() >= face.area() => Some(b),
        _ => Some(face),
    })
}

/// Converts photos into canonical face samples.
pub struct Normalizer<D> {
    detector: D,
    canonical_size: u32,
    padding: f32,
    enroll_padding: f32,
}

impl<D: FaceDetector> Normalizer<D> {
    pub fn new(detector: D, config: &RecognitionConfig) -> Self {
        Self {
            detector,
            canonical_size: config.canonical_size,
            padding: config.padding,
            enroll_padding: config.enroll_padding,
        }
    }

    /// Recognition path.
    pub fn normalize(&self, image: &DynamicImage) -> Result<FaceSample, NormalizeError> {
        let gray = to_gray(image)?;
        let face = select_largest(&self.detector.detect(&gray)).ok_or(NormalizeError::NoFaceDetected)?;

        let region = face.expand(self.padding, gray.width(), gray.height());
        if region.is_empty() {
            return Err(NormalizeError::NoFaceDetected);
        }

        let mut crop = crop(&gray, region);
        equalize_histogram(&mut crop);
        Ok(FaceSample::new(resize_canonical(&crop, self.canonical_size)))
    }

    /// Recognition path over an encoded image buffer.
    pub fn normalize_bytes(&self, bytes: &[u8]) -> Result<FaceSample, NormalizeError> {
        self.normalize(&decode_image(bytes)?)
    }

    /// Enrollment path. Falls back to the whole frame when no face is found.
    pub fn normalize_for_enrollment(&self, image: &DynamicImage) -> Result<FaceSample, NormalizeError> {
        let gray = to_gray(image)?;
        let region = select_largest(&self.detector.detect(&gray))
            .map(|face| face.expand(self.enroll_padding, gray.width(), gray.height()))
            .filter(|r| !r.is_empty());

        let source = match region {
            Some(r) => crop(&gray, r),
            None => gray,
        };

        let mut resized = resize_canonical(&source, self.canonical_size);
        equalize_histogram(&mut resized);
        Ok(FaceSample::new(resized))
    }

    /// Enrollment path over an encoded image buffer.
    pub fn normalize_bytes_for_enrollment(&self, bytes: &[u8]) -> Result<FaceSample, NormalizeError> {
        self.normalize_for_enrollment(&decode_image(bytes)?)
    }
}

fn to_gray(image: &DynamicImage) -> Result<GrayImage, NormalizeError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(NormalizeError::EmptyImage);
    }
    Ok(image.to_luma8())
}

fn crop(gray: &GrayImage, r: FaceRect) -> GrayImage {
    imageops::crop_imm(gray, r.x, r.y, r.width, r.height).to_image()
}

/// Bilinear resize to `size`×`size`; a no-op copy when already canonical.
pub(crate) fn resize_canonical(gray: &GrayImage, size: u32) -> GrayImage {
    if gray.dimensions() == (size, size) {
        return gray.clone();
    }
    imageops::resize(gray, size, size, FilterType::Triangle)
}
