use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Integer key identifying one enrolled person.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(pub u32);

impl SubjectId {
    /// Parse a decimal subject id. Only ASCII digits are accepted and zero is
    /// rejected, so `"+7"`, `"07a"` and `"0"` all yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        match s.parse::<u32>() {
            Ok(0) | Err(_) => None,
            Ok(v) => Some(Self(v)),
        }
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for SubjectId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("invalid subject id {s:?}: expected a positive integer"))
    }
}

/// Axis-aligned face rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Grow the rectangle by `pad` × its own width/height on each side,
    /// clamped to a `bound_w` × `bound_h` image.
    ///
    /// Padding is truncated to whole pixels.
    pub fn expand(&self, pad: f32, bound_w: u32, bound_h: u32) -> FaceRect {
        let pad_w = (self.width as f32 * pad.max(0.0)) as u32;
        let pad_h = (self.height as f32 * pad.max(0.0)) as u32;

        let x1 = self.x.saturating_sub(pad_w).min(bound_w);
        let y1 = self.y.saturating_sub(pad_h).min(bound_h);
        let x2 = self
            .x
            .saturating_add(self.width)
            .saturating_add(pad_w)
            .min(bound_w);
        let y2 = self
            .y
            .saturating_add(self.height)
            .saturating_add(pad_h)
            .min(bound_h);

        FaceRect {
            x: x1,
            y: y1,
            width: x2.saturating_sub(x1),
            height: y2.saturating_sub(y1),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// A normalized face crop: 8-bit grayscale, histogram-equalized, square at
/// the canonical size.
///
/// Produced by the [`Normalizer`](crate::Normalizer) or reloaded from the
/// gallery; the predictor trusts that the dimensions are canonical.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceSample {
    image: GrayImage,
}

impl FaceSample {
    pub fn new(image: GrayImage) -> Self {
        Self { image }
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Row-major pixel intensities.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn into_image(self) -> GrayImage {
        self.image
    }
}

/// A face sample tagged with the subject it belongs to.
#[derive(Debug, Clone)]
pub struct LabeledSample {
    pub subject: SubjectId,
    pub sample: FaceSample,
}

/// Which trained model produced a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// LBP histogram recognizer. Score is a distance: lower is better.
    Histogram,
    /// k-nearest-neighbour classifier. Score is a probability in [0, 1].
    Neighbor,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Histogram => f.write_str("histogram"),
            BackendKind::Neighbor => f.write_str("neighbor"),
        }
    }
}

/// Result of classifying one face sample.
///
/// `score` is only meaningful together with `kind`; `accepted` is the
/// backend-agnostic gate that business logic should branch on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub subject: SubjectId,
    pub score: f64,
    pub accepted: bool,
    pub kind: BackendKind,
    /// Threshold the score was gated against.
    pub threshold: f64,
}

impl Prediction {
    /// Human-readable score line, worded per backend.
    pub fn describe(&self) -> String {
        match self.kind {
            BackendKind::Histogram => format!(
                "Recognition (histogram): id={}, distance={:.2} (require < {})",
                self.subject, self.score, self.threshold
            ),
            BackendKind::Neighbor => format!(
                "Recognition (neighbor): id={}, probability={:.0}% (require >= {:.0}%)",
                self.subject,
                self.score * 100.0,
                self.threshold * 100.0
            ),
        }
    }
}
