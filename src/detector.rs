//! Detection seam. The normalization engine only ever talks to these
//! traits, so model backends (and test doubles) plug in behind them.

use image::{GrayImage, RgbImage};

use crate::error::Result;
use crate::types::{HeadPose, LandmarkSet, Rect};

/// Detections scoring below this are treated as "no face present".
pub const MIN_FACE_CONFIDENCE: f64 = 0.9;

/// A single face candidate returned by a detector backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: Rect,
    pub confidence: f64,
}

impl Detection {
    pub fn is_confident(&self) -> bool {
        self.confidence >= MIN_FACE_CONFIDENCE
    }
}

/// Face localization plus dense landmark regression.
///
/// `detect` returns the best face candidate, or `None` when nothing in
/// the image resembles a face. `infer_landmarks` refines a candidate
/// box into the 98-point scheme and a head pose estimate.
pub trait FaceDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Option<Detection>>;

    fn infer_landmarks(
        &mut self,
        image: &RgbImage,
        bbox: &Rect,
    ) -> Result<(LandmarkSet, HeadPose)>;
}

/// Foreground/background segmentation used by the profile tracer.
/// Nonzero mask pixels are foreground.
pub trait BackgroundRemover {
    fn remove_background(&mut self, image: &RgbImage) -> Result<GrayImage>;
}
