//! Synthetic fixtures shared by unit and integration tests.

use image::{GrayImage, RgbImage};

use crate::config::EngineConfig;
use crate::detector::{BackgroundRemover, Detection, FaceDetector};
use crate::error::Result;
use crate::normalize::{FaceFrame, NormalizationEngine, CANON_PUPIL_DIST, REFERENCE_PD_MM};
use crate::types::{
    HeadPose, LandmarkSet, LateralLandmarks, Point, Rect, SagittalProfile, LANDMARK_COUNT,
    LM_LEFT_PUPIL, LM_RIGHT_PUPIL,
};

/// A plausible frontal landmark set on the canonical canvas. Pupils sit
/// at their canonical positions, the eye rings are mirror images about
/// the vertical midline, and the inner-lip ring is symmetric too.
pub fn frontal_landmarks() -> LandmarkSet {
    let mut pts = vec![Point::new(510, 512); LANDMARK_COUNT];

    // Brows.
    pts[35] = Point::new(340, 400);
    pts[44] = Point::new(680, 400);

    // Nose.
    pts[55] = Point::new(460, 600);
    pts[59] = Point::new(560, 600);

    // Right eye ring, outer corner first.
    let right_eye = [
        (280, 480),
        (310, 460),
        (340, 450),
        (370, 460),
        (400, 480),
        (370, 500),
        (340, 510),
        (310, 500),
    ];
    for (i, &(x, y)) in right_eye.iter().enumerate() {
        pts[60 + i] = Point::new(x, y);
    }

    // Left eye ring, inner corner first.
    let left_eye = [
        (620, 480),
        (650, 460),
        (680, 450),
        (710, 460),
        (740, 480),
        (710, 500),
        (680, 510),
        (650, 500),
    ];
    for (i, &(x, y)) in left_eye.iter().enumerate() {
        pts[68 + i] = Point::new(x, y);
    }

    // Mouth corners and lower lip midpoint.
    pts[76] = Point::new(420, 700);
    pts[82] = Point::new(600, 700);
    pts[85] = Point::new(510, 740);

    // Inner-lip ring.
    let inner_lip = [
        (440, 700),
        (470, 685),
        (510, 680),
        (550, 685),
        (580, 700),
        (550, 715),
        (510, 720),
        (470, 715),
    ];
    for (i, &(x, y)) in inner_lip.iter().enumerate() {
        pts[88 + i] = Point::new(x, y);
    }

    pts[LM_RIGHT_PUPIL] = Point::new(380, 480);
    pts[LM_LEFT_PUPIL] = Point::new(640, 480);

    LandmarkSet::from_points(pts)
}

/// Canonical pixel scale implied by the fixture's 260px pupil distance.
pub fn canonical_pix2mm() -> f64 {
    REFERENCE_PD_MM / CANON_PUPIL_DIST
}

/// Always finds a confident frontal face and reports
/// [`frontal_landmarks`] wherever the canvas came from.
pub struct FixtureDetector;

impl FaceDetector for FixtureDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Option<Detection>> {
        Ok(Some(Detection {
            bbox: Rect::new(0.0, 0.0, image.width() as f64, image.height() as f64),
            confidence: 0.99,
        }))
    }

    fn infer_landmarks(
        &mut self,
        _image: &RgbImage,
        _bbox: &Rect,
    ) -> Result<(LandmarkSet, HeadPose)> {
        Ok((frontal_landmarks(), HeadPose::new(2.0, 0.0, 0.0)))
    }
}

/// Produces an empty (all-background) mask.
pub struct BlankRemover;

impl BackgroundRemover for BlankRemover {
    fn remove_background(&mut self, image: &RgbImage) -> Result<GrayImage> {
        Ok(GrayImage::new(image.width(), image.height()))
    }
}

/// An engine wired to the fixture detector with default settings.
pub fn fixture_engine() -> NormalizationEngine<FixtureDetector, BlankRemover> {
    NormalizationEngine::new(FixtureDetector, BlankRemover, &EngineConfig::default())
}

/// A frontal frame over a blank canvas, carrying [`frontal_landmarks`].
pub fn frontal_frame() -> FaceFrame {
    let landmarks = frontal_landmarks();
    FaceFrame {
        image: RgbImage::new(4, 4),
        landmarks,
        headpose: HeadPose::new(2.0, 0.0, 0.0),
        lateral: false,
        flipped: false,
        lateral_landmarks: LateralLandmarks::default(),
        profile: SagittalProfile::default(),
        pupillary_distance: CANON_PUPIL_DIST,
        pix2mm: canonical_pix2mm(),
        face_rotation: None,
        orig_pupils: Some((Point::new(640, 480), Point::new(380, 480))),
    }
}
