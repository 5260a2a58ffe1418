//! Geometric normalization onto the canonical analysis canvas.
//!
//! Every analyzed frame ends up as a 1024x1024 image. Frontal faces are
//! leveled (optionally), scaled so the pupils sit 260px apart, and
//! translated so the right pupil lands at (380, 480). Side profiles are
//! scaled to the canvas width and anchored on the right pupil landmark,
//! with facing-right profiles mirrored first so all laterals face left.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::detector::{BackgroundRemover, FaceDetector};
use crate::error::{FaceError, Result};
use crate::geometry;
use crate::lateral::{self, ProfileAnalysis};
use crate::types::{
    FrameSnapshot, HeadPose, LandmarkSet, LateralLandmarks, Point, SagittalProfile, SnapshotImage,
    LM_RIGHT_PUPIL,
};

/// Side of the square canonical canvas, in pixels.
pub const CANON_WIDTH: u32 = 1024;
/// Where the pupils land on the canonical canvas for a frontal face.
pub const CANON_LEFT_PUPIL: Point = Point { x: 640, y: 480 };
pub const CANON_RIGHT_PUPIL: Point = Point { x: 380, y: 480 };
/// Canonical inter-pupil distance in pixels (640 - 380).
pub const CANON_PUPIL_DIST: f64 = (CANON_LEFT_PUPIL.x - CANON_RIGHT_PUPIL.x) as f64;
/// Population-reference pupillary distance in millimeters.
pub const REFERENCE_PD_MM: f64 = 63.0;
/// Fixed scale for side profiles, where no pupil pair is visible.
pub const LATERAL_PIX2MM: f64 = 0.24;
/// Horizontal anchor for the lateral crop, as a fraction of the canvas.
pub const LATERAL_ANCHOR_FRACTION: f64 = 0.25;
/// Dead space left by clips and rotations.
pub const FILL_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

const LATERAL_INFLATE_TOP: f64 = 0.1;
const LATERAL_INFLATE_BOTTOM: f64 = 0.1;

/// Derives pupillary distance (pixels) and the mm-per-pixel scale from
/// a pupil pair. Errors if the pupils coincide.
pub fn calc_pd(pupils: (Point, Point)) -> Result<(f64, f64)> {
    let d = pupils.0.distance(&pupils.1);
    if d == 0.0 {
        return Err(FaceError::PupilsCoincide);
    }
    Ok((d, REFERENCE_PD_MM / d))
}

/// One fully normalized frame, ready for measurement.
#[derive(Debug, Clone)]
pub struct FaceFrame {
    /// Canonical 1024x1024 canvas.
    pub image: RgbImage,
    /// Landmarks in canvas coordinates. Empty when no face was found.
    pub landmarks: LandmarkSet,
    pub headpose: HeadPose,
    pub lateral: bool,
    /// True when a facing-right profile was mirrored to face left.
    pub flipped: bool,
    pub lateral_landmarks: LateralLandmarks,
    pub profile: SagittalProfile,
    pub pupillary_distance: f64,
    pub pix2mm: f64,
    /// Tilt correction applied to the source, radians.
    pub face_rotation: Option<f64>,
    /// Pupil pair in source coordinates, before any crop. Feeds the
    /// pupil smoothing window during ingestion.
    pub orig_pupils: Option<(Point, Point)>,
}

impl FaceFrame {
    fn no_face(image: &RgbImage) -> Self {
        Self {
            image: image.clone(),
            landmarks: LandmarkSet::empty(),
            headpose: HeadPose::default(),
            lateral: false,
            flipped: false,
            lateral_landmarks: LateralLandmarks::default(),
            profile: SagittalProfile::default(),
            pupillary_distance: 0.0,
            pix2mm: 1.0,
            face_rotation: None,
            orig_pupils: None,
        }
    }

    pub fn has_face(&self) -> bool {
        !self.landmarks.is_empty()
    }

    pub fn pupils(&self) -> Option<(Point, Point)> {
        self.landmarks.pupils()
    }

    /// Captures the replayable state of this frame.
    pub fn snapshot(&self) -> FrameSnapshot {
        FrameSnapshot {
            image: SnapshotImage::from_image(&self.image),
            headpose: self.headpose,
            landmarks: self.landmarks.clone(),
            pupillary_distance: self.pupillary_distance,
            pix2mm: self.pix2mm,
            rotation: self.face_rotation,
        }
    }
}

/// Drives a detector pair through the normalization pipeline. Owns no
/// frame state; each call yields an independent [`FaceFrame`].
pub struct NormalizationEngine<D, B> {
    detector: D,
    remover: B,
    tilt_threshold: f64,
    compute_derivatives: bool,
}

impl<D: FaceDetector, B: BackgroundRemover> NormalizationEngine<D, B> {
    pub fn new(detector: D, remover: B, config: &EngineConfig) -> Self {
        Self {
            detector,
            remover,
            tilt_threshold: config.tilt_threshold,
            compute_derivatives: config.compute_derivatives,
        }
    }

    /// Runs the full pipeline on a source image. `crop` disables the
    /// frontal canonical crop (landmarks stay in source coordinates).
    /// `pupils` optionally substitutes a smoothed pupil pair for the
    /// detected one when deriving tilt and scale.
    pub fn load_image(
        &mut self,
        image: &RgbImage,
        crop: bool,
        pupils: Option<(Point, Point)>,
    ) -> Result<FaceFrame> {
        let (landmarks, headpose) = self.find_landmarks(image)?;
        if landmarks.is_empty() {
            debug!("no face in frame");
            return Ok(FaceFrame::no_face(image));
        }

        if headpose.is_lateral() {
            self.load_lateral(image, landmarks, headpose)
        } else {
            self.load_frontal(image, landmarks, headpose, crop, pupils)
        }
    }

    /// Rebuilds a [`FaceFrame`] from a stored snapshot. The lateral
    /// profile is re-traced from the stored canvas when the head pose
    /// says the frame was a side profile.
    pub fn restore(&mut self, snapshot: &FrameSnapshot) -> Result<FaceFrame> {
        let image = snapshot
            .image
            .to_image()
            .ok_or_else(|| FaceError::Source("stored frame has malformed pixel data".into()))?;

        let lateral = snapshot.headpose.is_lateral();
        let (profile, lateral_landmarks) = if lateral {
            let analysis = self.analyze_profile(&image)?;
            (analysis.profile, analysis.landmarks)
        } else {
            (SagittalProfile::default(), LateralLandmarks::default())
        };

        Ok(FaceFrame {
            image,
            landmarks: snapshot.landmarks.clone(),
            headpose: snapshot.headpose,
            lateral,
            flipped: false,
            lateral_landmarks,
            profile,
            pupillary_distance: snapshot.pupillary_distance,
            pix2mm: snapshot.pix2mm,
            face_rotation: snapshot.rotation,
            orig_pupils: snapshot.landmarks.pupils(),
        })
    }

    fn find_landmarks(&mut self, image: &RgbImage) -> Result<(LandmarkSet, HeadPose)> {
        let detection = match self.detector.detect(image)? {
            Some(d) => d,
            None => return Ok((LandmarkSet::empty(), HeadPose::default())),
        };
        if !detection.is_confident() {
            debug!(confidence = detection.confidence, "face candidate below threshold");
            return Ok((LandmarkSet::empty(), HeadPose::default()));
        }
        self.detector.infer_landmarks(image, &detection.bbox)
    }

    fn load_frontal(
        &mut self,
        image: &RgbImage,
        landmarks: LandmarkSet,
        headpose: HeadPose,
        crop: bool,
        pupils_override: Option<(Point, Point)>,
    ) -> Result<FaceFrame> {
        let detected_pupils = landmarks
            .pupils()
            .ok_or_else(|| FaceError::Detector("landmark set lost its pupils".into()))?;
        let (pd, pix2mm) = calc_pd(detected_pupils)?;

        let mut frame = FaceFrame {
            image: image.clone(),
            landmarks,
            headpose,
            lateral: false,
            flipped: false,
            lateral_landmarks: LateralLandmarks::default(),
            profile: SagittalProfile::default(),
            pupillary_distance: pd,
            pix2mm,
            face_rotation: None,
            orig_pupils: Some(detected_pupils),
        };

        if crop {
            self.crop_frontal(&mut frame, pupils_override)?;
        }
        Ok(frame)
    }

    /// Levels, scales, and clips a frontal face onto the canonical
    /// canvas, moving the landmarks along with the pixels.
    fn crop_frontal(
        &mut self,
        frame: &mut FaceFrame,
        pupils_override: Option<(Point, Point)>,
    ) -> Result<()> {
        let pupils = pupils_override
            .filter(|(a, b)| *a != Point::default() || *b != Point::default())
            .or_else(|| frame.landmarks.pupils())
            .ok_or_else(|| FaceError::Detector("landmark set lost its pupils".into()))?;

        let rotation = geometry::face_rotation(pupils);
        let tilt = geometry::to_degrees(rotation);
        if self.tilt_threshold >= 0.0 && tilt.abs() > self.tilt_threshold {
            debug!(tilt, threshold = self.tilt_threshold, "leveling tilted face");
            frame.face_rotation = Some(rotation);
            let center = Point::new(
                (frame.image.width() / 2) as i32,
                (frame.image.height() / 2) as i32,
            );
            let rotated = geometry::rotate_points(frame.landmarks.points(), center, tilt);
            frame.landmarks.set_points(rotated);
        } else {
            frame.face_rotation = None;
        }

        let (d, _) = calc_pd(pupils)?;

        let source = match frame.face_rotation {
            Some(r) => geometry::straighten(&frame.image, r),
            None => frame.image.clone(),
        };

        let width = source.width() as f64;
        let height = source.height() as f64;
        let new_width = (width * (CANON_PUPIL_DIST / d)) as u32;
        let new_height = (new_width as f64 / (width / height)) as u32;
        if new_width == 0 || new_height == 0 {
            return Err(FaceError::PupilsCoincide);
        }
        let scale = new_width as f64 / width;

        let anchor = frame.landmarks.get(LM_RIGHT_PUPIL);
        let crop_x = (anchor.x as f64 * scale) as i32 - CANON_RIGHT_PUPIL.x;
        let crop_y = (anchor.y as f64 * scale) as i32 - CANON_RIGHT_PUPIL.y;

        let resized = imageops::resize(&source, new_width, new_height, FilterType::Triangle);
        let (canvas, _) = geometry::safe_clip(
            &resized,
            crop_x,
            crop_y,
            CANON_WIDTH,
            CANON_WIDTH,
            FILL_COLOR,
        );

        let moved =
            geometry::scale_crop_points(frame.landmarks.points(), crop_x, crop_y, scale);
        frame.landmarks.set_points(moved);
        frame.image = canvas;
        Ok(())
    }

    fn load_lateral(
        &mut self,
        image: &RgbImage,
        landmarks: LandmarkSet,
        headpose: HeadPose,
    ) -> Result<FaceFrame> {
        let mut frame = FaceFrame {
            image: image.clone(),
            landmarks,
            headpose,
            lateral: true,
            flipped: false,
            lateral_landmarks: LateralLandmarks::default(),
            profile: SagittalProfile::default(),
            pupillary_distance: 0.0,
            pix2mm: LATERAL_PIX2MM,
            face_rotation: None,
            orig_pupils: None,
        };

        if !headpose.facing_left() {
            // Mirror so every profile faces left, then re-detect since
            // the landmark scheme is not symmetric under reflection.
            frame.flipped = true;
            let mirrored = imageops::flip_horizontal(image);
            let (landmarks, headpose) = self.find_landmarks(&mirrored)?;
            if landmarks.is_empty() {
                debug!("face lost after mirroring");
                return Ok(FaceFrame::no_face(image));
            }
            frame.image = mirrored;
            frame.landmarks = landmarks;
            frame.headpose = headpose;
        }

        self.crop_lateral(&mut frame)?;

        let analysis = self.analyze_profile(&frame.image)?;
        frame.profile = analysis.profile;
        frame.lateral_landmarks = analysis.landmarks;
        Ok(frame)
    }

    /// Scales a side profile to the canvas width and anchors the right
    /// pupil landmark a quarter of the way in at pupil height.
    fn crop_lateral(&mut self, frame: &mut FaceFrame) -> Result<()> {
        if let Ok(Some(detection)) = self.detector.detect(&frame.image) {
            let b = &detection.bbox;
            let expand_top = b.height * LATERAL_INFLATE_TOP;
            let expand_bottom = b.height * LATERAL_INFLATE_BOTTOM;
            debug!(
                top = (b.y - expand_top).max(0.0),
                height = b.height + expand_top + expand_bottom,
                "lateral face extent"
            );
        }

        let width = frame.image.width() as f64;
        let height = frame.image.height() as f64;
        let new_width = CANON_WIDTH;
        let new_height = (new_width as f64 / (width / height)) as u32;
        let scale = new_width as f64 / width;

        let anchor = frame.landmarks.get(LM_RIGHT_PUPIL);
        let crop_x =
            (anchor.x as f64 * scale) as i32 - (CANON_WIDTH as f64 * LATERAL_ANCHOR_FRACTION) as i32;
        let crop_y = (anchor.y as f64 * scale) as i32 - CANON_RIGHT_PUPIL.y;

        let resized = imageops::resize(&frame.image, new_width, new_height, FilterType::Triangle);
        let (canvas, _) = geometry::safe_clip(
            &resized,
            crop_x,
            crop_y,
            CANON_WIDTH,
            CANON_WIDTH,
            FILL_COLOR,
        );

        let moved = geometry::scale_crop_points(frame.landmarks.points(), crop_x, crop_y, scale);
        frame.landmarks.set_points(moved);
        frame.image = canvas;
        Ok(())
    }

    fn analyze_profile(&mut self, image: &RgbImage) -> Result<ProfileAnalysis> {
        let mask = self.remover.remove_background(image)?;
        let analysis = lateral::analyze_profile(&mask, self.compute_derivatives);
        if analysis.landmarks == LateralLandmarks::default() {
            warn!("sagittal profile landmarks unresolved");
        } else {
            info!("sagittal profile resolved");
        }
        Ok(analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_scale_is_fixed() {
        let (pd, pix2mm) = calc_pd((CANON_LEFT_PUPIL, CANON_RIGHT_PUPIL)).unwrap();
        assert_eq!(pd, CANON_PUPIL_DIST);
        assert!((pix2mm - REFERENCE_PD_MM / CANON_PUPIL_DIST).abs() < 1e-12);
    }

    #[test]
    fn coincident_pupils_rejected() {
        let err = calc_pd((Point::new(5, 5), Point::new(5, 5))).unwrap_err();
        assert!(matches!(err, FaceError::PupilsCoincide));
    }
}
