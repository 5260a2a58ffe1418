use image::RgbImage;
use serde::{Deserialize, Serialize};

/// A 2-D pixel coordinate in image space (y grows downward).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        let dx = (self.x - other.x) as f64;
        let dy = (self.y - other.y) as f64;
        (dx * dx + dy * dy).sqrt()
    }
}

impl From<(i32, i32)> for Point {
    fn from((x, y): (i32, i32)) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }
}

/// Number of points in the landmark schema. Indices are fixed by the
/// external detector: 96/97 are the right/left pupils, 60-67 and 68-75
/// the right/left eye contours, 88-95 the inner mouth contour.
pub const LANDMARK_COUNT: usize = 98;

pub const LM_RIGHT_PUPIL: usize = 96;
pub const LM_LEFT_PUPIL: usize = 97;

/// Detected facial landmarks: either empty (no face) or exactly
/// [`LANDMARK_COUNT`] points.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet {
    points: Vec<Point>,
}

impl LandmarkSet {
    pub fn empty() -> Self {
        Self { points: Vec::new() }
    }

    /// Builds a set from exactly [`LANDMARK_COUNT`] points. Any other
    /// length is treated as "no face".
    pub fn from_points(points: Vec<Point>) -> Self {
        if points.len() == LANDMARK_COUNT {
            Self { points }
        } else {
            Self::empty()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn get(&self, index: usize) -> Point {
        self.points[index]
    }

    /// The (left, right) pupil pair, or `None` when no face was found.
    pub fn pupils(&self) -> Option<(Point, Point)> {
        if self.is_empty() {
            None
        } else {
            Some((self.points[LM_LEFT_PUPIL], self.points[LM_RIGHT_PUPIL]))
        }
    }

    pub fn set_points(&mut self, points: Vec<Point>) {
        *self = Self::from_points(points);
    }
}

/// Head orientation in degrees as reported by the landmark model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HeadPose {
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
}

/// Yaw magnitude beyond which a frame is treated as a side profile.
pub const LATERAL_YAW_THRESHOLD: f64 = 20.0;

impl HeadPose {
    pub fn new(yaw: f64, pitch: f64, roll: f64) -> Self {
        Self { yaw, pitch, roll }
    }

    pub fn is_lateral(&self) -> bool {
        self.yaw.abs() > LATERAL_YAW_THRESHOLD
    }

    pub fn facing_left(&self) -> bool {
        self.yaw < 0.0
    }
}

/// The silhouette curve of a side profile: for each image row that has
/// foreground, the column of its leftmost foreground pixel. The x
/// sequence is stored shifted so its minimum is zero; `shift` restores
/// source-frame columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SagittalProfile {
    pub x: Vec<i32>,
    pub y: Vec<i32>,
    pub shift: i32,
}

impl SagittalProfile {
    /// Builds a profile from source-frame samples, normalizing x so its
    /// minimum lands at zero and recording the shift.
    pub fn new(x: Vec<i32>, y: Vec<i32>) -> Self {
        let shift = x.iter().copied().min().unwrap_or(0);
        let x = x.into_iter().map(|v| v - shift).collect();
        Self { x, y, shift }
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Sample `index` in source-frame coordinates.
    pub fn point(&self, index: usize) -> Point {
        Point::new(self.x[index] + self.shift, self.y[index])
    }

    /// Index of the profile sample nearest to `pt`.
    pub fn nearest_index(&self, pt: Point) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for i in 0..self.len() {
            let d = self.point(i).distance(&pt);
            if best.map_or(true, |(_, bd)| d < bd) {
                best = Some((i, d));
            }
        }
        best.map(|(i, _)| i)
    }

    /// Sum of consecutive segment lengths between two sample indices.
    pub fn curve_length(&self, a: usize, b: usize) -> f64 {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        (lo..hi)
            .map(|i| self.point(i).distance(&self.point(i + 1)))
            .sum()
    }
}

/// Placeholder for a lateral landmark the band rules could not resolve.
pub const LATERAL_SENTINEL: Point = Point { x: -1, y: -1 };

pub const LATERAL_LANDMARK_COUNT: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LateralLandmark {
    Glabella = 0,
    Nasion = 1,
    NasalTip = 2,
    Subnasal = 3,
    MentoLabial = 4,
    Pogonion = 5,
}

/// The six anatomical landmarks extracted from a sagittal profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LateralLandmarks {
    points: [Point; LATERAL_LANDMARK_COUNT],
}

impl Default for LateralLandmarks {
    fn default() -> Self {
        Self {
            points: [LATERAL_SENTINEL; LATERAL_LANDMARK_COUNT],
        }
    }
}

impl LateralLandmarks {
    pub fn new(points: [Point; LATERAL_LANDMARK_COUNT]) -> Self {
        Self { points }
    }

    pub fn get(&self, which: LateralLandmark) -> Point {
        self.points[which as usize]
    }

    pub fn set(&mut self, which: LateralLandmark, pt: Point) {
        self.points[which as usize] = pt;
    }

    /// Whether the band rules resolved this landmark to a real point.
    pub fn is_resolved(&self, which: LateralLandmark) -> bool {
        self.get(which) != LATERAL_SENTINEL
    }
}

/// A raw RGB image in a form the document schema can serialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl SnapshotImage {
    pub fn from_image(img: &RgbImage) -> Self {
        Self {
            width: img.width(),
            height: img.height(),
            data: img.as_raw().clone(),
        }
    }

    pub fn to_image(&self) -> Option<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.data.clone())
    }
}

/// Everything needed to replay one analyzed frame without the engine
/// that produced it. Immutable once captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSnapshot {
    pub image: SnapshotImage,
    pub headpose: HeadPose,
    pub landmarks: LandmarkSet,
    pub pupillary_distance: f64,
    pub pix2mm: f64,
    /// Tilt correction (radians) that was applied, if any.
    pub rotation: Option<f64>,
}
