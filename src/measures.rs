//! The measurement registry. Every clinical quantity the engine can
//! report lives behind a [`MeasureKind`]; a [`Measure`] pairs a kind
//! with per-item enablement so documents and exports can toggle
//! individual columns without touching the computation.
//!
//! Distances are reported in millimeters, areas in square millimeters,
//! ratios and angles unitless. Each kind computes in isolation; a kind
//! that cannot produce a value for a frame simply omits it.

use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;

use crate::geometry;
use crate::normalize::{FaceFrame, CANON_PUPIL_DIST, CANON_WIDTH, LATERAL_PIX2MM};
use crate::types::{LateralLandmark, Point};

/// Result map of one analysis pass: item name to value.
pub type Measurements = BTreeMap<String, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasureKind {
    Fai,
    OralCommissureExcursion,
    Brows,
    DentalArea,
    EyeArea,
    IntercanthalDistance,
    MouthLength,
    NasalWidth,
    OuterEyeCorners,
    Lateral,
    Position,
}

impl MeasureKind {
    pub const ALL: [MeasureKind; 11] = [
        MeasureKind::Fai,
        MeasureKind::OralCommissureExcursion,
        MeasureKind::Brows,
        MeasureKind::DentalArea,
        MeasureKind::EyeArea,
        MeasureKind::IntercanthalDistance,
        MeasureKind::MouthLength,
        MeasureKind::NasalWidth,
        MeasureKind::OuterEyeCorners,
        MeasureKind::Lateral,
        MeasureKind::Position,
    ];

    /// Stable identifier used by saved documents.
    pub fn id(self) -> &'static str {
        match self {
            MeasureKind::Fai => "FAI",
            MeasureKind::OralCommissureExcursion => "Oral CE",
            MeasureKind::Brows => "Brow",
            MeasureKind::DentalArea => "Dental Display",
            MeasureKind::EyeArea => "Eye Area",
            MeasureKind::IntercanthalDistance => "Intercanthal Distance",
            MeasureKind::MouthLength => "Mouth Length",
            MeasureKind::NasalWidth => "Nasal Width",
            MeasureKind::OuterEyeCorners => "Outer Eye Corners",
            MeasureKind::Lateral => "Lateral Measures",
            MeasureKind::Position => "Position",
        }
    }

    pub fn from_id(id: &str) -> Option<MeasureKind> {
        MeasureKind::ALL.iter().copied().find(|k| k.id() == id)
    }

    pub fn item_names(self) -> &'static [&'static str] {
        match self {
            MeasureKind::Fai => &["fai"],
            MeasureKind::OralCommissureExcursion => &["oce.l", "oce.r"],
            MeasureKind::Brows => &["brow.d"],
            MeasureKind::DentalArea => &[
                "dental_area",
                "dental_left",
                "dental_right",
                "dental_ratio",
                "dental_diff",
            ],
            MeasureKind::EyeArea => &["eye.left", "eye.right", "eye.diff", "eye.ratio"],
            MeasureKind::IntercanthalDistance => &["id"],
            MeasureKind::MouthLength => &["ml"],
            MeasureKind::NasalWidth => &["nw"],
            MeasureKind::OuterEyeCorners => &["oe"],
            MeasureKind::Lateral => &["nn", "nm", "np"],
            MeasureKind::Position => &["tilt", "px2mm", "pd"],
        }
    }

    pub fn is_frontal(self) -> bool {
        !matches!(self, MeasureKind::Lateral)
    }

    pub fn is_lateral(self) -> bool {
        matches!(self, MeasureKind::Lateral | MeasureKind::Position)
    }

    /// Whether this kind produces values for the given view.
    pub fn applies_to(self, lateral: bool) -> bool {
        if lateral {
            self.is_lateral()
        } else {
            self.is_frontal()
        }
    }

    pub fn compute(self, frame: &FaceFrame) -> Measurements {
        match self {
            MeasureKind::Fai => calc_fai(frame),
            MeasureKind::OralCommissureExcursion => calc_oral_ce(frame),
            MeasureKind::Brows => calc_brows(frame),
            MeasureKind::DentalArea => calc_dental(frame),
            MeasureKind::EyeArea => calc_eye_area(frame),
            MeasureKind::IntercanthalDistance => calc_pair(frame, "id", 64, 68),
            MeasureKind::MouthLength => calc_pair(frame, "ml", 88, 92),
            MeasureKind::NasalWidth => calc_pair(frame, "nw", 55, 59),
            MeasureKind::OuterEyeCorners => calc_pair(frame, "oe", 60, 72),
            MeasureKind::Lateral => calc_lateral(frame),
            MeasureKind::Position => calc_position(frame),
        }
    }
}

impl Serialize for MeasureKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.id())
    }
}

impl<'de> Deserialize<'de> for MeasureKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let id = String::deserialize(deserializer)?;
        MeasureKind::from_id(&id)
            .ok_or_else(|| D::Error::custom(format!("unknown measure id '{id}'")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureItem {
    pub name: String,
    pub enabled: bool,
}

/// One registry entry with its enablement state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measure {
    #[serde(rename = "id")]
    pub kind: MeasureKind,
    pub enabled: bool,
    pub items: Vec<MeasureItem>,
}

impl Measure {
    pub fn new(kind: MeasureKind) -> Self {
        Self {
            kind,
            enabled: true,
            items: kind
                .item_names()
                .iter()
                .map(|n| MeasureItem {
                    name: (*n).to_string(),
                    enabled: true,
                })
                .collect(),
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        for item in &mut self.items {
            item.enabled = enabled;
        }
    }

    pub fn set_item_enabled(&mut self, name: &str, enabled: bool) {
        for item in &mut self.items {
            if item.name == name {
                item.enabled = enabled;
            }
        }
    }

    pub fn is_item_enabled(&self, name: &str) -> bool {
        self.items
            .iter()
            .find(|i| i.name == name)
            .map(|i| i.enabled)
            .unwrap_or(true)
    }

    /// Flip item enablement to match the view type of the active frame.
    pub fn update_for_type(&mut self, lateral: bool) {
        let on = if lateral {
            self.kind.is_lateral()
        } else {
            self.kind.is_frontal()
        };
        for item in &mut self.items {
            item.enabled = on;
        }
    }
}

/// The full registry, everything enabled.
pub fn all_measures() -> Vec<Measure> {
    MeasureKind::ALL.iter().copied().map(Measure::new).collect()
}

/// Names of all enabled items across enabled measures, registry order.
pub fn enabled_items(measures: &[Measure]) -> Vec<String> {
    measures
        .iter()
        .filter(|m| m.enabled)
        .flat_map(|m| m.items.iter().filter(|i| i.enabled))
        .map(|i| i.name.clone())
        .collect()
}

/// Runs every enabled measure that applies to the frame's view type.
pub fn analyze(frame: &FaceFrame, measures: &[Measure]) -> Measurements {
    let mut result = Measurements::new();
    if !frame.has_face() {
        return result;
    }
    for measure in measures.iter().filter(|m| m.enabled) {
        if measure.kind.applies_to(frame.lateral) {
            result.extend(measure.kind.compute(frame));
        }
    }
    result
}

/// Scaled distance between two landmark indices.
fn dist_mm(frame: &FaceFrame, a: usize, b: usize) -> f64 {
    frame.landmarks.get(a).distance(&frame.landmarks.get(b)) * frame.pix2mm
}

fn calc_pair(frame: &FaceFrame, name: &str, a: usize, b: usize) -> Measurements {
    let mut out = Measurements::new();
    out.insert(name.to_string(), dist_mm(frame, a, b));
    out
}

/// Asymmetry between the two canthus-to-commissure diagonals.
fn calc_fai(frame: &FaceFrame) -> Measurements {
    let d1 = dist_mm(frame, 64, 76);
    let d2 = dist_mm(frame, 68, 82);
    let mut out = Measurements::new();
    out.insert("fai".to_string(), (d1 - d2).abs());
    out
}

fn calc_oral_ce(frame: &FaceFrame) -> Measurements {
    let mut out = Measurements::new();
    out.insert("oce.r".to_string(), dist_mm(frame, 76, 85));
    out.insert("oce.l".to_string(), dist_mm(frame, 82, 85));
    out
}

/// Vertical offset between the brow points, measured where rays along
/// the pupil axis from each brow meet the canvas edge. Empty when a ray
/// is degenerate.
fn calc_brows(frame: &FaceFrame) -> Measurements {
    let mut out = Measurements::new();
    let pupils = match frame.landmarks.pupils() {
        Some(p) => p,
        None => return out,
    };
    let tilt = geometry::normalize_angle(geometry::face_rotation(pupils));

    let right = geometry::line_to_nearest_edge(frame.landmarks.get(35), tilt, CANON_WIDTH);
    let left = geometry::line_to_nearest_edge(frame.landmarks.get(44), tilt, CANON_WIDTH);
    if let (Some(r), Some(l)) = (right, left) {
        let diff = (l.y - r.y).abs() as f64 * frame.pix2mm;
        out.insert("brow.d".to_string(), diff);
    }
    out
}

fn polygon_area_mm2(points: &[Point], pix2mm: f64) -> f64 {
    geometry::polygon_area(points) * pix2mm * pix2mm
}

/// Inner-lip area split by the perpendicular bisector of the pupils.
/// When the bisector fails to cross the ring cleanly, the areas degrade
/// to zero and the ratio to one.
fn calc_dental(frame: &FaceFrame) -> Measurements {
    let mut out = Measurements::new();
    let ring: Vec<Point> = (88..=95).map(|i| frame.landmarks.get(i)).collect();

    let (area, left, right, ratio, diff) = match frame.landmarks.pupils() {
        Some(pupils) => {
            let line = geometry::bisecting_line(CANON_WIDTH, pupils);
            match geometry::split_polygon(&ring, line) {
                Ok((first, second)) => {
                    let left = polygon_area_mm2(&first, frame.pix2mm);
                    let right = polygon_area_mm2(&second, frame.pix2mm);
                    (
                        left + right,
                        left,
                        right,
                        geometry::symmetry_ratio(left, right),
                        (left - right).abs(),
                    )
                }
                Err(e) => {
                    warn!(error = %e, "dental split failed");
                    (0.0, 0.0, 0.0, 1.0, 0.0)
                }
            }
        }
        None => (0.0, 0.0, 0.0, 1.0, 0.0),
    };

    out.insert("dental_area".to_string(), area);
    out.insert("dental_left".to_string(), left);
    out.insert("dental_right".to_string(), right);
    out.insert("dental_ratio".to_string(), ratio);
    out.insert("dental_diff".to_string(), diff);
    out
}

fn calc_eye_area(frame: &FaceFrame) -> Measurements {
    let right_ring: Vec<Point> = (60..=67).map(|i| frame.landmarks.get(i)).collect();
    let left_ring: Vec<Point> = (68..=75).map(|i| frame.landmarks.get(i)).collect();

    let right = polygon_area_mm2(&right_ring, frame.pix2mm);
    let left = polygon_area_mm2(&left_ring, frame.pix2mm);

    let mut out = Measurements::new();
    out.insert("eye.left".to_string(), left);
    out.insert("eye.right".to_string(), right);
    out.insert(
        "eye.diff".to_string(),
        ((right - left).abs() * 100.0).round() / 100.0,
    );
    out.insert(
        "eye.ratio".to_string(),
        geometry::symmetry_ratio(right, left),
    );
    out
}

/// Curve length along the sagittal profile between two resolved profile
/// landmarks. Items with an unresolved endpoint are omitted.
fn calc_lateral(frame: &FaceFrame) -> Measurements {
    let mut out = Measurements::new();
    if !frame.lateral || frame.profile.is_empty() {
        return out;
    }

    let mut curve = |name: &str, a: LateralLandmark, b: LateralLandmark| {
        if !(frame.lateral_landmarks.is_resolved(a) && frame.lateral_landmarks.is_resolved(b)) {
            return;
        }
        let start = frame.profile.nearest_index(frame.lateral_landmarks.get(a));
        let end = frame.profile.nearest_index(frame.lateral_landmarks.get(b));
        if let (Some(i), Some(j)) = (start, end) {
            let d = frame.profile.curve_length(i, j) * frame.pix2mm;
            out.insert(name.to_string(), d);
        }
    };

    curve("nn", LateralLandmark::Nasion, LateralLandmark::Subnasal);
    curve("nm", LateralLandmark::Subnasal, LateralLandmark::MentoLabial);
    curve("np", LateralLandmark::Subnasal, LateralLandmark::Pogonion);
    out
}

/// Tilt of the pupil axis plus the frame's pixel scale. Side profiles
/// report the fixed lateral scale and the canonical pupil distance.
fn calc_position(frame: &FaceFrame) -> Measurements {
    let mut out = Measurements::new();
    let pupils = match frame.landmarks.pupils() {
        Some(p) => p,
        None => return out,
    };
    let tilt = geometry::to_degrees(geometry::face_rotation(pupils));

    let (pd, pix2mm) = if frame.lateral {
        (CANON_PUPIL_DIST, LATERAL_PIX2MM)
    } else {
        (frame.pupillary_distance, frame.pix2mm)
    };

    out.insert("tilt".to_string(), tilt);
    out.insert("pd".to_string(), pd);
    out.insert("px2mm".to_string(), pix2mm);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{canonical_pix2mm, frontal_frame};
    use approx::assert_relative_eq;

    #[test]
    fn ids_round_trip() {
        for kind in MeasureKind::ALL {
            assert_eq!(MeasureKind::from_id(kind.id()), Some(kind));
        }
        assert_eq!(MeasureKind::from_id("bogus"), None);
    }

    #[test]
    fn registry_has_every_kind_enabled() {
        let measures = all_measures();
        assert_eq!(measures.len(), MeasureKind::ALL.len());
        assert!(measures.iter().all(|m| m.enabled));
        let items = enabled_items(&measures);
        assert_eq!(items.iter().filter(|n| *n == "fai").count(), 1);
        assert!(items.contains(&"dental_ratio".to_string()));
    }

    #[test]
    fn distances_scale_by_pix2mm() {
        let frame = frontal_frame();
        let result = analyze(&frame, &all_measures());

        // Intercanthal: landmarks 64 (400,480) and 68 (620,480).
        assert_relative_eq!(result["id"], 220.0 * canonical_pix2mm(), epsilon = 1e-9);
        // Mouth length: landmarks 88 (440,700) and 92 (580,700).
        assert_relative_eq!(result["ml"], 140.0 * canonical_pix2mm(), epsilon = 1e-9);
        assert_relative_eq!(result["nw"], 100.0 * canonical_pix2mm(), epsilon = 1e-9);
        assert_relative_eq!(result["oe"], 460.0 * canonical_pix2mm(), epsilon = 1e-9);
    }

    #[test]
    fn symmetric_fixture_balances() {
        let frame = frontal_frame();
        let result = analyze(&frame, &all_measures());

        assert_relative_eq!(result["fai"], 0.0, epsilon = 1e-9);
        assert_relative_eq!(result["eye.ratio"], 1.0, epsilon = 1e-9);
        assert_relative_eq!(result["eye.diff"], 0.0, epsilon = 1e-9);
        // Bisector truncation can land a pixel off-center.
        assert!(result["dental_ratio"] > 0.9);
        assert_relative_eq!(
            result["dental_area"],
            result["dental_left"] + result["dental_right"],
            epsilon = 1e-9
        );
    }

    #[test]
    fn position_reports_level_fixture() {
        let frame = frontal_frame();
        let result = analyze(&frame, &all_measures());
        assert_relative_eq!(result["tilt"], 0.0, epsilon = 1e-9);
        assert_relative_eq!(result["pd"], 260.0, epsilon = 1e-9);
        assert_relative_eq!(result["px2mm"], canonical_pix2mm(), epsilon = 1e-9);
    }

    #[test]
    fn lateral_kind_skips_frontal_frames() {
        let frame = frontal_frame();
        let result = analyze(&frame, &all_measures());
        assert!(!result.contains_key("nn"));
        assert!(!result.contains_key("np"));
    }

    #[test]
    fn frontal_kinds_skip_lateral_frames() {
        let mut frame = frontal_frame();
        frame.lateral = true;
        frame.headpose = crate::types::HeadPose::new(-40.0, 0.0, 0.0);
        let result = analyze(&frame, &all_measures());
        assert!(!result.contains_key("id"));
        assert!(!result.contains_key("eye.ratio"));
        // Position still reports, with the fixed lateral scale.
        assert_relative_eq!(result["px2mm"], LATERAL_PIX2MM, epsilon = 1e-9);
    }

    #[test]
    fn dental_split_failure_degrades() {
        let mut frame = frontal_frame();
        // Push the inner-lip ring far off-center so the pupil bisector
        // misses it entirely.
        let mut pts = frame.landmarks.points().to_vec();
        for p in pts.iter_mut().take(96).skip(88) {
            p.x -= 400;
        }
        frame.landmarks.set_points(pts);
        let result = analyze(&frame, &all_measures());
        assert_eq!(result["dental_area"], 0.0);
        assert_eq!(result["dental_ratio"], 1.0);
        assert_eq!(result["dental_diff"], 0.0);
    }

    #[test]
    fn view_toggle_flips_items() {
        let mut measure = Measure::new(MeasureKind::EyeArea);
        measure.update_for_type(true);
        assert!(measure.items.iter().all(|i| !i.enabled));
        measure.update_for_type(false);
        assert!(measure.items.iter().all(|i| i.enabled));

        let mut position = Measure::new(MeasureKind::Position);
        position.update_for_type(true);
        assert!(position.items.iter().all(|i| i.enabled));
    }

    #[test]
    fn disabled_measure_is_skipped() {
        let frame = frontal_frame();
        let mut measures = all_measures();
        for m in &mut measures {
            if m.kind == MeasureKind::MouthLength {
                m.set_enabled(false);
            }
        }
        let result = analyze(&frame, &measures);
        assert!(!result.contains_key("ml"));
        assert!(result.contains_key("nw"));
    }
}
