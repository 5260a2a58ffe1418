//! Sagittal profile analysis for side-profile frames.
//!
//! The silhouette is traced off a foreground mask as the leftmost
//! foreground column of each row and shifted so its minimum column is
//! zero. Six anatomical landmarks are picked from its local extrema,
//! banded by quartiles of the profile's vertical span, then un-shifted
//! back to source coordinates. Any landmark whose rule finds no
//! candidate stays at the sentinel and downstream measures skip it.

use image::GrayImage;
use tracing::{debug, warn};

use crate::types::{
    LateralLandmark, LateralLandmarks, Point, SagittalProfile, LATERAL_SENTINEL,
};

/// First and second differences of the silhouette x-coordinate, in row
/// order. Diagnostic output only; landmark selection never reads them.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileDerivatives {
    pub first: Vec<f64>,
    pub second: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileAnalysis {
    pub profile: SagittalProfile,
    pub landmarks: LateralLandmarks,
    pub derivatives: Option<ProfileDerivatives>,
}

/// Traces the silhouette: for each mask row with any foreground
/// (nonzero) pixel, records the column of the leftmost one. The
/// resulting profile is shifted so its minimum column is zero.
pub fn extract_profile(mask: &GrayImage) -> SagittalProfile {
    let mut x = Vec::new();
    let mut y = Vec::new();
    for row in 0..mask.height() {
        let first = (0..mask.width()).find(|&col| mask.get_pixel(col, row)[0] != 0);
        if let Some(col) = first {
            x.push(col as i32);
            y.push(row as i32);
        }
    }
    SagittalProfile::new(x, y)
}

/// Local maxima by neighbor comparison. A sample counts only when it is
/// strictly greater than both neighbors; ties are excluded.
fn local_maxima(x: &[i32]) -> Vec<usize> {
    (1..x.len().saturating_sub(1))
        .filter(|&i| x[i - 1] < x[i] && x[i] > x[i + 1])
        .collect()
}

fn local_minima(x: &[i32]) -> Vec<usize> {
    let negated: Vec<i32> = x.iter().map(|v| -v).collect();
    local_maxima(&negated)
}

/// 25%, 50%, and 75% y-coordinates of the profile's vertical span.
fn quarter_lines(start_y: i32, end_y: i32) -> (f64, f64, f64) {
    let span = (end_y - start_y) as f64;
    let start = start_y as f64;
    (start + 0.25 * span, start + 0.50 * span, start + 0.75 * span)
}

/// Minimum between Q1 and Q2 whose y is closest to the Q1 line.
fn find_glabella(profile: &SagittalProfile, minima: &[usize], q1: f64, q2: f64) -> Option<usize> {
    minima
        .iter()
        .copied()
        .filter(|&i| (profile.y[i] as f64) >= q1 && (profile.y[i] as f64) <= q2)
        .min_by(|&a, &b| {
            let da = (profile.y[a] as f64 - q1).abs();
            let db = (profile.y[b] as f64 - q1).abs();
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })
}

/// First maximum after the glabella (further out and further down),
/// still between Q1 and Q2.
fn find_nasion(
    profile: &SagittalProfile,
    maxima: &[usize],
    glabella: Point,
    q1: f64,
    q2: f64,
) -> Option<usize> {
    maxima.iter().copied().find(|&i| {
        let y = profile.y[i] as f64;
        y >= q1 && y <= q2 && profile.x[i] > glabella.x && profile.y[i] > glabella.y
    })
}

/// Topmost minimum between Q2 and Q3.
fn find_nasal_tip(profile: &SagittalProfile, minima: &[usize], q2: f64, q3: f64) -> Option<usize> {
    minima
        .iter()
        .copied()
        .filter(|&i| (profile.y[i] as f64) >= q2 && (profile.y[i] as f64) <= q3)
        .min_by_key(|&i| profile.y[i])
}

/// First maximum past the nasal tip, outward and below it.
fn find_subnasal(profile: &SagittalProfile, maxima: &[usize], tip: Point) -> Option<usize> {
    maxima
        .iter()
        .copied()
        .find(|&i| profile.x[i] > tip.x && profile.y[i] > tip.y)
}

/// Last minimum at or below the Q3 line.
fn find_pogonion(profile: &SagittalProfile, minima: &[usize], q3: f64) -> Option<usize> {
    minima
        .iter()
        .copied()
        .rfind(|&i| (profile.y[i] as f64) >= q3)
}

/// First maximum between Q3 and the pogonion.
fn find_mento_labial(
    profile: &SagittalProfile,
    maxima: &[usize],
    pogonion_y: i32,
    q3: f64,
) -> Option<usize> {
    maxima
        .iter()
        .copied()
        .find(|&i| (profile.y[i] as f64) >= q3 && profile.y[i] < pogonion_y)
}

/// Resolves the six profile landmarks. Band rules compare in the
/// shifted frame; resolved points are reported un-shifted and sentinels
/// are never un-shifted. A profile with no local extrema (or too short
/// to have any) yields all sentinels.
pub fn find_landmarks(profile: &SagittalProfile) -> LateralLandmarks {
    let mut landmarks = LateralLandmarks::default();
    if profile.len() < 3 {
        return landmarks;
    }

    let maxima = local_maxima(&profile.x);
    let minima = local_minima(&profile.x);
    if maxima.is_empty() || minima.is_empty() {
        warn!("no local extrema on sagittal profile");
        return landmarks;
    }

    let (q1, q2, q3) = quarter_lines(profile.y[0], profile.y[profile.len() - 1]);
    debug!(q1, q2, q3, "quartile bands");

    // Candidates in the shifted frame, sentinel when unresolved.
    let shifted = |idx: Option<usize>| {
        idx.map(|i| Point::new(profile.x[i], profile.y[i]))
            .unwrap_or(LATERAL_SENTINEL)
    };
    let mut place = |which: LateralLandmark, idx: Option<usize>| {
        if let Some(i) = idx {
            landmarks.set(which, profile.point(i));
        }
    };

    let glabella_idx = find_glabella(profile, &minima, q1, q2);
    place(LateralLandmark::Glabella, glabella_idx);

    place(
        LateralLandmark::Nasion,
        find_nasion(profile, &maxima, shifted(glabella_idx), q1, q2),
    );

    let tip_idx = find_nasal_tip(profile, &minima, q2, q3);
    place(LateralLandmark::NasalTip, tip_idx);

    place(
        LateralLandmark::Subnasal,
        find_subnasal(profile, &maxima, shifted(tip_idx)),
    );

    let pogonion_idx = find_pogonion(profile, &minima, q3);
    place(LateralLandmark::Pogonion, pogonion_idx);

    place(
        LateralLandmark::MentoLabial,
        find_mento_labial(profile, &maxima, shifted(pogonion_idx).y, q3),
    );

    landmarks
}

/// Central-difference gradient with one-sided differences at the ends.
fn gradient(x: &[i32]) -> Vec<f64> {
    let n = x.len();
    match n {
        0 => Vec::new(),
        1 => vec![0.0],
        _ => (0..n)
            .map(|i| {
                if i == 0 {
                    (x[1] - x[0]) as f64
                } else if i == n - 1 {
                    (x[n - 1] - x[n - 2]) as f64
                } else {
                    (x[i + 1] - x[i - 1]) as f64 / 2.0
                }
            })
            .collect(),
    }
}

fn gradient_f64(x: &[f64]) -> Vec<f64> {
    let n = x.len();
    match n {
        0 => Vec::new(),
        1 => vec![0.0],
        _ => (0..n)
            .map(|i| {
                if i == 0 {
                    x[1] - x[0]
                } else if i == n - 1 {
                    x[n - 1] - x[n - 2]
                } else {
                    (x[i + 1] - x[i - 1]) / 2.0
                }
            })
            .collect(),
    }
}

/// Full profile analysis of a foreground mask.
pub fn analyze_profile(mask: &GrayImage, with_derivatives: bool) -> ProfileAnalysis {
    let profile = extract_profile(mask);
    let landmarks = find_landmarks(&profile);
    let derivatives = if with_derivatives && !profile.is_empty() {
        let first = gradient(&profile.x);
        let second = gradient_f64(&first);
        Some(ProfileDerivatives { first, second })
    } else {
        None
    };
    ProfileAnalysis {
        profile,
        landmarks,
        derivatives,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LATERAL_SENTINEL;

    /// Piecewise-linear silhouette over 400 rows with unit slopes, so
    /// every extremum is strict. Knots (row, column):
    /// (0,170) (150,20) (180,50) (220,10) (260,50) (290,20) (320,50)
    /// (340,30) (399,89).
    fn synthetic_profile() -> SagittalProfile {
        let knots = [
            (0i32, 170i32),
            (150, 20),
            (180, 50),
            (220, 10),
            (260, 50),
            (290, 20),
            (320, 50),
            (340, 30),
            (399, 89),
        ];
        let mut x = Vec::new();
        let mut y = Vec::new();
        for pair in knots.windows(2) {
            let (y0, x0) = pair[0];
            let (y1, x1) = pair[1];
            let step = if x1 > x0 { 1 } else { -1 };
            for row in y0..y1 {
                x.push(x0 + step * (row - y0));
                y.push(row);
            }
        }
        x.push(knots[8].1);
        y.push(knots[8].0);
        SagittalProfile::new(x, y)
    }

    #[test]
    fn tied_samples_are_not_extrema() {
        let x = vec![0, 1, 3, 1, 0];
        assert_eq!(local_maxima(&x), vec![2]);
        // A plateau has no strict peak.
        let x = vec![0, 1, 3, 3, 3, 1, 0];
        assert!(local_maxima(&x).is_empty());
        let x = vec![5, 4, 2, 4, 5];
        assert_eq!(local_minima(&x), vec![2]);
    }

    #[test]
    fn monotonic_profile_has_no_landmarks() {
        let profile = SagittalProfile::new((0..100).collect(), (0..100).collect());
        let landmarks = find_landmarks(&profile);
        assert_eq!(landmarks, LateralLandmarks::default());
    }

    #[test]
    fn synthetic_profile_resolves_all_six() {
        let profile = synthetic_profile();
        let lm = find_landmarks(&profile);
        assert_eq!(lm.get(LateralLandmark::Glabella), Point::new(20, 150));
        assert_eq!(lm.get(LateralLandmark::Nasion), Point::new(50, 180));
        assert_eq!(lm.get(LateralLandmark::NasalTip), Point::new(10, 220));
        assert_eq!(lm.get(LateralLandmark::Subnasal), Point::new(50, 260));
        assert_eq!(lm.get(LateralLandmark::MentoLabial), Point::new(50, 320));
        assert_eq!(lm.get(LateralLandmark::Pogonion), Point::new(30, 340));
    }

    #[test]
    fn missing_band_leaves_sentinel() {
        // One maximum above the quartile bands, one minimum inside the
        // glabella band [q1, q2] = [99.75, 199.5], nothing lower down.
        let mut x: Vec<i32> = Vec::new();
        let mut y: Vec<i32> = Vec::new();
        for row in 0i32..400 {
            let col = if row < 40 {
                100 + row
            } else if row < 80 {
                180 - row
            } else {
                (row - 120).abs() + 5
            };
            x.push(col);
            y.push(row);
        }
        let profile = SagittalProfile::new(x, y);
        let lm = find_landmarks(&profile);
        assert_eq!(lm.get(LateralLandmark::Glabella), Point::new(5, 120));
        assert_eq!(lm.get(LateralLandmark::Nasion), LATERAL_SENTINEL);
        assert_eq!(lm.get(LateralLandmark::NasalTip), LATERAL_SENTINEL);
        assert_eq!(lm.get(LateralLandmark::Pogonion), LATERAL_SENTINEL);
        assert_eq!(lm.get(LateralLandmark::MentoLabial), LATERAL_SENTINEL);
    }

    #[test]
    fn mask_tracing_skips_empty_rows() {
        let mut mask = GrayImage::new(8, 4);
        // Row 1: foreground from column 3. Row 2: from column 5.
        for col in 3..8 {
            mask.put_pixel(col, 1, image::Luma([255]));
        }
        for col in 5..8 {
            mask.put_pixel(col, 2, image::Luma([255]));
        }
        let profile = extract_profile(&mask);
        // Shifted so the leftmost column sits at zero.
        assert_eq!(profile.x, vec![0, 2]);
        assert_eq!(profile.y, vec![1, 2]);
        assert_eq!(profile.shift, 3);
        assert_eq!(profile.point(0), Point::new(3, 1));
    }

    #[test]
    fn derivatives_behind_flag() {
        let mut mask = GrayImage::new(4, 3);
        for row in 0..3 {
            mask.put_pixel(row % 2, row, image::Luma([255]));
        }
        let plain = analyze_profile(&mask, false);
        assert!(plain.derivatives.is_none());
        let with = analyze_profile(&mask, true);
        let d = with.derivatives.unwrap();
        assert_eq!(d.first.len(), with.profile.len());
        assert_eq!(d.second.len(), with.profile.len());
    }
}
