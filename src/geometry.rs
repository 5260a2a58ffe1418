//! Pure coordinate-transform primitives shared by the normalization and
//! measurement engines. No shared state; image-coordinate convention
//! throughout (y grows downward, clockwise-positive rotation).

use image::{Rgb, RgbImage};

use crate::error::{FaceError, Result};
use crate::types::Point;

/// Tolerance used to deduplicate near-identical intersection points.
pub const INTERSECT_TOL: f64 = 1e-7;

/// Clips a `width` x `height` region at (`x`, `y`) out of `image`,
/// filling anything outside the source bounds with `fill`. A fully
/// out-of-bounds request yields an all-fill canvas. Returns the canvas
/// and the offset at which source content was placed.
pub fn safe_clip(
    image: &RgbImage,
    x: i32,
    y: i32,
    width: u32,
    height: u32,
    fill: Rgb<u8>,
) -> (RgbImage, (u32, u32)) {
    let img_w = image.width() as i32;
    let img_h = image.height() as i32;

    let x_start = x.max(0);
    let y_start = y.max(0);
    let x_end = (x + width as i32).min(img_w);
    let y_end = (y + height as i32).min(img_h);

    let mut canvas = RgbImage::from_pixel(width, height, fill);

    let dest_x = (-x).max(0) as u32;
    let dest_y = (-y).max(0) as u32;

    if x_end > x_start && y_end > y_start {
        let clip_w = (x_end - x_start) as u32;
        let clip_h = (y_end - y_start) as u32;
        for row in 0..clip_h {
            for col in 0..clip_w {
                let src = image.get_pixel((x_start as u32) + col, (y_start as u32) + row);
                canvas.put_pixel(dest_x + col, dest_y + row, *src);
            }
        }
    }

    (canvas, (dest_x, dest_y))
}

/// Shoelace area of a simple polygon (not necessarily convex).
pub fn polygon_area(points: &[Point]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let n = points.len();
    let mut sum = 0.0;
    for i in 0..n {
        let j = (i + n - 1) % n;
        sum += points[i].x as f64 * points[j].y as f64;
        sum -= points[i].y as f64 * points[j].x as f64;
    }
    sum.abs() * 0.5
}

/// Scales points about the origin then translates by the crop offset,
/// truncating to integer pixels.
pub fn scale_crop_points(points: &[Point], crop_x: i32, crop_y: i32, scale: f64) -> Vec<Point> {
    points
        .iter()
        .map(|p| {
            Point::new(
                (p.x as f64 * scale - crop_x as f64) as i32,
                (p.y as f64 * scale - crop_y as f64) as i32,
            )
        })
        .collect()
}

/// Rotates points about `center` by `angle_degrees`, clockwise-positive
/// to match image coordinates.
pub fn rotate_points(points: &[Point], center: Point, angle_degrees: f64) -> Vec<Point> {
    let theta = -angle_degrees.to_radians();
    let (sin, cos) = theta.sin_cos();
    points
        .iter()
        .map(|p| {
            let vx = (p.x - center.x) as f64;
            let vy = (p.y - center.y) as f64;
            let rx = cos * vx - sin * vy;
            let ry = sin * vx + cos * vy;
            Point::new(
                (rx + center.x as f64).round() as i32,
                (ry + center.y as f64).round() as i32,
            )
        })
        .collect()
}

/// Angle of the axis through a point pair, radians via `atan2`.
pub fn face_rotation(pair: (Point, Point)) -> f64 {
    let (a, b) = pair;
    ((b.y - a.y) as f64).atan2((b.x - a.x) as f64)
}

/// Normalizes an angle into `[0, 2*pi)`.
pub fn normalize_angle(angle: f64) -> f64 {
    angle.rem_euclid(2.0 * std::f64::consts::PI)
}

/// Radians to degrees, wrapped into `(-90, 90]` so a near-upside-down
/// detection reads as a small tilt.
pub fn to_degrees(r: f64) -> f64 {
    let mut tilt = r.to_degrees();
    if tilt > 90.0 {
        tilt -= 180.0;
    } else if tilt < -90.0 {
        tilt += 180.0;
    }
    tilt
}

/// min/max ratio of two paired measurements; 1.0 means perfect symmetry
/// (including the degenerate all-zero case).
pub fn symmetry_ratio(a: f64, b: f64) -> f64 {
    if a == 0.0 && b == 0.0 {
        return 1.0;
    }
    a.min(b) / a.max(b)
}

/// Intersection of the infinite line through `line` with the bounded
/// segment `segment`, if any. Truncates to integer pixels.
fn line_segment_intersection(line: (Point, Point), segment: (Point, Point)) -> Option<Point> {
    let xdiff = (
        (line.0.x - line.1.x) as f64,
        (segment.0.x - segment.1.x) as f64,
    );
    let ydiff = (
        (line.0.y - line.1.y) as f64,
        (segment.0.y - segment.1.y) as f64,
    );

    let det = |a: (f64, f64), b: (f64, f64)| a.0 * b.1 - a.1 * b.0;

    let div = det(xdiff, ydiff);
    if div == 0.0 {
        return None;
    }

    let d0 = det(
        (line.0.x as f64, line.0.y as f64),
        (line.1.x as f64, line.1.y as f64),
    );
    let d1 = det(
        (segment.0.x as f64, segment.0.y as f64),
        (segment.1.x as f64, segment.1.y as f64),
    );
    let x = det((d0, d1), xdiff) / div;
    let y = det((d0, d1), ydiff) / div;

    let (min_x, max_x) = (
        segment.0.x.min(segment.1.x) as f64,
        segment.0.x.max(segment.1.x) as f64,
    );
    let (min_y, max_y) = (
        segment.0.y.min(segment.1.y) as f64,
        segment.0.y.max(segment.1.y) as f64,
    );
    if x >= min_x && x <= max_x && y >= min_y && y <= max_y {
        Some(Point::new(x as i32, y as i32))
    } else {
        None
    }
}

/// All intersections of `line` with the polygon's edges, paired with the
/// edge index, deduplicated within [`INTERSECT_TOL`].
pub fn line_polygon_intersections(line: (Point, Point), polygon: &[Point]) -> Vec<(Point, usize)> {
    let mut raw = Vec::new();
    for i in 0..polygon.len() {
        let p1 = polygon[i];
        let p2 = polygon[(i + 1) % polygon.len()];
        if let Some(pt) = line_segment_intersection(line, (p1, p2)) {
            raw.push((pt, i));
        }
    }

    let mut unique: Vec<(Point, usize)> = Vec::new();
    for (pt, idx) in raw {
        if !unique.iter().any(|(u, _)| pt.distance(u) < INTERSECT_TOL) {
            unique.push((pt, idx));
        }
    }
    unique
}

/// Splits a polygon into two ordered sub-polygons along a bisecting
/// line. Fails unless the line crosses the boundary at exactly 2 points.
pub fn split_polygon(polygon: &[Point], line: (Point, Point)) -> Result<(Vec<Point>, Vec<Point>)> {
    let mut intersections = line_polygon_intersections(line, polygon);
    if intersections.len() != 2 {
        return Err(FaceError::MalformedBisection {
            found: intersections.len(),
        });
    }

    intersections.sort_by_key(|&(_, idx)| idx);
    let (pt1, idx1) = intersections[0];
    let (pt2, idx2) = intersections[1];

    let mut first: Vec<Point> = polygon[..=idx1].to_vec();
    first.push(pt1);
    first.push(pt2);
    first.extend_from_slice(&polygon[idx2 + 1..]);

    let mut second: Vec<Point> = polygon[idx1 + 1..=idx2].to_vec();
    second.push(pt2);
    second.push(pt1);

    Ok((first, second))
}

/// Endpoints of the perpendicular bisector of a point pair, clipped to a
/// square canvas of side `canvas_size`.
pub fn bisecting_line(canvas_size: u32, pair: (Point, Point)) -> (Point, Point) {
    let ((x1, y1), (x2, y2)) = (
        (pair.0.x as f64, pair.0.y as f64),
        (pair.1.x as f64, pair.1.y as f64),
    );
    let mid_x = (x1 + x2) / 2.0;
    let mid_y = (y1 + y2) / 2.0;

    let angle = if x1 == x2 {
        std::f64::consts::FRAC_PI_2
    } else {
        (y2 - y1).atan2(x2 - x1)
    };
    let slope = (angle + std::f64::consts::FRAC_PI_2).tan();

    let get_y = |x: f64| slope * (x - mid_x) + mid_y;
    let get_x = |y: f64| (y - mid_y) / slope + mid_x;
    let size = canvas_size as f64;

    let mut x0 = 0.0;
    let mut x1_edge = size;
    let mut y0 = get_y(x0);
    let mut y1_edge = get_y(x1_edge);

    if y0 < 0.0 {
        y0 = 0.0;
        x0 = get_x(y0);
    } else if y0 > size {
        y0 = size;
        x0 = get_x(y0);
    }
    if y1_edge < 0.0 {
        y1_edge = 0.0;
        x1_edge = get_x(y1_edge);
    } else if y1_edge > size {
        y1_edge = size;
        x1_edge = get_x(y1_edge);
    }

    (
        Point::new(x0 as i32, y0 as i32),
        Point::new(x1_edge as i32, y1_edge as i32),
    )
}

/// Projects a ray from `origin` at `angle` to the first canvas edge it
/// reaches. `None` when the ray is degenerate (horizontal slope zero or
/// non-finite intersections).
pub fn line_to_nearest_edge(origin: Point, angle: f64, canvas_size: u32) -> Option<Point> {
    let (x0, y0) = (origin.x as f64, origin.y as f64);
    let slope = angle.tan();
    if slope == 0.0 {
        return None;
    }
    let size = canvas_size as f64;

    let mut candidates: Vec<Point> = Vec::new();
    let mut push = |x: f64, y: f64| {
        if x.is_finite() && y.is_finite() && (0.0..=size).contains(&x) && (0.0..=size).contains(&y)
        {
            candidates.push(Point::new(x as i32, y as i32));
        }
    };

    push(size, slope * (size - x0) + y0);
    push(0.0, slope * (0.0 - x0) + y0);
    push((0.0 - y0) / slope + x0, 0.0);
    push((size - y0) / slope + x0, size);

    candidates.into_iter().next()
}

/// Mean color of an image, used as the dead-space fill when leveling.
pub fn average_rgb(image: &RgbImage) -> Rgb<u8> {
    let count = (image.width() as u64 * image.height() as u64).max(1);
    let mut sums = [0u64; 3];
    for pixel in image.pixels() {
        for c in 0..3 {
            sums[c] += pixel[c] as u64;
        }
    }
    Rgb([
        (sums[0] / count) as u8,
        (sums[1] / count) as u8,
        (sums[2] / count) as u8,
    ])
}

/// Rotates an image about its center by `angle_degrees`
/// (counterclockwise-positive, matching the affine warp convention),
/// keeping the source dimensions and filling dead space with `fill`.
pub fn rotate_about_center(image: &RgbImage, angle_degrees: f64, fill: Rgb<u8>) -> RgbImage {
    let (w, h) = (image.width(), image.height());
    let cx = (w / 2) as f64;
    let cy = (h / 2) as f64;
    let (sin, cos) = angle_degrees.to_radians().sin_cos();

    let mut out = RgbImage::from_pixel(w, h, fill);
    for y in 0..h {
        for x in 0..w {
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            // Inverse mapping: sample the source pixel that lands here.
            let sx = cos * dx + sin * dy + cx;
            let sy = -sin * dx + cos * dy + cy;
            let sx = sx.round() as i64;
            let sy = sy.round() as i64;
            if sx >= 0 && sy >= 0 && (sx as u32) < w && (sy as u32) < h {
                out.put_pixel(x, y, *image.get_pixel(sx as u32, sy as u32));
            }
        }
    }
    out
}

/// Rotates the image so a tilted pupil axis becomes level, filling dead
/// space with the average image color. Angles beyond +-45 degrees are
/// wrapped first so the face is never turned upside down.
pub fn straighten(image: &RgbImage, angle_radians: f64) -> RgbImage {
    let mut angle_degrees = angle_radians.to_degrees();
    if angle_degrees > 45.0 {
        angle_degrees -= 180.0;
    } else if angle_degrees < -45.0 {
        angle_degrees += 180.0;
    }
    let fill = average_rgb(image);
    rotate_about_center(image, angle_degrees, fill)
}
