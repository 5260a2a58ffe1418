//! Temporal smoothing for ingestion. Fixed-capacity sliding windows
//! average landmark positions across recent frames, with coordinates
//! truncated back to integer pixels.

use std::collections::VecDeque;

use crate::types::Point;

/// Component-wise mean of aligned point lists, truncated to integers.
/// Lists shorter than the first are ignored beyond their length; in
/// practice every entry has the same length.
pub fn mean_points(window: &[Vec<Point>]) -> Vec<Point> {
    let Some(first) = window.first() else {
        return Vec::new();
    };
    let count = window.len() as f64;
    (0..first.len())
        .map(|i| {
            let mut sx = 0.0;
            let mut sy = 0.0;
            for frame in window {
                sx += frame[i].x as f64;
                sy += frame[i].y as f64;
            }
            Point::new((sx / count) as i32, (sy / count) as i32)
        })
        .collect()
}

/// A bounded history of point lists with a rolling mean.
#[derive(Debug, Clone)]
pub struct PointWindow {
    capacity: usize,
    frames: VecDeque<Vec<Point>>,
}

impl PointWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            frames: VecDeque::new(),
        }
    }

    pub fn push(&mut self, points: Vec<Point>) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(points);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Mean over the window, or `None` while empty.
    pub fn mean(&self) -> Option<Vec<Point>> {
        if self.frames.is_empty() {
            return None;
        }
        let window: Vec<Vec<Point>> = self.frames.iter().cloned().collect();
        Some(mean_points(&window))
    }

    /// The smoothed value only once more than one frame contributes,
    /// mirroring how ingestion leaves the first frame untouched.
    pub fn smoothed(&self) -> Option<Vec<Point>> {
        if self.frames.len() > 1 {
            self.mean()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pts(src: &[(i32, i32)]) -> Vec<Point> {
        src.iter().map(|&p| Point::from(p)).collect()
    }

    #[test]
    fn mean_truncates_toward_zero() {
        let window = vec![pts(&[(0, 0), (10, 3)]), pts(&[(1, 1), (12, 4)])];
        let mean = mean_points(&window);
        // (0+1)/2 = 0.5 -> 0, (3+4)/2 = 3.5 -> 3.
        assert_eq!(mean, pts(&[(0, 0), (11, 3)]));
    }

    #[test]
    fn window_evicts_oldest() {
        let mut window = PointWindow::new(2);
        window.push(pts(&[(0, 0)]));
        window.push(pts(&[(10, 10)]));
        window.push(pts(&[(20, 20)]));
        assert_eq!(window.len(), 2);
        // Only (10,10) and (20,20) remain.
        assert_eq!(window.mean().unwrap(), pts(&[(15, 15)]));
    }

    #[test]
    fn single_frame_is_not_smoothed() {
        let mut window = PointWindow::new(4);
        window.push(pts(&[(7, 7)]));
        assert!(window.smoothed().is_none());
        assert_eq!(window.mean().unwrap(), pts(&[(7, 7)]));
        window.push(pts(&[(9, 9)]));
        assert_eq!(window.smoothed().unwrap(), pts(&[(8, 8)]));
    }

    #[test]
    fn zero_capacity_clamps_to_one() {
        let mut window = PointWindow::new(0);
        window.push(pts(&[(1, 2)]));
        window.push(pts(&[(3, 4)]));
        assert_eq!(window.len(), 1);
        assert_eq!(window.mean().unwrap(), pts(&[(3, 4)]));
    }
}
