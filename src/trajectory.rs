use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

use crate::detection::ObjectClass;
use crate::math::{self, Point};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct TrajectoryPoint {
    pub timestamp: f32,
    pub x: f32,
    pub y: f32,
    pub class: ObjectClass,
}

impl TrajectoryPoint {
    #[inline]
    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// Finalized path of a confirmed track, ordered by timestamp.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Trajectory {
    pub id: u32,
    pub class: ObjectClass,
    pub points: Vec<TrajectoryPoint>,
}

impl Trajectory {
    pub fn new(id: u32, class: ObjectClass, points: Vec<TrajectoryPoint>) -> Self {
        Self { id, class, points }
    }

    /// Builds a trajectory of a single class from `(t, x, y)` samples.
    pub fn from_samples(id: u32, class: ObjectClass, samples: &[(f32, f32, f32)]) -> Self {
        let points = samples
            .iter()
            .map(|&(timestamp, x, y)| TrajectoryPoint {
                timestamp,
                x,
                y,
                class,
            })
            .collect();

        Self { id, class, points }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<Point> {
        self.points.first().map(TrajectoryPoint::point)
    }

    pub fn last(&self) -> Option<Point> {
        self.points.last().map(TrajectoryPoint::point)
    }

    pub fn start_time(&self) -> f32 {
        self.points.first().map(|p| p.timestamp).unwrap_or(0.0)
    }

    /// Timestamp of the last observation, used for interval bucketing.
    pub fn exit_timestamp(&self) -> f32 {
        self.points.last().map(|p| p.timestamp).unwrap_or(0.0)
    }

    #[inline]
    pub fn time_range(&self) -> (f32, f32) {
        (self.start_time(), self.exit_timestamp())
    }

    pub fn path_length(&self) -> f32 {
        self.points
            .windows(2)
            .map(|w| na::distance(&w[0].point(), &w[1].point()))
            .sum()
    }

    pub fn net_displacement(&self) -> f32 {
        match (self.first(), self.last()) {
            (Some(a), Some(b)) => na::distance(&a, &b),
            _ => 0.0,
        }
    }

    pub fn centroid(&self) -> Option<Point> {
        if self.points.is_empty() {
            return None;
        }

        let sum = self
            .points
            .iter()
            .fold(na::Vector2::zeros(), |acc, p| acc + p.point().coords);

        Some((sum / self.points.len() as f32).into())
    }

    /// Net turn between the first->centroid and centroid->last vectors.
    pub fn turn_angle_deg(&self) -> f32 {
        match (self.first(), self.centroid(), self.last()) {
            (Some(a), Some(c), Some(b)) => math::signed_angle_deg(c - a, b - c),
            _ => 0.0,
        }
    }

    /// Number of heading reversals sharper than 90 degrees, ignoring steps
    /// shorter than `min_step`.
    pub fn direction_changes(&self, min_step: f32) -> u32 {
        let mut prev: Option<na::Vector2<f32>> = None;
        let mut anchor = match self.first() {
            Some(p) => p,
            None => return 0,
        };
        let mut changes = 0;

        for p in self.points.iter().skip(1) {
            let step = p.point() - anchor;
            if step.norm() < min_step {
                continue;
            }

            if let Some(prev) = prev {
                if prev.dot(&step) < 0.0 {
                    changes += 1;
                }
            }

            prev = Some(step);
            anchor = p.point();
        }

        changes
    }

    /// Per-step speeds in units per second.
    pub fn speeds(&self) -> Vec<f32> {
        self.points
            .windows(2)
            .filter_map(|w| {
                let dt = w[1].timestamp - w[0].timestamp;
                if dt > 0.0 {
                    Some(na::distance(&w[0].point(), &w[1].point()) / dt)
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn speed_median(&self) -> Option<f32> {
        math::median(&self.speeds())
    }

    /// Linear interpolation of the position at `ts`, `None` outside the
    /// observed time range.
    pub fn position_at(&self, ts: f32) -> Option<Point> {
        let (start, end) = self.time_range();
        if self.points.is_empty() || ts < start || ts > end {
            return None;
        }

        let idx = self.points.partition_point(|p| p.timestamp < ts);
        if idx == 0 {
            return self.first();
        }

        let (a, b) = (&self.points[idx - 1], &self.points[idx.min(self.points.len() - 1)]);
        let dt = b.timestamp - a.timestamp;
        if dt <= 0.0 {
            return Some(b.point());
        }

        let f = (ts - a.timestamp) / dt;
        Some(Point::new(math::lerp(a.x, b.x, f), math::lerp(a.y, b.y, f)))
    }

    /// Axis-aligned bounds as `(min, max)`.
    pub fn bounds(&self) -> Option<(Point, Point)> {
        let first = self.first()?;

        Some(self.points.iter().fold((first, first), |(lo, hi), p| {
            (
                Point::new(lo.x.min(p.x), lo.y.min(p.y)),
                Point::new(hi.x.max(p.x), hi.y.max(p.y)),
            )
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn straight() -> Trajectory {
        let samples: Vec<_> = (0..=10).map(|i| (i as f32, 0.0, i as f32 * 2.0)).collect();
        Trajectory::from_samples(1, ObjectClass::Car, &samples)
    }

    #[test]
    fn straight_path_metrics() {
        let t = straight();
        assert_abs_diff_eq!(t.path_length(), 20.0, epsilon = 1e-4);
        assert_abs_diff_eq!(t.net_displacement(), 20.0, epsilon = 1e-4);
        assert_abs_diff_eq!(t.turn_angle_deg(), 0.0, epsilon = 1e-3);
        assert_eq!(t.direction_changes(0.25), 0);
        assert_abs_diff_eq!(t.speed_median().unwrap(), 2.0, epsilon = 1e-4);
    }

    #[test]
    fn interpolates_between_samples() {
        let t = straight();
        let p = t.position_at(2.5).unwrap();
        assert_abs_diff_eq!(p.y, 5.0, epsilon = 1e-4);
        assert!(t.position_at(-1.0).is_none());
        assert!(t.position_at(10.5).is_none());
        assert_abs_diff_eq!(t.position_at(10.0).unwrap().y, 20.0, epsilon = 1e-4);
    }

    #[test]
    fn zigzag_counts_reversals() {
        let samples = [
            (0.0, 0.0, 0.0),
            (1.0, 0.0, 5.0),
            (2.0, 0.0, 0.0),
            (3.0, 0.0, 5.0),
            (4.0, 0.0, 0.0),
        ];
        let t = Trajectory::from_samples(2, ObjectClass::Car, &samples);
        assert_eq!(t.direction_changes(0.25), 3);
        assert_abs_diff_eq!(t.net_displacement(), 0.0);
    }

    #[test]
    fn bounds_cover_all_points() {
        let t = straight();
        let (lo, hi) = t.bounds().unwrap();
        assert_eq!((lo.x, lo.y), (0.0, 0.0));
        assert_eq!((hi.x, hi.y), (0.0, 20.0));
    }
}
