use log::debug;
use nalgebra as na;
use rayon::prelude::*;
use serde_derive::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::config::ConflictConfig;
use crate::math::{self, Point};
use crate::trajectory::{Trajectory, TrajectoryPoint};

const EPS: f32 = 1e-6;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SeverityLevel {
    Low,
    Medium,
    High,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Severity {
    /// 0 (threshold barely reached) to 1 (contact)
    pub score: f32,
    pub level: SeverityLevel,
}

impl Severity {
    pub fn from_measures(ttc: Option<f32>, pet: f32, config: &ConflictConfig) -> Self {
        let ttc_score = ttc.map_or(0.0, |ttc| 1.0 - ttc / config.ttc_threshold_s);
        let pet_score = 1.0 - pet / config.pet_threshold_s;
        let score = ttc_score.max(pet_score).clamp(0.0, 1.0);

        let level = if score >= 0.66 {
            SeverityLevel::High
        } else if score >= 0.33 {
            SeverityLevel::Medium
        } else {
            SeverityLevel::Low
        };

        Self { score, level }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ConflictEvent {
    pub trajectory_id_1: u32,
    pub trajectory_id_2: u32,
    /// First passage through the conflict point
    pub time: f32,
    /// Conflict point, in coordinate units
    pub position: (f32, f32),
    pub ttc: Option<f32>,
    pub pet: f32,
    /// Closest approach of the two paths, in meters
    pub min_distance: f32,
    pub severity: Severity,
}

/// Closest approach of two polylines.
#[derive(Debug, Clone, Copy)]
struct Approach {
    distance: f32,
    point: Point,
    time_a: f32,
    time_b: f32,
}

fn segment_box(a: &TrajectoryPoint, b: &TrajectoryPoint) -> (f32, f32, f32, f32) {
    (a.x.min(b.x), a.y.min(b.y), a.x.max(b.x), a.y.max(b.y))
}

#[inline]
fn boxes_within(l: (f32, f32, f32, f32), r: (f32, f32, f32, f32), pad: f32) -> bool {
    l.0 - pad <= r.2 && r.0 - pad <= l.2 && l.1 - pad <= r.3 && r.1 - pad <= l.3
}

fn closest_approach(a: &Trajectory, b: &Trajectory, pad: f32) -> Option<Approach> {
    let mut best: Option<Approach> = None;

    for sa in a.points.windows(2) {
        let box_a = segment_box(&sa[0], &sa[1]);

        for sb in b.points.windows(2) {
            if !boxes_within(box_a, segment_box(&sb[0], &sb[1]), pad) {
                continue;
            }

            let (s, t, distance) =
                math::segment_closest(sa[0].point(), sa[1].point(), sb[0].point(), sb[1].point());

            if best.map_or(true, |prev| distance < prev.distance) {
                let ca = sa[0].point() + (sa[1].point() - sa[0].point()) * s;
                let cb = sb[0].point() + (sb[1].point() - sb[0].point()) * t;

                best = Some(Approach {
                    distance,
                    point: na::center(&ca, &cb),
                    time_a: math::lerp(sa[0].timestamp, sa[1].timestamp, s),
                    time_b: math::lerp(sb[0].timestamp, sb[1].timestamp, t),
                });
            }
        }
    }

    best
}

/// Pairwise proximity analysis over a finished trajectory set.
#[derive(Debug, Clone)]
pub struct ConflictDetector {
    config: ConflictConfig,
}

impl ConflictDetector {
    pub fn new(config: ConflictConfig) -> Self {
        Self { config }
    }

    #[inline]
    pub fn config(&self) -> &ConflictConfig {
        &self.config
    }

    /// Index pairs whose time ranges overlap, found with a sweep over
    /// start times.
    pub fn candidate_pairs(trajectories: &[Trajectory]) -> Vec<(usize, usize)> {
        let mut order: Vec<usize> = (0..trajectories.len())
            .filter(|&i| trajectories[i].len() >= 2)
            .collect();

        order.sort_by(|&l, &r| {
            trajectories[l]
                .start_time()
                .partial_cmp(&trajectories[r].start_time())
                .unwrap_or(Ordering::Equal)
                .then(trajectories[l].id.cmp(&trajectories[r].id))
        });

        let mut pairs = Vec::new();
        for (pos, &i) in order.iter().enumerate() {
            let end = trajectories[i].exit_timestamp();

            for &j in &order[pos + 1..] {
                if trajectories[j].start_time() > end {
                    break;
                }

                pairs.push((i, j));
            }
        }

        pairs
    }

    /// Lowest time-to-collision over the shared time grid. An instant only
    /// counts when the pair is closing and the straight-line extrapolation
    /// of their relative motion passes within `threshold` units.
    fn min_ttc(&self, a: &Trajectory, b: &Trajectory, threshold: f32) -> Option<f32> {
        let t0 = a.start_time().max(b.start_time());
        let t1 = a.exit_timestamp().min(b.exit_timestamp());
        let dt = self.config.time_step_s;

        if t1 - t0 < EPS || dt <= 0.0 {
            return None;
        }

        let n = ((t1 - t0) / dt).ceil() as usize;
        let mut grid = Vec::with_capacity(n + 1);
        for k in 0..=n {
            let t = (t0 + k as f32 * dt).min(t1);
            grid.push((t, a.position_at(t)?, b.position_at(t)?));
        }

        let mut best: Option<f32> = None;

        for k in 0..grid.len() {
            // forward difference, backward on the last sample
            let (p, q) = if k + 1 < grid.len() {
                (grid[k], grid[k + 1])
            } else {
                (grid[k - 1], grid[k])
            };

            let step = q.0 - p.0;
            if step <= EPS {
                continue;
            }

            let (_, pa, pb) = grid[k];
            let v_rel = ((q.2 - p.2) - (q.1 - p.1)) / step;
            let d = pb - pa;
            let closing = -d.dot(&v_rel);

            if closing <= EPS {
                continue;
            }

            // passing side by side is closing too, but never reaches contact
            let miss = (d.x * v_rel.y - d.y * v_rel.x).abs() / v_rel.norm();
            if miss > threshold {
                continue;
            }

            let ttc = d.norm_squared() / closing;
            if best.map_or(true, |prev| ttc < prev) {
                best = Some(ttc);
            }
        }

        best
    }

    /// Conflict between two trajectories, if their paths come close enough
    /// and either measure crosses its threshold.
    pub fn pair(&self, a: &Trajectory, b: &Trajectory) -> Option<ConflictEvent> {
        let cfg = &self.config;
        let threshold = cfg.distance_threshold / cfg.meters_per_unit;

        let ((a_lo, a_hi), (b_lo, b_hi)) = (a.bounds()?, b.bounds()?);
        if !boxes_within((a_lo.x, a_lo.y, a_hi.x, a_hi.y), (b_lo.x, b_lo.y, b_hi.x, b_hi.y), threshold)
        {
            return None;
        }

        let approach = closest_approach(a, b, threshold)?;
        if approach.distance > threshold {
            return None;
        }

        let pet = (approach.time_a - approach.time_b).abs();
        let ttc = self.min_ttc(a, b, threshold);

        let crossed = ttc.map_or(false, |ttc| ttc <= cfg.ttc_threshold_s) || pet <= cfg.pet_threshold_s;
        if !crossed {
            return None;
        }

        let time = approach.time_a.min(approach.time_b);

        let (id1, id2) = if a.id <= b.id { (a.id, b.id) } else { (b.id, a.id) };
        debug!(
            "conflict {} x {} at t={:.2}: ttc={:?} pet={:.2}",
            id1, id2, time, ttc, pet
        );

        Some(ConflictEvent {
            trajectory_id_1: id1,
            trajectory_id_2: id2,
            time,
            position: (approach.point.x, approach.point.y),
            ttc,
            pet,
            min_distance: approach.distance * cfg.meters_per_unit,
            severity: Severity::from_measures(ttc, pet, cfg),
        })
    }

    pub fn detect(&self, trajectories: &[Trajectory]) -> Vec<ConflictEvent> {
        let pairs = Self::candidate_pairs(trajectories);

        let mut events: Vec<ConflictEvent> = pairs
            .par_iter()
            .filter_map(|&(i, j)| self.pair(&trajectories[i], &trajectories[j]))
            .collect();

        events.sort_by(|l, r| {
            l.time
                .partial_cmp(&r.time)
                .unwrap_or(Ordering::Equal)
                .then(l.trajectory_id_1.cmp(&r.trajectory_id_1))
                .then(l.trajectory_id_2.cmp(&r.trajectory_id_2))
        });

        events
    }
}
