use log::{debug, warn};
use munkres::{solve_assignment, WeightMatrix};
use serde_derive::Serialize;

use crate::config::{AssociationMetric, TrackerConfig};
use crate::detection::{Detection, ObjectClass};
use crate::error::Error;
use crate::frame::Frame;
use crate::kalman::KalmanCV;
use crate::track::{TrackStatus, TrackUpdate};
use crate::trajectory::{Trajectory, TrajectoryPoint};

/// Cost of padded cells and of pairs the metric cannot score.
const UNASSIGNABLE: f32 = 100_000.0;

/// A view over a subset of a slice that remembers the original positions.
struct IndexedSlice<'a, T> {
    slice: &'a [T],
    idxs: Vec<usize>,
}

impl<'a, T> IndexedSlice<'a, T> {
    fn new_with_indexes(slice: &'a [T], idxs: Vec<usize>) -> Self {
        Self { slice, idxs }
    }

    #[inline]
    fn get_index(&self, idx: usize) -> usize {
        self.idxs[idx]
    }

    #[inline]
    fn len(&self) -> usize {
        self.idxs.len()
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.idxs.is_empty()
    }
}

impl<'a, T> std::ops::Index<usize> for IndexedSlice<'a, T> {
    type Output = T;

    #[inline]
    fn index(&self, index: usize) -> &Self::Output {
        &self.slice[self.get_index(index)]
    }
}

/// Matching of one frame's detections against the active tracks of one
/// category (vehicles or pedestrians).
struct DetectionsMapping {
    matched: Vec<(usize, usize, f32)>,
    missed: Vec<usize>,
}

#[derive(Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TrackerStats {
    pub frames: u64,
    pub skipped_detections: u64,
    pub skipped_frames: u64,
    pub anomalies: u64,
    pub discarded_tentative: u64,
}

#[derive(Debug)]
struct ActiveTrack {
    id: u32,
    status: TrackStatus,
    filter: KalmanCV,
    hit_count: u32,
    miss_count: u32,
    class_votes: [u32; ObjectClass::COUNT],
    last_detection: Detection,
    points: Vec<TrajectoryPoint>,
}

impl ActiveTrack {
    fn new(id: u32, ts: f32, det: &Detection, config: &TrackerConfig) -> Self {
        let mut filter = KalmanCV::new(config.process_noise, config.measurement_noise);
        filter.initiate(det.x, det.y);

        let mut class_votes = [0; ObjectClass::COUNT];
        class_votes[det.class.index()] += 1;

        Self {
            id,
            status: TrackStatus::Tentative,
            filter,
            hit_count: 1,
            miss_count: 0,
            class_votes,
            last_detection: *det,
            points: vec![TrajectoryPoint {
                timestamp: ts,
                x: det.x,
                y: det.y,
                class: det.class,
            }],
        }
    }

    fn class(&self) -> ObjectClass {
        let mut best = 0;
        for (idx, votes) in self.class_votes.iter().enumerate() {
            if *votes > self.class_votes[best] {
                best = idx;
            }
        }

        ObjectClass::ALL[best]
    }

    #[inline]
    fn is_active(&self) -> bool {
        matches!(self.status, TrackStatus::Confirmed | TrackStatus::Lost)
    }

    fn cost(&self, det: &Detection, metric: AssociationMetric) -> f32 {
        let pos = self.filter.position();

        let cost = match metric {
            AssociationMetric::Distance => ((pos.x - det.x).powi(2) + (pos.y - det.y).powi(2)).sqrt(),
            AssociationMetric::Iou if !det.has_box() || !self.last_detection.has_box() => UNASSIGNABLE,
            AssociationMetric::Iou => {
                let predicted = Detection {
                    x: pos.x,
                    y: pos.y,
                    ..self.last_detection
                };

                1.0 - predicted.iou(det)
            }
        };

        if cost.is_finite() {
            cost.clamp(0.0, UNASSIGNABLE)
        } else {
            UNASSIGNABLE
        }
    }

    fn hit(&mut self, ts: f32, det: &Detection, config: &TrackerConfig, stats: &mut TrackerStats) {
        if let Err(reason) = self.filter.update(det.x, det.y) {
            let anomaly = Error::TrackingAnomaly {
                track_id: self.id,
                reason,
            };
            warn!("{}; reinitializing", anomaly);

            stats.anomalies += 1;
            self.filter.initiate(det.x, det.y);
        }

        self.hit_count += 1;
        self.miss_count = 0;
        self.class_votes[det.class.index()] += 1;
        self.last_detection = *det;

        let pos = self.filter.position();
        self.points.push(TrajectoryPoint {
            timestamp: ts,
            x: pos.x,
            y: pos.y,
            class: det.class,
        });

        match self.status {
            TrackStatus::Tentative if self.hit_count >= config.confirm_hits => {
                debug!("track {} confirmed", self.id);
                self.status = TrackStatus::Confirmed;
            }
            TrackStatus::Lost => {
                debug!("track {} recovered", self.id);
                self.status = TrackStatus::Confirmed;
            }
            _ => (),
        }
    }

    fn miss(&mut self, config: &TrackerConfig) {
        self.miss_count += 1;

        self.status = match self.status {
            TrackStatus::Tentative if self.miss_count >= config.tentative_max_misses => {
                TrackStatus::Deleted
            }
            TrackStatus::Confirmed if self.miss_count >= config.max_misses => TrackStatus::Deleted,
            TrackStatus::Confirmed => TrackStatus::Lost,
            TrackStatus::Lost if self.miss_count >= config.max_misses => TrackStatus::Deleted,
            status => status,
        };
    }

    fn snapshot(&self) -> TrackUpdate {
        let pos = self.filter.position();
        let vel = self.filter.velocity();

        TrackUpdate {
            track_id: self.id,
            status: self.status,
            class: self.class(),
            hit_count: self.hit_count,
            miss_count: self.miss_count,
            position: (pos.x, pos.y),
            velocity: (vel.x, vel.y),
        }
    }

    fn into_trajectory(self) -> Trajectory {
        let class = self.class();
        Trajectory::new(self.id, class, self.points)
    }
}

/// Per-dataset multi-object tracker.
///
/// Frames must arrive in time order; every frame predicts all tracks
/// forward, matches detections with the Hungarian algorithm (vehicles and
/// pedestrians separately, established tracks before tentative ones) and
/// updates the track lifecycle.
pub struct Tracker {
    config: TrackerConfig,
    tracks: Vec<ActiveTrack>,
    peds: Vec<ActiveTrack>,
    finished: Vec<Trajectory>,
    next_id: u32,
    last_timestamp: Option<f32>,
    stats: TrackerStats,
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::with_capacity(64),
            peds: Vec::with_capacity(32),
            finished: Vec::new(),
            next_id: 1,
            last_timestamp: None,
            stats: TrackerStats::default(),
        }
    }

    #[inline]
    pub fn stats(&self) -> TrackerStats {
        self.stats
    }

    pub fn active_count(&self) -> usize {
        self.tracks.len() + self.peds.len()
    }

    fn assignment(
        &self,
        dets: IndexedSlice<'_, Detection>,
        objs: IndexedSlice<'_, ActiveTrack>,
    ) -> DetectionsMapping {
        let gate = self.config.gate;
        let mut missed: Vec<_> = (0..dets.len()).collect();

        let mut matched = if !objs.is_empty() && !dets.is_empty() {
            let n = dets.len().max(objs.len());

            let mut costs = vec![UNASSIGNABLE; n * n];
            for r in 0..objs.len() {
                for c in 0..dets.len() {
                    costs[r * n + c] = objs[r].cost(&dets[c], self.config.metric);
                }
            }

            let mut mat = WeightMatrix::from_fn(n, |(r, c)| costs[r * n + c]);

            match solve_assignment(&mut mat) {
                Ok(inner) => {
                    let mut assignments = Vec::new();

                    for i in inner {
                        if i.row < objs.len() && i.column < dets.len() {
                            let cost = costs[i.row * n + i.column];

                            if cost <= gate {
                                assignments.push((i.row, i.column, cost));
                            }
                        }
                    }

                    missed.retain(|&x| !assignments.iter().any(|&(_, p, _)| p == x));
                    assignments
                }
                Err(err) => {
                    warn!("assignment could not be solved: {:?}", err);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        missed.iter_mut().for_each(|x| *x = dets.get_index(*x));
        matched.iter_mut().for_each(|(x, y, _)| {
            *x = objs.get_index(*x);
            *y = dets.get_index(*y);
        });

        DetectionsMapping { matched, missed }
    }

    /// Confirmed, then lost, then tentative tracks get the first pick.
    fn map_detections(&self, tracks: &[ActiveTrack], dets: &[Detection], idx: Vec<usize>) -> DetectionsMapping {
        let mut stages: [Vec<usize>; 3] = Default::default();
        for (i, t) in tracks.iter().enumerate() {
            let stage = match t.status {
                TrackStatus::Confirmed => 0,
                TrackStatus::Lost => 1,
                _ => 2,
            };
            stages[stage].push(i);
        }

        let mut remaining = idx;
        let mut matched = Vec::new();

        for stage in stages {
            if remaining.is_empty() {
                break;
            }

            let mapping = self.assignment(
                IndexedSlice::new_with_indexes(dets, remaining),
                IndexedSlice::new_with_indexes(tracks, stage),
            );

            matched.extend(mapping.matched);
            remaining = mapping.missed;
        }

        DetectionsMapping {
            matched,
            missed: remaining,
        }
    }

    fn apply(
        &mut self,
        pedestrians: bool,
        ts: f32,
        dets: &[Detection],
        mapping: DetectionsMapping,
    ) -> Vec<TrackUpdate> {
        let config = &self.config;
        let stats = &mut self.stats;
        let tracks = if pedestrians {
            &mut self.peds
        } else {
            &mut self.tracks
        };

        let mut hit = vec![false; tracks.len()];
        for (i, j, _) in mapping.matched {
            tracks[i].hit(ts, &dets[j], config, stats);
            hit[i] = true;
        }

        for (t, _) in tracks.iter_mut().zip(hit).filter(|(_, h)| !*h) {
            t.miss(config);
        }

        let mut updates: Vec<TrackUpdate> = tracks.iter().map(ActiveTrack::snapshot).collect();

        let mut idx = 0;
        while idx < tracks.len() {
            if tracks[idx].status != TrackStatus::Deleted {
                idx += 1;
                continue;
            }

            let track = tracks.remove(idx);
            if track.hit_count >= config.confirm_hits {
                debug!("track {} ended with {} points", track.id, track.points.len());
                self.finished.push(track.into_trajectory());
            } else {
                stats.discarded_tentative += 1;
            }
        }

        for &j in &mapping.missed {
            let track = ActiveTrack::new(self.next_id, ts, &dets[j], config);
            self.next_id += 1;

            updates.push(track.snapshot());
            tracks.push(track);
        }

        updates
    }

    /// Advances the tracker by one frame.
    ///
    /// Malformed detections are skipped; a frame whose timestamp does not
    /// advance is rejected as a whole and leaves the tracker untouched.
    pub fn step(&mut self, frame: &Frame) -> Result<Vec<TrackUpdate>, Error> {
        let ts = frame.timestamp;

        if !ts.is_finite() || self.last_timestamp.map_or(false, |last| ts <= last) {
            self.stats.skipped_frames += 1;

            return Err(Error::Ingest {
                frame_id: frame.frame_id,
                reason: format!("timestamp {} does not advance", ts),
            });
        }

        if let Some(last) = self.last_timestamp {
            let dt = ts - last;
            for t in self.tracks.iter_mut().chain(self.peds.iter_mut()) {
                t.filter.predict(dt);
            }
        }

        self.last_timestamp = Some(ts);
        self.stats.frames += 1;

        let mut dets = Vec::with_capacity(frame.len());
        for det in frame.iter() {
            match det.check(frame.frame_id) {
                Ok(()) if det.confidence >= self.config.min_confidence => dets.push(*det),
                Ok(()) => (),
                Err(err) => {
                    warn!("{}; detection skipped", err);
                    self.stats.skipped_detections += 1;
                }
            }
        }

        let (peds, vehicles): (Vec<usize>, Vec<usize>) =
            (0..dets.len()).partition(|&i| dets[i].class.is_pedestrian());

        let veh_mapping = self.map_detections(&self.tracks, &dets, vehicles);
        let ped_mapping = self.map_detections(&self.peds, &dets, peds);

        let mut updates = self.apply(false, ts, &dets, veh_mapping);
        updates.extend(self.apply(true, ts, &dets, ped_mapping));

        Ok(updates)
    }

    /// Trajectories of tracks that ended since the last call.
    pub fn drain_finished(&mut self) -> Vec<Trajectory> {
        std::mem::take(&mut self.finished)
    }

    /// Ends all tracks. Established ones become trajectories, tentative
    /// ones are discarded.
    pub fn finalize(&mut self) -> Vec<Trajectory> {
        let mut out = self.drain_finished();

        for track in self.tracks.drain(..).chain(self.peds.drain(..)) {
            if track.is_active() {
                out.push(track.into_trajectory());
            } else {
                self.stats.discarded_tentative += 1;
            }
        }

        out.sort_by_key(|t| t.id);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn car(x: f32, y: f32) -> Detection {
        Detection::new(x, y, ObjectClass::Car, 0.9)
    }

    fn frame(id: u64, dets: Vec<Detection>) -> Frame {
        Frame::new(id, id as f32 * 0.1, dets)
    }

    #[test]
    fn confirms_after_three_hits() {
        let mut tracker = Tracker::new(TrackerConfig::default());

        for i in 0..2 {
            let updates = tracker.step(&frame(i, vec![car(0.0, i as f32)])).unwrap();
            assert_eq!(updates.len(), 1);
            assert_eq!(updates[0].status, TrackStatus::Tentative);
        }

        let updates = tracker.step(&frame(2, vec![car(0.0, 2.0)])).unwrap();
        assert_eq!(updates[0].status, TrackStatus::Confirmed);
        assert_eq!(updates[0].hit_count, 3);
    }

    #[test]
    fn keeps_identity_of_two_parallel_objects() {
        let mut tracker = Tracker::new(TrackerConfig::default());

        for i in 0..20u64 {
            let y = i as f32;
            tracker
                .step(&frame(i, vec![car(20.0, y), car(0.0, y)]))
                .unwrap();
        }

        let trajectories = tracker.finalize();
        assert_eq!(trajectories.len(), 2);
        for t in &trajectories {
            assert_eq!(t.len(), 20);
            let x0 = t.points[0].x;
            assert!(t.points.iter().all(|p| (p.x - x0).abs() < 0.5));
        }
    }

    #[test]
    fn lost_track_recovers_after_short_gap() {
        let mut tracker = Tracker::new(TrackerConfig::default());

        for i in 0..5u64 {
            tracker.step(&frame(i, vec![car(0.0, i as f32)])).unwrap();
        }

        let updates = tracker.step(&frame(5, vec![])).unwrap();
        assert_eq!(updates[0].status, TrackStatus::Lost);

        let updates = tracker.step(&frame(6, vec![car(0.0, 6.0)])).unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].status, TrackStatus::Confirmed);

        let trajectories = tracker.finalize();
        assert_eq!(trajectories.len(), 1);
        assert_eq!(trajectories[0].len(), 6);
    }

    #[test]
    fn lost_track_is_emitted_after_max_misses() {
        let config = TrackerConfig {
            max_misses: 3,
            ..TrackerConfig::default()
        };
        let mut tracker = Tracker::new(config);

        for i in 0..5u64 {
            tracker.step(&frame(i, vec![car(0.0, i as f32)])).unwrap();
        }
        for i in 5..8u64 {
            tracker.step(&frame(i, vec![])).unwrap();
        }

        assert_eq!(tracker.active_count(), 0);
        let finished = tracker.drain_finished();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].id, 1);
    }

    #[test]
    fn tentative_tracks_are_discarded() {
        let mut tracker = Tracker::new(TrackerConfig::default());

        tracker.step(&frame(0, vec![car(0.0, 0.0)])).unwrap();
        tracker.step(&frame(1, vec![])).unwrap();
        tracker.step(&frame(2, vec![])).unwrap();

        assert!(tracker.finalize().is_empty());
        assert_eq!(tracker.stats().discarded_tentative, 1);
    }

    #[test]
    fn pedestrians_never_match_vehicles() {
        let mut tracker = Tracker::new(TrackerConfig::default());

        for i in 0..4u64 {
            let det = if i % 2 == 0 {
                car(0.0, 0.0)
            } else {
                Detection::new(0.0, 0.0, ObjectClass::Pedestrian, 0.9)
            };
            tracker.step(&frame(i, vec![det])).unwrap();
        }

        assert!(tracker.finalize().is_empty());
    }

    #[test]
    fn rejects_non_advancing_frames_and_bad_detections() {
        let mut tracker = Tracker::new(TrackerConfig::default());

        tracker.step(&frame(1, vec![car(0.0, 0.0)])).unwrap();
        assert!(matches!(
            tracker.step(&frame(1, vec![car(0.0, 0.0)])),
            Err(Error::Ingest { frame_id: 1, .. })
        ));

        let bad = Detection::new(f32::NAN, 0.0, ObjectClass::Car, 0.9);
        let updates = tracker.step(&frame(2, vec![bad, car(0.0, 0.2)])).unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(tracker.stats().skipped_detections, 1);
        assert_eq!(tracker.stats().skipped_frames, 1);
    }

    #[test]
    fn identical_input_gives_identical_tracks() {
        let run = || {
            let mut tracker = Tracker::new(TrackerConfig::default());
            for i in 0..30u64 {
                let y = i as f32 * 0.8;
                tracker
                    .step(&frame(i, vec![car(5.0, y), car(6.0, 30.0 - y), car(40.0, 3.0)]))
                    .unwrap();
            }
            tracker.finalize()
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn iou_metric_needs_boxes() {
        let config = TrackerConfig {
            metric: AssociationMetric::Iou,
            gate: 0.8,
            ..TrackerConfig::default()
        };

        let mut boxed = Tracker::new(config.clone());
        let mut bare = Tracker::new(config);
        for i in 0..10u64 {
            let det = car(0.0, i as f32 * 0.5);
            boxed.step(&frame(i, vec![det.with_size(4.0, 2.0)])).unwrap();
            bare.step(&frame(i, vec![det])).unwrap();
        }

        assert_eq!(boxed.finalize().len(), 1);
        assert!(bare.finalize().is_empty());
    }

    #[test]
    fn non_finite_state_is_never_assigned() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        for i in 0..4u64 {
            tracker.step(&frame(i, vec![car(0.0, i as f32)])).unwrap();
        }

        tracker.tracks[0].filter.mean[0] = f32::NAN;
        let det = car(0.0, 4.0);
        assert_eq!(tracker.tracks[0].cost(&det, AssociationMetric::Distance), UNASSIGNABLE);

        let updates = tracker.step(&frame(4, vec![det])).unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!((updates[0].track_id, updates[0].status), (1, TrackStatus::Lost));
        assert_eq!((updates[1].track_id, updates[1].status), (2, TrackStatus::Tentative));
        assert_eq!(tracker.stats().anomalies, 0);
    }

    #[test]
    fn failed_update_reinitializes_track() {
        use crate::pipeline::{DiagnosticKind, Diagnostics};

        let mut tracker = Tracker::new(TrackerConfig::default());
        for i in 0..4u64 {
            tracker.step(&frame(i, vec![car(0.0, i as f32)])).unwrap();
        }

        // position stays finite, the innovation covariance does not
        let cov = &mut tracker.tracks[0].filter.covariance;
        cov[(0, 1)] = f32::NAN;
        cov[(1, 0)] = f32::NAN;

        let updates = tracker.step(&frame(4, vec![car(0.0, 4.0)])).unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].track_id, 1);
        assert_eq!(updates[0].status, TrackStatus::Confirmed);
        assert_eq!(updates[0].position, (0.0, 4.0));
        assert_eq!(updates[0].velocity, (0.0, 0.0));
        assert!(tracker.tracks[0].filter.is_finite());

        let stats = tracker.stats();
        assert_eq!(stats.anomalies, 1);
        let diagnostics = Diagnostics::default().with_tracker(&stats);
        assert_eq!(diagnostics.count(DiagnosticKind::TrackingAnomaly), 1);

        tracker.step(&frame(5, vec![car(0.0, 5.0)])).unwrap();
        let trajectories = tracker.finalize();
        assert_eq!(trajectories.len(), 1);
        assert_eq!(trajectories[0].len(), 6);
    }

    #[test]
    fn class_is_majority_vote() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        let classes = [ObjectClass::Car, ObjectClass::Truck, ObjectClass::Truck, ObjectClass::Truck];

        for (i, class) in classes.iter().enumerate() {
            let det = Detection::new(0.0, i as f32, *class, 0.9);
            tracker.step(&frame(i as u64, vec![det])).unwrap();
        }

        let trajectories = tracker.finalize();
        assert_eq!(trajectories[0].class, ObjectClass::Truck);
    }
}
