use log::{debug, info, warn};
use rayon::prelude::*;
use serde_derive::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::access::{AccessPair, AccessResolver};
use crate::aggregator::IntervalAggregator;
use crate::classifier::MovementClassifier;
use crate::config::DatasetConfig;
use crate::conflict::{ConflictDetector, ConflictEvent};
use crate::detection::ObjectClass;
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::movement::{Cardinal, MovementCode};
use crate::storage::{MemoryStorage, Storage, TrajectoryRecord};
use crate::tracker::{Tracker, TrackerStats};
use crate::trajectory::Trajectory;
use crate::validator::{Validator, Verdict};

/// Shared flag a caller flips to stop a running job between frames.
#[derive(Debug, Default, Clone)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticKind {
    Ingest,
    TrackingAnomaly,
    UnresolvedAccess,
    AmbiguousAccess,
    InvalidTrajectory,
    ValidationFlag,
}

impl DiagnosticKind {
    /// Kind of a non-fatal error, `None` for fatal ones.
    pub fn of(err: &Error) -> Option<Self> {
        Some(match err {
            Error::Ingest { .. } => DiagnosticKind::Ingest,
            Error::TrackingAnomaly { .. } => DiagnosticKind::TrackingAnomaly,
            Error::UnresolvedAccess { .. } => DiagnosticKind::UnresolvedAccess,
            Error::AmbiguousAccess { .. } => DiagnosticKind::AmbiguousAccess,
            Error::InvalidTrajectory { .. } => DiagnosticKind::InvalidTrajectory,
            Error::ValidationFlag { .. } => DiagnosticKind::ValidationFlag,
            _ => return None,
        })
    }
}

/// Trajectory outcome counters of a job.
#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct Diagnostics {
    /// Counted trajectories
    pub valid: u64,
    /// Counted after an automatic code correction
    pub corrected: u64,
    /// Excluded for a reason other than a missing access
    pub invalid: u64,
    /// Excluded because an end matched no access
    pub incomplete: u64,
    pub by_kind: BTreeMap<DiagnosticKind, u64>,
}

impl Diagnostics {
    fn bump(&mut self, kind: DiagnosticKind, n: u64) {
        if n > 0 {
            *self.by_kind.entry(kind).or_insert(0) += n;
        }
    }

    fn exclude(&mut self, err: &Error) {
        let kind = match DiagnosticKind::of(err) {
            Some(kind) => kind,
            None => return,
        };

        if kind == DiagnosticKind::UnresolvedAccess {
            self.incomplete += 1;
        } else {
            self.invalid += 1;
        }

        self.bump(kind, 1);
    }

    /// Adds the tracker's skipped input as `Ingest` and its filter
    /// reinitializations as `TrackingAnomaly`.
    pub fn with_tracker(mut self, stats: &TrackerStats) -> Self {
        self.bump(
            DiagnosticKind::Ingest,
            stats.skipped_detections + stats.skipped_frames,
        );
        self.bump(DiagnosticKind::TrackingAnomaly, stats.anomalies);
        self
    }

    #[inline]
    pub fn count(&self, kind: DiagnosticKind) -> u64 {
        self.by_kind.get(&kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.valid + self.invalid + self.incomplete
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Completed,
    Cancelled,
}

/// A trajectory held back for manual review.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ReviewItem {
    pub track_id: u32,
    pub class: ObjectClass,
    pub origin: Cardinal,
    pub destination: Cardinal,
    pub proposed: MovementCode,
    pub turn_angle_deg: f32,
    pub rule: &'static str,
}

#[derive(Serialize, Debug, Clone)]
pub struct JobReport {
    pub status: JobStatus,
    pub diagnostics: Diagnostics,
    pub tracker: TrackerStats,
    pub records: Vec<TrajectoryRecord>,
    pub flagged: Vec<ReviewItem>,
    pub conflicts: Vec<ConflictEvent>,
}

enum Outcome {
    Counted {
        pair: AccessPair,
        verdict: Verdict,
    },
    Flagged {
        pair: AccessPair,
        proposed: MovementCode,
        turn_angle_deg: f32,
        rule: &'static str,
    },
    Excluded {
        pair: Option<AccessPair>,
        error: Error,
    },
}

/// Processing state of one dataset. Nothing is shared between jobs, so
/// independent datasets may run on different threads.
pub struct DatasetJob {
    tracker: Tracker,
    resolver: AccessResolver,
    classifier: MovementClassifier,
    validator: Validator,
    aggregator: IntervalAggregator,
    detector: ConflictDetector,
    meters_per_unit: f32,

    trajectories: Vec<Trajectory>,
    records: Vec<TrajectoryRecord>,
    flagged: Vec<ReviewItem>,
    diagnostics: Diagnostics,
}

impl DatasetJob {
    pub fn new(config: &DatasetConfig) -> Result<Self> {
        config.validate()?;
        let analysis = &config.analysis;

        Ok(Self {
            tracker: Tracker::new(analysis.tracker.clone()),
            resolver: AccessResolver::new(config.access_points.clone(), analysis.access_tolerance),
            classifier: MovementClassifier::new(analysis.classifier()),
            validator: Validator::new(analysis.turns),
            aggregator: IntervalAggregator::new(analysis.interval_seconds()),
            detector: ConflictDetector::new(analysis.conflict()),
            meters_per_unit: analysis.meters_per_unit,
            trajectories: Vec::new(),
            records: Vec::new(),
            flagged: Vec::new(),
            diagnostics: Diagnostics::default(),
        })
    }

    /// Live counts; stay valid after a cancelled run.
    #[inline]
    pub fn aggregator(&self) -> &IntervalAggregator {
        &self.aggregator
    }

    /// Outcome counters including the tracker's ingest and anomaly counts.
    pub fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.clone().with_tracker(&self.tracker.stats())
    }

    fn evaluate(&self, trajectory: &Trajectory) -> Outcome {
        let pair = match self.resolver.resolve(trajectory) {
            Ok(pair) => pair,
            Err(error) => return Outcome::Excluded { pair: None, error },
        };

        let classification = match self.classifier.classify(trajectory, pair.origin, pair.destination) {
            Ok(c) => c,
            Err(error) => {
                return Outcome::Excluded {
                    pair: Some(pair),
                    error,
                }
            }
        };

        match self.validator.validate(trajectory, pair, classification.code.label()) {
            Verdict::Flagged { rule } => Outcome::Flagged {
                pair,
                proposed: classification.code,
                turn_angle_deg: classification.turn_angle_deg,
                rule,
            },
            verdict => Outcome::Counted { pair, verdict },
        }
    }

    fn commit(&mut self, trajectory: Trajectory, outcome: Outcome) {
        let id = trajectory.id;
        let mut record = TrajectoryRecord {
            track_id: id,
            class: trajectory.class,
            origin_cardinal: None,
            destination_cardinal: None,
            movement_code: None,
            exit_timestamp: trajectory.exit_timestamp(),
            speed_median: trajectory.speed_median().map(|v| v * self.meters_per_unit),
        };

        let pair = match outcome {
            Outcome::Counted { pair, verdict } => {
                if let Some(code) = verdict.code() {
                    if let Verdict::Corrected { from, rules, .. } = &verdict {
                        debug!("trajectory {}: {} corrected to {} by {:?}", id, from, code, rules);
                        self.diagnostics.corrected += 1;
                    }

                    if self.aggregator.record(&trajectory, code) {
                        self.diagnostics.valid += 1;
                        record.movement_code = Some(code);
                    }
                }

                Some(pair)
            }
            Outcome::Flagged {
                pair,
                proposed,
                turn_angle_deg,
                rule,
            } => {
                let error = Error::ValidationFlag { track_id: id, rule };
                warn!("{}; held for review", error);
                self.diagnostics.exclude(&error);

                self.flagged.push(ReviewItem {
                    track_id: id,
                    class: trajectory.class,
                    origin: pair.origin,
                    destination: pair.destination,
                    proposed,
                    turn_angle_deg,
                    rule,
                });

                Some(pair)
            }
            Outcome::Excluded { pair, error } => {
                debug!("{}; excluded from counts", error);
                self.diagnostics.exclude(&error);
                pair
            }
        };

        record.origin_cardinal = pair.map(|p| p.origin);
        record.destination_cardinal = pair.map(|p| p.destination);

        self.records.push(record);
        self.trajectories.push(trajectory);
    }

    /// Feeds one frame and processes the trajectories it ended.
    pub fn push_frame(&mut self, frame: &Frame) {
        if let Err(err) = self.tracker.step(frame) {
            warn!("{}; frame skipped", err);
        }

        for trajectory in self.tracker.drain_finished() {
            let outcome = self.evaluate(&trajectory);
            self.commit(trajectory, outcome);
        }
    }

    /// Ends the remaining tracks. Classification runs in parallel, counting
    /// stays single-writer.
    fn finish(&mut self) {
        let rest = self.tracker.finalize();
        let this = &*self;
        let outcomes: Vec<Outcome> = rest.par_iter().map(|t| this.evaluate(t)).collect();

        for (trajectory, outcome) in rest.into_iter().zip(outcomes) {
            self.commit(trajectory, outcome);
        }
    }

    /// Processes a dataset frame by frame and hands the results to
    /// `storage`. Only storage failures abort the job.
    pub fn run<I>(
        &mut self,
        frames: I,
        cancel: &CancellationToken,
        storage: &mut dyn Storage,
    ) -> Result<JobReport>
    where
        I: IntoIterator<Item = Frame>,
    {
        info!("dataset job started");

        let mut status = JobStatus::Completed;
        for frame in frames {
            if cancel.is_cancelled() {
                status = JobStatus::Cancelled;
                break;
            }

            self.push_frame(&frame);
        }

        let conflicts = if status == JobStatus::Completed {
            self.finish();
            self.detector.detect(&self.trajectories)
        } else {
            info!("dataset job cancelled, keeping {} counted trajectories", self.diagnostics.valid);
            Vec::new()
        };

        storage.store_trajectories(&self.records)?;
        storage.store_buckets(&self.aggregator.rows())?;
        storage.store_conflicts(&conflicts)?;

        let diagnostics = self.diagnostics();
        info!(
            "dataset job {:?}: {} valid, {} invalid, {} incomplete, {} conflicts",
            status,
            diagnostics.valid,
            diagnostics.invalid,
            diagnostics.incomplete,
            conflicts.len()
        );

        Ok(JobReport {
            status,
            diagnostics,
            tracker: self.tracker.stats(),
            records: self.records.clone(),
            flagged: self.flagged.clone(),
            conflicts,
        })
    }
}

/// Runs independent datasets concurrently, each with its own job and
/// in-memory storage.
pub fn run_parallel(
    datasets: Vec<(DatasetConfig, Vec<Frame>)>,
    cancel: &CancellationToken,
) -> Vec<Result<(JobReport, MemoryStorage)>> {
    datasets
        .into_par_iter()
        .map(|(config, frames)| {
            let mut job = DatasetJob::new(&config)?;
            let mut storage = MemoryStorage::new();
            let report = job.run(frames, cancel, &mut storage)?;

            Ok((report, storage))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_shared_between_clones() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(!token.is_cancelled());

        other.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn exclusions_split_into_invalid_and_incomplete() {
        use crate::error::End;

        let mut d = Diagnostics::default();
        d.exclude(&Error::UnresolvedAccess {
            track_id: 1,
            end: End::Exit,
        });
        d.exclude(&Error::AmbiguousAccess {
            track_id: 2,
            end: End::Entry,
            candidates: 2,
        });
        d.exclude(&Error::ValidationFlag {
            track_id: 3,
            rule: "code-range",
        });
        d.exclude(&Error::Storage("ignored".into()));

        assert_eq!(d.incomplete, 1);
        assert_eq!(d.invalid, 2);
        assert_eq!(d.count(DiagnosticKind::AmbiguousAccess), 1);
        assert_eq!(d.count(DiagnosticKind::Ingest), 0);
    }
}
