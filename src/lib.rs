//! Intersection movement counting.
//!
//! Detections are tracked into trajectories, resolved against the access
//! gates of the intersection, classified into RILSA movement codes,
//! validated and counted in fixed-width time intervals. Conflicts between
//! trajectories are scored independently of classification.

pub mod access;
pub mod aggregator;
pub mod classifier;
pub mod config;
pub mod conflict;
pub mod detection;
pub mod error;
pub mod frame;
pub mod kalman;
pub mod math;
pub mod movement;
pub mod pipeline;
pub mod storage;
pub mod track;
pub mod tracker;
pub mod trajectory;
pub mod validator;

pub use access::{AccessPair, AccessPoint, AccessResolver, Gate};
pub use aggregator::{BucketKey, BucketRow, IntervalAggregator};
pub use classifier::{Classification, InvalidReason, MovementClassifier};
pub use config::{AnalysisConfig, DatasetConfig, TrackerConfig};
pub use conflict::{ConflictDetector, ConflictEvent, Severity, SeverityLevel};
pub use detection::{Detection, ObjectClass};
pub use error::{Error, Result};
pub use frame::Frame;
pub use movement::{Cardinal, MovementCode, RilsaLabel, TurnKind};
pub use pipeline::{run_parallel, CancellationToken, DatasetJob, Diagnostics, JobReport, JobStatus};
pub use storage::{MemoryStorage, Storage, TrajectoryRecord};
pub use track::{TrackStatus, TrackUpdate};
pub use tracker::Tracker;
pub use trajectory::{Trajectory, TrajectoryPoint};
pub use validator::{Validator, Verdict};
