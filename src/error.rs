use thiserror::Error;

use crate::classifier::InvalidReason;

/// Which end of a trajectory an access lookup was made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum End {
    Entry,
    Exit,
}

impl std::fmt::Display for End {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            End::Entry => f.write_str("entry"),
            End::Exit => f.write_str("exit"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Ingest Error at frame {frame_id}: {reason}")]
    Ingest { frame_id: u64, reason: String },

    #[error("Tracking Anomaly on track {track_id}: {reason}")]
    TrackingAnomaly { track_id: u32, reason: String },

    #[error("Unresolved Access for track {track_id}: no gate near {end} point")]
    UnresolvedAccess { track_id: u32, end: End },

    #[error("Ambiguous Access for track {track_id}: {candidates} gates near {end} point")]
    AmbiguousAccess {
        track_id: u32,
        end: End,
        candidates: usize,
    },

    #[error("Invalid Trajectory {track_id}: {reason}")]
    InvalidTrajectory { track_id: u32, reason: InvalidReason },

    #[error("Validation Flag on track {track_id}: rule `{rule}`")]
    ValidationFlag { track_id: u32, rule: &'static str },

    #[error("Storage Error: {0}")]
    Storage(String),

    #[error("Config Error: {0}")]
    Config(String),

    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Io Error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Errors that end the current dataset job.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Storage(_) | Error::Config(_) | Error::Json(_) | Error::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
