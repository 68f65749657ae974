use serde_derive::{Deserialize, Serialize};

use crate::detection::ObjectClass;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackStatus {
    Tentative,
    Confirmed,
    Lost,
    Deleted,
}

/// Snapshot of a track after a tracker step.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TrackUpdate {
    pub track_id: u32,
    pub status: TrackStatus,
    pub class: ObjectClass,
    pub hit_count: u32,
    pub miss_count: u32,

    // filtered position, in coordinate units
    pub position: (f32, f32),

    // in units per second
    pub velocity: (f32, f32),
}
