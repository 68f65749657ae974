use serde_derive::{Deserialize, Serialize};

use crate::detection::Detection;

/// All detections the detector produced for one video frame.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Frame {
    pub frame_id: u64,
    pub timestamp: f32, // in seconds from the dataset start
    pub detections: Vec<Detection>,
}

impl Frame {
    pub fn new(frame_id: u64, timestamp: f32, detections: Vec<Detection>) -> Self {
        Self {
            frame_id,
            timestamp,
            detections,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.detections.len()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Detection> {
        self.detections.iter()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}
