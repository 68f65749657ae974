use serde_derive::{Deserialize, Serialize};
use std::fmt;

use crate::error::Error;

/// Road user class as reported by the detector.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ObjectClass {
    Car,
    Bus,
    Truck,
    Motorcycle,
    Bicycle,
    Pedestrian,
}

impl ObjectClass {
    pub const COUNT: usize = 6;

    pub const ALL: [ObjectClass; Self::COUNT] = [
        ObjectClass::Car,
        ObjectClass::Bus,
        ObjectClass::Truck,
        ObjectClass::Motorcycle,
        ObjectClass::Bicycle,
        ObjectClass::Pedestrian,
    ];

    #[inline]
    pub fn is_pedestrian(&self) -> bool {
        matches!(self, ObjectClass::Pedestrian)
    }

    #[inline]
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectClass::Car => "car",
            ObjectClass::Bus => "bus",
            ObjectClass::Truck => "truck",
            ObjectClass::Motorcycle => "motorcycle",
            ObjectClass::Bicycle => "bicycle",
            ObjectClass::Pedestrian => "pedestrian",
        }
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contains (x,y) of the center and optional (width,height) of bbox
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub w: f32,
    #[serde(default)]
    pub h: f32,
    #[serde(rename = "p")]
    pub confidence: f32,
    #[serde(rename = "c")]
    pub class: ObjectClass,
}

impl Detection {
    pub fn new(x: f32, y: f32, class: ObjectClass, confidence: f32) -> Self {
        Self {
            x,
            y,
            w: 0.0,
            h: 0.0,
            confidence,
            class,
        }
    }

    pub fn with_size(mut self, w: f32, h: f32) -> Self {
        self.w = w;
        self.h = h;
        self
    }

    /// Rejects detections that would poison the filter state.
    pub fn check(&self, frame_id: u64) -> Result<(), Error> {
        let reason = if !self.x.is_finite() || !self.y.is_finite() {
            "non-finite position"
        } else if !self.w.is_finite() || !self.h.is_finite() || self.w < 0.0 || self.h < 0.0 {
            "invalid box size"
        } else if !(0.0..=1.0).contains(&self.confidence) {
            "confidence outside [0, 1]"
        } else {
            return Ok(());
        };

        Err(Error::Ingest {
            frame_id,
            reason: reason.to_string(),
        })
    }

    #[inline]
    pub fn has_box(&self) -> bool {
        self.w > 0.0 && self.h > 0.0
    }

    pub fn iou(&self, other: &Detection) -> f32 {
        let b1_area = self.w * self.h;
        let b2_area = other.w * other.h;

        let i_w = (self.xmax().min(other.xmax()) - self.xmin().max(other.xmin())).max(0.);
        let i_h = (self.ymax().min(other.ymax()) - self.ymin().max(other.ymin())).max(0.);
        let i_area = i_w * i_h;
        let union = b1_area + b2_area - i_area;

        if union > 0.0 {
            i_area / union
        } else {
            0.0
        }
    }

    #[inline(always)]
    pub fn xmax(&self) -> f32 {
        self.x + self.w / 2.
    }

    #[inline(always)]
    pub fn ymax(&self) -> f32 {
        self.y + self.h / 2.
    }

    #[inline(always)]
    pub fn xmin(&self) -> f32 {
        self.x - self.w / 2.
    }

    #[inline(always)]
    pub fn ymin(&self) -> f32 {
        self.y - self.h / 2.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = Detection::new(10.0, 10.0, ObjectClass::Car, 0.9).with_size(4.0, 2.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = Detection::new(0.0, 0.0, ObjectClass::Car, 0.9).with_size(2.0, 2.0);
        let b = Detection::new(10.0, 0.0, ObjectClass::Car, 0.9).with_size(2.0, 2.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn check_rejects_nan_and_bad_confidence() {
        let nan = Detection::new(f32::NAN, 0.0, ObjectClass::Car, 0.5);
        assert!(matches!(nan.check(3), Err(Error::Ingest { frame_id: 3, .. })));

        let conf = Detection::new(0.0, 0.0, ObjectClass::Car, 1.5);
        assert!(conf.check(0).is_err());

        let ok = Detection::new(1.0, 2.0, ObjectClass::Bus, 0.7);
        assert!(ok.check(0).is_ok());
    }

    #[test]
    fn deserializes_short_field_names() {
        let det: Detection =
            serde_json::from_str(r#"{"x": 1.0, "y": 2.0, "p": 0.8, "c": "truck"}"#).unwrap();
        assert_eq!(det.class, ObjectClass::Truck);
        assert_eq!(det.w, 0.0);
    }
}
