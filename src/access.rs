use serde_derive::{Deserialize, Serialize};

use crate::error::{End, Error};
use crate::math::{self, Point};
use crate::movement::Cardinal;
use crate::trajectory::Trajectory;

/// Gate geometry drawn over an intersection approach.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Gate {
    Line { a: [f32; 2], b: [f32; 2] },
    Polygon { points: Vec<[f32; 2]> },
}

impl Gate {
    pub fn distance(&self, p: Point) -> f32 {
        match self {
            Gate::Line { a, b } => {
                math::point_segment_distance(p, Point::new(a[0], a[1]), Point::new(b[0], b[1]))
            }
            Gate::Polygon { points } => {
                let poly: Vec<Point> = points.iter().map(|q| Point::new(q[0], q[1])).collect();
                math::point_polygon_distance(p, &poly)
            }
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AccessPoint {
    pub cardinal: Cardinal,
    pub gate: Gate,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessPair {
    pub origin: Cardinal,
    pub destination: Cardinal,
}

/// Maps trajectory end points to the configured approaches.
#[derive(Debug, Clone)]
pub struct AccessResolver {
    points: Vec<AccessPoint>,
    tolerance: f32,
}

impl AccessResolver {
    pub fn new(points: Vec<AccessPoint>, tolerance: f32) -> Self {
        Self { points, tolerance }
    }

    /// Cardinal whose gates lie within tolerance of `p`. Several gates of
    /// the same cardinal count once.
    fn lookup(&self, track_id: u32, end: End, p: Point) -> Result<Cardinal, Error> {
        let mut found: Vec<Cardinal> = self
            .points
            .iter()
            .filter(|ap| ap.gate.distance(p) <= self.tolerance)
            .map(|ap| ap.cardinal)
            .collect();

        found.sort();
        found.dedup();

        match found.as_slice() {
            [] => Err(Error::UnresolvedAccess { track_id, end }),
            [cardinal] => Ok(*cardinal),
            many => Err(Error::AmbiguousAccess {
                track_id,
                end,
                candidates: many.len(),
            }),
        }
    }

    pub fn resolve(&self, trajectory: &Trajectory) -> Result<AccessPair, Error> {
        let id = trajectory.id;
        let (first, last) = match (trajectory.first(), trajectory.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => {
                return Err(Error::UnresolvedAccess {
                    track_id: id,
                    end: End::Entry,
                })
            }
        };

        let origin = self.lookup(id, End::Entry, first)?;
        let destination = self.lookup(id, End::Exit, last)?;

        Ok(AccessPair {
            origin,
            destination,
        })
    }
}
