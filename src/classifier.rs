use serde_derive::{Deserialize, Serialize};
use std::fmt;

use crate::config::ClassifierConfig;
use crate::error::Error;
use crate::movement::{Cardinal, MovementCode, TurnKind};
use crate::trajectory::Trajectory;

/// Steps shorter than this (meters) are ignored when counting reversals.
const MIN_STEP_M: f32 = 0.5;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum InvalidReason {
    TooFewPoints { points: usize },
    TooShort { length_m: f32, min_m: f32 },
    DirectionChanges { count: u32, max: u32 },
    Erratic { ratio: f32, min: f32 },
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidReason::TooFewPoints { points } => write!(f, "only {} points", points),
            InvalidReason::TooShort { length_m, min_m } => {
                write!(f, "path of {:.1} m is shorter than {:.1} m", length_m, min_m)
            }
            InvalidReason::DirectionChanges { count, max } => {
                write!(f, "{} direction changes, at most {} allowed", count, max)
            }
            InvalidReason::Erratic { ratio, min } => {
                write!(f, "net/path ratio {:.2} below {:.2}", ratio, min)
            }
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub code: MovementCode,
    pub turn_angle_deg: f32,
    pub path_length_m: f32,
    pub net_ratio: f32,
    pub direction_changes: u32,
}

pub struct MovementClassifier {
    config: ClassifierConfig,
}

impl MovementClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    #[inline]
    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    fn invalid(trajectory: &Trajectory, reason: InvalidReason) -> Error {
        Error::InvalidTrajectory {
            track_id: trajectory.id,
            reason,
        }
    }

    pub fn classify(
        &self,
        trajectory: &Trajectory,
        origin: Cardinal,
        destination: Cardinal,
    ) -> Result<Classification, Error> {
        let cfg = &self.config;

        if trajectory.len() < 2 {
            return Err(Self::invalid(
                trajectory,
                InvalidReason::TooFewPoints {
                    points: trajectory.len(),
                },
            ));
        }

        let path_length_m = trajectory.path_length() * cfg.meters_per_unit;
        let net_ratio = if path_length_m > 0.0 {
            trajectory.net_displacement() * cfg.meters_per_unit / path_length_m
        } else {
            0.0
        };
        let direction_changes = trajectory.direction_changes(MIN_STEP_M / cfg.meters_per_unit);
        let turn_angle_deg = trajectory.turn_angle_deg();

        let classification = |code| Classification {
            code,
            turn_angle_deg,
            path_length_m,
            net_ratio,
            direction_changes,
        };

        let pedestrian = trajectory.class.is_pedestrian();
        let min_length_m = if pedestrian {
            cfg.pedestrian_min_length_m
        } else {
            cfg.min_length_m
        };

        if path_length_m < min_length_m {
            return Err(Self::invalid(
                trajectory,
                InvalidReason::TooShort {
                    length_m: path_length_m,
                    min_m: min_length_m,
                },
            ));
        }

        if direction_changes > cfg.max_direction_changes {
            return Err(Self::invalid(
                trajectory,
                InvalidReason::DirectionChanges {
                    count: direction_changes,
                    max: cfg.max_direction_changes,
                },
            ));
        }

        // returning to the origin access is legitimately low-ratio
        if origin != destination && net_ratio < cfg.min_net_over_path_ratio {
            return Err(Self::invalid(
                trajectory,
                InvalidReason::Erratic {
                    ratio: net_ratio,
                    min: cfg.min_net_over_path_ratio,
                },
            ));
        }

        if pedestrian {
            return Ok(classification(MovementCode::new(TurnKind::Pedestrian, origin)));
        }

        let turns = &cfg.turns;
        let kind = if turn_angle_deg.abs() > turns.uturn_deg && origin == destination {
            TurnKind::UTurn
        } else if turn_angle_deg > turns.turn_deg {
            TurnKind::Left
        } else if turn_angle_deg < -turns.turn_deg {
            TurnKind::Right
        } else {
            TurnKind::Direct
        };

        Ok(classification(MovementCode::new(kind, origin)))
    }
}
