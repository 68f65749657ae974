use serde_derive::{Deserialize, Serialize};
use std::path::Path;

use crate::access::{AccessPoint, Gate};
use crate::error::{Error, Result};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AssociationMetric {
    /// Euclidean distance between predicted position and detection center.
    Distance,
    /// `1 - IoU` of the predicted box and the detection box.
    Iou,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TrackerConfig {
    /// Hits before a tentative track is confirmed
    pub confirm_hits: u32,
    /// Consecutive misses before a confirmed/lost track is deleted
    pub max_misses: u32,
    /// Consecutive misses before a tentative track is dropped
    pub tentative_max_misses: u32,
    /// Largest association cost accepted as a match
    pub gate: f32,
    pub metric: AssociationMetric,
    pub min_confidence: f32,
    /// Acceleration std, units/s^2
    pub process_noise: f32,
    /// Position measurement std, units
    pub measurement_noise: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            confirm_hits: 3,
            max_misses: 10,
            tentative_max_misses: 2,
            gate: 5.0,
            metric: AssociationMetric::Distance,
            min_confidence: 0.0,
            process_noise: 5.0,
            measurement_noise: 0.5,
        }
    }
}

/// Angular thresholds separating direct, turning and U-turn movements.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct TurnThresholds {
    /// |angle| above this is a left (positive) or right (negative) turn
    pub turn_deg: f32,
    /// |angle| above this may be a U-turn
    pub uturn_deg: f32,
    /// Slack allowed when checking a code against the measured angle
    pub tolerance_deg: f32,
}

impl Default for TurnThresholds {
    fn default() -> Self {
        Self {
            turn_deg: 30.0,
            uturn_deg: 135.0,
            tolerance_deg: 15.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierConfig {
    pub min_length_m: f32,
    pub pedestrian_min_length_m: f32,
    pub max_direction_changes: u32,
    pub min_net_over_path_ratio: f32,
    pub meters_per_unit: f32,
    pub turns: TurnThresholds,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConflictConfig {
    pub ttc_threshold_s: f32,
    pub pet_threshold_s: f32,
    /// In meters
    pub distance_threshold: f32,
    pub time_step_s: f32,
    pub meters_per_unit: f32,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        AnalysisConfig::default().conflict()
    }
}

/// Analysis settings of one dataset.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    pub interval_minutes: u32,
    pub min_length_m: f32,
    /// Shortest counted walk; crossings are much shorter than vehicle paths
    pub pedestrian_min_length_m: f32,
    pub max_direction_changes: u32,
    pub min_net_over_path_ratio: f32,
    pub ttc_threshold_s: f32,
    pub pet_threshold_s: f32,
    pub distance_threshold: f32,
    pub conflict_time_step_s: f32,
    pub meters_per_unit: f32,
    /// Largest distance (coordinate units) between a trajectory end and a gate
    pub access_tolerance: f32,
    pub tracker: TrackerConfig,
    pub turns: TurnThresholds,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 15,
            min_length_m: 10.0,
            pedestrian_min_length_m: 3.0,
            max_direction_changes: 4,
            min_net_over_path_ratio: 0.4,
            ttc_threshold_s: 1.5,
            pet_threshold_s: 3.0,
            distance_threshold: 2.0,
            conflict_time_step_s: 0.1,
            meters_per_unit: 1.0,
            access_tolerance: 3.0,
            tracker: TrackerConfig::default(),
            turns: TurnThresholds::default(),
        }
    }
}

fn ensure(cond: bool, msg: &str) -> Result<()> {
    if cond {
        Ok(())
    } else {
        Err(Error::Config(msg.to_string()))
    }
}

impl AnalysisConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;

        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    #[inline]
    pub fn interval_seconds(&self) -> u64 {
        u64::from(self.interval_minutes) * 60
    }

    pub fn classifier(&self) -> ClassifierConfig {
        ClassifierConfig {
            min_length_m: self.min_length_m,
            pedestrian_min_length_m: self.pedestrian_min_length_m,
            max_direction_changes: self.max_direction_changes,
            min_net_over_path_ratio: self.min_net_over_path_ratio,
            meters_per_unit: self.meters_per_unit,
            turns: self.turns,
        }
    }

    pub fn conflict(&self) -> ConflictConfig {
        ConflictConfig {
            ttc_threshold_s: self.ttc_threshold_s,
            pet_threshold_s: self.pet_threshold_s,
            distance_threshold: self.distance_threshold,
            time_step_s: self.conflict_time_step_s,
            meters_per_unit: self.meters_per_unit,
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure(self.interval_minutes > 0, "interval_minutes must be positive")?;
        ensure(self.min_length_m >= 0.0, "min_length_m must not be negative")?;
        ensure(
            self.pedestrian_min_length_m >= 0.0,
            "pedestrian_min_length_m must not be negative",
        )?;
        ensure(
            (0.0..=1.0).contains(&self.min_net_over_path_ratio),
            "min_net_over_path_ratio must be within [0, 1]",
        )?;
        ensure(self.ttc_threshold_s > 0.0, "ttc_threshold_s must be positive")?;
        ensure(self.pet_threshold_s > 0.0, "pet_threshold_s must be positive")?;
        ensure(self.distance_threshold > 0.0, "distance_threshold must be positive")?;
        ensure(self.conflict_time_step_s > 0.0, "conflict_time_step_s must be positive")?;
        ensure(self.meters_per_unit > 0.0, "meters_per_unit must be positive")?;
        ensure(self.access_tolerance >= 0.0, "access_tolerance must not be negative")?;

        let t = &self.tracker;
        ensure(t.confirm_hits >= 1, "tracker.confirm_hits must be at least 1")?;
        ensure(t.max_misses >= 1, "tracker.max_misses must be at least 1")?;
        ensure(
            t.tentative_max_misses >= 1,
            "tracker.tentative_max_misses must be at least 1",
        )?;
        ensure(t.gate > 0.0, "tracker.gate must be positive")?;
        ensure(
            t.metric != AssociationMetric::Iou || t.gate <= 1.0,
            "tracker.gate must be within (0, 1] for the iou metric",
        )?;
        ensure(
            t.process_noise > 0.0 && t.measurement_noise > 0.0,
            "tracker noise must be positive",
        )?;

        let a = &self.turns;
        ensure(
            a.turn_deg > 0.0 && a.turn_deg < a.uturn_deg && a.uturn_deg <= 180.0,
            "turns must satisfy 0 < turn_deg < uturn_deg <= 180",
        )?;
        ensure(
            a.tolerance_deg >= 0.0 && a.tolerance_deg < a.turn_deg,
            "turns.tolerance_deg must be within [0, turn_deg)",
        )?;
        ensure(
            a.turn_deg + a.tolerance_deg < a.uturn_deg - a.tolerance_deg,
            "turn and u-turn bands overlap once tolerance is applied",
        )?;

        Ok(())
    }
}

/// Everything needed to process one dataset.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DatasetConfig {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    pub access_points: Vec<AccessPoint>,
}

impl DatasetConfig {
    pub fn new(analysis: AnalysisConfig, access_points: Vec<AccessPoint>) -> Self {
        Self {
            analysis,
            access_points,
        }
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;

        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.analysis.validate()?;
        ensure(!self.access_points.is_empty(), "no access points configured")?;

        for ap in &self.access_points {
            let ok = match &ap.gate {
                Gate::Line { a, b } => a != b && a.iter().chain(b).all(|v| v.is_finite()),
                Gate::Polygon { points } => {
                    points.len() >= 3 && points.iter().flatten().all(|v| v.is_finite())
                }
            };

            if !ok {
                return Err(Error::Config(format!(
                    "degenerate gate for access {}",
                    ap.cardinal
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        AnalysisConfig::default().validate().unwrap();
        assert_eq!(AnalysisConfig::default().interval_seconds(), 900);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = AnalysisConfig::from_json_str(
            r#"{"interval_minutes": 5, "tracker": {"gate": 8.0}, "turns": {"uturn_deg": 150}}"#,
        )
        .unwrap();

        assert_eq!(config.interval_minutes, 5);
        assert_eq!(config.tracker.gate, 8.0);
        assert_eq!(config.tracker.confirm_hits, 3);
        assert_eq!(config.turns.uturn_deg, 150.0);
        assert_eq!(config.turns.turn_deg, 30.0);
        assert_eq!(config.min_length_m, 10.0);
    }

    #[test]
    fn rejects_inconsistent_settings() {
        let bad = [
            r#"{"interval_minutes": 0}"#,
            r#"{"min_net_over_path_ratio": 1.5}"#,
            r#"{"distance_threshold": -1}"#,
            r#"{"tracker": {"metric": "iou", "gate": 5.0}}"#,
            r#"{"turns": {"turn_deg": 140, "uturn_deg": 135}}"#,
            r#"{"turns": {"tolerance_deg": 40}}"#,
        ];

        for json in bad {
            assert!(
                matches!(AnalysisConfig::from_json_str(json), Err(Error::Config(_))),
                "{} should be rejected",
                json
            );
        }
    }

    #[test]
    fn malformed_json_is_a_json_error() {
        assert!(matches!(
            AnalysisConfig::from_json_str("{"),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn dataset_config_reads_gates() {
        let config = DatasetConfig::from_json_str(
            r#"{
                "access_points": [
                    {"cardinal": "N", "gate": {"type": "line", "a": [0, 0], "b": [10, 0]}},
                    {"cardinal": "O", "gate": {"type": "polygon", "points": [[-5, 0], [0, 0], [0, 10], [-5, 10]]}}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.access_points.len(), 2);
        assert_eq!(config.analysis, AnalysisConfig::default());
    }

    #[test]
    fn dataset_config_rejects_degenerate_gates() {
        let two_points = r#"{"access_points": [
            {"cardinal": "S", "gate": {"type": "polygon", "points": [[0, 0], [1, 1]]}}
        ]}"#;
        let zero_length = r#"{"access_points": [
            {"cardinal": "E", "gate": {"type": "line", "a": [3, 3], "b": [3, 3]}}
        ]}"#;

        for json in [two_points, zero_length, r#"{"access_points": []}"#] {
            assert!(matches!(
                DatasetConfig::from_json_str(json),
                Err(Error::Config(_))
            ));
        }
    }
}
