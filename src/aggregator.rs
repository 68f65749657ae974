use log::debug;
use serde_derive::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::detection::ObjectClass;
use crate::movement::{Cardinal, MovementCode, TurnKind};
use crate::trajectory::Trajectory;

/// Orders chronologically first, so iterating a map of keys walks the
/// intervals in time order.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketKey {
    /// Seconds from the dataset start
    pub interval_start: u64,
    pub code: MovementCode,
    pub class: ObjectClass,
}

impl BucketKey {
    /// Smallest key of an interval.
    fn first_of(interval_start: u64) -> Self {
        Self {
            interval_start,
            code: MovementCode::new(TurnKind::Direct, Cardinal::N),
            class: ObjectClass::Car,
        }
    }
}

/// One line of the interval count table.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BucketRow {
    /// `HH:MM:SS` offset of the interval start
    pub timestamp_inicio: String,
    /// Zero-based interval number
    pub periodo: u64,
    pub ramal: Cardinal,
    pub movimiento_rilsa: MovementCode,
    pub clase: ObjectClass,
    pub conteo: u64,
}

impl BucketRow {
    pub const HEADER: [&'static str; 6] = [
        "timestamp_inicio",
        "periodo",
        "ramal",
        "movimiento_rilsa",
        "clase",
        "conteo",
    ];
}

pub fn format_offset(secs: u64) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Live per-dataset movement counts in fixed-width time buckets.
///
/// Each trajectory id is counted at most once; `reset` is the only way
/// counts go down.
#[derive(Debug, Clone)]
pub struct IntervalAggregator {
    interval_s: u64,
    counts: BTreeMap<BucketKey, u64>,
    consumed: HashSet<u32>,
}

impl IntervalAggregator {
    pub fn new(interval_s: u64) -> Self {
        Self {
            interval_s: interval_s.max(1),
            counts: BTreeMap::new(),
            consumed: HashSet::new(),
        }
    }

    #[inline]
    pub fn interval_seconds(&self) -> u64 {
        self.interval_s
    }

    /// Start of the half-open interval containing `ts`.
    pub fn interval_start(&self, ts: f32) -> u64 {
        let secs = if ts.is_finite() && ts > 0.0 {
            ts.floor() as u64
        } else {
            0
        };

        secs / self.interval_s * self.interval_s
    }

    /// Counts `trajectory` under `code` in the interval of its exit
    /// timestamp. Returns `false` when the trajectory was already counted.
    pub fn record(&mut self, trajectory: &Trajectory, code: MovementCode) -> bool {
        if !self.consumed.insert(trajectory.id) {
            debug!("trajectory {} already counted", trajectory.id);
            return false;
        }

        let key = BucketKey {
            interval_start: self.interval_start(trajectory.exit_timestamp()),
            code,
            class: trajectory.class,
        };

        *self.counts.entry(key).or_insert(0) += 1;
        true
    }

    #[inline]
    pub fn is_recorded(&self, trajectory_id: u32) -> bool {
        self.consumed.contains(&trajectory_id)
    }

    /// Counts of one interval keyed by movement and class.
    pub fn counts(&self, interval_start: u64) -> BTreeMap<(MovementCode, ObjectClass), u64> {
        self.interval_range(interval_start)
            .map(|(k, v)| ((k.code, k.class), *v))
            .collect()
    }

    pub fn get(&self, key: &BucketKey) -> u64 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    pub fn total(&self, interval_start: u64) -> u64 {
        self.interval_range(interval_start).map(|(_, v)| *v).sum()
    }

    pub fn grand_total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn class_total(&self, class: ObjectClass) -> u64 {
        self.counts
            .iter()
            .filter(|(k, _)| k.class == class)
            .map(|(_, v)| *v)
            .sum()
    }

    /// Non-empty bucket keys in chronological order.
    pub fn bucket_keys(&self) -> Vec<BucketKey> {
        self.counts.keys().copied().collect()
    }

    /// Starts of the intervals holding at least one count.
    pub fn intervals(&self) -> Vec<u64> {
        self.counts
            .keys()
            .map(|k| k.interval_start)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn reset(&mut self) {
        self.counts.clear();
        self.consumed.clear();
    }

    pub fn rows(&self) -> Vec<BucketRow> {
        self.counts
            .iter()
            .map(|(k, &conteo)| BucketRow {
                timestamp_inicio: format_offset(k.interval_start),
                periodo: k.interval_start / self.interval_s,
                ramal: k.code.origin(),
                movimiento_rilsa: k.code,
                clase: k.class,
                conteo,
            })
            .collect()
    }

    fn interval_range(&self, interval_start: u64) -> impl Iterator<Item = (&BucketKey, &u64)> {
        self.counts
            .range(BucketKey::first_of(interval_start)..)
            .take_while(move |(k, _)| k.interval_start == interval_start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exiting_at(id: u32, class: ObjectClass, exit: f32) -> Trajectory {
        Trajectory::from_samples(id, class, &[(exit - 12.0, 0.0, 0.0), (exit, 0.0, 40.0)])
    }

    fn code(s: &str) -> MovementCode {
        s.parse().unwrap()
    }

    #[test]
    fn car_exiting_at_twelve_seconds_lands_in_first_bucket() {
        let mut agg = IntervalAggregator::new(900);
        assert!(agg.record(&exiting_at(1, ObjectClass::Car, 12.0), code("1")));

        let key = BucketKey {
            interval_start: 0,
            code: code("1"),
            class: ObjectClass::Car,
        };
        assert_eq!(agg.get(&key), 1);
        assert_eq!(agg.total(0), 1);
        assert_eq!(agg.intervals(), vec![0]);
    }

    #[test]
    fn exit_on_boundary_belongs_to_next_bucket() {
        let mut agg = IntervalAggregator::new(900);
        agg.record(&exiting_at(1, ObjectClass::Car, 900.0), code("1"));
        agg.record(&exiting_at(2, ObjectClass::Car, 899.9), code("1"));

        assert_eq!(agg.total(0), 1);
        assert_eq!(agg.total(900), 1);
    }

    #[test]
    fn recording_twice_counts_once() {
        let mut agg = IntervalAggregator::new(900);
        let t = exiting_at(5, ObjectClass::Bus, 100.0);

        assert!(agg.record(&t, code("5")));
        assert!(!agg.record(&t, code("5")));
        assert!(!agg.record(&t, code("1")));

        assert_eq!(agg.grand_total(), 1);
        assert!(agg.is_recorded(5));
    }

    #[test]
    fn class_totals_match_recorded_trajectories() {
        let mut agg = IntervalAggregator::new(900);
        let classes = [ObjectClass::Car, ObjectClass::Car, ObjectClass::Truck, ObjectClass::Car];

        for (i, class) in classes.iter().enumerate() {
            agg.record(&exiting_at(i as u32, *class, 500.0 * i as f32 + 20.0), code("2"));
        }

        assert_eq!(agg.class_total(ObjectClass::Car), 3);
        assert_eq!(agg.class_total(ObjectClass::Truck), 1);
        assert_eq!(agg.grand_total(), 4);
    }

    #[test]
    fn keys_are_chronological() {
        let mut agg = IntervalAggregator::new(900);
        agg.record(&exiting_at(1, ObjectClass::Car, 2000.0), code("1"));
        agg.record(&exiting_at(2, ObjectClass::Car, 50.0), code("9(4)"));
        agg.record(&exiting_at(3, ObjectClass::Car, 950.0), code("3"));

        let starts: Vec<_> = agg.bucket_keys().iter().map(|k| k.interval_start).collect();
        assert_eq!(starts, vec![0, 900, 1800]);
    }

    #[test]
    fn reset_clears_counts_and_identities() {
        let mut agg = IntervalAggregator::new(900);
        let t = exiting_at(1, ObjectClass::Car, 10.0);
        agg.record(&t, code("1"));
        agg.reset();

        assert_eq!(agg.grand_total(), 0);
        assert!(agg.record(&t, code("1")));
    }

    #[test]
    fn rows_describe_each_bucket() {
        let mut agg = IntervalAggregator::new(900);
        agg.record(&exiting_at(1, ObjectClass::Car, 3700.0), code("9(3)"));
        agg.record(&exiting_at(2, ObjectClass::Car, 3750.0), code("9(3)"));

        let rows = agg.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].timestamp_inicio, "01:00:00");
        assert_eq!(rows[0].periodo, 4);
        assert_eq!(rows[0].ramal, Cardinal::O);
        assert_eq!(rows[0].conteo, 2);
    }

    #[test]
    fn counts_of_one_interval_only() {
        let mut agg = IntervalAggregator::new(900);
        agg.record(&exiting_at(1, ObjectClass::Car, 10.0), code("1"));
        agg.record(&exiting_at(2, ObjectClass::Bicycle, 20.0), code("5"));
        agg.record(&exiting_at(3, ObjectClass::Car, 910.0), code("1"));

        let counts = agg.counts(0);
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[&(code("5"), ObjectClass::Bicycle)], 1);
        assert!(agg.counts(1800).is_empty());
    }

    #[test]
    fn interval_queries_stop_at_neighbouring_intervals() {
        let mut agg = IntervalAggregator::new(900);
        agg.record(&exiting_at(1, ObjectClass::Pedestrian, 899.0), code("P(4)"));
        agg.record(&exiting_at(2, ObjectClass::Car, 900.0), code("1"));
        agg.record(&exiting_at(3, ObjectClass::Pedestrian, 1000.0), code("P(4)"));
        agg.record(&exiting_at(4, ObjectClass::Truck, 1100.0), code("10(2)"));
        agg.record(&exiting_at(5, ObjectClass::Car, 1800.0), code("1"));

        assert_eq!(agg.total(900), 3);
        assert_eq!(agg.counts(900).len(), 3);
        assert_eq!(agg.total(0), 1);
        assert_eq!(agg.total(1800), 1);
        assert_eq!(agg.total(450), 0);
    }
}
