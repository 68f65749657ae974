use serde_derive::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::aggregator::BucketRow;
use crate::conflict::ConflictEvent;
use crate::detection::ObjectClass;
use crate::error::{Error, Result};
use crate::movement::{Cardinal, MovementCode};

/// Per-trajectory output, whatever became of the trajectory.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrajectoryRecord {
    pub track_id: u32,
    pub class: ObjectClass,
    pub origin_cardinal: Option<Cardinal>,
    pub destination_cardinal: Option<Cardinal>,
    /// Set only when the trajectory was counted
    pub movement_code: Option<MovementCode>,
    pub exit_timestamp: f32,
    /// m/s
    pub speed_median: Option<f32>,
}

/// Sink for the results of a dataset job. Any error ends the job.
pub trait Storage {
    fn store_trajectories(&mut self, records: &[TrajectoryRecord]) -> Result<()>;
    fn store_buckets(&mut self, rows: &[BucketRow]) -> Result<()>;
    fn store_conflicts(&mut self, events: &[ConflictEvent]) -> Result<()>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    pub trajectories: Vec<TrajectoryRecord>,
    pub buckets: Vec<BucketRow>,
    pub conflicts: Vec<ConflictEvent>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn store_trajectories(&mut self, records: &[TrajectoryRecord]) -> Result<()> {
        self.trajectories.extend_from_slice(records);
        Ok(())
    }

    // rows are a snapshot of the live counts, the latest one wins
    fn store_buckets(&mut self, rows: &[BucketRow]) -> Result<()> {
        self.buckets = rows.to_vec();
        Ok(())
    }

    fn store_conflicts(&mut self, events: &[ConflictEvent]) -> Result<()> {
        self.conflicts.extend_from_slice(events);
        Ok(())
    }
}

#[inline]
fn storage_err<E: std::fmt::Display>(err: E) -> Error {
    Error::Storage(err.to_string())
}

/// Writes bucket rows as CSV with the fixed reporting header.
pub fn write_bucket_csv<W: Write>(mut w: W, rows: &[BucketRow]) -> Result<()> {
    writeln!(w, "{}", BucketRow::HEADER.join(",")).map_err(storage_err)?;

    for row in rows {
        writeln!(
            w,
            "{},{},{},{},{},{}",
            row.timestamp_inicio, row.periodo, row.ramal, row.movimiento_rilsa, row.clase, row.conteo
        )
        .map_err(storage_err)?;
    }

    w.flush().map_err(storage_err)
}

/// Writes `trajectories.json`, `buckets.csv` and `conflicts.json` into a
/// directory.
#[derive(Debug, Clone)]
pub struct DirectoryStorage {
    root: PathBuf,
}

impl DirectoryStorage {
    pub fn create<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(storage_err)?;

        Ok(Self { root })
    }

    fn writer(&self, name: &str) -> Result<BufWriter<File>> {
        let file = File::create(self.root.join(name)).map_err(storage_err)?;
        Ok(BufWriter::new(file))
    }

    fn write_json<T: serde::Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let mut w = self.writer(name)?;
        serde_json::to_writer_pretty(&mut w, value).map_err(storage_err)?;
        w.flush().map_err(storage_err)
    }
}

impl Storage for DirectoryStorage {
    fn store_trajectories(&mut self, records: &[TrajectoryRecord]) -> Result<()> {
        self.write_json("trajectories.json", &records)
    }

    fn store_buckets(&mut self, rows: &[BucketRow]) -> Result<()> {
        write_bucket_csv(self.writer("buckets.csv")?, rows)
    }

    fn store_conflicts(&mut self, events: &[ConflictEvent]) -> Result<()> {
        self.write_json("conflicts.json", &events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(periodo: u64, code: &str, conteo: u64) -> BucketRow {
        let code: MovementCode = code.parse().unwrap();

        BucketRow {
            timestamp_inicio: crate::aggregator::format_offset(periodo * 900),
            periodo,
            ramal: code.origin(),
            movimiento_rilsa: code,
            clase: ObjectClass::Car,
            conteo,
        }
    }

    #[test]
    fn csv_has_fixed_header_and_column_order() {
        let mut out = Vec::new();
        write_bucket_csv(&mut out, &[row(0, "1", 3), row(1, "9(4)", 1)]).unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(
            lines,
            [
                "timestamp_inicio,periodo,ramal,movimiento_rilsa,clase,conteo",
                "00:00:00,0,N,1,car,3",
                "00:15:00,1,E,9(4),car,1",
            ]
        );
    }

    #[test]
    fn memory_storage_replaces_bucket_snapshot() {
        let mut storage = MemoryStorage::new();
        storage.store_buckets(&[row(0, "1", 1)]).unwrap();
        storage.store_buckets(&[row(0, "1", 2), row(0, "2", 1)]).unwrap();

        assert_eq!(storage.buckets.len(), 2);
        assert_eq!(storage.buckets[0].conteo, 2);
    }

    #[test]
    fn directory_storage_writes_files() {
        let dir = std::env::temp_dir().join(format!("rilsa-storage-{}", std::process::id()));
        let mut storage = DirectoryStorage::create(&dir).unwrap();

        storage.store_buckets(&[row(0, "5", 2)]).unwrap();
        storage.store_conflicts(&[]).unwrap();

        let csv = fs::read_to_string(dir.join("buckets.csv")).unwrap();
        assert!(csv.ends_with("00:00:00,0,N,5,car,2\n"));
        assert_eq!(fs::read_to_string(dir.join("conflicts.json")).unwrap(), "[]");

        fs::remove_dir_all(&dir).unwrap();
    }
}
