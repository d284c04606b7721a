// Ferrum Collector - SQLite bucket storage
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! SQLite persistence for finalized buckets.
//!
//! Each resolution of a series gets its own table, `<series>_<resolution>`,
//! keyed by game tick with the dimensions stored as a JSON object.

use crate::error::{CollectorError, Result};
use ferrum::{BucketStorage, Resolution, Sample, StorageError};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;

/// Bucket storage for one series in a SQLite database
pub struct SqliteStorage {
    conn: Connection,
    series: String,
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage")
            .field("series", &self.series)
            .finish_non_exhaustive()
    }
}

impl SqliteStorage {
    /// Open (or create) the database file at `path`
    pub fn open(path: impl AsRef<Path>, series: &str) -> Result<Self> {
        check_name("series", series)?;
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Ok(Self {
            conn,
            series: series.to_string(),
        })
    }

    /// In-memory database, for tests
    pub fn open_in_memory(series: &str) -> Result<Self> {
        check_name("series", series)?;
        Ok(Self {
            conn: Connection::open_in_memory()?,
            series: series.to_string(),
        })
    }

    fn table(&self, resolution: &Resolution) -> std::result::Result<String, StorageError> {
        check_name("resolution", resolution.identifier())
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(format!("{}_{}", self.series, resolution.identifier()))
    }
}

impl BucketStorage for SqliteStorage {
    fn ensure_storage(&mut self, resolution: &Resolution) -> std::result::Result<(), StorageError> {
        let table = self.table(resolution)?;
        self.conn
            .execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    game_tick INTEGER PRIMARY KEY,
                    data TEXT NOT NULL
                );",
                table
            ))
            .map_err(backend)?;
        tracing::debug!(table = %table, "Storage ready");
        Ok(())
    }

    fn persist_bucket(
        &mut self,
        resolution: &Resolution,
        bucket: &Sample,
    ) -> std::result::Result<(), StorageError> {
        let table = self.table(resolution)?;
        let data = serde_json::to_string(&bucket.dimensions)?;
        let inserted = self
            .conn
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO {} (game_tick, data) VALUES (?1, ?2)",
                    table
                ),
                params![to_sql_tick(bucket.tick)?, data],
            )
            .map_err(|e| unknown_or_backend(e, resolution))?;
        if inserted == 0 {
            return Err(StorageError::DuplicateTick {
                resolution: resolution.identifier().to_string(),
                tick: bucket.tick,
            });
        }
        Ok(())
    }

    fn query_latest(
        &mut self,
        resolution: &Resolution,
        after_tick: u64,
        max_results: usize,
    ) -> std::result::Result<Vec<Sample>, StorageError> {
        let table = self.table(resolution)?;
        let limit = i64::try_from(max_results).unwrap_or(i64::MAX);
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT game_tick, data FROM {} WHERE game_tick > ?1 ORDER BY game_tick DESC LIMIT ?2",
                table
            ))
            .map_err(|e| unknown_or_backend(e, resolution))?;
        let rows = stmt
            .query_map(params![to_sql_tick(after_tick)?, limit], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(backend)?;

        let mut samples = Vec::new();
        for row in rows {
            let (tick, data) = row.map_err(backend)?;
            let dimensions: BTreeMap<String, i64> = serde_json::from_str(&data)?;
            samples.push(Sample::new(from_sql_tick(tick)?, dimensions));
        }
        Ok(samples)
    }

    fn last_persisted_tick(
        &mut self,
        resolution: &Resolution,
    ) -> std::result::Result<Option<u64>, StorageError> {
        let table = self.table(resolution)?;
        let tick: Option<i64> = self
            .conn
            .query_row(
                &format!("SELECT MAX(game_tick) FROM {}", table),
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| unknown_or_backend(e, resolution))?
            .flatten();
        tick.map(from_sql_tick).transpose()
    }
}

/// Names end up in table names, so only `[A-Za-z0-9_]` is allowed.
fn check_name(what: &str, name: &str) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(CollectorError::Config(format!(
            "{} name '{}' may only contain letters, digits and '_'",
            what, name
        )));
    }
    Ok(())
}

fn backend(e: rusqlite::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

fn unknown_or_backend(e: rusqlite::Error, resolution: &Resolution) -> StorageError {
    if e.to_string().contains("no such table") {
        StorageError::UnknownResolution(resolution.identifier().to_string())
    } else {
        backend(e)
    }
}

fn to_sql_tick(tick: u64) -> std::result::Result<i64, StorageError> {
    i64::try_from(tick).map_err(|_| StorageError::Backend(format!("tick {} out of range", tick)))
}

fn from_sql_tick(tick: i64) -> std::result::Result<u64, StorageError> {
    u64::try_from(tick).map_err(|_| StorageError::Backend(format!("negative tick {}", tick)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seconds() -> Resolution {
        Resolution::new(60, "seconds").unwrap()
    }

    fn ready() -> SqliteStorage {
        let mut storage = SqliteStorage::open_in_memory("resources").unwrap();
        storage.ensure_storage(&seconds()).unwrap();
        storage
    }

    #[test]
    fn test_rejects_unsafe_names() {
        assert!(SqliteStorage::open_in_memory("drop table").is_err());
        assert!(SqliteStorage::open_in_memory("").is_err());

        let mut storage = SqliteStorage::open_in_memory("resources").unwrap();
        let bad = Resolution::new(60, "x; --").unwrap();
        assert!(matches!(
            storage.ensure_storage(&bad),
            Err(StorageError::Backend(_))
        ));
    }

    #[test]
    fn test_empty_table() {
        let mut storage = ready();
        assert_eq!(storage.last_persisted_tick(&seconds()).unwrap(), None);
        assert!(storage.query_latest(&seconds(), 0, 10).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_resolution() {
        let mut storage = ready();
        let minutes = Resolution::new(3600, "minutes").unwrap();
        assert!(matches!(
            storage.last_persisted_tick(&minutes),
            Err(StorageError::UnknownResolution(_))
        ));
    }

    #[test]
    fn test_persist_and_query() {
        let mut storage = ready();
        for tick in [60, 120, 180] {
            let bucket = Sample::empty(tick)
                .with("in_coal", tick as i64)
                .with("out_iron-plate", 1);
            storage.persist_bucket(&seconds(), &bucket).unwrap();
        }

        let latest = storage.query_latest(&seconds(), 60, 10).unwrap();
        let ticks: Vec<u64> = latest.iter().map(|s| s.tick).collect();
        assert_eq!(ticks, vec![180, 120]);
        assert_eq!(latest[0].get("in_coal"), Some(180));
        assert_eq!(latest[0].get("out_iron-plate"), Some(1));

        assert_eq!(storage.query_latest(&seconds(), 0, 1).unwrap().len(), 1);
        assert_eq!(storage.last_persisted_tick(&seconds()).unwrap(), Some(180));
    }

    #[test]
    fn test_duplicate_tick() {
        let mut storage = ready();
        storage
            .persist_bucket(&seconds(), &Sample::empty(60).with("in_coal", 1))
            .unwrap();
        let err = storage
            .persist_bucket(&seconds(), &Sample::empty(60).with("in_coal", 2))
            .unwrap_err();
        assert!(matches!(err, StorageError::DuplicateTick { tick: 60, .. }));

        let stored = storage.query_latest(&seconds(), 0, 10).unwrap();
        assert_eq!(stored[0].get("in_coal"), Some(1));
    }

    #[test]
    fn test_reopen_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ferrum.db");

        {
            let mut storage = SqliteStorage::open(&path, "resources").unwrap();
            storage.ensure_storage(&seconds()).unwrap();
            storage
                .persist_bucket(&seconds(), &Sample::empty(600).with("in_stone", 9))
                .unwrap();
        }

        let mut storage = SqliteStorage::open(&path, "resources").unwrap();
        storage.ensure_storage(&seconds()).unwrap();
        assert_eq!(storage.last_persisted_tick(&seconds()).unwrap(), Some(600));
    }

    #[test]
    fn test_series_tables_are_separate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ferrum.db");

        let mut a = SqliteStorage::open(&path, "resources").unwrap();
        let mut b = SqliteStorage::open(&path, "fluids").unwrap();
        a.ensure_storage(&seconds()).unwrap();
        b.ensure_storage(&seconds()).unwrap();
        a.persist_bucket(&seconds(), &Sample::empty(60)).unwrap();

        assert_eq!(b.last_persisted_tick(&seconds()).unwrap(), None);
        b.persist_bucket(&seconds(), &Sample::empty(60)).unwrap();
    }
}
