//! Reading Store
//!
//! SQLite persistence for polled readings. One row per meter timestamp;
//! re-polling the same reading is a no-op.
//!
//! # Example
//! ```rust,no_run
//! use octowatch::store::ReadingStore;
//!
//! let store = ReadingStore::open("./octowatch.db")?;
//! let recent = store.readings(None, Some(60))?;
//! println!("{} readings", recent.len());
//! # Ok::<(), octowatch::store::StoreError>(())
//! ```

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

use crate::octopus::ConsumptionReading;

/// SQLite-backed store of consumption readings
pub struct ReadingStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl ReadingStore {
    /// Create or open the database at `path`
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Create a throwaway in-memory store
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> StoreResult<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS readings (
                timestamp INTEGER PRIMARY KEY,
                total_consumption INTEGER NOT NULL,
                demand INTEGER NOT NULL
            )",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Database file, or `None` for an in-memory store
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))
    }

    /// Insert readings, skipping timestamps already stored
    ///
    /// Returns the number of new rows.
    pub fn insert_readings(&self, readings: &[ConsumptionReading]) -> StoreResult<usize> {
        if readings.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;

        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO readings (timestamp, total_consumption, demand)
                 VALUES (?1, ?2, ?3)",
            )?;

            for reading in readings {
                inserted += stmt.execute(params![
                    reading.timestamp.timestamp_millis(),
                    reading.total_consumption,
                    reading.demand
                ])?;
            }
        }

        tx.commit()?;

        tracing::debug!(inserted, "Inserted readings into DB");
        Ok(inserted)
    }

    /// Insert a single reading
    pub fn insert(&self, reading: &ConsumptionReading) -> StoreResult<bool> {
        Ok(self.insert_readings(std::slice::from_ref(reading))? > 0)
    }

    /// Readings at or after `since`, oldest first
    ///
    /// With a `limit`, only the newest `limit` matching readings are returned.
    pub fn readings(
        &self,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<ConsumptionReading>> {
        let since_ms = since.map(|t| t.timestamp_millis()).unwrap_or(i64::MIN);
        let limit = limit
            .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
            .unwrap_or(-1);

        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT timestamp, total_consumption, demand FROM readings
             WHERE timestamp >= ?1
             ORDER BY timestamp DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![since_ms, limit], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut readings = Vec::new();
        for row in rows {
            let (timestamp_ms, total_consumption, demand) = row?;
            let timestamp = DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
                .ok_or_else(|| StoreError::Corrupt(format!("timestamp {}", timestamp_ms)))?;

            readings.push(ConsumptionReading {
                timestamp,
                total_consumption,
                demand,
            });
        }

        readings.reverse();
        Ok(readings)
    }

    /// The newest stored reading
    pub fn latest(&self) -> StoreResult<Option<ConsumptionReading>> {
        Ok(self.readings(None, Some(1))?.pop())
    }

    /// Number of stored readings
    pub fn count(&self) -> StoreResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

/// Errors from the reading store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Corrupt data: {0}")]
    Corrupt(String),
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    fn reading(secs_ago: i64, consumption: i64, demand: i64) -> ConsumptionReading {
        let base = DateTime::<Utc>::from_timestamp(1_790_000_000, 0).unwrap();
        ConsumptionReading {
            timestamp: base - Duration::seconds(secs_ago),
            total_consumption: consumption,
            demand,
        }
    }

    #[test]
    fn test_insert_and_query_in_order() {
        let store = ReadingStore::open_in_memory().unwrap();
        let inserted = store
            .insert_readings(&[reading(10, 1001, 300), reading(30, 1000, 250), reading(20, 1000, 280)])
            .unwrap();
        assert_eq!(inserted, 3);

        let all = store.readings(None, None).unwrap();
        let demands: Vec<i64> = all.iter().map(|r| r.demand).collect();
        assert_eq!(demands, vec![250, 280, 300]);
    }

    #[test]
    fn test_duplicate_timestamps_ignored() {
        let store = ReadingStore::open_in_memory().unwrap();
        assert!(store.insert(&reading(0, 1000, 250)).unwrap());
        assert!(!store.insert(&reading(0, 1000, 250)).unwrap());
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_since_and_limit() {
        let store = ReadingStore::open_in_memory().unwrap();
        let readings: Vec<_> = (0..10).map(|i| reading(i * 10, 1000 + i, i)).collect();
        store.insert_readings(&readings).unwrap();

        let newest = store.readings(None, Some(3)).unwrap();
        let demands: Vec<i64> = newest.iter().map(|r| r.demand).collect();
        assert_eq!(demands, vec![2, 1, 0]);

        let since = reading(40, 0, 0).timestamp;
        let recent = store.readings(Some(since), None).unwrap();
        assert_eq!(recent.len(), 5);

        assert_eq!(store.latest().unwrap().unwrap().demand, 0);
    }

    #[test]
    fn test_persists_across_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("readings.db");

        {
            let store = ReadingStore::open(&path).unwrap();
            store.insert(&reading(0, 1234, 567)).unwrap();
        }

        let store = ReadingStore::open(&path).unwrap();
        assert_eq!(store.path(), Some(path.as_path()));
        let latest = store.latest().unwrap().unwrap();
        assert_eq!(latest.total_consumption, 1234);
        assert_eq!(latest.demand, 567);
    }

    #[test]
    fn test_empty_store() {
        let store = ReadingStore::open_in_memory().unwrap();
        assert_eq!(store.insert_readings(&[]).unwrap(), 0);
        assert!(store.latest().unwrap().is_none());
        assert_eq!(store.count().unwrap(), 0);
    }
}
