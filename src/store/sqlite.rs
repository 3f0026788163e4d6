//! SQLite-backed reading store
//!
//! Every operation opens its own connection on the blocking pool, so no
//! in-process lock is shared between the ingest task and request handlers.
//! Concurrency control is left to SQLite (WAL + busy timeout).

use super::{ReadingStore, StoreError, TimeWindow};
use crate::aggregator::WindowStats;
use crate::sensor::{Reading, SensorKind};
use crate::sqlite_pragma::apply_optimized_pragmas;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};

const SCHEMA: &str = include_str!("../../sql/001_readings.sql");

const SELECT_COLUMNS: &str = "SELECT sensor_kind, value, timestamp_ms, source_channel FROM readings";

pub struct SqliteReadingStore {
    db_path: PathBuf,
}

impl SqliteReadingStore {
    /// Open (or create) the database, apply schema and verify it is usable
    ///
    /// Failing here means the service has no working store and must not start.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref().to_path_buf();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Io(std::io::Error::new(
                        e.kind(),
                        format!("Failed to create database directory {}: {}", parent.display(), e),
                    ))
                })?;
            }
        }

        let conn = open_connection(&db_path)?;
        conn.execute_batch(SCHEMA)?;
        conn.query_row("SELECT COUNT(*) FROM readings", [], |row| row.get::<_, i64>(0))?;

        log::info!("✅ SQLite reading store initialized with WAL mode: {}", db_path.display());

        Ok(Self { db_path })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    async fn with_connection<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open_connection(&db_path)?;
            op(&conn)
        })
        .await?
    }
}

fn open_connection(db_path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(db_path)?;
    apply_optimized_pragmas(&conn)?;
    Ok(conn)
}

fn reading_from_row(row: &Row<'_>) -> rusqlite::Result<Reading> {
    let kind: String = row.get(0)?;
    let sensor_kind = kind
        .parse::<SensorKind>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;

    let timestamp_ms: i64 = row.get(2)?;
    let timestamp = DateTime::from_timestamp_millis(timestamp_ms).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            Type::Integer,
            format!("timestamp out of range: {}", timestamp_ms).into(),
        )
    })?;

    Ok(Reading {
        sensor_kind,
        value: row.get(1)?,
        timestamp,
        source_channel: row.get(3)?,
    })
}

/// Bounds of a window as `[start_ms, end_ms)`; an open end becomes `i64::MAX`
fn window_bounds(window: &TimeWindow) -> (i64, i64) {
    let start = window.start.timestamp_millis();
    let end = window.end.map_or(i64::MAX, |end| end.timestamp_millis());
    (start, end)
}

#[async_trait]
impl ReadingStore for SqliteReadingStore {
    async fn insert(&self, reading: &Reading) -> Result<(), StoreError> {
        if !reading.value.is_finite() {
            return Err(StoreError::InvalidValue(reading.value));
        }

        let reading = reading.clone();
        self.with_connection(move |conn| {
            conn.execute(
                "INSERT INTO readings (sensor_kind, value, timestamp_ms, source_channel)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    reading.sensor_kind.as_str(),
                    reading.value,
                    reading.timestamp.timestamp_millis(),
                    reading.source_channel,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn most_recent(&self, kind: SensorKind) -> Result<Option<Reading>, StoreError> {
        self.with_connection(move |conn| {
            let sql = format!(
                "{} WHERE sensor_kind = ?1 ORDER BY timestamp_ms DESC, id DESC LIMIT 1",
                SELECT_COLUMNS
            );
            let reading = conn
                .query_row(&sql, params![kind.as_str()], reading_from_row)
                .optional()?;
            Ok(reading)
        })
        .await
    }

    async fn range(
        &self,
        kind: SensorKind,
        window: TimeWindow,
        limit: Option<u32>,
    ) -> Result<Vec<Reading>, StoreError> {
        let (start_ms, end_ms) = window_bounds(&window);
        // Negative LIMIT means unbounded in SQLite
        let limit = limit.map_or(-1i64, i64::from);

        self.with_connection(move |conn| {
            let sql = format!(
                "{} WHERE sensor_kind = ?1 AND timestamp_ms >= ?2 AND timestamp_ms < ?3
                 ORDER BY timestamp_ms ASC, id ASC
                 LIMIT ?4",
                SELECT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![kind.as_str(), start_ms, end_ms, limit], reading_from_row)?;

            let mut readings = Vec::new();
            for row in rows {
                readings.push(row?);
            }
            Ok(readings)
        })
        .await
    }

    async fn stats(&self, kind: SensorKind, window: TimeWindow) -> Result<WindowStats, StoreError> {
        let (start_ms, end_ms) = window_bounds(&window);

        self.with_connection(move |conn| {
            let (count, min, max, sum): (i64, Option<f64>, Option<f64>, Option<f64>) = conn.query_row(
                "SELECT COUNT(*), MIN(value), MAX(value), SUM(value)
                 FROM readings
                 WHERE sensor_kind = ?1 AND timestamp_ms >= ?2 AND timestamp_ms < ?3",
                params![kind.as_str(), start_ms, end_ms],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;

            match (min, max, sum) {
                (Some(min), Some(max), Some(sum)) if count > 0 => {
                    Ok(WindowStats::from_parts(count as u64, min, max, sum))
                }
                _ => Ok(WindowStats::empty()),
            }
        })
        .await
    }

    async fn latest_timestamp(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.with_connection(|conn| {
            let max_ms: Option<i64> =
                conn.query_row("SELECT MAX(timestamp_ms) FROM readings", [], |row| row.get(0))?;
            Ok(max_ms.and_then(DateTime::from_timestamp_millis))
        })
        .await
    }

    async fn count(&self) -> Result<u64, StoreError> {
        self.with_connection(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }

    fn backend_type(&self) -> &'static str {
        "SQLite"
    }
}
