//! Reading Store - append-only, time-indexed persistence of readings
//!
//! # Architecture
//!
//! ```text
//! Ingestor ──insert──▶ ReadingStore ◀──most_recent / range / stats── Query API
//!                          │
//!                   SqliteReadingStore (WAL, connection per call)
//! ```
//!
//! The store is the only state shared between the write and read paths.
//! Implementations must be safe for concurrent insert-while-read on their own.

pub mod sqlite;

use crate::aggregator::WindowStats;
use crate::sensor::{Reading, SensorKind};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

pub use sqlite::SqliteReadingStore;

#[derive(Debug)]
pub enum StoreError {
    Database(rusqlite::Error),
    Io(std::io::Error),
    /// Blocking storage task panicked or was cancelled
    Task(String),
    InvalidValue(f64),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::Task(err.to_string())
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "Database error: {}", e),
            StoreError::Io(e) => write!(f, "IO error: {}", e),
            StoreError::Task(e) => write!(f, "Storage task failed: {}", e),
            StoreError::InvalidValue(v) => write!(f, "Refusing to store non-finite value: {}", v),
        }
    }
}

impl std::error::Error for StoreError {}

/// Half-open time interval `[start, end)`; `end: None` means "up to now"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end: Some(end) }
    }

    pub fn since(start: DateTime<Utc>) -> Self {
        Self { start, end: None }
    }

    /// Window covering the last `hours` hours up to `now`
    ///
    /// Saturates at the earliest representable instant for huge lookbacks.
    pub fn lookback(hours: f64, now: DateTime<Utc>) -> Self {
        let millis = (hours * 3_600_000.0) as i64;
        let start = TimeDelta::try_milliseconds(millis)
            .and_then(|delta| now.checked_sub_signed(delta))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self::since(start)
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start && self.end.map_or(true, |end| timestamp < end)
    }
}

/// Persistence backend for readings
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Append one reading; never rejects duplicates
    async fn insert(&self, reading: &Reading) -> Result<(), StoreError>;

    /// Reading with the greatest timestamp for `kind`, or `None` before any data
    async fn most_recent(&self, kind: SensorKind) -> Result<Option<Reading>, StoreError>;

    /// Readings of `kind` inside `window`, ascending by time
    ///
    /// `limit` keeps the earliest entries and drops the tail of the window.
    async fn range(
        &self,
        kind: SensorKind,
        window: TimeWindow,
        limit: Option<u32>,
    ) -> Result<Vec<Reading>, StoreError>;

    /// Summary over `window`; backends with native aggregation should override
    async fn stats(&self, kind: SensorKind, window: TimeWindow) -> Result<WindowStats, StoreError> {
        let readings = self.range(kind, window, None).await?;
        Ok(WindowStats::from_values(readings.iter().map(|r| r.value)))
    }

    /// Greatest timestamp across all kinds, `None` for an empty store
    async fn latest_timestamp(&self) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Total number of stored readings
    async fn count(&self) -> Result<u64, StoreError>;

    /// Backend name for logging
    fn backend_type(&self) -> &'static str;
}

#[cfg(test)]
pub(crate) mod test_support {
    //! In-process store doubles for handler and ingestion tests

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Vec-backed store that also counts every call made to it
    #[derive(Default)]
    pub struct VecStore {
        readings: Mutex<Vec<Reading>>,
        calls: AtomicUsize,
    }

    impl VecStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn snapshot(&self) -> Vec<Reading> {
            self.readings.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ReadingStore for VecStore {
        async fn insert(&self, reading: &Reading) -> Result<(), StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.readings.lock().unwrap().push(reading.clone());
            Ok(())
        }

        async fn most_recent(&self, kind: SensorKind) -> Result<Option<Reading>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let readings = self.readings.lock().unwrap();
            Ok(readings
                .iter()
                .filter(|r| r.sensor_kind == kind)
                .max_by_key(|r| r.timestamp)
                .cloned())
        }

        async fn range(
            &self,
            kind: SensorKind,
            window: TimeWindow,
            limit: Option<u32>,
        ) -> Result<Vec<Reading>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let readings = self.readings.lock().unwrap();
            let mut matched: Vec<Reading> = readings
                .iter()
                .filter(|r| r.sensor_kind == kind && window.contains(r.timestamp))
                .cloned()
                .collect();
            matched.sort_by_key(|r| r.timestamp);
            if let Some(limit) = limit {
                matched.truncate(limit as usize);
            }
            Ok(matched)
        }

        async fn latest_timestamp(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
            Ok(self.readings.lock().unwrap().iter().map(|r| r.timestamp).max())
        }

        async fn count(&self) -> Result<u64, StoreError> {
            Ok(self.readings.lock().unwrap().len() as u64)
        }

        fn backend_type(&self) -> &'static str {
            "Vec"
        }
    }

    /// Store whose medium is permanently unavailable, optionally for one kind only
    pub struct FailingStore {
        pub inner: VecStore,
        pub failing_kind: Option<SensorKind>,
    }

    impl FailingStore {
        pub fn all() -> Self {
            Self { inner: VecStore::new(), failing_kind: None }
        }

        pub fn only(kind: SensorKind) -> Self {
            Self { inner: VecStore::new(), failing_kind: Some(kind) }
        }

        fn check(&self, kind: SensorKind) -> Result<(), StoreError> {
            match self.failing_kind {
                Some(failing) if failing != kind => Ok(()),
                _ => Err(StoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk unavailable",
                ))),
            }
        }
    }

    #[async_trait]
    impl ReadingStore for FailingStore {
        async fn insert(&self, reading: &Reading) -> Result<(), StoreError> {
            self.check(reading.sensor_kind)?;
            self.inner.insert(reading).await
        }

        async fn most_recent(&self, kind: SensorKind) -> Result<Option<Reading>, StoreError> {
            self.check(kind)?;
            self.inner.most_recent(kind).await
        }

        async fn range(
            &self,
            kind: SensorKind,
            window: TimeWindow,
            limit: Option<u32>,
        ) -> Result<Vec<Reading>, StoreError> {
            self.check(kind)?;
            self.inner.range(kind, window, limit).await
        }

        async fn latest_timestamp(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
            self.inner.latest_timestamp().await
        }

        async fn count(&self) -> Result<u64, StoreError> {
            self.inner.count().await
        }

        fn backend_type(&self) -> &'static str {
            "Failing"
        }
    }
}
