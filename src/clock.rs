//! Ingestion clock
//!
//! Readings carry no device time, so the service stamps them on arrival.
//! Stamps never go backwards in issue order even if the wall clock steps back.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Debug, Default)]
pub struct IngestClock {
    last_ms: AtomicI64,
}

impl IngestClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock that never issues an instant before `floor`
    ///
    /// Seeded from the newest stored reading so ordering holds across restarts.
    pub fn starting_at(floor: DateTime<Utc>) -> Self {
        Self {
            last_ms: AtomicI64::new(floor.timestamp_millis()),
        }
    }

    /// Current time, clamped to the last issued instant
    pub fn now(&self) -> DateTime<Utc> {
        self.stamp(Utc::now())
    }

    fn stamp(&self, wall: DateTime<Utc>) -> DateTime<Utc> {
        let wall_ms = wall.timestamp_millis();
        let prev = self.last_ms.fetch_max(wall_ms, Ordering::AcqRel);
        let issued = prev.max(wall_ms);
        DateTime::from_timestamp_millis(issued).unwrap_or(wall)
    }
}

/// Current time for query windows
pub fn current_time() -> DateTime<Utc> {
    Utc::now()
}
