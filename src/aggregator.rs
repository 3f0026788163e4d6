//! Windowed summary statistics (count / min / max / average)

use crate::sensor::SensorKind;
use crate::store::{ReadingStore, StoreError, TimeWindow};
use std::sync::Arc;

/// Summary over one sensor kind and time window
///
/// `count == 0` means no readings fell in the window; the numeric fields are
/// then `None`. This is a normal result, not an error.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowStats {
    pub count: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub average: Option<f64>,
}

impl WindowStats {
    pub fn empty() -> Self {
        Self {
            count: 0,
            min: None,
            max: None,
            average: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Build from natively aggregated parts (e.g. SQL COUNT/MIN/MAX/SUM)
    pub fn from_parts(count: u64, min: f64, max: f64, sum: f64) -> Self {
        if count == 0 {
            return Self::empty();
        }

        // Float rounding can push sum/count a hair outside [min, max]
        let average = (sum / count as f64).clamp(min, max);

        Self {
            count,
            min: Some(min),
            max: Some(max),
            average: Some(average),
        }
    }

    /// Single-pass fold for backends without native aggregation
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Self {
        let mut count = 0u64;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;

        for value in values {
            count += 1;
            min = min.min(value);
            max = max.max(value);
            sum += value;
        }

        Self::from_parts(count, min, max, sum)
    }
}

/// Computes window statistics on top of a reading store
#[derive(Clone)]
pub struct Aggregator {
    store: Arc<dyn ReadingStore>,
}

impl Aggregator {
    pub fn new(store: Arc<dyn ReadingStore>) -> Self {
        Self { store }
    }

    pub async fn stats(&self, kind: SensorKind, window: TimeWindow) -> Result<WindowStats, StoreError> {
        let stats = self.store.stats(kind, window).await?;
        log::debug!(
            "Stats {} [{} .. {:?}]: count={}",
            kind,
            window.start,
            window.end,
            stats.count
        );
        Ok(stats)
    }
}
