//! Inbound message → persisted reading
//!
//! Single insertion path fed by the MQTT event loop through an mpsc channel.
//! Every failure here is contained: the message is dropped, logged and counted.

use crate::clock::IngestClock;
use crate::sensor::{Reading, SensorKind};
use crate::store::{ReadingStore, StoreError};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};

const THROUGHPUT_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Raw publish forwarded from the transport
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Fixed 1:1 mapping between topic names and sensor kinds
#[derive(Debug, Clone)]
pub struct ChannelMap {
    by_topic: HashMap<String, SensorKind>,
}

impl ChannelMap {
    pub fn with_prefix(prefix: &str) -> Self {
        let by_topic = SensorKind::ALL
            .into_iter()
            .map(|kind| (kind.channel(prefix), kind))
            .collect();
        Self { by_topic }
    }

    /// Exact topic match, no wildcards
    pub fn resolve(&self, topic: &str) -> Option<SensorKind> {
        self.by_topic.get(topic).copied()
    }

    /// Topics to subscribe to, in `SensorKind::ALL` order
    pub fn topics(&self) -> Vec<(String, SensorKind)> {
        let mut topics: Vec<(String, SensorKind)> =
            self.by_topic.iter().map(|(topic, kind)| (topic.clone(), *kind)).collect();
        topics.sort_by_key(|(_, kind)| SensorKind::ALL.iter().position(|k| k == kind));
        topics
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    NotUtf8,
    NotANumber(String),
    NotFinite(f64),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::NotUtf8 => write!(f, "payload is not valid UTF-8"),
            DecodeError::NotANumber(text) => write!(f, "payload is not a number: {:?}", text),
            DecodeError::NotFinite(v) => write!(f, "payload is not a finite number: {}", v),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Decode a bare numeric payload such as `b"21.5"`
///
/// Surrounding whitespace is ignored; anything else after the number is rejected.
pub fn decode_payload(payload: &[u8]) -> Result<f64, DecodeError> {
    let text = std::str::from_utf8(payload).map_err(|_| DecodeError::NotUtf8)?;
    let text = text.trim();

    let value: f64 = text
        .parse()
        .map_err(|_| DecodeError::NotANumber(text.chars().take(32).collect()))?;

    if !value.is_finite() {
        return Err(DecodeError::NotFinite(value));
    }

    Ok(value)
}

#[derive(Debug)]
pub enum IngestError {
    Decode(DecodeError),
    UnknownChannel(String),
    Store(StoreError),
}

impl From<DecodeError> for IngestError {
    fn from(err: DecodeError) -> Self {
        IngestError::Decode(err)
    }
}

impl From<StoreError> for IngestError {
    fn from(err: StoreError) -> Self {
        IngestError::Store(err)
    }
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestError::Decode(e) => write!(f, "Decode error: {}", e),
            IngestError::UnknownChannel(topic) => write!(f, "Unknown channel: {}", topic),
            IngestError::Store(e) => write!(f, "Reading lost: {}", e),
        }
    }
}

impl std::error::Error for IngestError {}

/// Ingestion counters, shared with the health endpoint
#[derive(Debug, Default)]
pub struct IngestCounters {
    received: AtomicU64,
    stored: AtomicU64,
    rejected_payload: AtomicU64,
    rejected_channel: AtomicU64,
    store_failures: AtomicU64,
    dropped_overflow: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestSnapshot {
    pub received: u64,
    pub stored: u64,
    pub rejected_payload: u64,
    pub rejected_channel: u64,
    pub store_failures: u64,
    pub dropped_overflow: u64,
}

impl IngestCounters {
    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            received: self.received.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            rejected_payload: self.rejected_payload.load(Ordering::Relaxed),
            rejected_channel: self.rejected_channel.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            dropped_overflow: self.dropped_overflow.load(Ordering::Relaxed),
        }
    }

    /// Message dropped before ingestion because the inbound channel was full
    pub fn record_overflow(&self) {
        self.dropped_overflow.fetch_add(1, Ordering::Relaxed);
    }

    fn record(&self, result: &Result<Reading, IngestError>) {
        self.received.fetch_add(1, Ordering::Relaxed);
        let counter = match result {
            Ok(_) => &self.stored,
            Err(IngestError::Decode(_)) => &self.rejected_payload,
            Err(IngestError::UnknownChannel(_)) => &self.rejected_channel,
            Err(IngestError::Store(_)) => &self.store_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Turns inbound messages into stored readings
#[derive(Clone)]
pub struct Ingestor {
    channels: ChannelMap,
    store: Arc<dyn ReadingStore>,
    clock: Arc<IngestClock>,
    counters: Arc<IngestCounters>,
}

impl Ingestor {
    pub fn new(
        channels: ChannelMap,
        store: Arc<dyn ReadingStore>,
        clock: Arc<IngestClock>,
        counters: Arc<IngestCounters>,
    ) -> Self {
        Self {
            channels,
            store,
            clock,
            counters,
        }
    }

    /// Ingestor whose clock continues after the newest reading already stored
    pub async fn resume(
        channels: ChannelMap,
        store: Arc<dyn ReadingStore>,
        counters: Arc<IngestCounters>,
    ) -> Result<Self, StoreError> {
        let clock = match store.latest_timestamp().await? {
            Some(latest) => {
                log::info!("   ├─ Ingestion clock resumes after {}", latest);
                IngestClock::starting_at(latest)
            }
            None => IngestClock::new(),
        };
        Ok(Self::new(channels, store, Arc::new(clock), counters))
    }

    pub fn counters(&self) -> Arc<IngestCounters> {
        self.counters.clone()
    }

    /// Decode and classify a message without touching the store
    pub fn to_reading(&self, message: &InboundMessage) -> Result<Reading, IngestError> {
        let value = decode_payload(&message.payload)?;
        let kind = self
            .channels
            .resolve(&message.topic)
            .ok_or_else(|| IngestError::UnknownChannel(message.topic.clone()))?;

        Ok(Reading::new(kind, value, self.clock.now(), message.topic.as_str()))
    }

    /// Handle one message end to end; the error is informational only
    pub async fn ingest(&self, message: &InboundMessage) -> Result<Reading, IngestError> {
        let result = match self.to_reading(message) {
            Ok(reading) => match self.store.insert(&reading).await {
                Ok(()) => Ok(reading),
                Err(e) => Err(IngestError::Store(e)),
            },
            Err(e) => Err(e),
        };

        self.counters.record(&result);

        match &result {
            Ok(reading) => log::debug!("Stored {}: {}", reading.sensor_kind, reading.value),
            Err(IngestError::Store(e)) => {
                log::error!("❌ Failed to store reading from {}: {}", message.topic, e)
            }
            Err(e) => log::warn!("⚠️  Dropped message on {}: {}", message.topic, e),
        }

        result
    }
}

/// Consume inbound messages until the channel closes
pub async fn run_ingestion(mut rx: mpsc::Receiver<InboundMessage>, ingestor: Ingestor) {
    log::info!("🚀 Starting reading ingestion ({} backend)", ingestor.store.backend_type());

    let mut throughput_timer = interval(THROUGHPUT_LOG_INTERVAL);
    throughput_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    throughput_timer.tick().await;
    let mut last_stored = 0u64;

    loop {
        tokio::select! {
            message = rx.recv() => {
                match message {
                    Some(message) => {
                        let _ = ingestor.ingest(&message).await;
                    }
                    None => {
                        log::warn!("⚠️  Inbound channel closed, stopping ingestion");
                        break;
                    }
                }
            }

            _ = throughput_timer.tick() => {
                let snapshot = ingestor.counters.snapshot();
                log::info!(
                    "📊 Ingestion: {} stored in last {}s (total: received={} stored={} rejected={} lost={} overflow={})",
                    snapshot.stored - last_stored,
                    THROUGHPUT_LOG_INTERVAL.as_secs(),
                    snapshot.received,
                    snapshot.stored,
                    snapshot.rejected_payload + snapshot.rejected_channel,
                    snapshot.store_failures,
                    snapshot.dropped_overflow,
                );
                last_stored = snapshot.stored;
            }
        }
    }

    log::info!("✅ Reading ingestion stopped");
}
