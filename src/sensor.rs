//! Sensor kinds and the persisted reading type

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of measurement types published by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Temperature,
    Humidity,
    Pressure,
}

impl SensorKind {
    pub const ALL: [SensorKind; 3] = [
        SensorKind::Temperature,
        SensorKind::Humidity,
        SensorKind::Pressure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Humidity => "humidity",
            SensorKind::Pressure => "pressure",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "°C",
            SensorKind::Humidity => "%",
            SensorKind::Pressure => "hPa",
        }
    }

    /// Topic name this kind is published on, e.g. `sensors/temperature`
    pub fn channel(&self, prefix: &str) -> String {
        let prefix = prefix.trim_end_matches('/');
        if prefix.is_empty() {
            self.as_str().to_string()
        } else {
            format!("{}/{}", prefix, self.as_str())
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSensorKind(pub String);

impl fmt::Display for UnknownSensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown sensor kind: {}", self.0)
    }
}

impl std::error::Error for UnknownSensorKind {}

impl FromStr for SensorKind {
    type Err = UnknownSensorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SensorKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownSensorKind(s.to_string()))
    }
}

/// A single persisted measurement
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub sensor_kind: SensorKind,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub source_channel: String,
}

impl Reading {
    pub fn new(
        sensor_kind: SensorKind,
        value: f64,
        timestamp: DateTime<Utc>,
        source_channel: impl Into<String>,
    ) -> Self {
        Self {
            sensor_kind,
            value,
            timestamp,
            source_channel: source_channel.into(),
        }
    }
}

/// Wire shape of a reading, field names match the dashboard client
#[derive(Debug, Clone, Serialize)]
pub struct ReadingView<'a> {
    pub sensor_type: SensorKind,
    pub value: f64,
    pub unit: &'static str,
    pub timestamp: DateTime<Utc>,
    pub raw_topic: &'a str,
}

impl<'a> From<&'a Reading> for ReadingView<'a> {
    fn from(reading: &'a Reading) -> Self {
        Self {
            sensor_type: reading.sensor_kind,
            value: reading.value,
            unit: reading.sensor_kind.unit(),
            timestamp: reading.timestamp,
            raw_topic: &reading.source_channel,
        }
    }
}
