//! sensor-bridge: MQTT sensor readings into SQLite, served over HTTP/JSON

pub mod aggregator;
pub mod api;
pub mod clock;
pub mod config;
pub mod listener;
pub mod sensor;
pub mod service;
pub mod sqlite_pragma;
pub mod store;

pub use aggregator::{Aggregator, WindowStats};
pub use config::{ConfigError, ServiceConfig};
pub use sensor::{Reading, SensorKind};
pub use service::{SensorService, ServiceError};
pub use store::{ReadingStore, SqliteReadingStore, StoreError, TimeWindow};
