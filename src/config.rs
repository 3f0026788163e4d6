use std::env;
use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_DB_PATH: &str = "data/sensor_data.db";
const DEFAULT_HTTP_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_BROKER_URL: &str = "mqtt://test.mosquitto.org:1883";
const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_TOPIC_PREFIX: &str = "sensors";

#[derive(Debug)]
pub enum ConfigError {
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// MQTT connection settings
#[derive(Debug, Clone, PartialEq)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub topic_prefix: String,
    pub keep_alive: Duration,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
}

impl MqttSettings {
    /// Split `mqtt://host[:port]` (or `tcp://`) into host and port
    pub fn parse_broker_url(url: &str) -> Result<(String, u16), ConfigError> {
        let rest = url
            .strip_prefix("mqtt://")
            .or_else(|| url.strip_prefix("tcp://"))
            .ok_or_else(|| {
                ConfigError::InvalidValue(format!(
                    "MQTT_BROKER_URL must start with mqtt:// or tcp://, got {}",
                    url
                ))
            })?;
        let rest = rest.trim_end_matches('/');

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    ConfigError::InvalidValue(format!("MQTT_BROKER_URL has an invalid port: {}", url))
                })?;
                (host, port)
            }
            None => (rest, DEFAULT_MQTT_PORT),
        };

        if host.is_empty() {
            return Err(ConfigError::InvalidValue(format!(
                "MQTT_BROKER_URL has no host: {}",
                url
            )));
        }

        Ok((host.to_string(), port))
    }
}

/// Service configuration loaded from environment variables
///
/// Environment variables:
/// - `SENSOR_DB_PATH` (default: data/sensor_data.db)
/// - `HTTP_BIND_ADDR` (default: 0.0.0.0:3000)
/// - `MQTT_BROKER_URL` (default: mqtt://test.mosquitto.org:1883)
/// - `MQTT_CLIENT_ID` (default: sensor-bridge-<pid>)
/// - `MQTT_TOPIC_PREFIX` (default: sensors)
/// - `MQTT_KEEP_ALIVE_SECS` (default: 30)
/// - `INGEST_CHANNEL_BUFFER` (default: 1000)
/// - `RECONNECT_INITIAL_MS` / `RECONNECT_MAX_MS` (default: 1000 / 30000)
/// - `RUST_LOG` (default: info)
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub db_path: String,
    pub http_addr: SocketAddr,
    pub mqtt: MqttSettings,
    pub channel_buffer: usize,
    pub rust_log: String,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys fall back to defaults,
    /// set-but-malformed keys are errors
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let db_path = get("SENSOR_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());

        let http_addr_str = get("HTTP_BIND_ADDR").unwrap_or_else(|| DEFAULT_HTTP_BIND_ADDR.to_string());
        let http_addr = http_addr_str.parse::<SocketAddr>().map_err(|_| {
            ConfigError::InvalidValue(format!("HTTP_BIND_ADDR is not a socket address: {}", http_addr_str))
        })?;

        let broker_url = get("MQTT_BROKER_URL").unwrap_or_else(|| DEFAULT_BROKER_URL.to_string());
        let (host, port) = MqttSettings::parse_broker_url(&broker_url)?;

        let client_id = get("MQTT_CLIENT_ID")
            .unwrap_or_else(|| format!("sensor-bridge-{}", std::process::id()));

        let topic_prefix = lookup("MQTT_TOPIC_PREFIX").unwrap_or_else(|| DEFAULT_TOPIC_PREFIX.to_string());

        let keep_alive_secs: u64 = parse_or(&get, "MQTT_KEEP_ALIVE_SECS", 30)?;
        if keep_alive_secs < 5 {
            return Err(ConfigError::InvalidValue(
                "MQTT_KEEP_ALIVE_SECS must be at least 5".to_string(),
            ));
        }

        let reconnect_initial_ms: u64 = parse_or(&get, "RECONNECT_INITIAL_MS", 1_000)?;
        let reconnect_max_ms: u64 = parse_or(&get, "RECONNECT_MAX_MS", 30_000)?;

        let channel_buffer: usize = parse_or(&get, "INGEST_CHANNEL_BUFFER", 1_000)?;
        if channel_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "INGEST_CHANNEL_BUFFER must be greater than 0".to_string(),
            ));
        }

        let rust_log = get("RUST_LOG").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            db_path,
            http_addr,
            mqtt: MqttSettings {
                host,
                port,
                client_id,
                topic_prefix,
                keep_alive: Duration::from_secs(keep_alive_secs),
                reconnect_initial: Duration::from_millis(reconnect_initial_ms),
                reconnect_max: Duration::from_millis(reconnect_max_ms),
            },
            channel_buffer,
            rust_log,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(format!("{} could not be parsed: {}", key, raw))),
        None => Ok(default),
    }
}
