//! sensor_bridge - MQTT listener + query API
//!
//! Usage:
//!   cargo run --release --bin sensor_bridge
//!
//! Configuration comes from the environment (or `.env`), see `ServiceConfig`.

use dotenv::dotenv;
use log::{error, info};
use sensor_bridge::{SensorKind, SensorService, ServiceConfig};

#[tokio::main]
async fn main() {
    dotenv().ok();

    let config = match ServiceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            // Logger is not up yet
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    };

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.rust_log));
    // rumqttc is chatty at info; keep it quiet unless asked for
    if !config.rust_log.contains("rumqttc") {
        builder.filter_module("rumqttc", log::LevelFilter::Warn);
    }
    builder.target(env_logger::Target::Stderr).init();

    info!("🚀 Starting sensor bridge...");
    info!("📊 Configuration:");
    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ HTTP: {}", config.http_addr);
    info!("   ├─ Broker: {}:{}", config.mqtt.host, config.mqtt.port);
    let topics: Vec<String> = SensorKind::ALL
        .iter()
        .map(|kind| kind.channel(&config.mqtt.topic_prefix))
        .collect();
    info!("   └─ Channels: {}", topics.join(", "));

    let service = match SensorService::start(config).await {
        Ok(service) => service,
        Err(e) => {
            error!("❌ Failed to start: {}", e);
            std::process::exit(1);
        }
    };

    info!("🔄 Press CTRL+C to shutdown gracefully");

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("❌ Failed to listen for CTRL+C: {}", err);
    }
    info!("⚠️  Received CTRL+C, shutting down...");

    if let Err(e) = service.shutdown().await {
        error!("❌ Shutdown error: {}", e);
        std::process::exit(1);
    }
}
