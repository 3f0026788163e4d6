//! Service composition
//!
//! `SensorService::start` builds every component explicitly and returns a
//! handle that owns them; nothing lives in a global.
//!
//! ```text
//! MqttListener ──mpsc──▶ run_ingestion ──▶ SqliteReadingStore ◀── axum (api)
//! ```

use crate::api::{create_router, ApiState};
use crate::config::{ConfigError, ServiceConfig};
use crate::listener::{run_ingestion, ChannelMap, IngestCounters, Ingestor, MqttListener};
use crate::store::{ReadingStore, SqliteReadingStore, StoreError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Debug)]
pub enum ServiceError {
    Config(ConfigError),
    Store(StoreError),
    Io(std::io::Error),
}

impl From<ConfigError> for ServiceError {
    fn from(err: ConfigError) -> Self {
        ServiceError::Config(err)
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        ServiceError::Store(err)
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(err: std::io::Error) -> Self {
        ServiceError::Io(err)
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::Config(e) => write!(f, "Configuration error: {}", e),
            ServiceError::Store(e) => write!(f, "Reading store unavailable: {}", e),
            ServiceError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for ServiceError {}

/// Running service: MQTT listener, ingestion task and HTTP server
pub struct SensorService {
    store: Arc<dyn ReadingStore>,
    counters: Arc<IngestCounters>,
    local_addr: SocketAddr,
    listener: JoinHandle<()>,
    ingestion: JoinHandle<()>,
    http: JoinHandle<std::io::Result<()>>,
    http_shutdown: oneshot::Sender<()>,
}

impl SensorService {
    /// Open the store, then start ingestion and bind HTTP
    ///
    /// A store that cannot be opened is fatal and nothing is started.
    pub async fn start(config: ServiceConfig) -> Result<Self, ServiceError> {
        log::info!("🔧 Opening reading store...");
        let db_path = config.db_path.clone();
        let store = tokio::task::spawn_blocking(move || SqliteReadingStore::open(db_path))
            .await
            .map_err(StoreError::from)??;
        let store: Arc<dyn ReadingStore> = Arc::new(store);

        let existing = store.count().await?;
        log::info!("   └─ {} readings on disk ({} backend)", existing, store.backend_type());

        Self::start_with_store(config, store).await
    }

    /// Start on an already opened store
    pub async fn start_with_store(
        config: ServiceConfig,
        store: Arc<dyn ReadingStore>,
    ) -> Result<Self, ServiceError> {
        let channels = ChannelMap::with_prefix(&config.mqtt.topic_prefix);
        let counters = Arc::new(IngestCounters::default());

        // Bind first so a taken port fails before any background task exists
        let tcp = TcpListener::bind(config.http_addr).await?;
        let local_addr = tcp.local_addr()?;

        let (tx, rx) = mpsc::channel(config.channel_buffer);
        log::info!("✅ Inbound channel created (buffer: {})", config.channel_buffer);

        let ingestor = Ingestor::resume(channels.clone(), store.clone(), counters.clone()).await?;
        let ingestion = tokio::spawn(run_ingestion(rx, ingestor));
        log::info!("   ├─ ✅ Ingestion task spawned");

        let listener = tokio::spawn(MqttListener::new(config.mqtt.clone(), channels, tx, counters.clone()).run());
        log::info!("   ├─ ✅ MQTT listener spawned");

        let router = create_router(ApiState::new(store.clone(), counters.clone()));
        let (http_shutdown, shutdown_rx) = oneshot::channel::<()>();
        let http = tokio::spawn(async move {
            axum::serve(tcp, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });
        log::info!("   └─ ✅ Query API listening on http://{}", local_addr);

        Ok(Self {
            store,
            counters,
            local_addr,
            listener,
            ingestion,
            http,
            http_shutdown,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn store(&self) -> Arc<dyn ReadingStore> {
        self.store.clone()
    }

    pub fn counters(&self) -> Arc<IngestCounters> {
        self.counters.clone()
    }

    /// Stop taking requests, drop the broker connection and drain ingestion
    pub async fn shutdown(self) -> Result<(), ServiceError> {
        log::info!("⚠️  Shutting down sensor service...");
        let _ = self.http_shutdown.send(());

        // Aborting the listener drops its sender, which ends ingestion
        self.listener.abort();
        let _ = self.listener.await;
        let _ = self.ingestion.await;

        let result = join_http(self.http).await;

        let snapshot = self.counters.snapshot();
        log::info!(
            "✅ Sensor service stopped (received={} stored={})",
            snapshot.received,
            snapshot.stored
        );
        result
    }
}

async fn join_http(http: JoinHandle<std::io::Result<()>>) -> Result<(), ServiceError> {
    match http.await {
        Ok(result) => result.map_err(ServiceError::from),
        Err(e) => Err(ServiceError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("HTTP server task failed: {}", e),
        ))),
    }
}
