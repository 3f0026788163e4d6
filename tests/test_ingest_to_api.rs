//! Integration tests: inbound message → SQLite store → query API
//!
//! Drives the real `Ingestor`, `SqliteReadingStore` and axum router together,
//! with no broker involved.

#[cfg(test)]
mod ingest_to_api_tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        Router,
    };
    use chrono::{DateTime, Utc};
    use sensor_bridge::api::{create_router, ApiState};
    use sensor_bridge::clock::IngestClock;
    use sensor_bridge::listener::{run_ingestion, ChannelMap, InboundMessage, IngestCounters, Ingestor};
    use sensor_bridge::{Reading, ReadingStore, SensorKind, SqliteReadingStore, TimeWindow};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    struct Harness {
        _dir: TempDir,
        store: Arc<dyn ReadingStore>,
        ingestor: Ingestor,
        counters: Arc<IngestCounters>,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store: Arc<dyn ReadingStore> =
                Arc::new(SqliteReadingStore::open(dir.path().join("sensors.db")).unwrap());
            let counters = Arc::new(IngestCounters::default());
            let ingestor = Ingestor::new(
                ChannelMap::with_prefix("sensors"),
                store.clone(),
                Arc::new(IngestClock::new()),
                counters.clone(),
            );
            Self { _dir: dir, store, ingestor, counters }
        }

        fn router(&self) -> Router {
            create_router(ApiState::new(self.store.clone(), self.counters.clone()))
        }

        async fn publish(&self, topic: &str, payload: &str) {
            let _ = self.ingestor.ingest(&InboundMessage::new(topic, payload)).await;
        }
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[tokio::test]
    async fn test_published_value_becomes_latest() {
        let harness = Harness::new();

        harness.publish("sensors/temperature", "21.5").await;

        let latest = harness.store.most_recent(SensorKind::Temperature).await.unwrap();
        assert_eq!(latest.unwrap().value, 21.5);

        let (status, body) = get_json(harness.router(), "/api/latest").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["temperature"]["value"], json!(21.5));
        assert_eq!(body["temperature"]["unit"], json!("°C"));
        assert_eq!(body["humidity"], Value::Null);
        assert_eq!(body["pressure"], Value::Null);
    }

    #[tokio::test]
    async fn test_garbage_payload_leaves_store_unchanged() {
        let harness = Harness::new();
        harness.publish("sensors/temperature", "20.0").await;

        // 1. Non-numeric body on a known topic
        harness.publish("sensors/temperature", "abc").await;
        // 2. Valid number on an unknown topic
        harness.publish("sensors/wind", "12.0").await;

        assert_eq!(harness.store.count().await.unwrap(), 1);

        let (_, health) = get_json(harness.router(), "/api/health").await;
        assert_eq!(health["status"], json!("ok"));
        assert_eq!(health["ingest"]["received"], json!(3));
        assert_eq!(health["ingest"]["stored"], json!(1));
        assert_eq!(health["ingest"]["rejected_payload"], json!(1));
        assert_eq!(health["ingest"]["rejected_channel"], json!(1));

        // Service still answers after the bad input
        let (status, body) = get_json(harness.router(), "/api/latest").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["temperature"]["value"], json!(20.0));
    }

    #[tokio::test]
    async fn test_recorded_scenario() {
        let harness = Harness::new();
        for (secs, value) in [(10, 20.0), (20, 22.0), (30, 19.0)] {
            harness
                .store
                .insert(&Reading::new(SensorKind::Temperature, value, at(secs), "sensors/temperature"))
                .await
                .unwrap();
        }

        let latest = harness.store.most_recent(SensorKind::Temperature).await.unwrap().unwrap();
        assert_eq!(latest.value, 19.0);

        let range = harness
            .store
            .range(SensorKind::Temperature, TimeWindow::between(at(0), at(25)), None)
            .await
            .unwrap();
        let values: Vec<f64> = range.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![20.0, 22.0]);

        let stats = harness
            .store
            .stats(SensorKind::Temperature, TimeWindow::since(at(0)))
            .await
            .unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min, Some(19.0));
        assert_eq!(stats.max, Some(22.0));
        assert!((stats.average.unwrap() - 61.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_history_and_stats_over_ingested_readings() {
        let harness = Harness::new();
        for payload in ["40.0", "42.0", "44.0", "not-a-number", "46.0"] {
            harness.publish("sensors/humidity", payload).await;
        }

        let (status, body) = get_json(harness.router(), "/api/history/humidity").await;
        assert_eq!(status, StatusCode::OK);
        let values: Vec<f64> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["value"].as_f64().unwrap())
            .collect();
        assert_eq!(values, vec![40.0, 42.0, 44.0, 46.0]);

        let (_, limited) = get_json(harness.router(), "/api/history/humidity?limit=2").await;
        assert_eq!(limited.as_array().unwrap().len(), 2);

        let (status, stats) = get_json(harness.router(), "/api/stats/humidity").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["count"], json!(4));
        assert_eq!(stats["min"], json!(40.0));
        assert_eq!(stats["max"], json!(46.0));
        assert_eq!(stats["avg"], json!(43.0));

        let (_, empty) = get_json(harness.router(), "/api/stats/pressure").await;
        assert_eq!(empty, json!({}));

        let (_, all) = get_json(harness.router(), "/api/history?hours=1").await;
        assert_eq!(all["humidity"].as_array().unwrap().len(), 4);
        assert_eq!(all["temperature"], json!([]));
    }

    #[tokio::test]
    async fn test_unknown_kind_rejected() {
        let harness = Harness::new();
        let (status, body) = get_json(harness.router(), "/api/history/wind").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("wind"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_inserts_to_distinct_kinds() {
        let harness = Harness::new();

        let mut handles = Vec::new();
        for (topic, base) in [("sensors/temperature", 20.0), ("sensors/pressure", 1000.0)] {
            let ingestor = harness.ingestor.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    let payload = format!("{}", base + i as f64);
                    ingestor.ingest(&InboundMessage::new(topic, payload)).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(harness.store.count().await.unwrap(), 50);
        let window = TimeWindow::since(at(0));
        for kind in [SensorKind::Temperature, SensorKind::Pressure] {
            let readings = harness.store.range(kind, window, None).await.unwrap();
            assert_eq!(readings.len(), 25);
            assert!(readings.windows(2).all(|pair| pair[0].timestamp <= pair[1].timestamp));
        }
    }

    #[tokio::test]
    async fn test_reading_after_restart_is_newest_despite_clock_step_back() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("sensors.db");

        // 1. Previous run stamped a reading ten minutes ahead of the current wall clock
        {
            let store = SqliteReadingStore::open(&db_path).unwrap();
            let ahead = Utc::now() + chrono::TimeDelta::try_minutes(10).unwrap();
            store
                .insert(&Reading::new(SensorKind::Temperature, 1.0, ahead, "sensors/temperature"))
                .await
                .unwrap();
        }

        // 2. Restart: reopen and resume ingestion from what is on disk
        let store: Arc<dyn ReadingStore> = Arc::new(SqliteReadingStore::open(&db_path).unwrap());
        let ingestor = Ingestor::resume(
            ChannelMap::with_prefix("sensors"),
            store.clone(),
            Arc::new(IngestCounters::default()),
        )
        .await
        .unwrap();
        ingestor
            .ingest(&InboundMessage::new("sensors/temperature", "2.0"))
            .await
            .unwrap();

        // 3. The reading just ingested is the latest, and time order matches insertion order
        let latest = store.most_recent(SensorKind::Temperature).await.unwrap().unwrap();
        assert_eq!(latest.value, 2.0);

        let readings = store
            .range(SensorKind::Temperature, TimeWindow::since(at(0)), None)
            .await
            .unwrap();
        let values: Vec<f64> = readings.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![1.0, 2.0]);
    }

    #[tokio::test]
    async fn test_channel_fed_ingestion() {
        let harness = Harness::new();
        let (tx, rx) = mpsc::channel(8);
        let ingestion = tokio::spawn(run_ingestion(rx, harness.ingestor.clone()));

        for kind in SensorKind::ALL {
            tx.send(InboundMessage::new(kind.channel("sensors"), "1.5")).await.unwrap();
        }
        drop(tx);
        ingestion.await.unwrap();

        let (_, body) = get_json(harness.router(), "/api/latest").await;
        for kind in SensorKind::ALL {
            assert_eq!(body[kind.as_str()]["value"], json!(1.5), "{}", kind);
            assert_eq!(body[kind.as_str()]["raw_topic"], json!(kind.channel("sensors")));
        }
    }
}
