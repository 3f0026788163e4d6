//! Transport Listener - long-lived MQTT subscription
//!
//! ```text
//! broker ──▶ rumqttc EventLoop ──publish──▶ mpsc ──▶ run_ingestion ──▶ ReadingStore
//! ```
//!
//! The event loop only forwards; decoding and persistence happen on the
//! ingestion task. Delivery is at-most-once: QoS 0, clean session, nothing
//! buffered across a disconnect. The event loop never waits on ingestion:
//! a publish arriving while the inbound channel is full is dropped and
//! counted, so keep-alive pings keep flowing.

pub mod backoff;
pub mod ingest;

pub use backoff::ExponentialBackoff;
pub use ingest::{
    decode_payload, run_ingestion, ChannelMap, DecodeError, InboundMessage, IngestCounters,
    IngestError, IngestSnapshot, Ingestor,
};

use crate::config::MqttSettings;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, SubscribeReasonCode};
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Capacity of the client → event loop request queue
const REQUEST_CAPACITY: usize = 16;

/// Result of queueing one subscription per channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeOutcome {
    pub queued: usize,
    pub failed: usize,
}

pub struct MqttListener {
    settings: MqttSettings,
    channels: ChannelMap,
    tx: mpsc::Sender<InboundMessage>,
    counters: Arc<IngestCounters>,
}

impl MqttListener {
    pub fn new(
        settings: MqttSettings,
        channels: ChannelMap,
        tx: mpsc::Sender<InboundMessage>,
        counters: Arc<IngestCounters>,
    ) -> Self {
        Self {
            settings,
            channels,
            tx,
            counters,
        }
    }

    fn mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.settings.client_id.clone(),
            self.settings.host.clone(),
            self.settings.port,
        );
        options.set_keep_alive(self.settings.keep_alive);
        options.set_clean_session(true);
        options
    }

    /// Poll the connection forever, reconnecting with backoff on every error
    ///
    /// Returns only when the ingestion side has hung up.
    pub async fn run(self) {
        log::info!(
            "🔌 Connecting to MQTT broker: {}:{} (client id: {})",
            self.settings.host,
            self.settings.port,
            self.settings.client_id
        );

        let (client, mut eventloop) = AsyncClient::new(self.mqtt_options(), REQUEST_CAPACITY);
        let mut backoff =
            ExponentialBackoff::new(self.settings.reconnect_initial, self.settings.reconnect_max);

        loop {
            match eventloop.poll().await {
                Ok(event) => {
                    if let Event::Incoming(Packet::ConnAck(_)) = &event {
                        backoff.reset();
                    }
                    if self.handle_event(&client, event).await.is_break() {
                        break;
                    }
                }
                Err(e) => {
                    log::error!("❌ MQTT connection error: {}", e);
                    backoff.sleep().await;
                }
            }
        }

        log::info!("✅ MQTT listener stopped");
    }

    async fn handle_event(&self, client: &AsyncClient, event: Event) -> ControlFlow<()> {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                log::info!(
                    "✅ Connected to MQTT broker (session present: {})",
                    ack.session_present
                );
                self.subscribe_all(client);
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                let rejected = ack
                    .return_codes
                    .iter()
                    .filter(|code| matches!(code, SubscribeReasonCode::Failure))
                    .count();
                if rejected > 0 {
                    log::warn!("⚠️  Broker rejected {} subscription(s) (pkid {})", rejected, ack.pkid);
                }
            }
            Event::Incoming(Packet::Publish(publish)) => {
                let message = InboundMessage::new(publish.topic, publish.payload.to_vec());
                match self.tx.try_send(message) {
                    Ok(()) => {}
                    Err(TrySendError::Full(dropped)) => {
                        self.counters.record_overflow();
                        log::warn!("⚠️  Ingestion backlog full, dropped message on {}", dropped.topic);
                    }
                    Err(TrySendError::Closed(_)) => {
                        log::warn!("⚠️  Ingestion channel closed, stopping MQTT listener");
                        return ControlFlow::Break(());
                    }
                }
            }
            Event::Incoming(Packet::Disconnect) => {
                log::warn!("⚠️  Broker sent DISCONNECT");
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }

    /// Queue a subscription for every channel; one failure does not stop the rest
    fn subscribe_all(&self, client: &AsyncClient) -> SubscribeOutcome {
        let mut outcome = SubscribeOutcome { queued: 0, failed: 0 };
        for (topic, kind) in self.channels.topics() {
            match client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                Ok(()) => {
                    log::info!("   ├─ Subscribed to {} ({})", topic, kind);
                    outcome.queued += 1;
                }
                Err(e) => {
                    log::error!("   ├─ ✗ Failed to subscribe to {}: {}", topic, e);
                    outcome.failed += 1;
                }
            }
        }
        log::info!(
            "   └─ {} of {} channel subscriptions queued",
            outcome.queued,
            outcome.queued + outcome.failed
        );
        outcome
    }
}
