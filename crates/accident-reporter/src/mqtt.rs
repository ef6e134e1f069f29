//! MQTT push notifications
//!
//! Notifications are published with QoS 1 and a send only succeeds once the
//! broker has acknowledged that publish. The event loop runs on the tokio
//! runtime the notifier was created on; [`NotificationSender::send`] blocks on
//! that runtime and must be called from a thread outside it, such as the
//! detector thread.

use std::time::Duration;

use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS};
use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{AccidentPayload, BackendError, NotificationSender};

/// MQTT broker configuration
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// Notifications go to `<topic_prefix>/<token>`
    pub topic_prefix: String,
    /// How long one notification may wait for the broker's acknowledgement
    pub ack_timeout: Duration,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "accident-sentinel".to_string(),
            topic_prefix: "accidents".to_string(),
            ack_timeout: Duration::from_secs(5),
        }
    }
}

/// Publish progress reported by the event loop
#[derive(Debug, Clone, PartialEq, Eq)]
enum Delivery {
    /// Publish written to the broker under this packet id
    Sent(u16),
    /// Broker acknowledged this packet id
    Acked(u16),
    /// Connection failed; unacknowledged publishes are lost for now
    Failed(String),
}

/// Publishes each notification to the recipient's own topic
pub struct MqttNotifier {
    client: AsyncClient,
    runtime: Handle,
    deliveries: broadcast::Sender<Delivery>,
    /// One publish in flight at a time, so packet ids map to sends
    in_flight: Mutex<()>,
    topic_prefix: String,
    ack_timeout: Duration,
}

impl MqttNotifier {
    /// Create the client and drive its event loop on the current tokio runtime
    ///
    /// The runtime must be multi-threaded.
    pub fn connect(config: &MqttConfig) -> Result<Self, BackendError> {
        let runtime = Handle::try_current()
            .map_err(|e| BackendError::Network(format!("no tokio runtime: {}", e)))?;

        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, mut eventloop) = AsyncClient::new(options, 64);
        let (deliveries, _) = broadcast::channel(64);
        let events = deliveries.clone();

        runtime.spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!(target: "reporter", "MQTT connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(ack))) => {
                        let _ = events.send(Delivery::Acked(ack.pkid));
                    }
                    Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                        let _ = events.send(Delivery::Sent(pkid));
                    }
                    Ok(Event::Incoming(incoming)) => {
                        debug!(target: "reporter", "MQTT incoming: {:?}", incoming);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(target: "reporter", "MQTT error: {}", e);
                        let _ = events.send(Delivery::Failed(e.to_string()));
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });

        info!(
            target: "reporter",
            "Notifications via MQTT broker {}:{}",
            config.host,
            config.port
        );
        Ok(Self {
            client,
            runtime,
            deliveries,
            in_flight: Mutex::new(()),
            topic_prefix: config.topic_prefix.trim_end_matches('/').to_string(),
            ack_timeout: config.ack_timeout,
        })
    }

    fn topic(&self, token: &str) -> String {
        format!("{}/{}", self.topic_prefix, token)
    }
}

/// Wait until the first publish seen after subscribing is acknowledged
async fn acknowledged(deliveries: &mut broadcast::Receiver<Delivery>) -> Result<u16, BackendError> {
    let mut pkid = None;
    loop {
        match deliveries.recv().await {
            Ok(Delivery::Sent(id)) if pkid.is_none() => pkid = Some(id),
            Ok(Delivery::Acked(id)) if pkid == Some(id) => return Ok(id),
            Ok(Delivery::Failed(reason)) => return Err(BackendError::Network(reason)),
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => {
                return Err(BackendError::Network("MQTT event loop stopped".to_string()))
            }
        }
    }
}

impl NotificationSender for MqttNotifier {
    fn send(&self, token: &str, payload: &AccidentPayload) -> Result<String, BackendError> {
        let message_id = Uuid::new_v4().to_string();

        let mut body = payload.clone();
        body.insert("message_id".to_string(), message_id.clone());
        let bytes = serde_json::to_vec(&body)?;

        let _in_flight = self.in_flight.lock();
        let mut deliveries = self.deliveries.subscribe();
        let topic = self.topic(token);
        let ack_timeout = self.ack_timeout;

        let pkid = self.runtime.block_on(async {
            self.client
                .publish(topic, QoS::AtLeastOnce, false, bytes)
                .await
                .map_err(|e| BackendError::Network(e.to_string()))?;

            tokio::time::timeout(ack_timeout, acknowledged(&mut deliveries))
                .await
                .map_err(|_| {
                    BackendError::Network(format!("no acknowledgement within {:?}", ack_timeout))
                })?
        })?;

        debug!(target: "reporter", "Notification {} acknowledged as packet {}", message_id, pkid);
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AccidentRecord, AccidentReporter, DirectoryBlobStore, JsonTokenStore, ReporterConfig};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Instant;
    use vehicle::VehicleInfo;

    fn unreachable_broker() -> MqttConfig {
        MqttConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            topic_prefix: "accidents/".to_string(),
            ack_timeout: Duration::from_secs(1),
            ..Default::default()
        }
    }

    fn notifier(runtime: &tokio::runtime::Runtime) -> MqttNotifier {
        let _guard = runtime.enter();
        MqttNotifier::connect(&unreachable_broker()).unwrap()
    }

    #[test]
    fn test_connect_needs_runtime() {
        assert!(matches!(
            MqttNotifier::connect(&MqttConfig::default()),
            Err(BackendError::Network(_))
        ));
    }

    #[test]
    fn test_unreachable_broker_fails_send() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let notifier = notifier(&runtime);
        assert_eq!(notifier.topic("abc"), "accidents/abc");

        let payload = AccidentPayload::from([("video".to_string(), "1.mp4".to_string())]);
        let started = Instant::now();
        assert!(matches!(
            notifier.send("abc", &payload),
            Err(BackendError::Network(_))
        ));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_report_fails_when_broker_unreachable() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let captures = dir.path().join("captures");
        std::fs::create_dir_all(&captures).unwrap();
        std::fs::write(captures.join("1000.mp4"), b"video").unwrap();

        let tokens = JsonTokenStore::new(dir.path().join("data"));
        tokens
            .publish(
                "fcm_token",
                1,
                BTreeMap::from([("uid-1".to_string(), "token-1".to_string())]),
            )
            .unwrap();

        let reporter = AccidentReporter::new(
            ReporterConfig {
                captures_dir: captures,
                ..Default::default()
            },
            Arc::new(DirectoryBlobStore::new(dir.path().join("uploads"))),
            Arc::new(tokens),
            Arc::new(notifier(&runtime)),
        );
        let record = AccidentRecord::new(30.0, 31.0, 1000, "1000.mp4", VehicleInfo::default());

        let outcome = reporter.submit(&record).unwrap();
        assert!(outcome.uploaded);
        assert_eq!(outcome.notified, 0);
        assert_eq!(outcome.failed, 1);
        assert!(!reporter.report(&record));
    }

    #[tokio::test]
    async fn test_ack_must_match_own_publish() {
        let (deliveries, _) = broadcast::channel(8);
        let mut receiver = deliveries.subscribe();
        deliveries.send(Delivery::Acked(3)).unwrap();
        deliveries.send(Delivery::Sent(7)).unwrap();
        deliveries.send(Delivery::Acked(3)).unwrap();
        deliveries.send(Delivery::Acked(7)).unwrap();

        assert_eq!(acknowledged(&mut receiver).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_connection_failure_ends_wait() {
        let (deliveries, _) = broadcast::channel(8);
        let mut receiver = deliveries.subscribe();
        deliveries.send(Delivery::Sent(1)).unwrap();
        deliveries
            .send(Delivery::Failed("connection refused".to_string()))
            .unwrap();

        assert!(matches!(
            acknowledged(&mut receiver).await,
            Err(BackendError::Network(_))
        ));
    }
}
