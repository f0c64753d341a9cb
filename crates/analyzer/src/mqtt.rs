//! MQTT transport
//!
//! Bridges the broker to the analyzer: inbound telemetry publishes are
//! forwarded to the ingest loop, and alerts are published through the same
//! client connection.

use crate::config::BrokerConfig;
use analyzer_lib::alerts::AlertPublisher;
use analyzer_lib::health::{components, HealthRegistry};
use analyzer_lib::{IngestHandle, SinkError};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Pause between reconnect attempts after a connection error
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Build client options from configuration
pub fn mqtt_options(config: &BrokerConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
    options.set_clean_session(true);
    options
}

/// Create the publisher and listener halves of one broker connection
pub fn connect(config: &BrokerConfig) -> (MqttPublisher, MqttListener) {
    let (client, eventloop) =
        AsyncClient::new(mqtt_options(config), config.request_capacity.max(1));
    (
        MqttPublisher {
            client: client.clone(),
        },
        MqttListener {
            client,
            eventloop,
            filter: config.telemetry_filter.clone(),
        },
    )
}

/// Publishes alerts on the broker connection
///
/// Requests are queued with `try_publish`, so a full client queue is reported
/// as a failure instead of parking the dispatcher.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

#[async_trait]
impl AlertPublisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), SinkError> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| SinkError::Publish(e.to_string()))
    }
}

/// Drives the MQTT event loop and forwards telemetry to the ingest loop
pub struct MqttListener {
    client: AsyncClient,
    eventloop: EventLoop,
    filter: String,
}

impl MqttListener {
    pub async fn run(
        mut self,
        ingest: IngestHandle,
        health: HealthRegistry,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(filter = %self.filter, "Starting MQTT listener");

        loop {
            tokio::select! {
                event = self.eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            info!("Connected to MQTT broker");
                            // Subscriptions do not survive a clean-session reconnect
                            if let Err(e) = self.client.try_subscribe(&self.filter, QoS::AtMostOnce) {
                                warn!(error = %e, filter = %self.filter, "Failed to subscribe");
                                health.set_degraded(components::BUS, e.to_string()).await;
                            } else {
                                health.set_healthy(components::BUS).await;
                            }
                            health.set_ready(true).await;
                        }
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            let delivered = ingest
                                .deliver_raw(publish.topic, publish.payload.to_vec())
                                .await;
                            if delivered.is_err() {
                                warn!("Ingest loop stopped, closing MQTT listener");
                                break;
                            }
                        }
                        Ok(other) => {
                            debug!(event = ?other, "MQTT event");
                        }
                        Err(e) => {
                            warn!(error = %e, "MQTT connection error, retrying");
                            health.set_unhealthy(components::BUS, e.to_string()).await;
                            tokio::time::sleep(RECONNECT_DELAY).await;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down MQTT listener");
                    if let Err(e) = self.client.try_disconnect() {
                        debug!(error = %e, "Disconnect request not queued");
                    }
                    break;
                }
            }
        }
    }
}
