//! Alert dispatcher
//!
//! Runs as its own task behind a bounded queue. Each alert goes to the bus
//! publisher and to the daily alert log. Both sinks are driven together and
//! the publish is bounded by a timeout, so a stalled broker never holds back
//! the log or the detectors feeding the queue.

use super::Alert;
use crate::error::SinkError;
use crate::health::{components, HealthRegistry};
use crate::models::ALERT_TOPIC;
use crate::observability::{AnalyzerMetrics, StructuredLogger};
use crate::storage::DailyNdjson;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// File name (without extension) of the daily alert log
const ALERT_LOG_NAME: &str = "alerts";

/// Outbound seam for publishing serialized alerts
#[async_trait]
pub trait AlertPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), SinkError>;
}

/// Dispatcher configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub alert_topic: String,
    /// Queue depth between detectors and sinks
    pub channel_capacity: usize,
    /// Suppress repeats of the same (type, device, metric) within this many
    /// seconds of alert time; 0 disables suppression
    pub cooldown_secs: f64,
    /// Upper bound on a single bus publish
    pub publish_timeout_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            alert_topic: ALERT_TOPIC.to_string(),
            channel_capacity: 1024,
            cooldown_secs: 0.0,
            publish_timeout_ms: 5_000,
        }
    }
}

/// Producer side of the alert queue
#[derive(Clone)]
pub struct AlertSender {
    tx: mpsc::Sender<Alert>,
    metrics: AnalyzerMetrics,
}

impl AlertSender {
    /// Queue an alert without waiting
    ///
    /// Returns false if the alert was dropped because the queue is full or
    /// the dispatcher has stopped.
    pub fn send(&self, alert: Alert) -> bool {
        match self.tx.try_send(alert) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(alert)) => {
                self.metrics.inc_alerts_dropped();
                warn!(
                    alert_type = alert.alert_type(),
                    device = alert.device.as_deref().unwrap_or("-"),
                    "Alert queue full, dropping alert"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.metrics.inc_alerts_dropped();
                warn!("Alert dispatcher stopped, dropping alert");
                false
            }
        }
    }
}

/// Create the bounded queue between the ingest loop and the dispatcher
pub fn alert_channel(capacity: usize) -> (AlertSender, mpsc::Receiver<Alert>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        AlertSender {
            tx,
            metrics: AnalyzerMetrics::new(),
        },
        rx,
    )
}

/// What happened to one alert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered { published: bool, logged: bool },
    Suppressed,
}

type CooldownKey = (&'static str, Option<String>, Option<String>);

/// Fans alerts out to the configured sinks
pub struct AlertDispatcher {
    config: DispatcherConfig,
    publisher: Option<Arc<dyn AlertPublisher>>,
    log: Option<DailyNdjson>,
    health: HealthRegistry,
    metrics: AnalyzerMetrics,
    logger: StructuredLogger,
    last_emitted: HashMap<CooldownKey, f64>,
    publisher_degraded: bool,
    log_degraded: bool,
}

impl AlertDispatcher {
    pub fn new(config: DispatcherConfig, health: HealthRegistry) -> Self {
        Self {
            config,
            publisher: None,
            log: None,
            health,
            metrics: AnalyzerMetrics::new(),
            logger: StructuredLogger::new("dispatcher"),
            last_emitted: HashMap::new(),
            publisher_degraded: false,
            log_degraded: false,
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn AlertPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_log(mut self, log: DailyNdjson) -> Self {
        self.log = Some(log);
        self
    }

    /// Drain the queue until shutdown, then flush whatever is still queued
    pub async fn run(mut self, mut rx: mpsc::Receiver<Alert>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            topic = %self.config.alert_topic,
            log = self.log.is_some(),
            "Starting alert dispatcher"
        );

        loop {
            tokio::select! {
                maybe_alert = rx.recv() => {
                    match maybe_alert {
                        Some(alert) => {
                            self.dispatch(&alert).await;
                        }
                        None => {
                            debug!("Alert queue closed");
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    let mut flushed = 0usize;
                    while let Ok(alert) = rx.try_recv() {
                        self.dispatch(&alert).await;
                        flushed += 1;
                    }
                    info!(flushed = flushed, "Shutting down alert dispatcher");
                    break;
                }
            }
        }
    }

    /// Send one alert to every sink
    pub async fn dispatch(&mut self, alert: &Alert) -> DispatchOutcome {
        if self.suppressed(alert) {
            debug!(alert_type = alert.alert_type(), "Alert suppressed by cooldown");
            return DispatchOutcome::Suppressed;
        }

        self.metrics.inc_alerts_emitted(alert.alert_type());
        self.logger
            .log_alert(alert.alert_type(), alert.device.as_deref(), alert.ts);

        let payload = match serde_json::to_vec(alert) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to serialize alert");
                self.metrics.inc_sink_errors("serialize");
                return DispatchOutcome::Delivered {
                    published: false,
                    logged: false,
                };
            }
        };

        let topic = self.config.alert_topic.as_str();
        let limit = Duration::from_millis(self.config.publish_timeout_ms);
        let publisher = self.publisher.as_deref();
        let log = self.log.as_ref();

        let publish = async {
            let publisher = publisher?;
            Some(match tokio::time::timeout(limit, publisher.publish(topic, payload)).await {
                Ok(result) => result,
                Err(_) => Err(SinkError::Timeout(limit)),
            })
        };
        let append = async {
            let log = log?;
            Some(log.append(alert.ts, ALERT_LOG_NAME, alert).await.map(|_| ()))
        };
        let (publish_result, append_result) = tokio::join!(publish, append);

        let published = match publish_result {
            Some(result) => self.record_publish(result).await,
            None => false,
        };
        let logged = match append_result {
            Some(result) => self.record_append(result).await,
            None => false,
        };
        DispatchOutcome::Delivered { published, logged }
    }

    fn suppressed(&mut self, alert: &Alert) -> bool {
        if self.config.cooldown_secs <= 0.0 {
            return false;
        }

        let key = (
            alert.alert_type(),
            alert.device.clone(),
            alert.metric().map(str::to_string),
        );
        match self.last_emitted.get(&key) {
            Some(last) if alert.ts - last < self.config.cooldown_secs => true,
            _ => {
                self.last_emitted.insert(key, alert.ts);
                false
            }
        }
    }

    async fn record_publish(&mut self, result: Result<(), SinkError>) -> bool {
        match result {
            Ok(()) => {
                if self.publisher_degraded {
                    self.publisher_degraded = false;
                    self.health.set_healthy(components::PUBLISHER).await;
                }
                true
            }
            Err(e) => {
                warn!(error = %e, topic = %self.config.alert_topic, "Failed to publish alert");
                self.metrics.inc_sink_errors(components::PUBLISHER);
                self.publisher_degraded = true;
                self.health
                    .set_degraded(components::PUBLISHER, e.to_string())
                    .await;
                false
            }
        }
    }

    async fn record_append(&mut self, result: Result<(), SinkError>) -> bool {
        match result {
            Ok(()) => {
                if self.log_degraded {
                    self.log_degraded = false;
                    self.health.set_healthy(components::ALERT_LOG).await;
                }
                true
            }
            Err(e) => {
                let root = self.log.as_ref().map(DailyNdjson::root);
                warn!(error = %e, root = ?root, "Failed to append alert log");
                self.metrics.inc_sink_errors(components::ALERT_LOG);
                self.log_degraded = true;
                self.health
                    .set_degraded(components::ALERT_LOG, e.to_string())
                    .await;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertKind;
    use crate::anomaly::DriftAnomaly;
    use crate::health::ComponentStatus;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingPublisher {
        sent: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl AlertPublisher for RecordingPublisher {
        async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), SinkError> {
            self.sent.lock().unwrap().push((topic.to_string(), payload));
            Ok(())
        }
    }

    struct FailingPublisher;

    #[async_trait]
    impl AlertPublisher for FailingPublisher {
        async fn publish(&self, _topic: &str, _payload: Vec<u8>) -> Result<(), SinkError> {
            Err(SinkError::Publish("broker gone".to_string()))
        }
    }

    /// Never completes, like a client whose request queue is full
    struct StalledPublisher;

    #[async_trait]
    impl AlertPublisher for StalledPublisher {
        async fn publish(&self, _topic: &str, _payload: Vec<u8>) -> Result<(), SinkError> {
            std::future::pending().await
        }
    }

    fn drift_alert(ts: f64) -> Alert {
        Alert::drift("psu", ts, "voltage", &DriftAnomaly { slope: 0.01, ema: 5.0 })
    }

    #[tokio::test]
    async fn test_dispatch_publishes_and_logs() {
        let dir = TempDir::new().unwrap();
        let publisher = Arc::new(RecordingPublisher::default());
        let mut dispatcher = AlertDispatcher::new(DispatcherConfig::default(), HealthRegistry::new())
            .with_publisher(publisher.clone())
            .with_log(DailyNdjson::new(dir.path()));

        let outcome = dispatcher.dispatch(&drift_alert(0.0)).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Delivered {
                published: true,
                logged: true
            }
        );

        let sent = publisher.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "lab/alerts");
        let wire: Alert = serde_json::from_slice(&sent[0].1).unwrap();
        assert!(matches!(wire.kind, AlertKind::Drift { .. }));

        let logged =
            std::fs::read_to_string(dir.path().join("1970-01-01").join("alerts.ndjson")).unwrap();
        assert_eq!(logged.lines().count(), 1);
        assert_eq!(logged.trim_end().as_bytes(), sent[0].1.as_slice());
    }

    #[tokio::test]
    async fn test_publish_failure_still_logs_and_degrades() {
        let dir = TempDir::new().unwrap();
        let health = HealthRegistry::new();
        health.register(components::PUBLISHER).await;
        let mut dispatcher = AlertDispatcher::new(DispatcherConfig::default(), health.clone())
            .with_publisher(Arc::new(FailingPublisher))
            .with_log(DailyNdjson::new(dir.path()));

        let outcome = dispatcher.dispatch(&drift_alert(0.0)).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Delivered {
                published: false,
                logged: true
            }
        );
        assert_eq!(
            health.status(components::PUBLISHER).await,
            Some(ComponentStatus::Degraded)
        );
    }

    #[tokio::test]
    async fn test_stalled_publish_times_out_and_still_logs() {
        let dir = TempDir::new().unwrap();
        let health = HealthRegistry::new();
        health.register(components::PUBLISHER).await;
        let config = DispatcherConfig {
            publish_timeout_ms: 50,
            ..Default::default()
        };
        let mut dispatcher = AlertDispatcher::new(config, health.clone())
            .with_publisher(Arc::new(StalledPublisher))
            .with_log(DailyNdjson::new(dir.path()));

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            dispatcher.dispatch(&drift_alert(0.0)),
        )
        .await
        .expect("dispatch should not wait on a stalled publisher");
        assert_eq!(
            outcome,
            DispatchOutcome::Delivered {
                published: false,
                logged: true
            }
        );

        let logged =
            std::fs::read_to_string(dir.path().join("1970-01-01").join("alerts.ndjson")).unwrap();
        assert_eq!(logged.lines().count(), 1);
        assert_eq!(
            health.status(components::PUBLISHER).await,
            Some(ComponentStatus::Degraded)
        );
    }

    #[tokio::test]
    async fn test_log_failure_does_not_block_publish() {
        let dir = TempDir::new().unwrap();
        // A regular file where the day directory should go
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, b"").unwrap();

        let health = HealthRegistry::new();
        let publisher = Arc::new(RecordingPublisher::default());
        let mut dispatcher = AlertDispatcher::new(DispatcherConfig::default(), health.clone())
            .with_publisher(publisher.clone())
            .with_log(DailyNdjson::new(&blocked));

        let outcome = dispatcher.dispatch(&drift_alert(0.0)).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Delivered {
                published: true,
                logged: false
            }
        );
        assert_eq!(
            health.status(components::ALERT_LOG).await,
            Some(ComponentStatus::Degraded)
        );
    }

    #[tokio::test]
    async fn test_cooldown_suppresses_repeats() {
        let config = DispatcherConfig {
            cooldown_secs: 60.0,
            ..Default::default()
        };
        let publisher = Arc::new(RecordingPublisher::default());
        let mut dispatcher =
            AlertDispatcher::new(config, HealthRegistry::new()).with_publisher(publisher.clone());

        assert!(matches!(
            dispatcher.dispatch(&drift_alert(0.0)).await,
            DispatchOutcome::Delivered { .. }
        ));
        assert_eq!(
            dispatcher.dispatch(&drift_alert(30.0)).await,
            DispatchOutcome::Suppressed
        );
        assert!(matches!(
            dispatcher.dispatch(&drift_alert(61.0)).await,
            DispatchOutcome::Delivered { .. }
        ));

        let other_metric = Alert::drift("psu", 62.0, "current", &DriftAnomaly { slope: 0.01, ema: 1.0 });
        assert!(matches!(
            dispatcher.dispatch(&other_metric).await,
            DispatchOutcome::Delivered { .. }
        ));
        assert_eq!(publisher.sent.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let (sender, mut rx) = alert_channel(2);
        assert!(sender.send(drift_alert(0.0)));
        assert!(sender.send(drift_alert(1.0)));
        assert!(!sender.send(drift_alert(2.0)));

        assert_eq!(rx.recv().await.unwrap().ts, 0.0);
        assert!(sender.send(drift_alert(3.0)));
    }

    #[tokio::test]
    async fn test_run_flushes_on_shutdown() {
        let publisher = Arc::new(RecordingPublisher::default());
        let dispatcher = AlertDispatcher::new(DispatcherConfig::default(), HealthRegistry::new())
            .with_publisher(publisher.clone());
        let (sender, rx) = alert_channel(16);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        for i in 0..5 {
            sender.send(drift_alert(i as f64));
        }
        shutdown_tx.send(()).unwrap();
        dispatcher.run(rx, shutdown_rx).await;

        assert_eq!(publisher.sent.lock().unwrap().len(), 5);
    }
}
