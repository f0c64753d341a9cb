//! Telemetry ingest loop
//!
//! A single task owns the [`Analyzer`] and processes inbound telemetry one
//! record at a time. Alerts are handed to the dispatcher queue without
//! waiting, so a slow sink never holds up detection. A panic while analyzing
//! one record drops that record and the loop carries on.

use crate::alerts::{Alert, AlertSender};
use crate::anomaly::ModelStatus;
use crate::archive::ArchiveSender;
use crate::engine::Analyzer;
use crate::error::{AnalysisError, IngestClosed};
use crate::health::{components, HealthRegistry};
use crate::models::{device_from_topic, TelemetryRecord};
use crate::observability::{truncate_payload, AnalyzerMetrics, StructuredLogger};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, error, info};

/// Longest payload excerpt written to the log for a dropped message
const PAYLOAD_EXCERPT_LEN: usize = 100;

/// How often the loop checks for a finished background model fit
const MODEL_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Unit of work for the ingest loop
#[derive(Debug, Clone)]
pub enum Inbound {
    /// Undecoded bus message
    Raw { topic: String, payload: Vec<u8> },
    /// Already decoded record
    Record(TelemetryRecord),
}

/// Cloneable handle for feeding the ingest loop
#[derive(Clone)]
pub struct IngestHandle {
    tx: mpsc::Sender<Inbound>,
}

impl IngestHandle {
    /// Deliver a decoded record, waiting for queue space
    pub async fn deliver(&self, record: TelemetryRecord) -> Result<(), IngestClosed> {
        self.tx
            .send(Inbound::Record(record))
            .await
            .map_err(|_| IngestClosed)
    }

    /// Deliver a raw bus message, waiting for queue space
    pub async fn deliver_raw(
        &self,
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), IngestClosed> {
        self.tx
            .send(Inbound::Raw {
                topic: topic.into(),
                payload: payload.into(),
            })
            .await
            .map_err(|_| IngestClosed)
    }
}

/// Drives the analyzer from the inbound queue
pub struct IngestLoop {
    analyzer: Analyzer,
    rx: mpsc::Receiver<Inbound>,
    alerts: AlertSender,
    archive: Option<ArchiveSender>,
    health: HealthRegistry,
    metrics: AnalyzerMetrics,
    logger: StructuredLogger,
    model_status: ModelStatus,
    processed: u64,
}

impl IngestLoop {
    /// Create the loop and the handle used to feed it
    pub fn new(
        analyzer: Analyzer,
        alerts: AlertSender,
        health: HealthRegistry,
        capacity: usize,
    ) -> (Self, IngestHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let model_status = analyzer.model_status();
        let ingest = Self {
            analyzer,
            rx,
            alerts,
            archive: None,
            health,
            metrics: AnalyzerMetrics::new(),
            logger: StructuredLogger::new("ingest"),
            model_status,
            processed: 0,
        };
        (ingest, IngestHandle { tx })
    }

    /// Also forward every accepted record to the telemetry archive
    pub fn with_archive(mut self, archive: ArchiveSender) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Process inbound telemetry until shutdown or until every handle is dropped
    ///
    /// Returns the analyzer so callers can inspect final state.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Analyzer {
        info!("Starting telemetry ingest loop");
        self.health.set_healthy(components::INGEST).await;

        let mut ticker = interval(MODEL_POLL_INTERVAL);

        loop {
            tokio::select! {
                maybe_inbound = self.rx.recv() => {
                    let Some(inbound) = maybe_inbound else {
                        info!("All ingest handles dropped, stopping ingest loop");
                        break;
                    };
                    self.handle(inbound);
                    self.sync_model_status().await;
                }
                _ = ticker.tick() => {
                    self.analyzer.refresh_model();
                    self.sync_model_status().await;
                }
                _ = shutdown.recv() => {
                    info!(processed = self.processed, "Shutting down telemetry ingest loop");
                    break;
                }
            }
        }

        self.health
            .set_unhealthy(components::INGEST, "Ingest loop stopped")
            .await;
        self.analyzer
    }

    /// Decode and analyze one inbound item, returning the number of alerts queued
    pub fn handle(&mut self, inbound: Inbound) -> usize {
        let record = match inbound {
            Inbound::Record(record) => record,
            Inbound::Raw { topic, payload } => {
                match TelemetryRecord::from_payload(&payload, device_from_topic(&topic)) {
                    Ok(record) => record,
                    Err(e) => {
                        self.metrics.inc_records_dropped(e.reason());
                        debug!(topic = %topic, error = %e, "Failed to parse telemetry payload");
                        self.logger.log_dropped(
                            e.reason(),
                            device_from_topic(&topic),
                            &truncate_payload(&payload, PAYLOAD_EXCERPT_LEN),
                        );
                        return 0;
                    }
                }
            }
        };

        self.process(record)
    }

    fn process(&mut self, record: TelemetryRecord) -> usize {
        self.process_with(record, |analyzer, record| analyzer.process(record))
    }

    fn process_with<F>(&mut self, record: TelemetryRecord, analyze: F) -> usize
    where
        F: FnOnce(&mut Analyzer, &TelemetryRecord) -> Result<Vec<Alert>, AnalysisError>,
    {
        let start = Instant::now();

        let analyzer = &mut self.analyzer;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| analyze(analyzer, &record)));
        let alerts = match outcome {
            Ok(Ok(alerts)) => alerts,
            Ok(Err(e)) => {
                self.metrics.inc_records_dropped("analysis");
                debug!(error = %e, "Analysis rejected record");
                self.logger
                    .log_dropped("analysis", Some(&record.device), &record_excerpt(&record));
                return 0;
            }
            Err(payload) => {
                self.metrics.inc_records_dropped("panic");
                error!(
                    device = %record.device,
                    panic = %panic_message(payload.as_ref()),
                    "Analysis panicked, record dropped"
                );
                self.logger
                    .log_dropped("panic", Some(&record.device), &record_excerpt(&record));
                return 0;
            }
        };

        self.processed += 1;
        self.metrics.inc_records_ingested();
        self.metrics
            .observe_processing_latency(start.elapsed().as_secs_f64());
        self.metrics
            .set_devices_tracked(self.analyzer.device_count() as i64);

        let queued = alerts
            .into_iter()
            .map(|alert| self.alerts.send(alert))
            .filter(|sent| *sent)
            .count();

        if let Some(archive) = &self.archive {
            archive.send(record);
        }

        queued
    }

    async fn sync_model_status(&mut self) {
        let status = self.analyzer.model_status();
        if status == self.model_status {
            return;
        }

        self.metrics.set_model_state(status.as_gauge());
        if status == ModelStatus::Fitted {
            self.logger.log_model_fitted(self.processed as usize);
            self.health.set_healthy(components::MODEL).await;
        }
        self.model_status = status;
    }
}

fn record_excerpt(record: &TelemetryRecord) -> String {
    serde_json::to_vec(record)
        .map(|bytes| truncate_payload(&bytes, PAYLOAD_EXCERPT_LEN))
        .unwrap_or_default()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
