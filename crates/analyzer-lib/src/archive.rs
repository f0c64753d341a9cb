//! Raw telemetry archive
//!
//! Accepted records are appended to `<data_dir>/<day>/<device>.ndjson` by a
//! background task. The files use the same shape as bus payloads, so they can
//! be replayed through the engine later.

use crate::health::{components, HealthRegistry};
use crate::models::TelemetryRecord;
use crate::observability::AnalyzerMetrics;
use crate::storage::DailyNdjson;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Producer side of the archive queue
#[derive(Clone)]
pub struct ArchiveSender {
    tx: mpsc::Sender<TelemetryRecord>,
    metrics: AnalyzerMetrics,
}

impl ArchiveSender {
    /// Queue a record without waiting; drops it if the archive is behind
    pub fn send(&self, record: TelemetryRecord) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(e) => {
                self.metrics.inc_sink_errors(components::ARCHIVE);
                debug!(error = %e, "Archive queue unavailable, record not archived");
                false
            }
        }
    }
}

/// Writes telemetry records to per-device daily files
pub struct TelemetryArchive {
    store: DailyNdjson,
    health: HealthRegistry,
    metrics: AnalyzerMetrics,
    degraded: bool,
}

impl TelemetryArchive {
    pub fn new(store: DailyNdjson, health: HealthRegistry) -> Self {
        Self {
            store,
            health,
            metrics: AnalyzerMetrics::new(),
            degraded: false,
        }
    }

    /// Create the archive together with its bounded queue
    pub fn channel(
        store: DailyNdjson,
        health: HealthRegistry,
        capacity: usize,
    ) -> (Self, ArchiveSender, mpsc::Receiver<TelemetryRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sender = ArchiveSender {
            tx,
            metrics: AnalyzerMetrics::new(),
        };
        (Self::new(store, health), sender, rx)
    }

    /// Append one record; failures are logged and reported, never returned
    pub async fn append(&mut self, record: &TelemetryRecord) -> bool {
        match self.store.append(record.ts, &record.device, record).await {
            Ok(_) => {
                if self.degraded {
                    self.degraded = false;
                    self.health.set_healthy(components::ARCHIVE).await;
                }
                true
            }
            Err(e) => {
                warn!(device = %record.device, error = %e, "Failed to archive telemetry");
                self.metrics.inc_sink_errors(components::ARCHIVE);
                self.degraded = true;
                self.health
                    .set_degraded(components::ARCHIVE, e.to_string())
                    .await;
                false
            }
        }
    }

    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<TelemetryRecord>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(root = ?self.store.root(), "Starting telemetry archive");

        loop {
            tokio::select! {
                maybe_record = rx.recv() => {
                    let Some(record) = maybe_record else { break };
                    self.append(&record).await;
                }
                _ = shutdown.recv() => {
                    while let Ok(record) = rx.try_recv() {
                        self.append(&record).await;
                    }
                    info!("Shutting down telemetry archive");
                    break;
                }
            }
        }
    }
}
