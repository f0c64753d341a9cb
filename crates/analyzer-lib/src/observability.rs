//! Observability infrastructure for the telemetry analyzer
//!
//! Provides:
//! - Prometheus metrics (ingest volume, drop reasons, alert counts, latencies)
//! - Structured JSON logging events with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for per-record processing latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1,
];

/// Model fits take far longer than a single record
const FIT_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

static GLOBAL_METRICS: OnceLock<AnalyzerMetricsInner> = OnceLock::new();

struct AnalyzerMetricsInner {
    records_ingested: IntCounter,
    records_dropped: IntCounterVec,
    alerts_emitted: IntCounterVec,
    alerts_dropped: IntCounter,
    sink_errors: IntCounterVec,
    processing_latency_seconds: Histogram,
    model_fit_seconds: Histogram,
    devices_tracked: IntGauge,
    model_state: IntGauge,
}

impl AnalyzerMetricsInner {
    fn new() -> Self {
        Self {
            records_ingested: register_int_counter!(
                "lab_analyzer_records_ingested_total",
                "Telemetry records accepted by the ingest loop"
            )
            .expect("Failed to register records_ingested"),

            records_dropped: register_int_counter_vec!(
                "lab_analyzer_records_dropped_total",
                "Telemetry payloads dropped before analysis",
                &["reason"]
            )
            .expect("Failed to register records_dropped"),

            alerts_emitted: register_int_counter_vec!(
                "lab_analyzer_alerts_emitted_total",
                "Alerts produced by the detectors",
                &["type"]
            )
            .expect("Failed to register alerts_emitted"),

            alerts_dropped: register_int_counter!(
                "lab_analyzer_alerts_dropped_total",
                "Alerts dropped because the dispatcher queue was full"
            )
            .expect("Failed to register alerts_dropped"),

            sink_errors: register_int_counter_vec!(
                "lab_analyzer_sink_errors_total",
                "Failures writing to an output sink",
                &["sink"]
            )
            .expect("Failed to register sink_errors"),

            processing_latency_seconds: register_histogram!(
                "lab_analyzer_processing_latency_seconds",
                "Time spent running all detectors for one record",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register processing_latency_seconds"),

            model_fit_seconds: register_histogram!(
                "lab_analyzer_model_fit_seconds",
                "Time spent fitting the multivariate outlier model",
                FIT_BUCKETS.to_vec()
            )
            .expect("Failed to register model_fit_seconds"),

            devices_tracked: register_int_gauge!(
                "lab_analyzer_devices_tracked",
                "Number of devices with health state"
            )
            .expect("Failed to register devices_tracked"),

            model_state: register_int_gauge!(
                "lab_analyzer_model_state",
                "Outlier model state (0 unfitted, 1 fitting, 2 fitted)"
            )
            .expect("Failed to register model_state"),
        }
    }
}

/// Analyzer metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct AnalyzerMetrics {
    _private: (),
}

impl Default for AnalyzerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalyzerMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AnalyzerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AnalyzerMetricsInner {
        GLOBAL_METRICS.get_or_init(AnalyzerMetricsInner::new)
    }

    pub fn inc_records_ingested(&self) {
        self.inner().records_ingested.inc();
    }

    /// Count a dropped payload under a short reason label
    pub fn inc_records_dropped(&self, reason: &str) {
        self.inner()
            .records_dropped
            .with_label_values(&[reason])
            .inc();
    }

    pub fn inc_alerts_emitted(&self, alert_type: &str) {
        self.inner()
            .alerts_emitted
            .with_label_values(&[alert_type])
            .inc();
    }

    pub fn inc_alerts_dropped(&self) {
        self.inner().alerts_dropped.inc();
    }

    pub fn inc_sink_errors(&self, sink: &str) {
        self.inner().sink_errors.with_label_values(&[sink]).inc();
    }

    pub fn observe_processing_latency(&self, duration_secs: f64) {
        self.inner().processing_latency_seconds.observe(duration_secs);
    }

    pub fn observe_model_fit(&self, duration_secs: f64) {
        self.inner().model_fit_seconds.observe(duration_secs);
    }

    pub fn set_devices_tracked(&self, count: i64) {
        self.inner().devices_tracked.set(count);
    }

    pub fn set_model_state(&self, state: i64) {
        self.inner().model_state.set(state);
    }
}

/// Structured logger for analyzer events
///
/// Provides consistent JSON-formatted logging for alerts, model lifecycle
/// and process lifecycle.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    /// Log an emitted alert
    pub fn log_alert(&self, alert_type: &str, device: Option<&str>, ts: f64) {
        info!(
            event = "alert_emitted",
            instance = %self.instance,
            alert_type = %alert_type,
            device = device.unwrap_or("-"),
            ts = ts,
            "Alert emitted"
        );
    }

    /// Log a payload that could not be analyzed
    pub fn log_dropped(&self, reason: &str, device: Option<&str>, payload_excerpt: &str) {
        warn!(
            event = "record_dropped",
            instance = %self.instance,
            reason = %reason,
            device = device.unwrap_or("-"),
            payload = %payload_excerpt,
            "Dropped telemetry payload"
        );
    }

    /// Log the outlier model becoming available
    pub fn log_model_fitted(&self, buffered: usize) {
        info!(
            event = "model_fitted",
            instance = %self.instance,
            buffered = buffered,
            "Multivariate outlier model is now active"
        );
    }

    pub fn log_startup(&self, version: &str, broker: &str) {
        info!(
            event = "analyzer_started",
            instance = %self.instance,
            version = %version,
            broker = %broker,
            "Telemetry analyzer started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "analyzer_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Telemetry analyzer shutting down"
        );
    }
}

/// Cut a payload down to something safe to put in a log line
pub fn truncate_payload(payload: &[u8], max_len: usize) -> String {
    let text = String::from_utf8_lossy(payload);
    if text.chars().count() <= max_len {
        return text.into_owned();
    }
    let mut cut: String = text.chars().take(max_len).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyzer_metrics_creation() {
        let metrics = AnalyzerMetrics::new();

        metrics.inc_records_ingested();
        metrics.inc_records_dropped("parse");
        metrics.inc_alerts_emitted("drift");
        metrics.inc_alerts_dropped();
        metrics.inc_sink_errors("alert_log");
        metrics.observe_processing_latency(0.0002);
        metrics.observe_model_fit(0.05);
        metrics.set_devices_tracked(3);
        metrics.set_model_state(2);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("bench-1");
        assert_eq!(logger.instance, "bench-1");
    }

    #[test]
    fn test_truncate_payload() {
        assert_eq!(truncate_payload(b"short", 10), "short");
        assert_eq!(truncate_payload(b"0123456789abc", 10), "0123456789...");
        assert_eq!(truncate_payload(&[0xff, b'a'], 10), "\u{fffd}a");
    }
}
