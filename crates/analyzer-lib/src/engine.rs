//! Analytics engine
//!
//! Owns every detector's state and runs them in a fixed order for each
//! record. Nothing here is shared between tasks; the ingest loop holds the
//! only instance.

use crate::alerts::Alert;
use crate::anomaly::{
    DriftDetector, ModelStatus, MultivariateAnomalyDetector, MultivariateConfig,
    ThresholdAnomalyDetector,
};
use crate::correlation::{CorrelationAnalyzer, CorrelationConfig};
use crate::error::AnalysisError;
use crate::maintenance::{DeviceHealth, HealthConfig, HealthPredictor};
use crate::models::TelemetryRecord;
use crate::stats::{StatsConfig, StatsTracker};
use serde::Deserialize;
use tracing::debug;

/// Configuration of the whole detector pipeline
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Metrics that get per-stream statistics, threshold and drift checks,
    /// and correlation history
    pub tracked_metrics: Vec<String>,
    pub stats: StatsConfig,
    pub threshold: ThresholdAnomalyDetector,
    pub drift: DriftDetector,
    pub multivariate: MultivariateConfig,
    pub health: HealthConfig,
    pub correlation: CorrelationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tracked_metrics: vec!["voltage".to_string(), "current".to_string()],
            stats: StatsConfig::default(),
            threshold: ThresholdAnomalyDetector::default(),
            drift: DriftDetector::default(),
            multivariate: MultivariateConfig::default(),
            health: HealthConfig::default(),
            correlation: CorrelationConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Same pipeline with the outlier model fitted on the calling thread
    pub fn with_inline_fit(mut self) -> Self {
        self.multivariate.background_fit = false;
        self
    }
}

/// Runs all detectors over a stream of telemetry records
pub struct Analyzer {
    tracked_metrics: Vec<String>,
    stats: StatsTracker,
    threshold: ThresholdAnomalyDetector,
    drift: DriftDetector,
    multivariate: MultivariateAnomalyDetector,
    health: HealthPredictor,
    correlation: CorrelationAnalyzer,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Analyzer {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            tracked_metrics: config.tracked_metrics,
            stats: StatsTracker::new(config.stats),
            threshold: config.threshold,
            drift: config.drift,
            multivariate: MultivariateAnomalyDetector::new(config.multivariate),
            health: HealthPredictor::new(config.health),
            correlation: CorrelationAnalyzer::new(config.correlation),
        }
    }

    /// Analyze one record and return the alerts it produced
    ///
    /// Order per record: for each tracked metric present, statistics update,
    /// correlation sample, threshold check, drift check; then the outlier
    /// model, the health predictor and finally the periodic correlation
    /// analysis. A record with a non-finite timestamp or tracked value is
    /// rejected before any state changes.
    pub fn process(&mut self, record: &TelemetryRecord) -> Result<Vec<Alert>, AnalysisError> {
        self.validate(record)?;

        let mut alerts = Vec::new();
        let device = record.device.as_str();

        for metric in &self.tracked_metrics {
            let Some(value) = record.metric(metric) else {
                continue;
            };

            let snapshot = self.stats.update(device, metric, value);
            self.correlation.add_sample(device, metric, value, record.ts);

            if let Some(anomaly) = self.threshold.detect(value, &snapshot) {
                debug!(device = %device, metric = %metric, z = anomaly.z, "Statistical anomaly");
                alerts.push(Alert::statistical(device, record.ts, metric, &anomaly));
            }

            if let Some(drift) = self.drift.detect(&snapshot) {
                debug!(
                    device = %device,
                    metric = %metric,
                    slope = drift.slope,
                    rising = drift.is_rising(),
                    "Drift detected"
                );
                alerts.push(Alert::drift(device, record.ts, metric, &drift));
            }
        }

        let verdict = self.multivariate.detect(record);
        if verdict.is_anomaly {
            alerts.push(Alert::multivariate(device, record.ts, &verdict));
        }

        let health = self.health.update(record, &self.stats);
        if !health.recommendations.is_empty() {
            alerts.push(Alert::maintenance(device, record.ts, health));
        }

        if let Some(correlations) = self.correlation.poll() {
            alerts.push(Alert::correlations(record.ts, correlations));
        }

        Ok(alerts)
    }

    fn validate(&self, record: &TelemetryRecord) -> Result<(), AnalysisError> {
        if !record.ts.is_finite() {
            return Err(AnalysisError::NonFiniteTimestamp(record.ts));
        }

        for metric in &self.tracked_metrics {
            if let Some(value) = record.metric(metric).filter(|v| !v.is_finite()) {
                return Err(AnalysisError::NonFiniteValue {
                    device: record.device.clone(),
                    metric: metric.clone(),
                    value,
                });
            }
        }
        Ok(())
    }

    pub fn record_calibration(&mut self, device: &str, ts: f64) {
        self.health.record_calibration(device, ts);
    }

    pub fn stats(&self) -> &StatsTracker {
        &self.stats
    }

    pub fn device_health(&self, device: &str) -> Option<&DeviceHealth> {
        self.health.get(device)
    }

    pub fn device_count(&self) -> usize {
        self.health.device_count()
    }

    pub fn model_status(&self) -> ModelStatus {
        self.multivariate.status()
    }

    /// Pick up a finished background model fit without processing a record
    pub fn refresh_model(&mut self) -> ModelStatus {
        self.multivariate.refresh_model_state();
        self.multivariate.status()
    }
}
