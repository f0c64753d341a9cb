//! Multivariate anomaly detection
//!
//! Keeps a rolling buffer of feature vectors and, once the buffer first
//! reaches the warm-up size, fits a scaler and isolation forest over it. The
//! model is fitted exactly once and never refreshed, so its notion of
//! "normal" is frozen to the warm-up window.

use super::features::{FeatureExtractor, DEFAULT_FEATURE_METRICS};
use super::forest::{ForestConfig, IsolationForest, StandardScaler};
use crate::error::AnalysisError;
use crate::models::TelemetryRecord;
use crate::observability::AnalyzerMetrics;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Configuration for the multivariate detector
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MultivariateConfig {
    /// Rolling feature buffer capacity
    pub buffer_capacity: usize,
    /// Buffer size that triggers the one-time fit
    pub warmup_samples: usize,
    /// Fit on the blocking thread pool instead of the ingest path
    pub background_fit: bool,
    /// Metrics contributing features, in vector order
    pub feature_metrics: Vec<String>,
    pub forest: ForestConfig,
}

impl Default for MultivariateConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 100,
            warmup_samples: 50,
            background_fit: true,
            feature_metrics: DEFAULT_FEATURE_METRICS.iter().map(|m| m.to_string()).collect(),
            forest: ForestConfig::default(),
        }
    }
}

/// Outcome of scoring one record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    pub is_anomaly: bool,
    /// Isolation score; lower is more anomalous, 0.0 when not scored
    pub score: f64,
}

impl Verdict {
    pub const NEUTRAL: Verdict = Verdict {
        is_anomaly: false,
        score: 0.0,
    };
}

/// Externally visible model lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Unfitted,
    /// Fit in flight on the blocking pool; behaves as unfitted
    Fitting,
    Fitted,
}

impl ModelStatus {
    /// Gauge encoding: 0 unfitted, 1 fitting, 2 fitted
    pub fn as_gauge(&self) -> i64 {
        match self {
            ModelStatus::Unfitted => 0,
            ModelStatus::Fitting => 1,
            ModelStatus::Fitted => 2,
        }
    }
}

#[derive(Debug)]
struct FittedModel {
    scaler: StandardScaler,
    forest: IsolationForest,
}

impl FittedModel {
    fn fit(samples: &[Vec<f64>], config: &ForestConfig) -> Result<Self, AnalysisError> {
        let start = Instant::now();
        let scaler = StandardScaler::fit(samples)?;
        let scaled: Vec<Vec<f64>> = samples
            .iter()
            .filter_map(|s| scaler.transform(s))
            .collect();
        let forest = IsolationForest::fit(&scaled, config)?;

        let elapsed = start.elapsed();
        AnalyzerMetrics::new().observe_model_fit(elapsed.as_secs_f64());
        info!(
            samples = samples.len(),
            features = scaler.dimension(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Trained anomaly detection model"
        );
        Ok(Self { scaler, forest })
    }

    fn verdict(&self, features: &[f64]) -> Verdict {
        let score = self
            .scaler
            .transform(features)
            .and_then(|scaled| self.forest.score(&scaled));
        match score {
            Some(score) => Verdict {
                is_anomaly: self.forest.is_outlier(score),
                score,
            },
            None => {
                debug!(
                    expected = self.scaler.dimension(),
                    got = features.len(),
                    "Feature dimension mismatch, skipping model scoring"
                );
                Verdict::NEUTRAL
            }
        }
    }
}

enum ModelState {
    Unfitted,
    Fitting(oneshot::Receiver<Result<FittedModel, AnalysisError>>),
    Fitted(FittedModel),
}

/// Detects unusual combinations of readings across metrics and time
pub struct MultivariateAnomalyDetector {
    extractor: FeatureExtractor,
    buffer: VecDeque<Vec<f64>>,
    config: MultivariateConfig,
    state: ModelState,
}

impl MultivariateAnomalyDetector {
    pub fn new(config: MultivariateConfig) -> Self {
        Self {
            extractor: FeatureExtractor::new(config.feature_metrics.iter().cloned()),
            buffer: VecDeque::with_capacity(config.buffer_capacity),
            config,
            state: ModelState::Unfitted,
        }
    }

    pub fn status(&self) -> ModelStatus {
        match self.state {
            ModelState::Unfitted => ModelStatus::Unfitted,
            ModelState::Fitting(_) => ModelStatus::Fitting,
            ModelState::Fitted(_) => ModelStatus::Fitted,
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Buffer the record's features and score it if a model is available
    pub fn detect(&mut self, record: &TelemetryRecord) -> Verdict {
        let features = self.extractor.extract(record);
        if features.is_empty() {
            return Verdict::NEUTRAL;
        }

        if self.buffer.len() >= self.config.buffer_capacity.max(1) {
            self.buffer.pop_front();
        }
        self.buffer.push_back(features.clone());

        self.refresh_model_state();

        if matches!(self.state, ModelState::Unfitted)
            && self.buffer.len() >= self.config.warmup_samples
        {
            self.start_fit(features.len());
        }

        match &self.state {
            ModelState::Fitted(model) => model.verdict(&features),
            _ => Verdict::NEUTRAL,
        }
    }

    /// Pick up the result of a background fit if it has finished
    pub fn refresh_model_state(&mut self) {
        let ModelState::Fitting(rx) = &mut self.state else {
            return;
        };

        match rx.try_recv() {
            Ok(Ok(model)) => self.state = ModelState::Fitted(model),
            Ok(Err(e)) => {
                warn!(error = %e, "Background model fit failed, will retry");
                self.state = ModelState::Unfitted;
            }
            Err(oneshot::error::TryRecvError::Empty) => {}
            Err(oneshot::error::TryRecvError::Closed) => {
                warn!("Background model fit task ended without a result, will retry");
                self.state = ModelState::Unfitted;
            }
        }
    }

    fn start_fit(&mut self, dimension: usize) {
        // Records with a different metric set produce vectors of another width
        let samples: Vec<Vec<f64>> = self
            .buffer
            .iter()
            .filter(|v| v.len() == dimension)
            .cloned()
            .collect();
        let forest_config = self.config.forest.clone();

        let handle = if self.config.background_fit {
            tokio::runtime::Handle::try_current().ok()
        } else {
            None
        };

        match handle {
            Some(handle) => {
                let (tx, rx) = oneshot::channel();
                handle.spawn_blocking(move || {
                    let _ = tx.send(FittedModel::fit(&samples, &forest_config));
                });
                debug!("Scheduled background model fit");
                self.state = ModelState::Fitting(rx);
            }
            None => match FittedModel::fit(&samples, &forest_config) {
                Ok(model) => self.state = ModelState::Fitted(model),
                Err(e) => warn!(error = %e, "Model fit failed, will retry"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn inline_config() -> MultivariateConfig {
        MultivariateConfig {
            background_fit: false,
            ..Default::default()
        }
    }

    fn record(i: usize, voltage: f64) -> TelemetryRecord {
        TelemetryRecord::new("scope1", 1_700_000_000.0 + i as f64)
            .with_metric("voltage", voltage)
            .with_metric("current", 0.12 + (i % 3) as f64 * 0.001)
    }

    #[test]
    fn test_neutral_until_warmup() {
        let mut detector = MultivariateAnomalyDetector::new(inline_config());
        for i in 0..49 {
            let v = detector.detect(&record(i, 3.3 + (i % 5) as f64 * 0.01));
            assert_eq!(v, Verdict::NEUTRAL);
            assert_eq!(detector.status(), ModelStatus::Unfitted);
        }

        detector.detect(&record(49, 3.3));
        assert_eq!(detector.status(), ModelStatus::Fitted);
    }

    #[test]
    fn test_fitted_model_flags_excursion() {
        let mut detector = MultivariateAnomalyDetector::new(inline_config());
        // One slightly high reading during warm-up marks the edge of "normal"
        for i in 0..60 {
            let voltage = if i == 10 { 3.31 } else { 3.3 };
            detector.detect(&record(i, voltage));
        }
        assert_eq!(detector.status(), ModelStatus::Fitted);

        let normal = detector.detect(&record(25, 3.3));
        let spike = detector.detect(&record(10, 9.0));
        assert!(!normal.is_anomaly);
        assert!(spike.is_anomaly);
        assert!(spike.score < normal.score);
        assert!((-1.0..0.0).contains(&spike.score));
    }

    #[test]
    fn test_empty_features_are_neutral_and_not_buffered() {
        let mut detector = MultivariateAnomalyDetector::new(inline_config());
        let record = TelemetryRecord::new("thermo", 0.0).with_metric("temperature", 20.0);
        assert_eq!(detector.detect(&record), Verdict::NEUTRAL);
        assert_eq!(detector.buffered(), 0);
    }

    #[test]
    fn test_buffer_bounded() {
        let mut detector = MultivariateAnomalyDetector::new(inline_config());
        for i in 0..250 {
            detector.detect(&record(i, 3.3));
        }
        assert_eq!(detector.buffered(), 100);
    }

    #[test]
    fn test_dimension_mismatch_after_fit_is_neutral() {
        let mut detector = MultivariateAnomalyDetector::new(inline_config());
        for i in 0..50 {
            detector.detect(&record(i, 3.3));
        }
        let voltage_only = TelemetryRecord::new("scope1", 0.0).with_metric("voltage", 3.3);
        assert_eq!(detector.detect(&voltage_only), Verdict::NEUTRAL);
    }

    #[tokio::test]
    async fn test_background_fit_stays_unfitted_mid_fit() {
        let mut detector = MultivariateAnomalyDetector::new(MultivariateConfig::default());
        for i in 0..50 {
            assert_eq!(detector.detect(&record(i, 3.3)), Verdict::NEUTRAL);
        }
        assert_ne!(detector.status(), ModelStatus::Unfitted);

        let waited = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                detector.refresh_model_state();
                if detector.status() == ModelStatus::Fitted {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "background fit did not complete");
    }
}
