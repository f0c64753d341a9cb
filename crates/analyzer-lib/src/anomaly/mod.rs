//! Anomaly detection for instrument telemetry
//!
//! This module provides detection for:
//! - Statistical outliers (z-score against a stream's running statistics)
//! - Calibration drift (sustained EMA slope)
//! - Multivariate outliers (isolation forest over per-record feature vectors)

mod drift;
mod features;
mod forest;
mod multivariate;
mod threshold;

pub use drift::{DriftAnomaly, DriftDetector};
pub use features::{device_hash, FeatureExtractor, DEFAULT_FEATURE_METRICS};
pub use forest::{ForestConfig, IsolationForest, StandardScaler};
pub use multivariate::{ModelStatus, MultivariateAnomalyDetector, MultivariateConfig, Verdict};
pub use threshold::{StatisticalAnomaly, ThresholdAnomalyDetector};
