//! Z-score anomaly detection
//!
//! Flags samples that sit too many standard deviations away from the running
//! mean of their stream.

use crate::stats::StatSnapshot;
use serde::Deserialize;

/// Minimum samples before a stream is eligible (strictly greater than)
const DEFAULT_MIN_SAMPLES: u64 = 20;

/// Standard deviations below this are treated as a flat stream
const DEFAULT_MIN_STD: f64 = 1e-9;

/// Detects samples whose z-score reaches a threshold
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThresholdAnomalyDetector {
    /// Z-score at or above which a sample is anomalous
    pub z_threshold: f64,
    /// Stream must hold more than this many samples
    pub min_samples: u64,
    /// Stream std must exceed this
    pub min_std: f64,
}

impl ThresholdAnomalyDetector {
    pub fn new(z_threshold: f64) -> Self {
        Self {
            z_threshold,
            ..Default::default()
        }
    }

    /// Evaluate `value` against the stream snapshot
    ///
    /// # Returns
    /// * `Some(StatisticalAnomaly)` if the z-score reaches the threshold
    /// * `None` if the stream is too short, flat, or the value is in range
    pub fn detect(&self, value: f64, stats: &StatSnapshot) -> Option<StatisticalAnomaly> {
        if stats.n <= self.min_samples {
            return None;
        }

        if stats.std <= self.min_std {
            return None;
        }

        let z = (value - stats.mean).abs() / stats.std;

        if z >= self.z_threshold {
            Some(StatisticalAnomaly {
                value,
                mean: stats.mean,
                std: stats.std,
                z,
            })
        } else {
            None
        }
    }
}

impl Default for ThresholdAnomalyDetector {
    fn default() -> Self {
        Self {
            z_threshold: 3.0,
            min_samples: DEFAULT_MIN_SAMPLES,
            min_std: DEFAULT_MIN_STD,
        }
    }
}

/// Statistical anomaly details
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticalAnomaly {
    pub value: f64,
    pub mean: f64,
    pub std: f64,
    /// Absolute z-score
    pub z: f64,
}
