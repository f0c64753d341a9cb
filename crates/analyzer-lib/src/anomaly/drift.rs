//! Calibration drift detection
//!
//! Detects sustained trends by looking at the slope of a stream's smoothed
//! (EMA) history rather than the raw samples.

use crate::stats::StatSnapshot;
use serde::Deserialize;

/// Minimum samples before a stream is eligible (strictly greater than)
const DEFAULT_MIN_SAMPLES: u64 = 30;

/// Detects drift when the EMA slope magnitude exceeds a threshold
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DriftDetector {
    /// Per-sample slope magnitude above which drift is reported
    pub slope_threshold: f64,
    /// Stream must hold more than this many samples
    pub min_samples: u64,
}

impl DriftDetector {
    pub fn new(slope_threshold: f64) -> Self {
        Self {
            slope_threshold,
            min_samples: DEFAULT_MIN_SAMPLES,
        }
    }

    pub fn detect(&self, stats: &StatSnapshot) -> Option<DriftAnomaly> {
        if stats.n <= self.min_samples {
            return None;
        }

        if stats.slope.abs() <= self.slope_threshold {
            return None;
        }

        Some(DriftAnomaly {
            slope: stats.slope,
            ema: stats.ema.unwrap_or(stats.mean),
        })
    }
}

impl Default for DriftDetector {
    fn default() -> Self {
        Self::new(0.002)
    }
}

/// Drift anomaly details
#[derive(Debug, Clone, PartialEq)]
pub struct DriftAnomaly {
    /// Signed per-sample slope of the EMA
    pub slope: f64,
    /// EMA at detection time
    pub ema: f64,
}

impl DriftAnomaly {
    pub fn is_rising(&self) -> bool {
        self.slope > 0.0
    }
}
