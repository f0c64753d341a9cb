//! Feature extraction for multivariate anomaly scoring
//!
//! Each record becomes one vector: per known metric the raw value, its
//! reported average and reported standard deviation, followed by temporal
//! context and a coarse device identifier.

use crate::models::TelemetryRecord;

/// Metrics that contribute features, in vector order
pub const DEFAULT_FEATURE_METRICS: [&str; 2] = ["voltage", "current"];

const SECONDS_PER_DAY: f64 = 86_400.0;
const SECONDS_PER_HOUR: f64 = 3_600.0;

/// Buckets for the device hash feature
const DEVICE_HASH_BUCKETS: u64 = 1000;

/// Extracts fixed-layout feature vectors from telemetry records
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    metrics: Vec<String>,
}

impl FeatureExtractor {
    pub fn new<I, S>(metrics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            metrics: metrics.into_iter().map(Into::into).collect(),
        }
    }

    /// Build the feature vector for a record
    ///
    /// Returns an empty vector when the record carries none of the known
    /// metrics.
    pub fn extract(&self, record: &TelemetryRecord) -> Vec<f64> {
        let mut features = Vec::with_capacity(self.metrics.len() * 3 + 3);

        for metric in &self.metrics {
            let Some(value) = record.metric(metric) else {
                continue;
            };
            let avg = record.metric(&format!("{metric}_avg")).unwrap_or(value);
            let std = record.metric(&format!("{metric}_std")).unwrap_or(0.0);
            features.extend([value, avg, std]);
        }

        if features.is_empty() {
            return features;
        }

        features.push(record.ts.rem_euclid(SECONDS_PER_DAY));
        features.push(record.ts.rem_euclid(SECONDS_PER_HOUR));
        features.push(device_hash(&record.device) as f64);
        features
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_FEATURE_METRICS)
    }
}

/// Stable FNV-1a hash of a device id folded into a small bucket range
pub fn device_hash(device: &str) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let hash = device
        .bytes()
        .fold(FNV_OFFSET, |h, b| (h ^ b as u64).wrapping_mul(FNV_PRIME));
    hash % DEVICE_HASH_BUCKETS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_vector_layout() {
        let extractor = FeatureExtractor::default();
        let record = TelemetryRecord::new("scope1", 90_061.0)
            .with_metric("voltage", 3.3)
            .with_metric("voltage_avg", 3.25)
            .with_metric("current", 0.12);

        let f = extractor.extract(&record);
        assert_eq!(f.len(), 9);
        assert_eq!(&f[0..3], &[3.3, 3.25, 0.0]);
        assert_eq!(&f[3..6], &[0.12, 0.12, 0.0]);
        // 90061 s = 1 day + 1 h + 1 min + 1 s
        assert_eq!(f[6], 3_661.0);
        assert_eq!(f[7], 61.0);
        assert_eq!(f[8], device_hash("scope1") as f64);
    }

    #[test]
    fn test_single_metric() {
        let extractor = FeatureExtractor::default();
        let record = TelemetryRecord::new("scope1", 0.0).with_metric("current", 0.5);
        assert_eq!(extractor.extract(&record).len(), 6);
    }

    #[test]
    fn test_no_known_metrics_is_empty() {
        let extractor = FeatureExtractor::default();
        let record = TelemetryRecord::new("thermo", 0.0).with_metric("temperature", 21.0);
        assert!(extractor.extract(&record).is_empty());
    }

    #[test]
    fn test_device_hash_stable_and_bounded() {
        assert_eq!(device_hash("scope1"), device_hash("scope1"));
        for name in ["a", "scope1", "multimeter", "power_supply", ""] {
            assert!(device_hash(name) < DEVICE_HASH_BUCKETS);
        }
    }
}
