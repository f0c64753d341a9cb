//! Predictive maintenance heuristics
//!
//! Tracks a smoothed drift rate per device and nudges a bounded risk score up
//! while drift stays high and down otherwise. The score is a heuristic, not a
//! calibrated probability.

use crate::models::TelemetryRecord;
use crate::stats::StatsTracker;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Upper bound of the risk score
pub const MAX_FAILURE_PROBABILITY: f64 = 0.9;

/// Key of the fallback entry in the calibration interval table
pub const DEFAULT_DEVICE_CLASS: &str = "default";

/// Health predictor configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Metrics whose EMA slope feeds the drift rate
    pub drift_metrics: Vec<String>,
    /// Stream must hold more than this many samples to contribute drift
    pub min_samples: u64,
    /// Weight of the previous drift rate in the smoothing step
    pub drift_smoothing: f64,
    /// Drift rate above which the risk score rises
    pub high_drift_rate: f64,
    /// Drift rate above which calibration is recommended
    pub calibration_drift_rate: f64,
    pub risk_increment: f64,
    pub risk_decrement: f64,
    /// Risk score above which maintenance is recommended
    pub high_risk: f64,
    /// Calibration interval in days, keyed by device class
    pub calibration_intervals: BTreeMap<String, f64>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        let calibration_intervals = [
            ("scope", 30.0),
            ("multimeter", 90.0),
            ("power_supply", 180.0),
            (DEFAULT_DEVICE_CLASS, 60.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            drift_metrics: vec!["voltage".to_string()],
            min_samples: 10,
            drift_smoothing: 0.9,
            high_drift_rate: 0.01,
            calibration_drift_rate: 0.005,
            risk_increment: 0.01,
            risk_decrement: 0.005,
            high_risk: 0.7,
            calibration_intervals,
        }
    }
}

impl HealthConfig {
    /// Calibration interval (days) for a device id
    ///
    /// Tries the exact id, then the id with trailing digits and separators
    /// removed (`scope1` -> `scope`), then the default entry.
    pub fn calibration_interval(&self, device: &str) -> f64 {
        if let Some(days) = self.calibration_intervals.get(device) {
            return *days;
        }

        let class = device.trim_end_matches(|c: char| c.is_ascii_digit() || c == '-' || c == '_');
        if let Some(days) = self.calibration_intervals.get(class) {
            return *days;
        }

        self.calibration_intervals
            .get(DEFAULT_DEVICE_CLASS)
            .copied()
            .unwrap_or(60.0)
    }
}

/// Health state of one device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceHealth {
    pub drift_rate: f64,
    /// Epoch seconds of the last recorded calibration
    pub last_calibration: Option<f64>,
    /// Bounded heuristic risk score in [0, 0.9]
    pub failure_probability: f64,
    /// Recommendations from the latest update
    pub recommendations: Vec<String>,
}

impl DeviceHealth {
    fn new() -> Self {
        Self {
            drift_rate: 0.0,
            last_calibration: None,
            failure_probability: 0.0,
            recommendations: Vec::new(),
        }
    }

    pub fn health_score(&self) -> f64 {
        1.0 - self.failure_probability
    }
}

/// Per-device maintenance risk tracker
#[derive(Debug, Default)]
pub struct HealthPredictor {
    config: HealthConfig,
    devices: HashMap<String, DeviceHealth>,
}

impl HealthPredictor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            devices: HashMap::new(),
        }
    }

    pub fn get_or_create(&mut self, device: &str) -> &mut DeviceHealth {
        self.devices
            .entry(device.to_string())
            .or_insert_with(DeviceHealth::new)
    }

    pub fn get(&self, device: &str) -> Option<&DeviceHealth> {
        self.devices.get(device)
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Record a calibration for `device` at epoch seconds `ts`
    pub fn record_calibration(&mut self, device: &str, ts: f64) {
        self.get_or_create(device).last_calibration = Some(ts);
    }

    /// Fold one record into the device's health and refresh recommendations
    ///
    /// The record timestamp is "now" for the calibration age.
    pub fn update(&mut self, record: &TelemetryRecord, stats: &StatsTracker) -> &DeviceHealth {
        let drift = self
            .config
            .drift_metrics
            .iter()
            .filter(|metric| record.metric(metric).is_some())
            .filter_map(|metric| stats.get(&record.device, metric))
            .filter(|stat| stat.count() > self.config.min_samples)
            .map(|stat| stat.slope().abs())
            .reduce(f64::max);

        let config = &self.config;
        let health = self
            .devices
            .entry(record.device.clone())
            .or_insert_with(DeviceHealth::new);

        if let Some(current_drift) = drift {
            health.drift_rate = config.drift_smoothing * health.drift_rate
                + (1.0 - config.drift_smoothing) * current_drift;
        }

        health.failure_probability = if health.drift_rate > config.high_drift_rate {
            (health.failure_probability + config.risk_increment).min(MAX_FAILURE_PROBABILITY)
        } else {
            (health.failure_probability - config.risk_decrement).max(0.0)
        };

        let recommendations = recommendations(config, &record.device, health, record.ts);
        health.recommendations = recommendations;
        health
    }
}

fn recommendations(config: &HealthConfig, device: &str, health: &DeviceHealth, now: f64) -> Vec<String> {
    let mut out = Vec::new();

    if health.failure_probability > config.high_risk {
        out.push("High failure risk detected. Consider replacement or maintenance.".to_string());
    }

    if health.drift_rate > config.calibration_drift_rate {
        out.push("Significant drift detected. Calibration recommended.".to_string());
    }

    let days_since = (now - health.last_calibration.unwrap_or(0.0)) / SECONDS_PER_DAY;
    let interval = config.calibration_interval(device);
    if days_since > interval {
        let overdue = (days_since - interval) as i64;
        out.push(format!("Calibration overdue by {overdue} days."));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::StatsConfig;

    const DAY: f64 = SECONDS_PER_DAY;

    fn feed(
        predictor: &mut HealthPredictor,
        stats: &mut StatsTracker,
        device: &str,
        ts: f64,
        voltage: f64,
    ) -> DeviceHealth {
        stats.update(device, "voltage", voltage);
        let record = TelemetryRecord::new(device, ts).with_metric("voltage", voltage);
        predictor.update(&record, stats).clone()
    }

    #[test]
    fn test_calibration_interval_lookup() {
        let config = HealthConfig::default();
        assert_eq!(config.calibration_interval("multimeter"), 90.0);
        assert_eq!(config.calibration_interval("scope1"), 30.0);
        assert_eq!(config.calibration_interval("power_supply-2"), 180.0);
        assert_eq!(config.calibration_interval("thermo"), 60.0);
    }

    #[test]
    fn test_steady_device_stays_healthy() {
        let mut predictor = HealthPredictor::new(HealthConfig::default());
        let mut stats = StatsTracker::new(StatsConfig::default());
        predictor.record_calibration("bench", 0.0);

        let mut health = DeviceHealth::new();
        for i in 0..100 {
            health = feed(&mut predictor, &mut stats, "bench", i as f64, 3.3);
        }
        assert!(health.drift_rate < 1e-9);
        assert_eq!(health.failure_probability, 0.0);
        assert!(health.recommendations.is_empty());
        assert_eq!(health.health_score(), 1.0);
    }

    #[test]
    fn test_risk_bounded_under_sustained_drift() {
        let mut predictor = HealthPredictor::new(HealthConfig::default());
        let mut stats = StatsTracker::new(StatsConfig::default());
        predictor.record_calibration("psu", 0.0);

        let mut max_seen: f64 = 0.0;
        let mut health = DeviceHealth::new();
        for i in 0..2000 {
            health = feed(&mut predictor, &mut stats, "psu", i as f64, i as f64 * 0.5);
            assert!((0.0..=MAX_FAILURE_PROBABILITY).contains(&health.failure_probability));
            max_seen = max_seen.max(health.failure_probability);
        }
        assert!((max_seen - MAX_FAILURE_PROBABILITY).abs() < 1e-9);
        assert!(health
            .recommendations
            .iter()
            .any(|r| r.starts_with("High failure risk")));
        assert!(health.recommendations.iter().any(|r| r.contains("Calibration recommended")));
    }

    #[test]
    fn test_risk_decays_when_drift_stops() {
        let mut predictor = HealthPredictor::new(HealthConfig::default());
        let mut stats = StatsTracker::new(StatsConfig::default());
        predictor.record_calibration("psu", 0.0);

        for i in 0..300 {
            feed(&mut predictor, &mut stats, "psu", i as f64, i as f64);
        }
        let peak = predictor.get("psu").unwrap().failure_probability;

        for i in 300..2000 {
            feed(&mut predictor, &mut stats, "psu", i as f64, 300.0);
        }
        let settled = predictor.get("psu").unwrap().failure_probability;
        assert!(settled < peak);
        assert_eq!(settled, 0.0);
    }

    #[test]
    fn test_never_calibrated_is_overdue() {
        let mut predictor = HealthPredictor::new(HealthConfig::default());
        let stats = StatsTracker::new(StatsConfig::default());
        // 100.5 days after epoch against a 60 day default
        let record = TelemetryRecord::new("thermo", 100.5 * DAY).with_metric("voltage", 1.0);

        let health = predictor.update(&record, &stats);
        assert_eq!(health.recommendations, vec!["Calibration overdue by 40 days."]);
    }

    #[test]
    fn test_recent_calibration_clears_overdue() {
        let mut predictor = HealthPredictor::new(HealthConfig::default());
        let stats = StatsTracker::new(StatsConfig::default());
        predictor.record_calibration("scope1", 1000.0 * DAY);

        let record = TelemetryRecord::new("scope1", 1029.0 * DAY).with_metric("voltage", 1.0);
        assert!(predictor.update(&record, &stats).recommendations.is_empty());

        let record = TelemetryRecord::new("scope1", 1032.0 * DAY).with_metric("voltage", 1.0);
        assert_eq!(
            predictor.update(&record, &stats).recommendations,
            vec!["Calibration overdue by 2 days."]
        );
    }

    #[test]
    fn test_drift_ignored_for_short_streams() {
        let mut predictor = HealthPredictor::new(HealthConfig::default());
        let mut stats = StatsTracker::new(StatsConfig::default());
        predictor.record_calibration("psu", 0.0);

        for i in 0..10 {
            let health = feed(&mut predictor, &mut stats, "psu", i as f64, i as f64 * 10.0);
            assert_eq!(health.drift_rate, 0.0);
        }
        let health = feed(&mut predictor, &mut stats, "psu", 10.0, 100.0);
        assert!(health.drift_rate > 0.0);
    }
}
