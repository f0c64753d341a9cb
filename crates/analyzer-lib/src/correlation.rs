//! Cross-instrument correlation discovery
//!
//! Keeps a short history per device/metric stream and periodically computes
//! Pearson correlations between every pair of streams on different devices.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

/// Correlation analyzer configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Points kept per stream
    pub history: usize,
    /// Both streams need at least this many points
    pub min_points: usize,
    /// |r| above which a pair is reported
    pub moderate_threshold: f64,
    /// |r| above which a pair is labelled strong
    pub strong_threshold: f64,
    /// Run the analysis after this many ingested samples
    pub analysis_interval: u64,
    /// Pairs included in one discovery alert
    pub top_n: usize,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            history: 50,
            min_points: 10,
            moderate_threshold: 0.7,
            strong_threshold: 0.8,
            analysis_interval: 100,
            top_n: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strength {
    Strong,
    Moderate,
}

/// One reported correlation between two streams
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    pub device1: String,
    pub metric1: String,
    pub device2: String,
    pub metric2: String,
    pub correlation: f64,
    pub strength: Strength,
}

#[derive(Debug, Clone, Copy)]
struct Point {
    value: f64,
    ts: f64,
}

/// Bounded per-stream history plus pairwise correlation analysis
#[derive(Debug, Default)]
pub struct CorrelationAnalyzer {
    config: CorrelationConfig,
    // Sorted maps keep the pair enumeration order stable between runs
    series: BTreeMap<String, BTreeMap<String, VecDeque<Point>>>,
    samples_since_analysis: u64,
}

impl CorrelationAnalyzer {
    pub fn new(config: CorrelationConfig) -> Self {
        Self {
            config,
            series: BTreeMap::new(),
            samples_since_analysis: 0,
        }
    }

    /// Append a sample, evicting the oldest once the stream is full
    pub fn add_sample(&mut self, device: &str, metric: &str, value: f64, ts: f64) {
        let capacity = self.config.history.max(1);
        let stream = self
            .series
            .entry(device.to_string())
            .or_default()
            .entry(metric.to_string())
            .or_insert_with(|| VecDeque::with_capacity(capacity));

        if stream.len() >= capacity {
            stream.pop_front();
        }
        stream.push_back(Point { value, ts });
        self.samples_since_analysis += 1;
    }

    /// Whether enough samples arrived since the last analysis
    pub fn analysis_due(&self) -> bool {
        self.samples_since_analysis >= self.config.analysis_interval.max(1)
    }

    /// Run the analysis if due and return the top pairs
    ///
    /// Returns `None` when not due or when nothing crosses the threshold.
    pub fn poll(&mut self) -> Option<Vec<Correlation>> {
        if !self.analysis_due() {
            return None;
        }
        self.samples_since_analysis = 0;

        let mut found = self.analyze();
        if found.is_empty() {
            return None;
        }
        found.truncate(self.config.top_n);
        debug!(
            pairs = found.len(),
            newest_ts = ?self.newest_ts(),
            "Correlations found"
        );
        Some(found)
    }

    /// Latest timestamp over every stream
    fn newest_ts(&self) -> Option<f64> {
        self.series
            .values()
            .flat_map(BTreeMap::values)
            .filter_map(|stream| stream.back().map(|p| p.ts))
            .reduce(f64::max)
    }

    /// All reportable correlations, strongest first
    pub fn analyze(&self) -> Vec<Correlation> {
        let devices: Vec<_> = self.series.iter().collect();
        let mut found = Vec::new();

        for (i, (dev1, metrics1)) in devices.iter().enumerate() {
            for (dev2, metrics2) in &devices[i + 1..] {
                for (metric1, s1) in metrics1.iter() {
                    for (metric2, s2) in metrics2.iter() {
                        let r = self.correlate(s1, s2);
                        if r.abs() <= self.config.moderate_threshold {
                            continue;
                        }
                        let strength = if r.abs() > self.config.strong_threshold {
                            Strength::Strong
                        } else {
                            Strength::Moderate
                        };
                        found.push(Correlation {
                            device1: dev1.to_string(),
                            metric1: metric1.clone(),
                            device2: dev2.to_string(),
                            metric2: metric2.clone(),
                            correlation: r,
                            strength,
                        });
                    }
                }
            }
        }

        found.sort_by(|a, b| b.correlation.abs().total_cmp(&a.correlation.abs()));
        found
    }

    fn correlate(&self, a: &VecDeque<Point>, b: &VecDeque<Point>) -> f64 {
        if a.len() < self.config.min_points || b.len() < self.config.min_points {
            return 0.0;
        }

        let n = a.len().min(b.len()).min(self.config.history);
        let xs: Vec<f64> = a.iter().skip(a.len() - n).map(|p| p.value).collect();
        let ys: Vec<f64> = b.iter().skip(b.len() - n).map(|p| p.value).collect();
        pearson(&xs, &ys)
    }
}

/// Pearson correlation coefficient; 0.0 for degenerate input
pub fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return 0.0;
    }

    let mean_x = xs[..n].iter().sum::<f64>() / n as f64;
    let mean_y = ys[..n].iter().sum::<f64>() / n as f64;

    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in xs[..n].iter().zip(&ys[..n]) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }

    let denom = (sxx * syy).sqrt();
    if denom <= f64::EPSILON || !denom.is_finite() {
        return 0.0;
    }
    (sxy / denom).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(analyzer: &mut CorrelationAnalyzer, device: &str, metric: &str, values: &[f64]) {
        for (i, v) in values.iter().enumerate() {
            analyzer.add_sample(device, metric, *v, i as f64);
        }
    }

    fn wave(n: usize) -> Vec<f64> {
        (0..n).map(|i| (i as f64 * 0.7).sin() * 2.0 + 5.0).collect()
    }

    #[test]
    fn test_identical_series_strong() {
        let mut analyzer = CorrelationAnalyzer::new(CorrelationConfig::default());
        let values = wave(30);
        fill(&mut analyzer, "scope1", "voltage", &values);
        fill(&mut analyzer, "multimeter", "voltage", &values);

        let found = analyzer.analyze();
        assert_eq!(found.len(), 1);
        assert!((found[0].correlation - 1.0).abs() < 1e-12);
        assert_eq!(found[0].strength, Strength::Strong);
        assert_eq!(found[0].device1, "multimeter");
        assert_eq!(found[0].device2, "scope1");
    }

    #[test]
    fn test_negated_series() {
        let mut analyzer = CorrelationAnalyzer::new(CorrelationConfig::default());
        let values = wave(30);
        let negated: Vec<f64> = values.iter().map(|v| -v).collect();
        fill(&mut analyzer, "a", "voltage", &values);
        fill(&mut analyzer, "b", "current", &negated);

        let found = analyzer.analyze();
        assert!((found[0].correlation + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_too_few_points() {
        let mut analyzer = CorrelationAnalyzer::new(CorrelationConfig::default());
        let values = wave(9);
        fill(&mut analyzer, "a", "voltage", &values);
        fill(&mut analyzer, "b", "voltage", &values);
        assert!(analyzer.analyze().is_empty());
    }

    #[test]
    fn test_zero_variance_is_uncorrelated() {
        assert_eq!(pearson(&[1.0; 20], &wave(20)), 0.0);
    }

    #[test]
    fn test_same_device_pairs_skipped() {
        let mut analyzer = CorrelationAnalyzer::new(CorrelationConfig::default());
        let values = wave(30);
        fill(&mut analyzer, "scope1", "voltage", &values);
        fill(&mut analyzer, "scope1", "current", &values);
        assert!(analyzer.analyze().is_empty());
    }

    #[test]
    fn test_history_bounded() {
        let mut analyzer = CorrelationAnalyzer::new(CorrelationConfig::default());
        fill(&mut analyzer, "a", "voltage", &wave(120));
        let stream = &analyzer.series["a"]["voltage"];
        assert_eq!(stream.len(), 50);
        assert_eq!(stream.back().map(|p| p.ts), Some(119.0));
        assert_eq!(analyzer.newest_ts(), Some(119.0));
    }

    #[test]
    fn test_unequal_lengths_use_common_tail() {
        let mut analyzer = CorrelationAnalyzer::new(CorrelationConfig::default());
        let long = wave(40);
        fill(&mut analyzer, "a", "voltage", &long);
        fill(&mut analyzer, "b", "voltage", &long[25..]);

        let found = analyzer.analyze();
        assert_eq!(found.len(), 1);
        assert!((found[0].correlation - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_poll_every_interval_top_n() {
        let mut analyzer = CorrelationAnalyzer::new(CorrelationConfig::default());
        let values = wave(20);
        // 5 devices x 1 metric x 20 points = 100 samples, 10 pairs
        for device in ["d1", "d2", "d3", "d4", "d5"] {
            assert!(analyzer.poll().is_none());
            fill(&mut analyzer, device, "voltage", &values);
        }

        let found = analyzer.poll().expect("analysis due after 100 samples");
        assert_eq!(found.len(), 5);
        assert!(analyzer.poll().is_none());
    }

    #[test]
    fn test_results_sorted_by_magnitude() {
        let mut analyzer = CorrelationAnalyzer::new(CorrelationConfig::default());
        let base = wave(30);
        let noisy: Vec<f64> = base
            .iter()
            .enumerate()
            .map(|(i, v)| v + if i % 2 == 0 { 0.6 } else { -0.6 })
            .collect();
        fill(&mut analyzer, "a", "voltage", &base);
        fill(&mut analyzer, "b", "voltage", &base);
        fill(&mut analyzer, "c", "voltage", &noisy);

        let found = analyzer.analyze();
        assert!(found.len() >= 2);
        for pair in found.windows(2) {
            assert!(pair[0].correlation.abs() >= pair[1].correlation.abs());
        }
    }
}
