//! Online per-stream statistics
//!
//! Maintains mean and variance with Welford's single-pass algorithm, plus an
//! exponential moving average whose recent history drives a smoothed slope.

use crate::models::MetricKey;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};

/// Default EMA smoothing factor
pub const DEFAULT_EMA_ALPHA: f64 = 0.2;

/// Default number of EMA values kept for slope estimation
pub const DEFAULT_SLOPE_WINDOW: usize = 30;

/// Configuration for online statistics
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// EMA smoothing factor in (0, 1]
    pub ema_alpha: f64,
    /// Capacity of the EMA window used for slope
    pub slope_window: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            ema_alpha: DEFAULT_EMA_ALPHA,
            slope_window: DEFAULT_SLOPE_WINDOW,
        }
    }
}

/// Online statistics for a single (device, metric) stream
#[derive(Debug, Clone)]
pub struct OnlineStat {
    n: u64,
    mean: f64,
    /// Sum of squared deviations from the running mean
    m2: f64,
    ema: Option<f64>,
    alpha: f64,
    window: VecDeque<f64>,
    window_capacity: usize,
}

impl OnlineStat {
    pub fn new(alpha: f64, window_capacity: usize) -> Self {
        let window_capacity = window_capacity.max(1);
        Self {
            n: 0,
            mean: 0.0,
            m2: 0.0,
            ema: None,
            alpha,
            window: VecDeque::with_capacity(window_capacity),
            window_capacity,
        }
    }

    /// Incorporate one sample
    pub fn update(&mut self, value: f64) {
        self.n += 1;
        let delta = value - self.mean;
        self.mean += delta / self.n as f64;
        self.m2 += delta * (value - self.mean);
        // Rounding can push M2 a hair below zero on constant input
        if self.m2 < 0.0 {
            self.m2 = 0.0;
        }

        let ema = match self.ema {
            None => value,
            Some(prev) => self.alpha * value + (1.0 - self.alpha) * prev,
        };
        self.ema = Some(ema);

        if self.window.len() == self.window_capacity {
            self.window.pop_front();
        }
        self.window.push_back(ema);
    }

    pub fn count(&self) -> u64 {
        self.n
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn ema(&self) -> Option<f64> {
        self.ema
    }

    /// Sample standard deviation (Bessel's correction), 0 until two samples
    pub fn std(&self) -> f64 {
        if self.n > 1 {
            (self.m2 / (self.n - 1) as f64).sqrt()
        } else {
            0.0
        }
    }

    /// Average per-sample change across the EMA window
    pub fn slope(&self) -> f64 {
        match (self.window.front(), self.window.back()) {
            (Some(first), Some(last)) if self.window.len() >= 2 => {
                (last - first) / (self.window.len() - 1) as f64
            }
            _ => 0.0,
        }
    }

    pub fn snapshot(&self) -> StatSnapshot {
        StatSnapshot {
            n: self.n,
            mean: self.mean,
            std: self.std(),
            ema: self.ema,
            slope: self.slope(),
        }
    }
}

/// Read-only view of an [`OnlineStat`] consumed by the stateless detectors
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatSnapshot {
    pub n: u64,
    pub mean: f64,
    pub std: f64,
    pub ema: Option<f64>,
    pub slope: f64,
}

/// Registry of online statistics keyed by (device, metric)
#[derive(Debug, Default)]
pub struct StatsTracker {
    config: StatsConfig,
    stats: HashMap<MetricKey, OnlineStat>,
}

impl StatsTracker {
    pub fn new(config: StatsConfig) -> Self {
        Self {
            config,
            stats: HashMap::new(),
        }
    }

    /// Fetch the stream's statistics, constructing them on first use
    pub fn get_or_create(&mut self, device: &str, metric: &str) -> &mut OnlineStat {
        let key = MetricKey::new(device, metric);
        let config = &self.config;
        self.stats
            .entry(key)
            .or_insert_with(|| OnlineStat::new(config.ema_alpha, config.slope_window))
    }

    pub fn get(&self, device: &str, metric: &str) -> Option<&OnlineStat> {
        self.stats.get(&MetricKey::new(device, metric))
    }

    /// Update a stream and return its post-update snapshot
    pub fn update(&mut self, device: &str, metric: &str, value: f64) -> StatSnapshot {
        let stat = self.get_or_create(device, metric);
        stat.update(value);
        stat.snapshot()
    }

    pub fn std(&self, device: &str, metric: &str) -> f64 {
        self.get(device, metric).map(OnlineStat::std).unwrap_or(0.0)
    }

    pub fn slope(&self, device: &str, metric: &str) -> f64 {
        self.get(device, metric).map(OnlineStat::slope).unwrap_or(0.0)
    }

    pub fn snapshot(&self, device: &str, metric: &str) -> Option<StatSnapshot> {
        self.get(device, metric).map(OnlineStat::snapshot)
    }

    /// Number of distinct devices with at least one tracked stream
    pub fn device_count(&self) -> usize {
        let mut devices: Vec<&str> = self.stats.keys().map(|k| k.device.as_str()).collect();
        devices.sort_unstable();
        devices.dedup();
        devices.len()
    }
}
