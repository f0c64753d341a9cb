//! Alert records and their dispatch
//!
//! Every detector result becomes an [`Alert`]: a timestamp, an optional device
//! and a kind-specific body. The JSON form (flat object with a `type` tag) is
//! what goes on the bus and into the daily alert log.

mod dispatcher;

pub use dispatcher::{
    alert_channel, AlertDispatcher, AlertPublisher, AlertSender, DispatchOutcome,
    DispatcherConfig,
};

use crate::anomaly::{DriftAnomaly, StatisticalAnomaly, Verdict};
use crate::correlation::Correlation;
use crate::maintenance::DeviceHealth;
use serde::{Deserialize, Serialize};

/// A single alert as published and logged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Timestamp of the record that produced the alert
    pub ts: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(flatten)]
    pub kind: AlertKind,
}

/// Kind-specific alert body, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertKind {
    StatisticalAnomaly {
        metric: String,
        value: f64,
        mean: f64,
        std: f64,
        z: f64,
    },
    Drift {
        metric: String,
        slope: f64,
        ema: f64,
    },
    AiAnomaly {
        score: f64,
        message: String,
    },
    MaintenanceRecommendation {
        health_score: f64,
        recommendations: Vec<String>,
    },
    CorrelationDiscovery {
        correlations: Vec<Correlation>,
    },
}

impl Alert {
    pub fn statistical(device: &str, ts: f64, metric: &str, anomaly: &StatisticalAnomaly) -> Self {
        Self {
            ts,
            device: Some(device.to_string()),
            kind: AlertKind::StatisticalAnomaly {
                metric: metric.to_string(),
                value: anomaly.value,
                mean: anomaly.mean,
                std: anomaly.std,
                z: anomaly.z,
            },
        }
    }

    pub fn drift(device: &str, ts: f64, metric: &str, drift: &DriftAnomaly) -> Self {
        Self {
            ts,
            device: Some(device.to_string()),
            kind: AlertKind::Drift {
                metric: metric.to_string(),
                slope: drift.slope,
                ema: drift.ema,
            },
        }
    }

    pub fn multivariate(device: &str, ts: f64, verdict: &Verdict) -> Self {
        Self {
            ts,
            device: Some(device.to_string()),
            kind: AlertKind::AiAnomaly {
                score: verdict.score,
                message: format!("Unusual multi-metric pattern in {device} data"),
            },
        }
    }

    pub fn maintenance(device: &str, ts: f64, health: &DeviceHealth) -> Self {
        Self {
            ts,
            device: Some(device.to_string()),
            kind: AlertKind::MaintenanceRecommendation {
                health_score: health.health_score(),
                recommendations: health.recommendations.clone(),
            },
        }
    }

    pub fn correlations(ts: f64, correlations: Vec<Correlation>) -> Self {
        Self {
            ts,
            device: None,
            kind: AlertKind::CorrelationDiscovery { correlations },
        }
    }

    /// Wire name of the alert kind
    pub fn alert_type(&self) -> &'static str {
        self.kind.type_name()
    }

    /// Metric the alert refers to, for single-stream kinds
    pub fn metric(&self) -> Option<&str> {
        match &self.kind {
            AlertKind::StatisticalAnomaly { metric, .. } | AlertKind::Drift { metric, .. } => {
                Some(metric)
            }
            _ => None,
        }
    }
}

impl AlertKind {
    pub const TYPE_NAMES: [&'static str; 5] = [
        "statistical_anomaly",
        "drift",
        "ai_anomaly",
        "maintenance_recommendation",
        "correlation_discovery",
    ];

    pub fn type_name(&self) -> &'static str {
        match self {
            AlertKind::StatisticalAnomaly { .. } => "statistical_anomaly",
            AlertKind::Drift { .. } => "drift",
            AlertKind::AiAnomaly { .. } => "ai_anomaly",
            AlertKind::MaintenanceRecommendation { .. } => "maintenance_recommendation",
            AlertKind::CorrelationDiscovery { .. } => "correlation_discovery",
        }
    }
}
