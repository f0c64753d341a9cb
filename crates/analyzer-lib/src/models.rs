//! Core data models for the telemetry analyzer

use crate::error::ParseError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Topic prefix for per-device telemetry (`lab/device/{device}/telemetry`)
pub const TELEMETRY_TOPIC_PREFIX: &str = "lab/device/";

/// Topic suffix for per-device telemetry
pub const TELEMETRY_TOPIC_SUFFIX: &str = "/telemetry";

/// Subscription filter matching every device's telemetry topic
pub const TELEMETRY_TOPIC_FILTER: &str = "lab/device/+/telemetry";

/// Outbound topic for alerts
pub const ALERT_TOPIC: &str = "lab/alerts";

/// One decoded telemetry sample from an instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub device: String,
    pub ts: f64,
    #[serde(flatten)]
    pub metrics: BTreeMap<String, f64>,
}

impl TelemetryRecord {
    pub fn new(device: impl Into<String>, ts: f64) -> Self {
        Self {
            device: device.into(),
            ts,
            metrics: BTreeMap::new(),
        }
    }

    /// Builder-style metric insertion
    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    /// Decode a bus payload.
    ///
    /// The payload must be a JSON object with a string `device` and a numeric
    /// `ts`. Every other numeric key becomes a metric; non-numeric keys
    /// (identification strings, unit tables) are ignored. When the payload
    /// carries no `device`, `topic_device` is used instead.
    pub fn from_payload(payload: &[u8], topic_device: Option<&str>) -> Result<Self, ParseError> {
        let value: Value = serde_json::from_slice(payload)?;
        let Value::Object(map) = value else {
            return Err(ParseError::NotAnObject);
        };

        let device = match map.get("device") {
            Some(Value::String(d)) if !d.is_empty() => d.clone(),
            Some(Value::String(_)) => {
                return Err(ParseError::InvalidField {
                    field: "device",
                    reason: "empty string".to_string(),
                })
            }
            Some(other) => {
                return Err(ParseError::InvalidField {
                    field: "device",
                    reason: format!("expected string, got {}", json_kind(other)),
                })
            }
            None => match topic_device {
                Some(d) if !d.is_empty() => d.to_string(),
                _ => return Err(ParseError::MissingField("device")),
            },
        };

        let ts = match map.get("ts") {
            Some(Value::Number(n)) => n.as_f64().ok_or_else(|| ParseError::InvalidField {
                field: "ts",
                reason: "not representable as f64".to_string(),
            })?,
            Some(other) => {
                return Err(ParseError::InvalidField {
                    field: "ts",
                    reason: format!("expected number, got {}", json_kind(other)),
                })
            }
            None => return Err(ParseError::MissingField("ts")),
        };

        let mut metrics = BTreeMap::new();
        for (key, value) in &map {
            if key == "device" || key == "ts" {
                continue;
            }
            if let Value::Number(n) = value {
                if let Some(v) = n.as_f64() {
                    metrics.insert(key.clone(), v);
                }
            }
        }

        Ok(Self {
            device,
            ts,
            metrics,
        })
    }
}

/// Extract `{device}` from `lab/device/{device}/telemetry`
pub fn device_from_topic(topic: &str) -> Option<&str> {
    topic
        .strip_prefix(TELEMETRY_TOPIC_PREFIX)?
        .strip_suffix(TELEMETRY_TOPIC_SUFFIX)
        .filter(|d| !d.is_empty() && !d.contains('/'))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Key identifying one metric stream of one device
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricKey {
    pub device: String,
    pub metric: String,
}

impl MetricKey {
    pub fn new(device: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            metric: metric.into(),
        }
    }
}
