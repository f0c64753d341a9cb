//! Analyzer configuration
//!
//! Values come from an optional TOML file overlaid with `ANALYZER_*`
//! environment variables; nested keys use `__` (for example
//! `ANALYZER_BROKER__HOST` or `ANALYZER_ENGINE__THRESHOLD__Z_THRESHOLD`).

use analyzer_lib::alerts::DispatcherConfig;
use analyzer_lib::models::TELEMETRY_TOPIC_FILTER;
use analyzer_lib::EngineConfig;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Config file used when `ANALYZER_CONFIG` is unset
pub const DEFAULT_CONFIG_FILE: &str = "analyzer.toml";

/// MQTT broker connection settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
    /// Subscription filter for telemetry topics
    pub telemetry_filter: String,
    /// Request queue depth of the MQTT client
    pub request_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "lab-analyzer".to_string(),
            keep_alive_secs: 60,
            telemetry_filter: TELEMETRY_TOPIC_FILTER.to_string(),
            request_capacity: 64,
        }
    }
}

impl BrokerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Analyzer configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Name used in structured log events
    pub instance: String,

    /// API server port for health/metrics
    pub api_port: u16,

    /// Root of the daily alert log and telemetry archive
    pub data_dir: PathBuf,

    /// Inbound telemetry queue depth
    pub ingest_capacity: usize,

    /// Also write every accepted record under `data_dir`
    pub archive_telemetry: bool,

    /// Known calibration times (epoch seconds) per device
    pub calibrations: BTreeMap<String, f64>,

    pub broker: BrokerConfig,
    pub dispatcher: DispatcherConfig,
    pub engine: EngineConfig,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            instance: "lab-analyzer".to_string(),
            api_port: 8080,
            data_dir: PathBuf::from("data"),
            ingest_capacity: 1024,
            archive_telemetry: false,
            calibrations: BTreeMap::new(),
            broker: BrokerConfig::default(),
            dispatcher: DispatcherConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl AnalyzerConfig {
    /// Load configuration from the config file named by `ANALYZER_CONFIG` and the environment
    pub fn load() -> Result<Self> {
        let path =
            std::env::var("ANALYZER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(&path)
    }

    /// Load configuration from `path` (if it exists) and the environment
    pub fn load_from(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("ANALYZER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {path}"))?;

        config
            .try_deserialize()
            .context("Invalid analyzer configuration")
    }
}
