//! Lab telemetry analyzer service
//!
//! Wires the analytics library to an MQTT broker, the on-disk alert log and
//! an HTTP endpoint for probes and metrics.

pub mod api;
pub mod config;
pub mod mqtt;
