//! Analytics library for lab instrument telemetry
//!
//! This crate provides the core functionality for:
//! - Online per-stream statistics
//! - Statistical, drift and multivariate anomaly detection
//! - Predictive maintenance heuristics
//! - Cross-instrument correlation discovery
//! - Alert dispatch to the bus and a daily on-disk log
//! - Health checks and observability

pub mod alerts;
pub mod anomaly;
pub mod archive;
pub mod correlation;
pub mod engine;
pub mod error;
pub mod health;
pub mod ingest;
pub mod maintenance;
pub mod models;
pub mod observability;
pub mod stats;
pub mod storage;

pub use alerts::{Alert, AlertKind};
pub use engine::{Analyzer, EngineConfig};
pub use error::{AnalysisError, IngestClosed, ParseError, SinkError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use ingest::{Inbound, IngestHandle, IngestLoop};
pub use models::*;
pub use observability::{AnalyzerMetrics, StructuredLogger};
