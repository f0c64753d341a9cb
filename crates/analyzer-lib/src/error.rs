//! Error types for payload decoding, analysis and alert sinks

use thiserror::Error;

/// Inbound payload could not be decoded into a telemetry record
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl ParseError {
    /// Short label used for drop counters
    pub fn reason(&self) -> &'static str {
        match self {
            ParseError::Json(_) => "invalid_json",
            ParseError::NotAnObject => "not_an_object",
            ParseError::MissingField(_) => "missing_field",
            ParseError::InvalidField { .. } => "invalid_field",
        }
    }
}

/// Per-record analysis failure
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("non-finite value {value} for {device}/{metric}")]
    NonFiniteValue {
        device: String,
        metric: String,
        value: f64,
    },

    #[error("non-finite timestamp {0}")]
    NonFiniteTimestamp(f64),

    #[error("model fit failed: {0}")]
    ModelFit(String),
}

/// Failure of an outbound sink (bus publish or file append)
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("publish failed: {0}")]
    Publish(String),

    #[error("publish timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("log append failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The ingest loop is gone and can no longer accept telemetry
#[derive(Debug, Error)]
#[error("ingest loop is not running")]
pub struct IngestClosed;
