//! Component health tracking for the analyzer
//!
//! Each long-running piece (ingest loop, outlier model, alert sinks, bus
//! connection) reports its own status. `/healthz` shows the worst of them;
//! `/readyz` additionally requires the broker to have accepted a connection
//! and the components on the detection path to be operational.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Health status of a component, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Working, but a sink or dependency is failing
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        *self != ComponentStatus::Unhealthy
    }
}

/// Last reported state of one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Unix seconds of the last status change
    pub since: i64,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            since: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::new(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status over all components; healthy when none are registered
    pub fn compute_status(components: &BTreeMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|h| h.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy)
    }
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const INGEST: &str = "ingest";
    pub const MODEL: &str = "model";
    pub const PUBLISHER: &str = "publisher";
    pub const ALERT_LOG: &str = "alert_log";
    pub const ARCHIVE: &str = "archive";
    pub const BUS: &str = "bus";

    /// Components whose failure stops detection altogether
    pub const DETECTION_PATH: [&str; 2] = [INGEST, BUS];
}

#[derive(Debug, Default)]
struct RegistryState {
    components: BTreeMap<String, ComponentHealth>,
    connected: bool,
}

/// Shared registry of component health, cheap to clone
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component as healthy
    pub async fn register(&self, name: &str) {
        self.state
            .write()
            .await
            .components
            .insert(name.to_string(), ComponentHealth::healthy());
    }

    /// Record a component's state; status changes are logged
    ///
    /// Repeating the current status keeps the original `since` and only
    /// refreshes the message.
    pub async fn update(&self, name: &str, health: ComponentHealth) {
        let mut state = self.state.write().await;
        let previous = state.components.get(name).map(|h| h.status);

        if previous == Some(health.status) {
            if let Some(current) = state.components.get_mut(name) {
                current.message = health.message;
            }
            return;
        }

        if health.status == ComponentStatus::Healthy {
            info!(component = name, from = ?previous, "Component recovered");
        } else {
            warn!(
                component = name,
                status = ?health.status,
                message = health.message.as_deref().unwrap_or(""),
                "Component health changed"
            );
        }
        state.components.insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Mark whether the broker connection has been established
    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.connected = ready;
    }

    /// Current status of a single component, if registered
    pub async fn status(&self, name: &str) -> Option<ComponentStatus> {
        self.state
            .read()
            .await
            .components
            .get(name)
            .map(|h| h.status)
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.state.read().await.components.clone();
        HealthResponse {
            status: HealthResponse::compute_status(&components),
            components,
        }
    }

    /// Ready once connected, with no unhealthy component
    ///
    /// A failing detection-path component is named in the reason; degraded
    /// sinks do not affect readiness.
    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;

        let reason = if !state.connected {
            Some("Analyzer not yet connected".to_string())
        } else if let Some(name) = components::DETECTION_PATH.iter().find(|name| {
            state
                .components
                .get(**name)
                .is_some_and(|h| !h.status.is_operational())
        }) {
            Some(format!("Component {name} unhealthy"))
        } else if !HealthResponse::compute_status(&state.components).is_operational() {
            Some("Critical component unhealthy".to_string())
        } else {
            None
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason,
        }
    }
}
