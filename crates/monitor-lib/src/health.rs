//! Self-health tracking for the monitor
//!
//! Tracks whether the monitor's own dependencies (cluster API, metrics
//! source, log collector) are reachable, for the monitor's liveness and
//! readiness probes. This is separate from the verdict about the watched
//! service.

use crate::models::HealthState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health of one monitor component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self {
            status: HealthState::Healthy,
            message: None,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            status: HealthState::Degraded,
            message: Some(message.into()),
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: HealthState::Unhealthy,
            message: Some(message.into()),
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Overall self-health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthState,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across components
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> HealthState {
        components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthState::Healthy)
    }
}

/// Readiness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const CLUSTER_API: &str = "cluster_api";
    pub const METRICS_SOURCE: &str = "metrics_source";
    pub const LOG_COLLECTOR: &str = "log_collector";
}

/// Registry of monitor component health
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
            ready: Arc::new(RwLock::new(false)),
        }
    }

    /// Register a component with initial healthy status
    pub async fn register(&self, name: &str) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), ComponentHealth::healthy());
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), health);
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

    /// Record the outcome of a dependency call
    pub async fn record<E: std::fmt::Display>(&self, name: &str, result: Result<(), E>) {
        match result {
            Ok(()) => self.set_healthy(name).await,
            Err(e) => self.set_unhealthy(name, e.to_string()).await,
        }
    }

    pub async fn set_ready(&self, ready: bool) {
        let mut r = self.ready.write().await;
        *r = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let ready = *self.ready.read().await;
        let health = self.health().await;

        if !ready {
            ReadinessResponse {
                ready: false,
                reason: Some("Monitor has not completed its first tick".to_string()),
            }
        } else if health.status == HealthState::Unhealthy {
            ReadinessResponse {
                ready: false,
                reason: Some("Monitoring dependency unavailable".to_string()),
            }
        } else {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_registry_initial_state() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, HealthState::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_health_registry_component_registration() {
        let registry = HealthRegistry::new();
        registry.register(components::CLUSTER_API).await;

        let health = registry.health().await;
        assert_eq!(
            health.components[components::CLUSTER_API].status,
            HealthState::Healthy
        );
    }

    #[tokio::test]
    async fn test_health_registry_degraded_status() {
        let registry = HealthRegistry::new();
        registry.register(components::CLUSTER_API).await;
        registry.register(components::LOG_COLLECTOR).await;

        registry
            .set_degraded(components::LOG_COLLECTOR, "Slow log store")
            .await;

        assert_eq!(registry.health().await.status, HealthState::Degraded);
    }

    #[tokio::test]
    async fn test_record_error_marks_unhealthy() {
        let registry = HealthRegistry::new();
        registry.register(components::METRICS_SOURCE).await;

        registry
            .record(components::METRICS_SOURCE, Err("metrics-server not installed"))
            .await;

        let health = registry.health().await;
        assert_eq!(health.status, HealthState::Unhealthy);
        assert_eq!(
            health.components[components::METRICS_SOURCE].message.as_deref(),
            Some("metrics-server not installed")
        );

        registry
            .record::<String>(components::METRICS_SOURCE, Ok(()))
            .await;
        assert_eq!(registry.health().await.status, HealthState::Healthy);
    }

    #[tokio::test]
    async fn test_readiness_not_ready_initially() {
        let registry = HealthRegistry::new();
        let readiness = registry.readiness().await;

        assert!(!readiness.ready);
        assert!(readiness.reason.is_some());
    }

    #[tokio::test]
    async fn test_readiness_not_ready_when_unhealthy() {
        let registry = HealthRegistry::new();
        registry.register(components::CLUSTER_API).await;
        registry.set_ready(true).await;
        assert!(registry.readiness().await.ready);

        registry
            .set_unhealthy(components::CLUSTER_API, "connection refused")
            .await;
        assert!(!registry.readiness().await.ready);
    }
}
