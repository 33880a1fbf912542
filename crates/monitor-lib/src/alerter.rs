//! Verdict events and transition alerts
//!
//! Handles:
//! - Building the per-tick event `{tick_timestamp, verdict, contributing_evidence}`
//! - Building firing/resolved alerts on verdict transitions
//! - Formatting alerts for an Alertmanager webhook

use crate::models::{
    HealthState, HealthVerdict, PodAssessment, PodReport, ProbeResult, ResourceFinding,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Failure to deliver an event or alert
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("failed to deliver alert: {0}")]
    Delivery(String),

    #[error("failed to encode alert: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Evidence that justified a verdict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub reasons: Vec<String>,
    pub failed_probes: Vec<ProbeResult>,
    pub resource_anomalies: Vec<ResourceFinding>,
    pub unhealthy_pods: Vec<PodReport>,
    pub infrastructure_errors: Vec<String>,
}

/// Structured event emitted once per tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorEvent {
    pub tick_timestamp: DateTime<Utc>,
    pub verdict: HealthState,
    pub contributing_evidence: Evidence,
}

impl MonitorEvent {
    pub fn from_verdict(verdict: &HealthVerdict) -> Self {
        Self {
            tick_timestamp: verdict.tick_timestamp,
            verdict: verdict.state,
            contributing_evidence: Evidence {
                reasons: verdict.reasons.clone(),
                failed_probes: verdict.probes.iter().filter(|p| !p.success).cloned().collect(),
                resource_anomalies: verdict
                    .resources
                    .iter()
                    .filter(|f| f.verdict.is_anomaly())
                    .cloned()
                    .collect(),
                unhealthy_pods: verdict
                    .pods
                    .iter()
                    .filter(|p| p.assessment != PodAssessment::Ok)
                    .cloned()
                    .collect(),
                infrastructure_errors: verdict.infrastructure_errors.clone(),
            },
        }
    }
}

/// Alert status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Firing,
    Resolved,
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertStatus::Firing => write!(f, "firing"),
            AlertStatus::Resolved => write!(f, "resolved"),
        }
    }
}

/// Alert emitted when the verdict enters or leaves unhealthy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionAlert {
    pub status: AlertStatus,
    pub target: String,
    pub namespace: String,
    pub previous: Option<HealthState>,
    pub current: HealthState,
    pub tick_timestamp: DateTime<Utc>,
    pub summary: String,
    pub reasons: Vec<String>,
    pub pods: Vec<String>,
}

/// Alertmanager webhook alert format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertmanagerAlert {
    pub status: String,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    /// Start time in RFC3339 format
    pub starts_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generator_url: Option<String>,
}

/// Alertmanager webhook payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertmanagerPayload {
    pub alerts: Vec<AlertmanagerAlert>,
}

/// Receiver of verdict events and transition alerts
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn emit_event(&self, event: &MonitorEvent) -> Result<(), AlertError>;

    async fn emit_alert(&self, alert: &TransitionAlert) -> Result<(), AlertError>;
}

/// Builds transition alerts for one monitored service
#[derive(Debug, Clone)]
pub struct Alerter {
    target: String,
    namespace: String,
    generator_url: Option<String>,
}

impl Alerter {
    pub fn new(target: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            namespace: namespace.into(),
            generator_url: None,
        }
    }

    /// Link back to the monitor, included in Alertmanager alerts
    pub fn with_generator_url(mut self, url: impl Into<String>) -> Self {
        self.generator_url = Some(url.into());
        self
    }

    /// Alert for a transition into unhealthy
    pub fn firing(&self, previous: Option<HealthState>, verdict: &HealthVerdict) -> TransitionAlert {
        TransitionAlert {
            status: AlertStatus::Firing,
            target: self.target.clone(),
            namespace: self.namespace.clone(),
            previous,
            current: verdict.state,
            tick_timestamp: verdict.tick_timestamp,
            summary: format!("{} in {} is unhealthy", self.target, self.namespace),
            reasons: verdict.reasons.clone(),
            pods: verdict
                .implicated_pods()
                .into_iter()
                .map(|p| p.name)
                .collect(),
        }
    }

    /// Alert for a recovery out of unhealthy
    pub fn resolved(&self, verdict: &HealthVerdict) -> TransitionAlert {
        TransitionAlert {
            status: AlertStatus::Resolved,
            target: self.target.clone(),
            namespace: self.namespace.clone(),
            previous: Some(HealthState::Unhealthy),
            current: verdict.state,
            tick_timestamp: verdict.tick_timestamp,
            summary: format!(
                "{} in {} recovered ({})",
                self.target, self.namespace, verdict.state
            ),
            reasons: verdict.reasons.clone(),
            pods: verdict
                .pods
                .iter()
                .map(|p| p.status.pod.name.clone())
                .collect(),
        }
    }

    /// Convert a transition alert to Alertmanager format
    pub fn to_alertmanager(&self, alert: &TransitionAlert) -> AlertmanagerAlert {
        let mut labels = HashMap::new();
        labels.insert("alertname".to_string(), "ServiceUnhealthy".to_string());
        labels.insert("severity".to_string(), "critical".to_string());
        labels.insert("service".to_string(), alert.target.clone());
        labels.insert("namespace".to_string(), alert.namespace.clone());

        let mut annotations = HashMap::new();
        annotations.insert("summary".to_string(), alert.summary.clone());
        annotations.insert("description".to_string(), alert.reasons.join("; "));
        if !alert.pods.is_empty() {
            annotations.insert("pods".to_string(), alert.pods.join(","));
        }

        let timestamp = alert.tick_timestamp.to_rfc3339();
        let (starts_at, ends_at) = match alert.status {
            AlertStatus::Firing => (timestamp, None),
            AlertStatus::Resolved => (timestamp.clone(), Some(timestamp)),
        };

        AlertmanagerAlert {
            status: alert.status.to_string(),
            labels,
            annotations,
            starts_at,
            ends_at,
            generator_url: self.generator_url.clone(),
        }
    }

    pub fn create_alertmanager_payload(alerts: Vec<AlertmanagerAlert>) -> AlertmanagerPayload {
        AlertmanagerPayload { alerts }
    }
}

/// Sink writing events and alerts to the tracing subscriber
#[derive(Debug, Clone, Default)]
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn emit_event(&self, event: &MonitorEvent) -> Result<(), AlertError> {
        let evidence = serde_json::to_string(&event.contributing_evidence)?;
        debug!(
            event = "monitor_event",
            tick_timestamp = %event.tick_timestamp.to_rfc3339(),
            verdict = %event.verdict,
            contributing_evidence = %evidence,
            "Verdict event"
        );
        Ok(())
    }

    async fn emit_alert(&self, alert: &TransitionAlert) -> Result<(), AlertError> {
        match alert.status {
            AlertStatus::Firing => warn!(
                event = "alert",
                status = %alert.status,
                service = %alert.target,
                namespace = %alert.namespace,
                pods = %alert.pods.join(","),
                reasons = %alert.reasons.join("; "),
                "{}",
                alert.summary
            ),
            AlertStatus::Resolved => info!(
                event = "alert",
                status = %alert.status,
                service = %alert.target,
                namespace = %alert.namespace,
                "{}",
                alert.summary
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PodPhase, PodRef, PodStatus};

    fn unhealthy_verdict() -> HealthVerdict {
        HealthVerdict {
            sequence: 4,
            tick_timestamp: Utc::now(),
            state: HealthState::Unhealthy,
            reasons: vec!["pod api-0 is CrashLoopBackOff (restarts: 7)".to_string()],
            probes: Vec::new(),
            resources: Vec::new(),
            pods: vec![
                PodReport {
                    status: PodStatus {
                        pod: PodRef::new("api-0", "default").with_containers(["api"]),
                        phase: PodPhase::CrashLoopBackOff,
                        restart_count: 7,
                        ready: false,
                        not_ready_since: None,
                    },
                    assessment: PodAssessment::Failing,
                    reason: None,
                },
                PodReport {
                    status: PodStatus {
                        pod: PodRef::new("api-1", "default").with_containers(["api"]),
                        phase: PodPhase::Running,
                        restart_count: 0,
                        ready: true,
                        not_ready_since: None,
                    },
                    assessment: PodAssessment::Ok,
                    reason: None,
                },
            ],
            infrastructure_errors: Vec::new(),
        }
    }

    #[test]
    fn test_firing_alert_targets_failing_pods() {
        let alerter = Alerter::new("fastapi", "default");
        let alert = alerter.firing(Some(HealthState::Healthy), &unhealthy_verdict());

        assert_eq!(alert.status, AlertStatus::Firing);
        assert_eq!(alert.pods, vec!["api-0".to_string()]);
        assert_eq!(alert.previous, Some(HealthState::Healthy));
        assert!(alert.summary.contains("unhealthy"));
    }

    #[test]
    fn test_alertmanager_format() {
        let alerter =
            Alerter::new("fastapi", "default").with_generator_url("http://podwatch:8080/status");
        let alert = alerter.firing(None, &unhealthy_verdict());
        let am = alerter.to_alertmanager(&alert);

        assert_eq!(am.status, "firing");
        assert_eq!(am.labels.get("alertname").unwrap(), "ServiceUnhealthy");
        assert_eq!(am.labels.get("namespace").unwrap(), "default");
        assert!(am.annotations.get("description").unwrap().contains("CrashLoopBackOff"));
        assert!(am.ends_at.is_none());

        let payload = Alerter::create_alertmanager_payload(vec![am]);
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json["alerts"][0]["startsAt"].is_string());
        assert_eq!(json["alerts"][0]["generatorUrl"], "http://podwatch:8080/status");
    }

    #[test]
    fn test_resolved_alert_has_end_time() {
        let alerter = Alerter::new("fastapi", "default");
        let mut verdict = unhealthy_verdict();
        verdict.state = HealthState::Healthy;

        let am = alerter.to_alertmanager(&alerter.resolved(&verdict));

        assert_eq!(am.status, "resolved");
        assert!(am.ends_at.is_some());
    }

    #[test]
    fn test_event_evidence_filters_healthy_inputs() {
        let event = MonitorEvent::from_verdict(&unhealthy_verdict());

        assert_eq!(event.verdict, HealthState::Unhealthy);
        assert_eq!(event.contributing_evidence.unhealthy_pods.len(), 1);
        assert!(event.contributing_evidence.failed_probes.is_empty());
    }

    #[tokio::test]
    async fn test_tracing_sink_accepts_events() {
        let sink = TracingAlertSink;
        let verdict = unhealthy_verdict();
        sink.emit_event(&MonitorEvent::from_verdict(&verdict))
            .await
            .unwrap();
        sink.emit_alert(&Alerter::new("fastapi", "default").firing(None, &verdict))
            .await
            .unwrap();
    }
}
