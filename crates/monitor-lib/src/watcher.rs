//! Pod lifecycle watching
//!
//! Queries the cluster once per tick for the pods behind the monitored
//! service and assesses each pod's contribution to the overall verdict.

use crate::cluster::{ClusterClient, ClusterQueryError};
use crate::models::{PodAssessment, PodPhase, PodReport, PodStatus};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Build a `key=value,...` label selector in key order
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Watches pod status for one namespace and label selector
pub struct PodStatusWatcher {
    cluster: Arc<dyn ClusterClient>,
}

impl PodStatusWatcher {
    pub fn new(cluster: Arc<dyn ClusterClient>) -> Self {
        Self { cluster }
    }

    /// Current status of every pod matching the selector
    ///
    /// A failed query is returned as an error, never as an empty or stale list.
    pub async fn status(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<PodStatus>, ClusterQueryError> {
        let pods = self.cluster.list_pods(namespace, label_selector).await?;
        debug!(
            namespace = %namespace,
            selector = %label_selector,
            count = pods.len(),
            "Listed pods"
        );
        Ok(pods)
    }
}

/// Assess one pod against the tick interval
pub fn assess(
    status: &PodStatus,
    now: DateTime<Utc>,
    interval: Duration,
) -> (PodAssessment, Option<String>) {
    match status.phase {
        PodPhase::CrashLoopBackOff | PodPhase::Failed => {
            return (
                PodAssessment::Failing,
                Some(format!(
                    "pod {} is {} (restarts: {})",
                    status.pod.name, status.phase, status.restart_count
                )),
            );
        }
        _ => {}
    }

    if status.ready {
        return (PodAssessment::Ok, None);
    }

    let Some(since) = status.not_ready_since else {
        return (
            PodAssessment::Failing,
            Some(format!(
                "pod {} is not ready ({}) for an unknown duration",
                status.pod.name, status.phase
            )),
        );
    };

    let not_ready_for = (now - since).to_std().unwrap_or(Duration::ZERO);
    if not_ready_for > interval {
        (
            PodAssessment::Failing,
            Some(format!(
                "pod {} has not been ready for {}s ({})",
                status.pod.name,
                not_ready_for.as_secs(),
                status.phase
            )),
        )
    } else {
        (
            PodAssessment::Starting,
            Some(format!(
                "pod {} is not ready yet ({})",
                status.pod.name, status.phase
            )),
        )
    }
}

/// Assess every pod of a tick
pub fn reports(statuses: Vec<PodStatus>, now: DateTime<Utc>, interval: Duration) -> Vec<PodReport> {
    statuses
        .into_iter()
        .map(|status| {
            let (assessment, reason) = assess(&status, now, interval);
            PodReport {
                status,
                assessment,
                reason,
            }
        })
        .collect()
}

/// Worst assessment across pods, `Ok` when there are none
pub fn worst<'a, I>(reports: I) -> PodAssessment
where
    I: IntoIterator<Item = &'a PodReport>,
{
    reports
        .into_iter()
        .map(|r| r.assessment)
        .max()
        .unwrap_or(PodAssessment::Ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PodRef;

    fn pod(phase: PodPhase, ready: bool, not_ready_since: Option<DateTime<Utc>>) -> PodStatus {
        PodStatus {
            pod: PodRef::new("api-0", "default").with_containers(["api"]),
            phase,
            restart_count: 0,
            ready,
            not_ready_since,
        }
    }

    #[test]
    fn test_label_selector_sorted() {
        let mut labels = BTreeMap::new();
        labels.insert("tier".to_string(), "backend".to_string());
        labels.insert("app".to_string(), "fastapi".to_string());
        assert_eq!(label_selector(&labels), "app=fastapi,tier=backend");
        assert_eq!(label_selector(&BTreeMap::new()), "");
    }

    #[test]
    fn test_running_ready_is_ok() {
        let (assessment, reason) = assess(
            &pod(PodPhase::Running, true, None),
            Utc::now(),
            Duration::from_secs(60),
        );
        assert_eq!(assessment, PodAssessment::Ok);
        assert!(reason.is_none());
    }

    #[test]
    fn test_crashloop_is_failing_even_if_ready() {
        let (assessment, reason) = assess(
            &pod(PodPhase::CrashLoopBackOff, true, None),
            Utc::now(),
            Duration::from_secs(60),
        );
        assert_eq!(assessment, PodAssessment::Failing);
        assert!(reason.unwrap().contains("CrashLoopBackOff"));
    }

    #[test]
    fn test_failed_phase_is_failing() {
        let (assessment, _) = assess(
            &pod(PodPhase::Failed, false, Some(Utc::now())),
            Utc::now(),
            Duration::from_secs(60),
        );
        assert_eq!(assessment, PodAssessment::Failing);
    }

    #[test]
    fn test_not_ready_within_interval_is_starting() {
        let now = Utc::now();
        let since = now - chrono::Duration::seconds(10);
        let (assessment, _) = assess(
            &pod(PodPhase::Running, false, Some(since)),
            now,
            Duration::from_secs(60),
        );
        assert_eq!(assessment, PodAssessment::Starting);
    }

    #[test]
    fn test_not_ready_beyond_interval_is_failing() {
        let now = Utc::now();
        let since = now - chrono::Duration::seconds(120);
        let (assessment, reason) = assess(
            &pod(PodPhase::Pending, false, Some(since)),
            now,
            Duration::from_secs(60),
        );
        assert_eq!(assessment, PodAssessment::Failing);
        assert!(reason.unwrap().contains("120s"));
    }

    #[test]
    fn test_not_ready_unknown_duration_is_failing() {
        let (assessment, _) = assess(
            &pod(PodPhase::Running, false, None),
            Utc::now(),
            Duration::from_secs(60),
        );
        assert_eq!(assessment, PodAssessment::Failing);
    }

    #[test]
    fn test_reports_preserve_statuses() {
        let now = Utc::now();
        let reports = reports(
            vec![
                pod(PodPhase::Running, true, None),
                pod(PodPhase::CrashLoopBackOff, false, Some(now)),
            ],
            now,
            Duration::from_secs(60),
        );
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].assessment, PodAssessment::Ok);
        assert_eq!(reports[1].assessment, PodAssessment::Failing);
    }

    #[test]
    fn test_worst_assessment() {
        let now = Utc::now();
        let reports = reports(
            vec![
                pod(PodPhase::Running, true, None),
                pod(PodPhase::Pending, false, Some(now)),
            ],
            now,
            Duration::from_secs(60),
        );

        assert_eq!(worst(&reports), PodAssessment::Starting);
        assert_eq!(worst(&Vec::<PodReport>::new()), PodAssessment::Ok);
    }
}
