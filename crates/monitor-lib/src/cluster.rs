//! Cluster collaborator interface
//!
//! The monitor never talks to the Kubernetes API directly; it consumes pod
//! statuses, resource samples and log streams through [`ClusterClient`].

use crate::models::{PodRef, PodStatus, ResourceSample};
use async_trait::async_trait;

/// Failure to query the cluster or its metrics source
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClusterQueryError {
    #[error("cluster API unreachable: {0}")]
    Unreachable(String),

    #[error("metrics API unavailable: {0}")]
    MetricsUnavailable(String),

    #[error("no metrics reported for pod {0}")]
    MissingSample(String),

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u128 },

    #[error("cluster API error: {0}")]
    Api(String),
}

/// Access to the cluster hosting the monitored service
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// List pods matching a label selector, with their lifecycle state
    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<PodStatus>, ClusterQueryError>;

    /// Fetch the current resource usage of one pod
    async fn resource_sample(&self, pod: &PodRef) -> Result<ResourceSample, ClusterQueryError>;

    /// Fetch the last `tail_lines` lines of a container's log
    async fn logs(
        &self,
        pod: &PodRef,
        container: &str,
        tail_lines: i64,
    ) -> Result<String, ClusterQueryError>;
}
