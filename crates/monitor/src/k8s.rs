//! Kubernetes-backed cluster client
//!
//! Pod status and logs come from the core API, resource usage from the
//! metrics.k8s.io API served by metrics-server.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Api, ListParams, LogParams},
    Client,
};
use monitor_lib::analyzer::{parse_cpu_nanocores, parse_memory_bytes};
use monitor_lib::{ClusterClient, ClusterQueryError, PodPhase, PodRef, PodStatus, ResourceSample};
use serde::Deserialize;
use tracing::debug;

const CRASH_LOOP_REASON: &str = "CrashLoopBackOff";

/// Cluster client talking to the Kubernetes API server
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Connect using in-cluster config, falling back to the local kubeconfig
    pub async fn new() -> anyhow::Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn map_kube_error(e: kube::Error) -> ClusterQueryError {
    match e {
        kube::Error::Api(resp) => {
            ClusterQueryError::Api(format!("{} ({}: {})", resp.message, resp.code, resp.reason))
        }
        other => ClusterQueryError::Unreachable(other.to_string()),
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<PodStatus>, ClusterQueryError> {
        let mut params = ListParams::default();
        if !label_selector.is_empty() {
            params = params.labels(label_selector);
        }

        let pods = self
            .pods(namespace)
            .list(&params)
            .await
            .map_err(map_kube_error)?;

        Ok(pods
            .items
            .iter()
            .map(|pod| pod_status(pod, namespace))
            .collect())
    }

    async fn resource_sample(&self, pod: &PodRef) -> Result<ResourceSample, ClusterQueryError> {
        let path = format!(
            "/apis/metrics.k8s.io/v1beta1/namespaces/{}/pods/{}",
            pod.namespace, pod.name
        );

        let request = http::Request::builder()
            .method("GET")
            .uri(&path)
            .body(Vec::new())
            .map_err(|e| ClusterQueryError::Api(format!("failed to build request: {}", e)))?;

        let metrics = self
            .client
            .request::<PodMetricsItem>(request)
            .await
            .map_err(|e| match e {
                kube::Error::Api(resp) if resp.code == 404 => {
                    ClusterQueryError::MissingSample(pod.name.clone())
                }
                kube::Error::Api(resp) if resp.code == 503 => {
                    ClusterQueryError::MetricsUnavailable(resp.message)
                }
                other => map_kube_error(other),
            })?;

        resource_sample(pod, metrics)
    }

    async fn logs(
        &self,
        pod: &PodRef,
        container: &str,
        tail_lines: i64,
    ) -> Result<String, ClusterQueryError> {
        let params = LogParams {
            container: Some(container.to_string()),
            tail_lines: Some(tail_lines),
            ..Default::default()
        };

        let logs = self
            .pods(&pod.namespace)
            .logs(&pod.name, &params)
            .await
            .map_err(map_kube_error)?;

        debug!(pod = %pod, container = %container, bytes = logs.len(), "Fetched pod logs");
        Ok(logs)
    }
}

/// Convert a pod object into the monitor's status view
///
/// A container waiting in CrashLoopBackOff overrides the pod phase, which
/// Kubernetes keeps at Running. The not-ready timestamp comes from the Ready
/// condition's last transition, or pod creation when there is none.
pub fn pod_status(pod: &Pod, namespace: &str) -> PodStatus {
    let containers: Vec<String> = pod
        .spec
        .as_ref()
        .map(|spec| spec.containers.iter().map(|c| c.name.clone()).collect())
        .unwrap_or_default();

    let pod_ref = PodRef::new(
        pod.metadata.name.clone().unwrap_or_default(),
        pod.metadata
            .namespace
            .clone()
            .unwrap_or_else(|| namespace.to_string()),
    )
    .with_containers(containers);

    let status = pod.status.as_ref();
    let container_statuses = status
        .and_then(|s| s.container_statuses.as_deref())
        .unwrap_or_default();

    let crash_looping = container_statuses.iter().any(|c| {
        c.state
            .as_ref()
            .and_then(|state| state.waiting.as_ref())
            .and_then(|waiting| waiting.reason.as_deref())
            == Some(CRASH_LOOP_REASON)
    });

    let restart_count = container_statuses
        .iter()
        .map(|c| c.restart_count.max(0) as u32)
        .sum();

    let phase = if crash_looping {
        PodPhase::CrashLoopBackOff
    } else {
        PodPhase::parse(status.and_then(|s| s.phase.as_deref()).unwrap_or("Unknown"))
    };

    let ready_condition = status
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"));
    let ready = ready_condition.map(|c| c.status == "True").unwrap_or(false);

    let not_ready_since = if ready {
        None
    } else {
        ready_condition
            .and_then(|c| c.last_transition_time.as_ref())
            .or(pod.metadata.creation_timestamp.as_ref())
            .map(|t| t.0)
    };

    PodStatus {
        pod: pod_ref,
        phase,
        restart_count,
        ready,
        not_ready_since,
    }
}

#[derive(Debug, Deserialize)]
struct PodMetricsItem {
    timestamp: String,
    containers: Vec<ContainerMetricsItem>,
}

#[derive(Debug, Deserialize)]
struct ContainerMetricsItem {
    usage: ResourceUsage,
}

#[derive(Debug, Deserialize)]
struct ResourceUsage {
    cpu: String,
    memory: String,
}

/// Sum container usage into one pod sample
fn resource_sample(pod: &PodRef, metrics: PodMetricsItem) -> Result<ResourceSample, ClusterQueryError> {
    if metrics.containers.is_empty() {
        return Err(ClusterQueryError::MissingSample(pod.name.clone()));
    }

    let mut cpu_nanocores = 0u64;
    let mut memory_bytes = 0u64;
    for container in &metrics.containers {
        cpu_nanocores += parse_cpu_nanocores(&container.usage.cpu)
            .map_err(|e| ClusterQueryError::Api(e.to_string()))?;
        memory_bytes += parse_memory_bytes(&container.usage.memory)
            .map_err(|e| ClusterQueryError::Api(e.to_string()))?;
    }

    let timestamp = DateTime::parse_from_rfc3339(&metrics.timestamp)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());

    Ok(ResourceSample {
        pod: pod.clone(),
        cpu_nanocores,
        memory_bytes,
        timestamp,
    })
}
