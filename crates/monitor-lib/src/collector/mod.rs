//! Diagnostic log collection
//!
//! When the service turns unhealthy the coordinator hands the implicated
//! pods to the [`LogCollector`], which pulls recent container logs from the
//! cluster and persists them through a [`LogStore`]. Collection runs in a
//! background task so it never delays the next tick.
//!
//! Resource reports for anomalous pods go through the same store.

mod store;

pub use store::FileLogStore;

use crate::analyzer::ResourceReport;
use crate::cluster::{ClusterClient, ClusterQueryError};
use crate::models::PodRef;
use crate::observability::{MonitorMetrics, StructuredLogger};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Default number of log lines fetched per container
pub const DEFAULT_TAIL_LINES: i64 = 100;

#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    #[error("pod {0} has no containers to collect logs from")]
    NoContainers(String),

    #[error("failed to fetch logs for {pod}/{container}: {source}")]
    Fetch {
        pod: String,
        container: String,
        #[source]
        source: ClusterQueryError,
    },

    #[error("failed to persist logs for {pod}/{container}: {source}")]
    Persist {
        pod: String,
        container: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to persist resource report for {pod}: {source}")]
    Report {
        pod: String,
        #[source]
        source: std::io::Error,
    },
}

/// Storage for collected container logs
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Persist one container's log and return its identifier
    async fn persist(
        &self,
        pod: &PodRef,
        container: &str,
        collected_at: DateTime<Utc>,
        contents: &str,
    ) -> std::io::Result<String>;

    /// Persist one pod's resource report and return its identifier
    async fn persist_report(
        &self,
        pod: &str,
        generated_at: DateTime<Utc>,
        contents: &str,
    ) -> std::io::Result<String>;
}

/// One persisted container log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogArtifact {
    pub pod: String,
    pub container: String,
    pub location: String,
    pub bytes: usize,
}

/// Outcome of a background collection run
#[derive(Debug, Default)]
pub struct CollectionReport {
    pub artifacts: Vec<LogArtifact>,
    pub errors: Vec<CollectionError>,
}

/// Pulls and persists container logs for pods
pub struct LogCollector {
    cluster: Arc<dyn ClusterClient>,
    store: Arc<dyn LogStore>,
    tail_lines: i64,
    logger: StructuredLogger,
    metrics: MonitorMetrics,
}

impl LogCollector {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        store: Arc<dyn LogStore>,
        logger: StructuredLogger,
        metrics: MonitorMetrics,
    ) -> Self {
        Self {
            cluster,
            store,
            tail_lines: DEFAULT_TAIL_LINES,
            logger,
            metrics,
        }
    }

    pub fn with_tail_lines(mut self, tail_lines: i64) -> Self {
        self.tail_lines = tail_lines;
        self
    }

    /// Collect logs for every container of one pod
    ///
    /// Every container is attempted; the first failure is returned after
    /// the remaining containers have been collected.
    pub async fn collect(&self, pod: &PodRef) -> Result<Vec<LogArtifact>, CollectionError> {
        let mut report = self.collect_report(pod).await;
        if report.errors.is_empty() {
            Ok(report.artifacts)
        } else {
            Err(report.errors.swap_remove(0))
        }
    }

    /// Collect logs for one pod, keeping what was persisted alongside failures
    pub async fn collect_report(&self, pod: &PodRef) -> CollectionReport {
        let mut report = CollectionReport::default();
        if pod.containers.is_empty() {
            report
                .errors
                .push(CollectionError::NoContainers(pod.name.clone()));
            return report;
        }

        let collected_at = Utc::now();
        for container in &pod.containers {
            match self.collect_container(pod, container, collected_at).await {
                Ok(artifact) => {
                    self.metrics.inc_log_collections();
                    self.logger.log_collection(
                        &artifact.pod,
                        &artifact.container,
                        &artifact.location,
                        artifact.bytes,
                    );
                    report.artifacts.push(artifact);
                }
                Err(e) => {
                    self.metrics.inc_log_collection_errors();
                    self.logger.log_collection_failed(&pod.name, &e.to_string());
                    report.errors.push(e);
                }
            }
        }
        report
    }

    async fn collect_container(
        &self,
        pod: &PodRef,
        container: &str,
        collected_at: DateTime<Utc>,
    ) -> Result<LogArtifact, CollectionError> {
        let contents = self
            .cluster
            .logs(pod, container, self.tail_lines)
            .await
            .map_err(|source| CollectionError::Fetch {
                pod: pod.name.clone(),
                container: container.to_string(),
                source,
            })?;

        let location = self
            .store
            .persist(pod, container, collected_at, &contents)
            .await
            .map_err(|source| CollectionError::Persist {
                pod: pod.name.clone(),
                container: container.to_string(),
                source,
            })?;

        Ok(LogArtifact {
            pod: pod.name.clone(),
            container: container.to_string(),
            location,
            bytes: contents.len(),
        })
    }

    /// Write a resource report through the store
    pub async fn persist_report(
        &self,
        report: &ResourceReport,
        generated_at: DateTime<Utc>,
    ) -> Result<String, CollectionError> {
        let location = self
            .store
            .persist_report(&report.pod, generated_at, &report.render(generated_at))
            .await
            .map_err(|source| CollectionError::Report {
                pod: report.pod.clone(),
                source,
            })?;

        self.logger
            .log_resource_report(&report.pod, report.recommendation.headline(), &location);
        Ok(location)
    }

    /// Collect logs for several pods in a background task
    pub fn spawn(self: &Arc<Self>, pods: Vec<PodRef>) -> JoinHandle<CollectionReport> {
        let collector = Arc::clone(self);
        tokio::spawn(async move {
            let mut report = CollectionReport::default();
            for pod in &pods {
                let pod_report = collector.collect_report(pod).await;
                report.artifacts.extend(pod_report.artifacts);
                report.errors.extend(pod_report.errors);
            }
            report
        })
    }
}
