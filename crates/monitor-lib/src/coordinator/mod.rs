//! Failure coordinator
//!
//! Drives the monitoring loop. Each tick probes the endpoints, samples pod
//! resources and reads pod status concurrently, merges them into one
//! [`HealthVerdict`], and reacts to verdict transitions: entering unhealthy
//! triggers log collection and a firing alert, leaving it resolves the alert.
//!
//! The previous verdict is passed into each tick explicitly so transition
//! detection has no hidden state.

mod verdict;

pub use verdict::{evaluate, transition, ResourceSampling, TickInputs, Transition};

use crate::alerter::{AlertSink, Alerter, MonitorEvent, TracingAlertSink, TransitionAlert};
use crate::analyzer;
use crate::cluster::{ClusterClient, ClusterQueryError};
use crate::collector::{CollectionReport, LogCollector, LogStore, DEFAULT_TAIL_LINES};
use crate::health::{components, HealthRegistry};
use crate::models::{EndpointSpec, HealthState, HealthVerdict, PodStatus, Thresholds};
use crate::observability::{MonitorMetrics, StructuredLogger};
use crate::prober::{EndpointProber, HttpTransport, ProbeOutcome, ProberConfig};
use crate::watcher::PodStatusWatcher;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("{0} is required")]
    Missing(&'static str),
}

/// Configuration for the monitoring loop
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Name of the monitored service, used in logs and alerts
    pub service_name: String,
    pub namespace: String,
    pub label_selector: String,
    pub endpoints: Vec<EndpointSpec>,
    pub thresholds: Thresholds,
    /// Tick interval (default: 60 seconds)
    pub interval: Duration,
    /// Timeout for each cluster query branch of a tick (default: 10 seconds)
    pub timeout: Duration,
    /// How long an in-flight tick may finish after shutdown (default: 10 seconds)
    pub shutdown_grace: Duration,
    /// Log lines fetched per container on collection (default: 100)
    pub log_tail_lines: i64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            service_name: "service".to_string(),
            namespace: "default".to_string(),
            label_selector: String::new(),
            endpoints: Vec::new(),
            thresholds: Thresholds::default(),
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(10),
            log_tail_lines: DEFAULT_TAIL_LINES,
        }
    }
}

/// Result of one tick
#[derive(Debug)]
pub struct TickOutcome {
    pub verdict: HealthVerdict,
    pub transition: Transition,
    /// Background log collection started by this tick, if any
    pub collection: Option<JoinHandle<CollectionReport>>,
}

/// Runs ticks and reacts to verdict transitions
pub struct Coordinator {
    config: CoordinatorConfig,
    prober: EndpointProber,
    watcher: PodStatusWatcher,
    cluster: Arc<dyn ClusterClient>,
    collector: Arc<LogCollector>,
    alert_sink: Arc<dyn AlertSink>,
    alerter: Alerter,
    health: HealthRegistry,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
    verdict_tx: watch::Sender<Option<HealthVerdict>>,
}

impl Coordinator {
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::default()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Receiver that always holds the most recent verdict
    pub fn subscribe(&self) -> watch::Receiver<Option<HealthVerdict>> {
        self.verdict_tx.subscribe()
    }

    /// Run one monitoring tick
    ///
    /// Never fails: collaborator errors become infrastructure errors in the
    /// returned verdict.
    pub async fn tick(&self, previous: Option<&HealthVerdict>) -> TickOutcome {
        let start = Instant::now();
        let tick_timestamp = Utc::now();
        let sequence = previous.map(|v| v.sequence + 1).unwrap_or(1);

        let (probes, sampling, pods) = tokio::join!(
            self.prober.probe_all(&self.config.endpoints),
            bounded("resource sampling", self.config.timeout, self.sample_resources()),
            bounded(
                "pod status query",
                self.config.timeout,
                self.watcher
                    .status(&self.config.namespace, &self.config.label_selector),
            ),
        );

        self.record_dependencies(&sampling, &pods).await;
        self.record_probes(&probes);

        let verdict = evaluate(
            TickInputs {
                sequence,
                tick_timestamp,
                probes,
                sampling,
                pods,
            },
            &self.config.thresholds,
            self.config.interval,
        );

        self.record_verdict(&verdict, start.elapsed());
        self.logger.log_verdict(&verdict);
        self.persist_reports(&verdict).await;

        if let Err(e) = self
            .alert_sink
            .emit_event(&MonitorEvent::from_verdict(&verdict))
            .await
        {
            warn!(error = %e, "Failed to emit verdict event");
        }

        let previous_state = previous.map(|v| v.state);
        let transition = transition(previous_state, verdict.state);
        let collection = self.react(transition, previous_state, &verdict).await;

        self.health.set_ready(true).await;
        self.verdict_tx.send_replace(Some(verdict.clone()));

        TickOutcome {
            verdict,
            transition,
            collection,
        }
    }

    /// Start the monitoring loop, returning once shutdown is signalled
    ///
    /// A tick in flight when shutdown arrives gets the configured grace
    /// period to finish before it is abandoned.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            endpoints = self.config.endpoints.len(),
            namespace = %self.config.namespace,
            selector = %self.config.label_selector,
            "Starting monitoring loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut previous: Option<HealthVerdict> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let outcome = {
                        let tick = self.tick(previous.as_ref());
                        tokio::pin!(tick);

                        tokio::select! {
                            outcome = &mut tick => Some(outcome),
                            _ = shutdown.recv() => {
                                info!(
                                    grace_secs = self.config.shutdown_grace.as_secs(),
                                    "Shutdown requested during tick, waiting for it to finish"
                                );
                                match tokio::time::timeout(self.config.shutdown_grace, &mut tick).await {
                                    Ok(outcome) => self.track_collection(outcome.collection),
                                    Err(_) => warn!("Abandoning in-flight tick after grace period"),
                                }
                                None
                            }
                        }
                    };

                    let Some(outcome) = outcome else {
                        break;
                    };
                    self.track_collection(outcome.collection);
                    previous = Some(outcome.verdict);
                }
                _ = shutdown.recv() => {
                    break;
                }
            }
        }

        info!("Monitoring loop stopped");
    }

    /// List pods and fetch a resource sample for each
    async fn sample_resources(&self) -> Result<ResourceSampling, ClusterQueryError> {
        let pods = self
            .cluster
            .list_pods(&self.config.namespace, &self.config.label_selector)
            .await?;

        let mut sampling = ResourceSampling::default();
        for status in &pods {
            match self.cluster.resource_sample(&status.pod).await {
                Ok(sample) => sampling.samples.push(sample),
                Err(e) => {
                    debug!(pod = %status.pod, error = %e, "Resource sample unavailable");
                    sampling.errors.push(e);
                }
            }
        }

        // Every sample failing means the metrics source itself is down
        if sampling.samples.is_empty() && !sampling.errors.is_empty() {
            let first = sampling.errors.swap_remove(0);
            return Err(match first {
                ClusterQueryError::MissingSample(_) => ClusterQueryError::MetricsUnavailable(
                    format!("no samples for any of {} pods", pods.len()),
                ),
                other => other,
            });
        }

        Ok(sampling)
    }

    async fn record_dependencies(
        &self,
        sampling: &Result<ResourceSampling, ClusterQueryError>,
        pods: &Result<Vec<PodStatus>, ClusterQueryError>,
    ) {
        if let Err(e) = pods {
            self.metrics.inc_infrastructure_errors(components::CLUSTER_API);
            self.logger
                .log_infrastructure_error(components::CLUSTER_API, &e.to_string());
        }
        self.health
            .record(components::CLUSTER_API, pods.as_ref().map(|_| ()))
            .await;

        match sampling {
            Ok(s) if s.errors.is_empty() => {
                self.health.set_healthy(components::METRICS_SOURCE).await
            }
            Ok(s) => {
                self.health
                    .set_degraded(
                        components::METRICS_SOURCE,
                        format!("{} pod sample(s) missing", s.errors.len()),
                    )
                    .await
            }
            Err(e) => {
                self.metrics
                    .inc_infrastructure_errors(components::METRICS_SOURCE);
                self.logger
                    .log_infrastructure_error(components::METRICS_SOURCE, &e.to_string());
                self.health
                    .set_unhealthy(components::METRICS_SOURCE, e.to_string())
                    .await;
            }
        }
    }

    fn record_probes(&self, probes: &[ProbeOutcome]) {
        for outcome in probes {
            for attempt in &outcome.attempts {
                self.metrics
                    .observe_probe_latency(&outcome.endpoint.path, attempt.latency_ms / 1000.0);
                if let Some(failure) = &attempt.failure {
                    self.metrics.inc_probe_failures(&failure.reason.to_string());
                }
            }
        }
    }

    fn record_verdict(&self, verdict: &HealthVerdict, elapsed: Duration) {
        self.metrics.observe_tick_duration(elapsed.as_secs_f64());
        self.metrics.set_health_state(verdict.state);
        self.metrics.set_pods_watched(verdict.pods.len() as i64);
        self.metrics.set_resource_usage(&verdict.resources);
        for finding in &verdict.resources {
            if finding.verdict.is_degrading() {
                self.logger.log_resource_anomaly(finding);
            }
        }
    }

    /// Write a resource report for every pod with a degrading finding
    async fn persist_reports(&self, verdict: &HealthVerdict) {
        let reports = analyzer::reports(&verdict.resources);
        for report in reports.iter().filter(|r| r.needs_attention()) {
            if let Err(e) = self
                .collector
                .persist_report(report, verdict.tick_timestamp)
                .await
            {
                warn!(pod = %report.pod, error = %e, "Failed to persist resource report");
            }
        }
    }

    /// Act on a transition: collection and alerts fire only on edges
    async fn react(
        &self,
        transition: Transition,
        previous: Option<HealthState>,
        verdict: &HealthVerdict,
    ) -> Option<JoinHandle<CollectionReport>> {
        if transition != Transition::Unchanged {
            self.logger.log_transition(previous, verdict.state);
        }

        match transition {
            Transition::EnteredUnhealthy => {
                let pods = verdict.implicated_pods();
                info!(pods = pods.len(), "Collecting logs for implicated pods");
                let handle = self.collector.spawn(pods);

                self.emit_alert(self.alerter.firing(previous, verdict)).await;
                Some(handle)
            }
            Transition::Recovered => {
                self.emit_alert(self.alerter.resolved(verdict)).await;
                None
            }
            Transition::Changed | Transition::Unchanged => None,
        }
    }

    async fn emit_alert(&self, alert: TransitionAlert) {
        match self.alert_sink.emit_alert(&alert).await {
            Ok(()) => self.metrics.inc_alerts_emitted(&alert.status.to_string()),
            Err(e) => warn!(error = %e, status = %alert.status, "Failed to emit alert"),
        }
    }

    /// Record the collector's outcome in the health registry once it finishes
    fn track_collection(&self, collection: Option<JoinHandle<CollectionReport>>) {
        let Some(handle) = collection else {
            return;
        };
        let health = self.health.clone();

        tokio::spawn(async move {
            match handle.await {
                Ok(report) => match report.errors.first() {
                    None => health.set_healthy(components::LOG_COLLECTOR).await,
                    Some(e) if report.artifacts.is_empty() => {
                        health
                            .set_unhealthy(components::LOG_COLLECTOR, e.to_string())
                            .await
                    }
                    Some(e) => {
                        health
                            .set_degraded(components::LOG_COLLECTOR, e.to_string())
                            .await
                    }
                },
                Err(e) => {
                    health
                        .set_unhealthy(components::LOG_COLLECTOR, e.to_string())
                        .await
                }
            }
        });
    }
}

/// Bound a cluster query branch by the tick timeout
async fn bounded<T, F>(operation: &str, timeout: Duration, fut: F) -> Result<T, ClusterQueryError>
where
    F: Future<Output = Result<T, ClusterQueryError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ClusterQueryError::Timeout {
            operation: operation.to_string(),
            timeout_ms: timeout.as_millis(),
        }),
    }
}

/// Builder for [`Coordinator`]
#[derive(Default)]
pub struct CoordinatorBuilder {
    config: Option<CoordinatorConfig>,
    prober_config: Option<ProberConfig>,
    transport: Option<Arc<dyn HttpTransport>>,
    cluster: Option<Arc<dyn ClusterClient>>,
    log_store: Option<Arc<dyn LogStore>>,
    alert_sink: Option<Arc<dyn AlertSink>>,
    health: Option<HealthRegistry>,
    generator_url: Option<String>,
}

impl CoordinatorBuilder {
    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn prober_config(mut self, config: ProberConfig) -> Self {
        self.prober_config = Some(config);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn cluster(mut self, cluster: Arc<dyn ClusterClient>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    pub fn log_store(mut self, store: Arc<dyn LogStore>) -> Self {
        self.log_store = Some(store);
        self
    }

    pub fn alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alert_sink = Some(sink);
        self
    }

    pub fn health_registry(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn generator_url(mut self, url: impl Into<String>) -> Self {
        self.generator_url = Some(url.into());
        self
    }

    pub fn build(self) -> Result<Coordinator, CoordinatorError> {
        let config = self.config.unwrap_or_default();
        let prober_config = self
            .prober_config
            .ok_or(CoordinatorError::Missing("prober config"))?;
        let transport = self.transport.ok_or(CoordinatorError::Missing("HTTP transport"))?;
        let cluster = self.cluster.ok_or(CoordinatorError::Missing("cluster client"))?;
        let log_store = self.log_store.ok_or(CoordinatorError::Missing("log store"))?;

        let logger = StructuredLogger::new(config.service_name.clone());
        let metrics = MonitorMetrics::new();

        let collector = LogCollector::new(
            Arc::clone(&cluster),
            log_store,
            logger.clone(),
            metrics.clone(),
        )
        .with_tail_lines(config.log_tail_lines);

        let mut alerter = Alerter::new(config.service_name.clone(), config.namespace.clone());
        if let Some(url) = self.generator_url {
            alerter = alerter.with_generator_url(url);
        }

        let (verdict_tx, _) = watch::channel(None);

        Ok(Coordinator {
            prober: EndpointProber::new(transport, prober_config),
            watcher: PodStatusWatcher::new(Arc::clone(&cluster)),
            cluster,
            collector: Arc::new(collector),
            alert_sink: self
                .alert_sink
                .unwrap_or_else(|| Arc::new(TracingAlertSink)),
            alerter,
            health: self.health.unwrap_or_default(),
            metrics,
            logger,
            verdict_tx,
            config,
        })
    }
}
