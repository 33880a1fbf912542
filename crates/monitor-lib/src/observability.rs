//! Observability infrastructure for the monitor
//!
//! Provides:
//! - Prometheus metrics (tick latency, probe latency, verdict state, resource usage)
//! - Structured JSON logging with tracing

use crate::models::{HealthState, HealthVerdict, ResourceFinding};
use prometheus::{
    register_gauge_vec, register_histogram, register_histogram_vec, register_int_counter,
    register_int_counter_vec, register_int_gauge, GaugeVec, Histogram, HistogramVec, IntCounter,
    IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Histogram buckets for tick and probe latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<MonitorMetricsInner> = OnceLock::new();

struct MonitorMetricsInner {
    tick_duration_seconds: Histogram,
    probe_latency_seconds: HistogramVec,
    health_state: IntGauge,
    pods_watched: IntGauge,
    resource_usage: GaugeVec,
    probe_failures: IntCounterVec,
    infrastructure_errors: IntCounterVec,
    log_collections: IntCounter,
    log_collection_errors: IntCounter,
    alerts_emitted: IntCounterVec,
}

impl MonitorMetricsInner {
    fn new() -> Self {
        Self {
            tick_duration_seconds: register_histogram!(
                "podwatch_tick_duration_seconds",
                "Time spent on one probe, sample and watch cycle",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register tick_duration_seconds"),

            probe_latency_seconds: register_histogram_vec!(
                "podwatch_probe_latency_seconds",
                "Latency of endpoint probe attempts",
                &["endpoint"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register probe_latency_seconds"),

            health_state: register_int_gauge!(
                "podwatch_health_state",
                "Current verdict (0 = healthy, 1 = degraded, 2 = unhealthy)"
            )
            .expect("Failed to register health_state"),

            pods_watched: register_int_gauge!(
                "podwatch_pods_watched",
                "Number of pods matching the configured label selector"
            )
            .expect("Failed to register pods_watched"),

            resource_usage: register_gauge_vec!(
                "podwatch_resource_usage",
                "Last sampled resource usage (nanocores for cpu, bytes for memory)",
                &["pod", "resource"]
            )
            .expect("Failed to register resource_usage"),

            probe_failures: register_int_counter_vec!(
                "podwatch_probe_failures_total",
                "Failed endpoint probe attempts, retries included",
                &["reason"]
            )
            .expect("Failed to register probe_failures"),

            infrastructure_errors: register_int_counter_vec!(
                "podwatch_infrastructure_errors_total",
                "Failures reaching the cluster API or metrics source",
                &["component"]
            )
            .expect("Failed to register infrastructure_errors"),

            log_collections: register_int_counter!(
                "podwatch_log_collections_total",
                "Container logs collected after an unhealthy transition"
            )
            .expect("Failed to register log_collections"),

            log_collection_errors: register_int_counter!(
                "podwatch_log_collection_errors_total",
                "Failed container log collections"
            )
            .expect("Failed to register log_collection_errors"),

            alerts_emitted: register_int_counter_vec!(
                "podwatch_alerts_emitted_total",
                "Transition alerts emitted",
                &["status"]
            )
            .expect("Failed to register alerts_emitted"),
        }
    }
}

/// Monitor metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct MonitorMetrics {
    _private: (),
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MonitorMetricsInner {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new)
    }

    pub fn observe_tick_duration(&self, duration_secs: f64) {
        self.inner().tick_duration_seconds.observe(duration_secs);
    }

    pub fn observe_probe_latency(&self, endpoint: &str, duration_secs: f64) {
        self.inner()
            .probe_latency_seconds
            .with_label_values(&[endpoint])
            .observe(duration_secs);
    }

    pub fn set_health_state(&self, state: HealthState) {
        self.inner().health_state.set(state.as_gauge());
    }

    pub fn set_pods_watched(&self, count: i64) {
        self.inner().pods_watched.set(count);
    }

    /// Replace the exported usage with this tick's findings
    ///
    /// Series for pods absent from `findings` are dropped.
    pub fn set_resource_usage(&self, findings: &[ResourceFinding]) {
        let usage = &self.inner().resource_usage;
        usage.reset();
        for finding in findings {
            let resource = finding.kind.to_string();
            usage
                .with_label_values(&[finding.pod.as_str(), resource.as_str()])
                .set(finding.value as f64);
        }
    }

    pub fn inc_probe_failures(&self, reason: &str) {
        self.inner()
            .probe_failures
            .with_label_values(&[reason])
            .inc();
    }

    pub fn inc_infrastructure_errors(&self, component: &str) {
        self.inner()
            .infrastructure_errors
            .with_label_values(&[component])
            .inc();
    }

    pub fn inc_log_collections(&self) {
        self.inner().log_collections.inc();
    }

    pub fn inc_log_collection_errors(&self) {
        self.inner().log_collection_errors.inc();
    }

    pub fn inc_alerts_emitted(&self, status: &str) {
        self.inner().alerts_emitted.with_label_values(&[status]).inc();
    }
}

/// Structured logger for monitor events
///
/// Provides consistent JSON-formatted logging for verdicts, transitions,
/// infrastructure failures and log collection.
#[derive(Clone)]
pub struct StructuredLogger {
    target: String,
}

impl StructuredLogger {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }

    /// Log the single verdict line of a tick
    pub fn log_verdict(&self, verdict: &HealthVerdict) {
        let failed_probes = verdict.probes.iter().filter(|p| !p.success).count();
        let reasons = verdict.reasons.join("; ");

        match verdict.state {
            HealthState::Healthy => {
                info!(
                    event = "verdict",
                    target_service = %self.target,
                    sequence = verdict.sequence,
                    tick_timestamp = %verdict.tick_timestamp.to_rfc3339(),
                    verdict = %verdict.state,
                    endpoints = verdict.probes.len(),
                    failed_endpoints = failed_probes,
                    pods = verdict.pods.len(),
                    "Tick verdict"
                );
            }
            HealthState::Degraded | HealthState::Unhealthy => {
                warn!(
                    event = "verdict",
                    target_service = %self.target,
                    sequence = verdict.sequence,
                    tick_timestamp = %verdict.tick_timestamp.to_rfc3339(),
                    verdict = %verdict.state,
                    endpoints = verdict.probes.len(),
                    failed_endpoints = failed_probes,
                    pods = verdict.pods.len(),
                    worst_resource = %verdict.worst_resource_verdict(),
                    reasons = %reasons,
                    "Tick verdict"
                );
            }
        }
    }

    /// Log a verdict state change
    pub fn log_transition(&self, previous: Option<HealthState>, current: HealthState) {
        let previous = previous
            .map(|s| s.to_string())
            .unwrap_or_else(|| "none".to_string());

        if current == HealthState::Unhealthy {
            warn!(
                event = "health_transition",
                target_service = %self.target,
                from = %previous,
                to = %current,
                "Service became unhealthy"
            );
        } else {
            info!(
                event = "health_transition",
                target_service = %self.target,
                from = %previous,
                to = %current,
                "Service health changed"
            );
        }
    }

    /// Log a failure of the monitor's own dependencies
    pub fn log_infrastructure_error(&self, component: &str, error: &str) {
        error!(
            event = "infrastructure_error",
            target_service = %self.target,
            component = %component,
            error = %error,
            "Monitoring dependency unavailable"
        );
    }

    /// Log a resource anomaly
    pub fn log_resource_anomaly(&self, finding: &ResourceFinding) {
        warn!(
            event = "resource_anomaly",
            target_service = %self.target,
            pod_name = %finding.pod,
            resource = %finding.kind,
            value = finding.value,
            verdict = %finding.verdict,
            utilization_percent = finding.utilization_percent,
            analysis = %finding.analysis,
            "Resource usage outside configured band"
        );
    }

    /// Log a persisted container log
    pub fn log_collection(&self, pod_name: &str, container: &str, location: &str, bytes: usize) {
        info!(
            event = "log_collection",
            target_service = %self.target,
            pod_name = %pod_name,
            container = %container,
            location = %location,
            bytes = bytes,
            "Saved container logs"
        );
    }

    /// Log a failed collection
    pub fn log_collection_failed(&self, pod_name: &str, error: &str) {
        warn!(
            event = "log_collection_failed",
            target_service = %self.target,
            pod_name = %pod_name,
            error = %error,
            "Log collection failed"
        );
    }

    /// Log a persisted resource report
    pub fn log_resource_report(&self, pod_name: &str, recommendation: &str, location: &str) {
        info!(
            event = "resource_report",
            target_service = %self.target,
            pod_name = %pod_name,
            recommendation = %recommendation,
            location = %location,
            "Resource report written"
        );
    }

    /// Log monitor startup
    pub fn log_startup(&self, version: &str, interval_secs: u64, endpoints: usize) {
        info!(
            event = "monitor_started",
            target_service = %self.target,
            version = %version,
            interval_secs = interval_secs,
            endpoints = endpoints,
            "Monitor started"
        );
    }

    /// Log monitor shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "monitor_shutdown",
            target_service = %self.target,
            reason = %reason,
            "Monitor shutting down"
        );
    }
}
