//! Core data models for the monitor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// HTTP method used by an endpoint probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_expected_status() -> u16 {
    200
}

/// A health check endpoint, loaded once from configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointSpec {
    /// Path appended to the API base URL (e.g. "/health")
    pub path: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
    /// Per-attempt timeout in seconds
    #[serde(default, rename = "timeout")]
    pub timeout_secs: Option<f64>,
}

impl EndpointSpec {
    pub fn new(path: impl Into<String>, method: HttpMethod, expected_status: u16) -> Self {
        Self {
            path: path.into(),
            method,
            expected_status,
            timeout_secs: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs_f64());
        self
    }

    /// Effective timeout, falling back to the monitoring-wide timeout
    pub fn timeout(&self, fallback: Duration) -> Duration {
        self.timeout_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .filter(|d| !d.is_zero())
            .unwrap_or(fallback)
    }
}

/// Why a probe attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeFailureReason {
    Timeout,
    ConnectionError,
    UnexpectedStatus,
}

impl fmt::Display for ProbeFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeFailureReason::Timeout => write!(f, "timeout"),
            ProbeFailureReason::ConnectionError => write!(f, "connection_error"),
            ProbeFailureReason::UnexpectedStatus => write!(f, "unexpected_status"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{reason}: {detail}")]
pub struct ProbeFailure {
    pub reason: ProbeFailureReason,
    pub detail: String,
}

/// Result of a single probe attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub method: HttpMethod,
    pub url: String,
    /// Observed status code, absent on transport errors
    pub status_code: Option<u16>,
    pub latency_ms: f64,
    pub success: bool,
    /// 1-based attempt number within the tick
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<ProbeFailure>,
    pub timestamp: DateTime<Utc>,
}

/// Reference to a watched pod
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PodRef {
    pub name: String,
    pub namespace: String,
    pub containers: Vec<String>,
}

impl PodRef {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            containers: Vec::new(),
        }
    }

    pub fn with_containers<I, S>(mut self, containers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.containers = containers.into_iter().map(Into::into).collect();
        self
    }
}

impl fmt::Display for PodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Resource kinds with configured threshold bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Cpu,
    Memory,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 2] = [ResourceKind::Cpu, ResourceKind::Memory];
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Cpu => write!(f, "cpu"),
            ResourceKind::Memory => write!(f, "memory"),
        }
    }
}

/// Point-in-time resource usage of one pod, summed over its containers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSample {
    pub pod: PodRef,
    pub cpu_nanocores: u64,
    pub memory_bytes: u64,
    pub timestamp: DateTime<Utc>,
}

impl ResourceSample {
    pub fn value(&self, kind: ResourceKind) -> u64 {
        match kind {
            ResourceKind::Cpu => self.cpu_nanocores,
            ResourceKind::Memory => self.memory_bytes,
        }
    }
}

/// Four-value threshold structure for one resource kind
///
/// `low < request <= high <= limit` is expected but not enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdBand {
    pub low: u64,
    pub high: u64,
    pub request: u64,
    pub limit: u64,
}

impl ThresholdBand {
    /// Describe every violated ordering constraint
    pub fn ordering_issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.low >= self.request {
            issues.push(format!("low ({}) >= request ({})", self.low, self.request));
        }
        if self.request > self.high {
            issues.push(format!("request ({}) > high ({})", self.request, self.high));
        }
        if self.high > self.limit {
            issues.push(format!("high ({}) > limit ({})", self.high, self.limit));
        }
        issues
    }
}

/// Threshold bands for every resource kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    pub cpu: ThresholdBand,
    pub memory: ThresholdBand,
}

impl Thresholds {
    pub fn band(&self, kind: ResourceKind) -> &ThresholdBand {
        match kind {
            ResourceKind::Cpu => &self.cpu,
            ResourceKind::Memory => &self.memory,
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        const MIB: u64 = 1024 * 1024;
        Self {
            cpu: ThresholdBand {
                low: 5_000_000,
                high: 20_000_000,
                request: 12_000_000,
                limit: 25_000_000,
            },
            memory: ThresholdBand {
                low: 10 * MIB,
                high: 25 * MIB,
                request: 20 * MIB,
                limit: 40 * MIB,
            },
        }
    }
}

/// Classification of one resource value against its band
///
/// Variants are declared in ascending severity so `Ord` yields the worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceVerdict {
    Normal,
    Underflow,
    RequestViolation,
    Overflow,
    LimitViolation,
}

impl ResourceVerdict {
    pub fn is_anomaly(&self) -> bool {
        !matches!(self, ResourceVerdict::Normal)
    }

    /// Whether the verdict degrades overall health
    ///
    /// Usage below the request stays in the evidence only.
    pub fn is_degrading(&self) -> bool {
        matches!(
            self,
            ResourceVerdict::Overflow | ResourceVerdict::Underflow | ResourceVerdict::LimitViolation
        )
    }
}

impl fmt::Display for ResourceVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceVerdict::Normal => write!(f, "normal"),
            ResourceVerdict::Underflow => write!(f, "underflow"),
            ResourceVerdict::RequestViolation => write!(f, "request_violation"),
            ResourceVerdict::Overflow => write!(f, "overflow"),
            ResourceVerdict::LimitViolation => write!(f, "limit_violation"),
        }
    }
}

/// Analyzed resource usage for one pod and resource kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceFinding {
    pub pod: String,
    pub kind: ResourceKind,
    pub value: u64,
    pub verdict: ResourceVerdict,
    /// Usage as a percentage of the configured request
    pub utilization_percent: f64,
    pub analysis: String,
}

/// Pod lifecycle phase, with CrashLoopBackOff lifted out of container state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
    CrashLoopBackOff,
}

impl PodPhase {
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            "CrashLoopBackOff" => PodPhase::CrashLoopBackOff,
            _ => PodPhase::Unknown,
        }
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PodPhase::Pending => "Pending",
            PodPhase::Running => "Running",
            PodPhase::Succeeded => "Succeeded",
            PodPhase::Failed => "Failed",
            PodPhase::Unknown => "Unknown",
            PodPhase::CrashLoopBackOff => "CrashLoopBackOff",
        };
        f.write_str(s)
    }
}

/// Lifecycle state of one pod, refreshed every tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodStatus {
    pub pod: PodRef,
    pub phase: PodPhase,
    pub restart_count: u32,
    pub ready: bool,
    /// When the pod last became not ready, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_ready_since: Option<DateTime<Utc>>,
}

/// Health contribution of one pod
///
/// Variants are declared in ascending severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PodAssessment {
    Ok,
    /// Not ready, but for less than one tick interval
    Starting,
    Failing,
}

/// Pod status together with its assessment for the tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodReport {
    pub status: PodStatus,
    pub assessment: PodAssessment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Overall health classification
///
/// Variants are declared in ascending severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthState {
    /// Numeric encoding used by the verdict gauge
    pub fn as_gauge(&self) -> i64 {
        match self {
            HealthState::Healthy => 0,
            HealthState::Degraded => 1,
            HealthState::Unhealthy => 2,
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Degraded => write!(f, "degraded"),
            HealthState::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Aggregated verdict for one tick, never mutated after creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthVerdict {
    pub sequence: u64,
    pub tick_timestamp: DateTime<Utc>,
    pub state: HealthState,
    pub reasons: Vec<String>,
    /// Authoritative (last) probe result per endpoint
    pub probes: Vec<ProbeResult>,
    pub resources: Vec<ResourceFinding>,
    pub pods: Vec<PodReport>,
    pub infrastructure_errors: Vec<String>,
}

impl HealthVerdict {
    /// Pods that log collection should target
    ///
    /// Failing pods when any are known, otherwise every watched pod.
    pub fn implicated_pods(&self) -> Vec<PodRef> {
        let failing: Vec<PodRef> = self
            .pods
            .iter()
            .filter(|p| p.assessment == PodAssessment::Failing)
            .map(|p| p.status.pod.clone())
            .collect();

        if !failing.is_empty() {
            return failing;
        }

        self.pods.iter().map(|p| p.status.pod.clone()).collect()
    }

    pub fn worst_resource_verdict(&self) -> ResourceVerdict {
        crate::analyzer::worst(&self.resources)
    }
}
