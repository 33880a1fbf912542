//! Endpoint probing with bounded retries
//!
//! Each configured endpoint is probed once per tick. Transport failures
//! (timeouts, refused connections) are retried up to the attempt budget;
//! an unexpected status code is an immediate, non-retried failure.

use crate::models::{EndpointSpec, HttpMethod, ProbeFailure, ProbeFailureReason, ProbeResult};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

/// Transport-level failure reported by an [`HttpTransport`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out after {0}ms")]
    Timeout(u128),

    #[error("connection error: {0}")]
    Connection(String),
}

/// HTTP collaborator used to issue probe requests
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Issue one request and return the response status code
    async fn request(
        &self,
        method: HttpMethod,
        url: &str,
        timeout: Duration,
    ) -> Result<u16, TransportError>;
}

/// Configuration for the endpoint prober
#[derive(Debug, Clone)]
pub struct ProberConfig {
    /// Base URL of the monitored API
    pub base_url: Url,
    /// Timeout for endpoints without their own (default: 10 seconds)
    pub default_timeout: Duration,
    /// Total attempt budget per endpoint (default: 3)
    pub retries: u32,
    /// Pause between attempts after a transport failure (default: 1 second)
    pub retry_delay: Duration,
}

impl ProberConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            default_timeout: Duration::from_secs(10),
            retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Every attempt made against one endpoint during a tick
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub endpoint: EndpointSpec,
    pub attempts: Vec<ProbeResult>,
}

impl ProbeOutcome {
    /// The last attempt, which decides the endpoint's result for the tick
    pub fn authoritative(&self) -> Option<&ProbeResult> {
        self.attempts.last()
    }

    pub fn is_success(&self) -> bool {
        self.authoritative().map(|r| r.success).unwrap_or(false)
    }
}

/// Probes configured endpoints through an [`HttpTransport`]
pub struct EndpointProber {
    transport: Arc<dyn HttpTransport>,
    config: ProberConfig,
}

impl EndpointProber {
    pub fn new(transport: Arc<dyn HttpTransport>, config: ProberConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &ProberConfig {
        &self.config
    }

    /// Full URL for an endpoint: base URL followed by the endpoint path
    pub fn endpoint_url(&self, endpoint: &EndpointSpec) -> String {
        let base = self.config.base_url.as_str().trim_end_matches('/');
        if endpoint.path.starts_with('/') {
            format!("{}{}", base, endpoint.path)
        } else {
            format!("{}/{}", base, endpoint.path)
        }
    }

    /// Probe every endpoint in configuration order
    pub async fn probe_all(&self, endpoints: &[EndpointSpec]) -> Vec<ProbeOutcome> {
        let mut outcomes = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            outcomes.push(self.probe(endpoint).await);
        }
        outcomes
    }

    /// Probe one endpoint, retrying transport failures
    pub async fn probe(&self, endpoint: &EndpointSpec) -> ProbeOutcome {
        let url = self.endpoint_url(endpoint);
        let timeout = endpoint.timeout(self.config.default_timeout);
        let max_attempts = self.config.retries.max(1);
        let mut attempts = Vec::with_capacity(max_attempts as usize);

        for attempt in 1..=max_attempts {
            let result = self.attempt(endpoint, &url, timeout, attempt).await;
            let retryable = result
                .failure
                .as_ref()
                .map(|f| f.reason != ProbeFailureReason::UnexpectedStatus)
                .unwrap_or(false);

            if let Some(failure) = &result.failure {
                debug!(url = %url, attempt, error = %failure, "Probe attempt failed");
            }
            attempts.push(result);

            if !retryable {
                break;
            }
            if attempt < max_attempts && !self.config.retry_delay.is_zero() {
                tokio::time::sleep(self.config.retry_delay).await;
            }
        }

        let outcome = ProbeOutcome {
            endpoint: endpoint.clone(),
            attempts,
        };

        match outcome.authoritative() {
            Some(r) if r.success => {
                info!(url = %url, latency_ms = r.latency_ms, "Endpoint is up");
            }
            Some(r) => {
                warn!(
                    url = %url,
                    attempts = r.attempt,
                    error = ?r.failure.as_ref().map(|f| f.to_string()),
                    "Endpoint is down"
                );
            }
            None => {}
        }

        outcome
    }

    async fn attempt(
        &self,
        endpoint: &EndpointSpec,
        url: &str,
        timeout: Duration,
        attempt: u32,
    ) -> ProbeResult {
        let timestamp = chrono::Utc::now();
        let start = Instant::now();

        // Bound the call even if the transport ignores its timeout
        let response = tokio::time::timeout(
            timeout,
            self.transport.request(endpoint.method, url, timeout),
        )
        .await;
        let latency = start.elapsed();

        let (status_code, failure) = match response {
            Ok(Ok(status)) if status == endpoint.expected_status => (Some(status), None),
            Ok(Ok(status)) => (
                Some(status),
                Some(ProbeFailure {
                    reason: ProbeFailureReason::UnexpectedStatus,
                    detail: format!(
                        "expected status {}, got {}",
                        endpoint.expected_status, status
                    ),
                }),
            ),
            Ok(Err(TransportError::Connection(detail))) => (
                None,
                Some(ProbeFailure {
                    reason: ProbeFailureReason::ConnectionError,
                    detail,
                }),
            ),
            Ok(Err(e @ TransportError::Timeout(_))) => (
                None,
                Some(ProbeFailure {
                    reason: ProbeFailureReason::Timeout,
                    detail: e.to_string(),
                }),
            ),
            Err(_) => (
                None,
                Some(ProbeFailure {
                    reason: ProbeFailureReason::Timeout,
                    detail: format!("request timed out after {}ms", timeout.as_millis()),
                }),
            ),
        };

        ProbeResult {
            method: endpoint.method,
            url: url.to_string(),
            status_code,
            latency_ms: latency.as_secs_f64() * 1000.0,
            success: failure.is_none(),
            attempt,
            failure,
            timestamp,
        }
    }
}
