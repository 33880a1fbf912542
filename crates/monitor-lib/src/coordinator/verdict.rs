//! Verdict computation and transition detection
//!
//! Both are pure functions of their inputs; the coordinator owns all I/O.

use crate::analyzer;
use crate::cluster::ClusterQueryError;
use crate::models::{
    HealthState, HealthVerdict, PodAssessment, PodStatus, ResourceFinding, ResourceSample,
    Thresholds,
};
use crate::prober::ProbeOutcome;
use crate::watcher;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Resource samples gathered during one tick
#[derive(Debug, Default)]
pub struct ResourceSampling {
    pub samples: Vec<ResourceSample>,
    /// Pods whose sample could not be fetched while others succeeded
    pub errors: Vec<ClusterQueryError>,
}

/// Everything gathered during one tick
#[derive(Debug)]
pub struct TickInputs {
    pub sequence: u64,
    pub tick_timestamp: DateTime<Utc>,
    pub probes: Vec<ProbeOutcome>,
    pub sampling: Result<ResourceSampling, ClusterQueryError>,
    pub pods: Result<Vec<PodStatus>, ClusterQueryError>,
}

/// Change between two consecutive verdicts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    /// State changed without entering or leaving unhealthy
    Changed,
    EnteredUnhealthy,
    /// Left unhealthy for healthy or degraded
    Recovered,
}

/// Classify the change from `previous` to `current`
///
/// The first tick counts as a transition from "not unhealthy".
pub fn transition(previous: Option<HealthState>, current: HealthState) -> Transition {
    match (previous, current) {
        (Some(prev), cur) if prev == cur => Transition::Unchanged,
        (Some(HealthState::Unhealthy), _) => Transition::Recovered,
        (_, HealthState::Unhealthy) => Transition::EnteredUnhealthy,
        _ => Transition::Changed,
    }
}

/// Merge one tick's inputs into a verdict
///
/// Endpoint failure, a failing pod or an infrastructure error is unhealthy.
/// Otherwise an overflow, underflow or limit violation, a starting pod or a
/// missing pod sample is degraded. Usage below the request is reported as a
/// finding but does not change the state.
pub fn evaluate(inputs: TickInputs, thresholds: &Thresholds, interval: Duration) -> HealthVerdict {
    let mut unhealthy = Vec::new();
    let mut degraded = Vec::new();
    let mut infrastructure_errors = Vec::new();

    let probes: Vec<_> = inputs
        .probes
        .iter()
        .filter_map(|o| o.authoritative().cloned())
        .collect();
    for probe in probes.iter().filter(|p| !p.success) {
        let failure = probe
            .failure
            .as_ref()
            .map(|f| f.to_string())
            .unwrap_or_else(|| "unknown failure".to_string());
        unhealthy.push(format!(
            "endpoint {} {} failed after {} attempt(s): {}",
            probe.method, probe.url, probe.attempt, failure
        ));
    }

    let pods = match inputs.pods {
        Ok(statuses) => {
            if statuses.is_empty() {
                unhealthy.push("no pods match the label selector".to_string());
            }
            watcher::reports(statuses, inputs.tick_timestamp, interval)
        }
        Err(e) => {
            infrastructure_errors.push(format!("pod status query failed: {}", e));
            Vec::new()
        }
    };
    for report in &pods {
        let reason = report
            .reason
            .clone()
            .unwrap_or_else(|| format!("pod {}", report.status.pod.name));
        match report.assessment {
            PodAssessment::Failing => unhealthy.push(reason),
            PodAssessment::Starting => degraded.push(reason),
            PodAssessment::Ok => {}
        }
    }

    let resources: Vec<ResourceFinding> = match inputs.sampling {
        Ok(sampling) => {
            for e in &sampling.errors {
                degraded.push(format!("resource sample unavailable: {}", e));
            }
            sampling
                .samples
                .iter()
                .flat_map(|s| analyzer::analyze(s, thresholds))
                .collect()
        }
        Err(e) => {
            infrastructure_errors.push(format!("resource sampling failed: {}", e));
            Vec::new()
        }
    };
    for finding in resources.iter().filter(|f| f.verdict.is_degrading()) {
        degraded.push(format!(
            "pod {} {}: {}",
            finding.pod, finding.verdict, finding.analysis
        ));
    }

    let worst_pod = watcher::worst(&pods);

    let state = if worst_pod == PodAssessment::Failing
        || !unhealthy.is_empty()
        || !infrastructure_errors.is_empty()
    {
        HealthState::Unhealthy
    } else if worst_pod == PodAssessment::Starting || !degraded.is_empty()
    {
        HealthState::Degraded
    } else {
        HealthState::Healthy
    };

    let mut reasons = infrastructure_errors.clone();
    reasons.extend(unhealthy);
    reasons.extend(degraded);

    HealthVerdict {
        sequence: inputs.sequence,
        tick_timestamp: inputs.tick_timestamp,
        state,
        reasons,
        probes,
        resources,
        pods,
        infrastructure_errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        EndpointSpec, HttpMethod, PodPhase, PodRef, ProbeFailure, ProbeFailureReason, ProbeResult,
        ResourceVerdict, ThresholdBand,
    };

    fn probe(success: bool) -> ProbeOutcome {
        ProbeOutcome {
            endpoint: EndpointSpec::new("/health", HttpMethod::Get, 200),
            attempts: vec![ProbeResult {
                method: HttpMethod::Get,
                url: "http://api.test/health".to_string(),
                status_code: Some(if success { 200 } else { 503 }),
                latency_ms: 3.0,
                success,
                attempt: 1,
                failure: (!success).then(|| ProbeFailure {
                    reason: ProbeFailureReason::UnexpectedStatus,
                    detail: "expected status 200, got 503".to_string(),
                }),
                timestamp: Utc::now(),
            }],
        }
    }

    fn running_pod(name: &str) -> PodStatus {
        PodStatus {
            pod: PodRef::new(name, "default").with_containers(["api"]),
            phase: PodPhase::Running,
            restart_count: 0,
            ready: true,
            not_ready_since: None,
        }
    }

    fn sample(pod: &str, cpu_nanocores: u64) -> ResourceSample {
        ResourceSample {
            pod: PodRef::new(pod, "default"),
            cpu_nanocores,
            memory_bytes: 22 * 1024 * 1024,
            timestamp: Utc::now(),
        }
    }

    fn thresholds() -> Thresholds {
        Thresholds {
            cpu: ThresholdBand {
                low: 5_000_000,
                high: 10_000_000,
                request: 8_000_000,
                limit: 15_000_000,
            },
            memory: Thresholds::default().memory,
        }
    }

    fn inputs(
        probes: Vec<ProbeOutcome>,
        samples: Vec<ResourceSample>,
        pods: Vec<PodStatus>,
    ) -> TickInputs {
        TickInputs {
            sequence: 1,
            tick_timestamp: Utc::now(),
            probes,
            sampling: Ok(ResourceSampling {
                samples,
                errors: Vec::new(),
            }),
            pods: Ok(pods),
        }
    }

    fn evaluate_default(inputs: TickInputs) -> HealthVerdict {
        evaluate(inputs, &thresholds(), Duration::from_secs(60))
    }

    #[test]
    fn test_all_normal_is_healthy() {
        let verdict = evaluate_default(inputs(
            vec![probe(true)],
            vec![sample("api-0", 9_000_000)],
            vec![running_pod("api-0")],
        ));

        assert_eq!(verdict.state, HealthState::Healthy);
        assert!(verdict.reasons.is_empty());
        assert_eq!(verdict.probes.len(), 1);
        assert_eq!(verdict.resources.len(), 2);
    }

    #[test]
    fn test_endpoint_failure_is_unhealthy() {
        let verdict = evaluate_default(inputs(
            vec![probe(true), probe(false)],
            vec![sample("api-0", 9_000_000)],
            vec![running_pod("api-0")],
        ));

        assert_eq!(verdict.state, HealthState::Unhealthy);
        assert!(verdict.reasons[0].contains("503"));
    }

    #[test]
    fn test_resource_overflow_alone_is_degraded() {
        let verdict = evaluate_default(inputs(
            vec![probe(true)],
            vec![sample("api-0", 11_080_000)],
            vec![running_pod("api-0")],
        ));

        assert_eq!(verdict.state, HealthState::Degraded);
        assert_eq!(verdict.worst_resource_verdict(), ResourceVerdict::Overflow);
    }

    #[test]
    fn test_usage_below_request_stays_healthy() {
        let verdict = evaluate(
            inputs(
                vec![probe(true)],
                vec![sample("api-0", 8_000_000)],
                vec![running_pod("api-0")],
            ),
            &Thresholds::default(),
            Duration::from_secs(60),
        );

        assert_eq!(verdict.state, HealthState::Healthy);
        assert!(verdict.reasons.is_empty());
        assert_eq!(
            verdict.worst_resource_verdict(),
            ResourceVerdict::RequestViolation
        );
    }

    #[test]
    fn test_underflow_alone_is_degraded() {
        let verdict = evaluate_default(inputs(
            vec![probe(true)],
            vec![sample("api-0", 1_000_000)],
            vec![running_pod("api-0")],
        ));

        assert_eq!(verdict.state, HealthState::Degraded);
        assert!(verdict.reasons[0].contains("underflow"));
    }

    #[test]
    fn test_crashloop_dominates_healthy_endpoints() {
        let mut pod = running_pod("api-0");
        pod.phase = PodPhase::CrashLoopBackOff;
        pod.ready = false;
        pod.restart_count = 5;

        let verdict = evaluate_default(inputs(
            vec![probe(true)],
            vec![sample("api-0", 9_000_000)],
            vec![pod],
        ));

        assert_eq!(verdict.state, HealthState::Unhealthy);
        assert_eq!(verdict.implicated_pods()[0].name, "api-0");
    }

    #[test]
    fn test_infrastructure_error_is_unhealthy() {
        let mut tick = inputs(vec![probe(true)], Vec::new(), vec![running_pod("api-0")]);
        tick.sampling = Err(ClusterQueryError::MetricsUnavailable(
            "metrics-server not installed".to_string(),
        ));

        let verdict = evaluate_default(tick);

        assert_eq!(verdict.state, HealthState::Unhealthy);
        assert_eq!(verdict.infrastructure_errors.len(), 1);
        assert!(verdict.reasons[0].contains("resource sampling failed"));
    }

    #[test]
    fn test_pod_query_failure_is_unhealthy() {
        let mut tick = inputs(vec![probe(true)], vec![sample("api-0", 9_000_000)], Vec::new());
        tick.pods = Err(ClusterQueryError::Unreachable("connection refused".to_string()));

        let verdict = evaluate_default(tick);

        assert_eq!(verdict.state, HealthState::Unhealthy);
        assert!(verdict.pods.is_empty());
        assert_eq!(verdict.infrastructure_errors.len(), 1);
    }

    #[test]
    fn test_no_pods_is_unhealthy() {
        let verdict = evaluate_default(inputs(vec![probe(true)], Vec::new(), Vec::new()));
        assert_eq!(verdict.state, HealthState::Unhealthy);
    }

    #[test]
    fn test_partial_sample_errors_are_degraded() {
        let mut tick = inputs(
            vec![probe(true)],
            vec![sample("api-0", 9_000_000)],
            vec![running_pod("api-0"), running_pod("api-1")],
        );
        tick.sampling = Ok(ResourceSampling {
            samples: vec![sample("api-0", 9_000_000)],
            errors: vec![ClusterQueryError::MissingSample("api-1".to_string())],
        });

        let verdict = evaluate_default(tick);

        assert_eq!(verdict.state, HealthState::Degraded);
    }

    #[test]
    fn test_transition_rules() {
        use HealthState::*;
        assert_eq!(transition(None, Healthy), Transition::Changed);
        assert_eq!(transition(None, Unhealthy), Transition::EnteredUnhealthy);
        assert_eq!(transition(Some(Healthy), Healthy), Transition::Unchanged);
        assert_eq!(transition(Some(Degraded), Unhealthy), Transition::EnteredUnhealthy);
        assert_eq!(transition(Some(Unhealthy), Unhealthy), Transition::Unchanged);
        assert_eq!(transition(Some(Unhealthy), Degraded), Transition::Recovered);
        assert_eq!(transition(Some(Unhealthy), Healthy), Transition::Recovered);
        assert_eq!(transition(Some(Healthy), Degraded), Transition::Changed);
    }

    #[test]
    fn test_edge_triggering_over_sequence() {
        use HealthState::*;
        let sequence = [Healthy, Unhealthy, Unhealthy, Healthy, Unhealthy];

        let mut previous = None;
        let mut fired_at = Vec::new();
        for (i, state) in sequence.iter().enumerate() {
            if transition(previous, *state) == Transition::EnteredUnhealthy {
                fired_at.push(i);
            }
            previous = Some(*state);
        }

        assert_eq!(fired_at, vec![1, 4]);
    }
}
