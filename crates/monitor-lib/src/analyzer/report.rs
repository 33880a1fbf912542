//! Per-pod resource recommendations
//!
//! Combines a pod's cpu and memory findings into one report with a
//! recommendation, written to the analysis store on anomalous ticks.

use super::display_value;
use crate::models::{ResourceFinding, ResourceKind, ResourceVerdict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Recommendation for one pod, from the combination of its verdicts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    /// Both resources above their high threshold
    Critical,
    CpuPressure,
    MemoryPressure,
    /// Both resources below their low threshold
    Underutilized,
    CpuUnderutilized,
    MemoryUnderutilized,
    Healthy,
}

impl Recommendation {
    fn from_verdicts(cpu: ResourceVerdict, memory: ResourceVerdict) -> Self {
        let high = |v: ResourceVerdict| {
            matches!(v, ResourceVerdict::Overflow | ResourceVerdict::LimitViolation)
        };
        let low = |v: ResourceVerdict| v == ResourceVerdict::Underflow;

        match (cpu, memory) {
            (c, m) if high(c) && high(m) => Recommendation::Critical,
            (c, _) if high(c) => Recommendation::CpuPressure,
            (_, m) if high(m) => Recommendation::MemoryPressure,
            (c, m) if low(c) && low(m) => Recommendation::Underutilized,
            (c, _) if low(c) => Recommendation::CpuUnderutilized,
            (_, m) if low(m) => Recommendation::MemoryUnderutilized,
            _ => Recommendation::Healthy,
        }
    }

    pub fn headline(&self) -> &'static str {
        match self {
            Recommendation::Critical => "CRITICAL: cpu and memory above high thresholds",
            Recommendation::CpuPressure => "cpu usage above high threshold",
            Recommendation::MemoryPressure => "memory usage above high threshold",
            Recommendation::Underutilized => "cpu and memory underutilized",
            Recommendation::CpuUnderutilized => "cpu underutilized",
            Recommendation::MemoryUnderutilized => "memory underutilized",
            Recommendation::Healthy => "resource usage within normal parameters",
        }
    }

    pub fn advice(&self) -> &'static str {
        match self {
            Recommendation::Critical => {
                "The pod is under heavy load or leaking resources. Investigate the application \
                 now, scale out, and raise limits if this usage is expected."
            }
            Recommendation::CpuPressure => {
                "Check for cpu-intensive code paths or busy loops. If this is normal peak load, \
                 raise the cpu limit or enable autoscaling."
            }
            Recommendation::MemoryPressure => {
                "Profile memory for leaks or unbounded caches. If the workload needs this much, \
                 raise the memory limit before the container is OOM killed."
            }
            Recommendation::Underutilized => {
                "The pod is over-provisioned. Lower its cpu and memory requests to free \
                 capacity for other workloads."
            }
            Recommendation::CpuUnderutilized => {
                "Lower the cpu request to match observed usage."
            }
            Recommendation::MemoryUnderutilized => {
                "Lower the memory request to match observed usage."
            }
            Recommendation::Healthy => "No action needed.",
        }
    }

    /// Whether memory is the resource the report leads with
    fn memory_first(&self) -> bool {
        matches!(
            self,
            Recommendation::MemoryPressure | Recommendation::MemoryUnderutilized
        )
    }
}

/// Cpu and memory findings of one pod with the resulting recommendation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceReport {
    pub pod: String,
    pub recommendation: Recommendation,
    pub cpu: ResourceFinding,
    pub memory: ResourceFinding,
}

impl ResourceReport {
    pub fn new(cpu: ResourceFinding, memory: ResourceFinding) -> Self {
        Self {
            pod: cpu.pod.clone(),
            recommendation: Recommendation::from_verdicts(cpu.verdict, memory.verdict),
            cpu,
            memory,
        }
    }

    /// Whether either finding degrades the verdict
    pub fn needs_attention(&self) -> bool {
        self.cpu.verdict.is_degrading() || self.memory.verdict.is_degrading()
    }

    /// Plain-text report as written to the analysis store
    pub fn render(&self, generated_at: DateTime<Utc>) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== resource analysis ===");
        let _ = writeln!(out, "generated_at: {}", generated_at.to_rfc3339());
        let _ = writeln!(out, "pod: {}", self.pod);
        for finding in [&self.cpu, &self.memory] {
            let _ = writeln!(
                out,
                "{}: {} {} ({:.1}% of request)",
                finding.kind,
                finding.verdict,
                display_value(finding.kind, finding.value),
                finding.utilization_percent
            );
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "{}: pod {}", self.recommendation.headline(), self.pod);
        let _ = writeln!(out);
        let (first, second) = if self.recommendation.memory_first() {
            (&self.memory, &self.cpu)
        } else {
            (&self.cpu, &self.memory)
        };
        let _ = writeln!(out, "{}", first.analysis);
        let _ = writeln!(out, "{}", second.analysis);
        let _ = writeln!(out);
        let _ = writeln!(out, "recommendation: {}", self.recommendation.advice());
        out
    }
}

/// One report per pod that has both a cpu and a memory finding
pub fn reports(findings: &[ResourceFinding]) -> Vec<ResourceReport> {
    let mut pods: Vec<&str> = Vec::new();
    for finding in findings {
        if !pods.contains(&finding.pod.as_str()) {
            pods.push(&finding.pod);
        }
    }

    pods.into_iter()
        .filter_map(|pod| {
            let find = |kind: ResourceKind| {
                findings
                    .iter()
                    .find(|f| f.pod == pod && f.kind == kind)
                    .cloned()
            };
            Some(ResourceReport::new(
                find(ResourceKind::Cpu)?,
                find(ResourceKind::Memory)?,
            ))
        })
        .collect()
}
