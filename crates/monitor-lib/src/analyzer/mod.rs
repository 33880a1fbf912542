//! Resource threshold classification
//!
//! Classifies CPU and memory samples against four-value bands
//! (low / request / high / limit). Classification is a pure function of
//! one value and one band and never fails.

mod quantity;
mod report;

pub use quantity::{parse_cpu_nanocores, parse_memory_bytes, QuantityError};
pub use report::{reports, Recommendation, ResourceReport};

use crate::models::{
    ResourceFinding, ResourceKind, ResourceSample, ResourceVerdict, ThresholdBand, Thresholds,
};

const NANOCORES_PER_MILLICORE: f64 = 1_000_000.0;
const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Classify one value against a band
///
/// First match wins, in this order: limit-violation, overflow, underflow,
/// request-violation, normal. A limit violation is never masked by an
/// overflow, even when the band is misconfigured with `high > limit`.
pub fn classify(value: u64, band: &ThresholdBand) -> ResourceVerdict {
    if value > band.limit {
        ResourceVerdict::LimitViolation
    } else if value > band.high {
        ResourceVerdict::Overflow
    } else if value < band.low {
        ResourceVerdict::Underflow
    } else if value < band.request {
        ResourceVerdict::RequestViolation
    } else {
        ResourceVerdict::Normal
    }
}

/// Classify every resource kind of one sample
pub fn analyze(sample: &ResourceSample, thresholds: &Thresholds) -> Vec<ResourceFinding> {
    ResourceKind::ALL
        .iter()
        .map(|&kind| {
            let band = thresholds.band(kind);
            let value = sample.value(kind);
            let verdict = classify(value, band);
            let utilization_percent = utilization_percent(value, band.request);

            ResourceFinding {
                pod: sample.pod.name.clone(),
                kind,
                value,
                verdict,
                utilization_percent,
                analysis: describe(kind, value, verdict, utilization_percent, band),
            }
        })
        .collect()
}

/// Most severe verdict among the findings
pub fn worst<'a, I>(findings: I) -> ResourceVerdict
where
    I: IntoIterator<Item = &'a ResourceFinding>,
{
    findings
        .into_iter()
        .map(|f| f.verdict)
        .max()
        .unwrap_or(ResourceVerdict::Normal)
}

fn utilization_percent(value: u64, request: u64) -> f64 {
    if request == 0 {
        return 0.0;
    }
    value as f64 / request as f64 * 100.0
}

/// Value in display units: millicores for cpu, MiB for memory
fn display_value(kind: ResourceKind, value: u64) -> String {
    match kind {
        ResourceKind::Cpu => format!("{:.1}m", value as f64 / NANOCORES_PER_MILLICORE),
        ResourceKind::Memory => format!("{:.1}Mi", value as f64 / BYTES_PER_MIB),
    }
}

fn describe(
    kind: ResourceKind,
    value: u64,
    verdict: ResourceVerdict,
    utilization: f64,
    band: &ThresholdBand,
) -> String {
    let usage = display_value(kind, value);
    match verdict {
        ResourceVerdict::LimitViolation => format!(
            "{} usage {} ({:.1}% of request) exceeds the limit of {}; the container is at risk of throttling or OOM kill",
            kind,
            usage,
            utilization,
            display_value(kind, band.limit)
        ),
        ResourceVerdict::Overflow => format!(
            "{} usage {} ({:.1}% of request) exceeds the high threshold of {}",
            kind,
            usage,
            utilization,
            display_value(kind, band.high)
        ),
        ResourceVerdict::Underflow => format!(
            "{} usage {} ({:.1}% of request) is below the low threshold of {}; the container may be over-provisioned",
            kind,
            usage,
            utilization,
            display_value(kind, band.low)
        ),
        ResourceVerdict::RequestViolation => format!(
            "{} usage {} is below the request of {} ({:.1}% utilized)",
            kind,
            usage,
            display_value(kind, band.request),
            utilization
        ),
        ResourceVerdict::Normal => format!(
            "{} usage {} ({:.1}% of request) is within expected parameters",
            kind, usage, utilization
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PodRef;
    use proptest::prelude::*;

    fn cpu_band() -> ThresholdBand {
        ThresholdBand {
            low: 5_000_000,
            high: 10_000_000,
            request: 8_000_000,
            limit: 15_000_000,
        }
    }

    fn sample(cpu_nanocores: u64, memory_bytes: u64) -> ResourceSample {
        ResourceSample {
            pod: PodRef::new("api-7d9f", "default"),
            cpu_nanocores,
            memory_bytes,
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_overflow_between_high_and_limit() {
        assert_eq!(classify(11_080_000, &cpu_band()), ResourceVerdict::Overflow);
    }

    #[test]
    fn test_classification_precedence() {
        let band = cpu_band();
        assert_eq!(classify(15_000_001, &band), ResourceVerdict::LimitViolation);
        assert_eq!(classify(15_000_000, &band), ResourceVerdict::Overflow);
        assert_eq!(classify(10_000_000, &band), ResourceVerdict::Normal);
        assert_eq!(classify(8_000_000, &band), ResourceVerdict::Normal);
        assert_eq!(classify(7_999_999, &band), ResourceVerdict::RequestViolation);
        assert_eq!(classify(5_000_000, &band), ResourceVerdict::RequestViolation);
        assert_eq!(classify(4_999_999, &band), ResourceVerdict::Underflow);
        assert_eq!(classify(0, &band), ResourceVerdict::Underflow);
    }

    #[test]
    fn test_limit_wins_when_high_above_limit() {
        let band = ThresholdBand {
            low: 1,
            high: 100,
            request: 10,
            limit: 50,
        };
        assert_eq!(classify(75, &band), ResourceVerdict::LimitViolation);
        assert_eq!(classify(150, &band), ResourceVerdict::LimitViolation);
    }

    #[test]
    fn test_analyze_produces_finding_per_kind() {
        let thresholds = Thresholds {
            cpu: cpu_band(),
            memory: Thresholds::default().memory,
        };
        let findings = analyze(&sample(11_080_000, 15 * 1024 * 1024), &thresholds);

        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].kind, ResourceKind::Cpu);
        assert_eq!(findings[0].verdict, ResourceVerdict::Overflow);
        assert!((findings[0].utilization_percent - 138.5).abs() < 0.01);
        assert!(findings[0].analysis.contains("11.1m"));
        assert_eq!(findings[1].kind, ResourceKind::Memory);
        assert_eq!(findings[1].verdict, ResourceVerdict::RequestViolation);
        assert_eq!(worst(&findings), ResourceVerdict::Overflow);
    }

    #[test]
    fn test_zero_request_utilization() {
        let band = ThresholdBand {
            low: 0,
            high: 10,
            request: 0,
            limit: 20,
        };
        let thresholds = Thresholds {
            cpu: band,
            memory: band,
        };
        let findings = analyze(&sample(5, 5), &thresholds);
        assert!(findings.iter().all(|f| f.utilization_percent == 0.0));
    }

    #[test]
    fn test_worst_of_empty_is_normal() {
        assert_eq!(worst(&Vec::<ResourceFinding>::new()), ResourceVerdict::Normal);
    }

    fn ordered_band() -> impl Strategy<Value = ThresholdBand> {
        (0u64..1_000_000, 1u64..1_000_000, 0u64..1_000_000, 0u64..1_000_000).prop_map(
            |(low, d_request, d_high, d_limit)| {
                let request = low + d_request;
                let high = request + d_high;
                let limit = high + d_limit;
                ThresholdBand {
                    low,
                    high,
                    request,
                    limit,
                }
            },
        )
    }

    proptest! {
        #[test]
        fn prop_limit_violation_above_limit(band in ordered_band(), excess in 1u64..1_000_000) {
            prop_assert_eq!(classify(band.limit + excess, &band), ResourceVerdict::LimitViolation);
        }

        #[test]
        fn prop_classify_consistent_with_precedence(band in ordered_band(), v in 0u64..4_000_000) {
            let verdict = classify(v, &band);
            let expected = if v > band.limit {
                ResourceVerdict::LimitViolation
            } else if v > band.high {
                ResourceVerdict::Overflow
            } else if v < band.low {
                ResourceVerdict::Underflow
            } else if v < band.request {
                ResourceVerdict::RequestViolation
            } else {
                ResourceVerdict::Normal
            };
            prop_assert_eq!(verdict, expected);
        }

        #[test]
        fn prop_classify_idempotent(
            low in 0u64..1_000, high in 0u64..1_000, request in 0u64..1_000, limit in 0u64..1_000,
            v in 0u64..2_000,
        ) {
            let band = ThresholdBand { low, high, request, limit };
            prop_assert_eq!(classify(v, &band), classify(v, &band));
        }
    }
}
