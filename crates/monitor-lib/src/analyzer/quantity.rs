//! Kubernetes resource quantity parsing
//!
//! The metrics API reports usage as quantity strings ("11080000n", "250m",
//! "31640Ki"). Samples are normalized to nanocores and bytes.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} quantity: {quantity:?}")]
pub struct QuantityError {
    pub kind: &'static str,
    pub quantity: String,
}

/// Parse a CPU quantity ("500000n", "250u", "100m", "0.5") to nanocores
pub fn parse_cpu_nanocores(quantity: &str) -> Result<u64, QuantityError> {
    let q = quantity.trim();
    let err = || QuantityError {
        kind: "cpu",
        quantity: quantity.to_string(),
    };

    if q.is_empty() {
        return Ok(0);
    }

    if let Some(val) = q.strip_suffix('n') {
        val.parse::<u64>().map_err(|_| err())
    } else if let Some(val) = q.strip_suffix('u') {
        scale_integer(val, 1_000).ok_or_else(err)
    } else if let Some(val) = q.strip_suffix('m') {
        scale_integer(val, 1_000_000).ok_or_else(err)
    } else {
        scale_decimal(q, 1_000_000_000.0).ok_or_else(err)
    }
}

/// Parse a memory quantity ("128Mi", "1Gi", "256000Ki", "500M", "1024") to bytes
pub fn parse_memory_bytes(quantity: &str) -> Result<u64, QuantityError> {
    let q = quantity.trim();
    let err = || QuantityError {
        kind: "memory",
        quantity: quantity.to_string(),
    };

    if q.is_empty() {
        return Ok(0);
    }

    const SUFFIXES: &[(&str, u64)] = &[
        ("Ki", 1 << 10),
        ("Mi", 1 << 20),
        ("Gi", 1 << 30),
        ("Ti", 1 << 40),
        ("k", 1_000),
        ("K", 1_000),
        ("M", 1_000_000),
        ("G", 1_000_000_000),
        ("T", 1_000_000_000_000),
    ];

    for (suffix, factor) in SUFFIXES {
        if let Some(val) = q.strip_suffix(suffix) {
            return scale_decimal(val, *factor as f64).ok_or_else(err);
        }
    }

    // Milli-bytes appear for averaged samples
    if let Some(val) = q.strip_suffix('m') {
        return val.parse::<u64>().map(|v| v / 1_000).map_err(|_| err());
    }

    scale_decimal(q, 1.0).ok_or_else(err)
}

fn scale_integer(val: &str, factor: u64) -> Option<u64> {
    val.parse::<u64>().ok()?.checked_mul(factor)
}

fn scale_decimal(val: &str, factor: f64) -> Option<u64> {
    if let Ok(int) = val.parse::<u64>() {
        return int.checked_mul(factor as u64);
    }
    let value = val.parse::<f64>().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * factor).round() as u64)
}
