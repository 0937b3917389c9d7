//! Resource usage snapshots
//!
//! Parses the pipe-delimited single-shot `stats` output of the runtime into a
//! [`ResourceSample`].

use serde::{Deserialize, Serialize};

/// Go template passed to `stats --format`
pub const STATS_FORMAT: &str = "{{.CPUPerc}}|{{.MemUsage}}|{{.MemPerc}}|{{.NetIO}}|{{.BlockIO}}";

/// Resource usage of one container at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_pct: f64,
    pub mem_used_bytes: Option<f64>,
    pub mem_limit_bytes: Option<f64>,
    pub mem_pct: f64,
    pub net_io: String,
    pub block_io: String,
}

/// A stats sample, or the reason it could not be taken
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceSample {
    Usage(ResourceUsage),
    Unavailable {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw: Option<String>,
    },
}

impl ResourceSample {
    pub fn unavailable(error: impl Into<String>) -> Self {
        Self::Unavailable {
            error: error.into(),
            raw: None,
        }
    }

    pub fn usage(&self) -> Option<&ResourceUsage> {
        match self {
            Self::Usage(usage) => Some(usage),
            Self::Unavailable { .. } => None,
        }
    }

    pub fn cpu_pct(&self) -> Option<f64> {
        self.usage().map(|u| u.cpu_pct)
    }

    pub fn mem_used_bytes(&self) -> Option<f64> {
        self.usage().and_then(|u| u.mem_used_bytes)
    }
}

/// Byte multiplier for a size unit (`KB` is 1000, `KiB` is 1024)
fn unit_multiplier(unit: &str) -> Option<f64> {
    let mult = match unit.to_ascii_uppercase().as_str() {
        "B" => 1.0,
        "KB" => 1e3,
        "KIB" => 1024.0,
        "MB" => 1e6,
        "MIB" => 1024f64.powi(2),
        "GB" => 1e9,
        "GIB" => 1024f64.powi(3),
        "TB" => 1e12,
        "TIB" => 1024f64.powi(4),
        _ => return None,
    };
    Some(mult)
}

/// Parse a human-readable size such as `123MiB` or `1.5GB` into bytes
///
/// Returns `None` when the text does not start with `<number><unit>`.
pub fn parse_size_to_bytes(size: &str) -> Option<f64> {
    let s = size.trim();
    let number_len = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, rest) = s.split_at(number_len);
    if !number.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: f64 = number.parse().ok()?;

    let rest = rest.trim_start();
    let unit_len = rest
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(rest.len());
    let multiplier = unit_multiplier(&rest[..unit_len])?;

    Some(value * multiplier)
}

fn parse_percent(field: &str) -> Option<f64> {
    field.trim().trim_end_matches('%').trim().parse().ok()
}

/// Parse one line of `stats --no-stream --format STATS_FORMAT` output
pub fn parse_stats_line(line: &str) -> ResourceSample {
    let raw = line.trim();
    if raw.is_empty() {
        return ResourceSample::unavailable("no output");
    }

    let parse_failure = |what: &str| ResourceSample::Unavailable {
        error: format!("parse failure: {}", what),
        raw: Some(raw.to_string()),
    };

    let fields: Vec<&str> = raw.split('|').collect();
    let [cpu, mem_usage, mem_pct, net_io, block_io] = fields.as_slice() else {
        return parse_failure("expected 5 fields");
    };

    let Some(cpu_pct) = parse_percent(cpu) else {
        return parse_failure("cpu percentage");
    };
    let Some(mem_pct) = parse_percent(mem_pct) else {
        return parse_failure("memory percentage");
    };
    let (used, limit) = mem_usage.split_once('/').unwrap_or((*mem_usage, ""));

    ResourceSample::Usage(ResourceUsage {
        cpu_pct,
        mem_used_bytes: parse_size_to_bytes(used),
        mem_limit_bytes: parse_size_to_bytes(limit),
        mem_pct,
        net_io: net_io.trim().to_string(),
        block_io: block_io.trim().to_string(),
    })
}
