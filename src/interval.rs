use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Value};
use tracing::warn;

use crate::model::TimeWindow;

pub const AUTO: &str = "auto";
pub const FALLBACK_INTERVAL_MS: u64 = 60_000;

fn interval_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)([a-zA-Z]+)$").expect("static interval pattern"))
}

/// A bucket size in both of the forms the payload variants need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInterval {
    /// Symbolic form sent by the bare-string variants, e.g. `"5m"`.
    pub symbolic: String,
    pub millis: u64,
    /// Set when `symbolic` had no known unit and `millis` was guessed.
    pub lenient: bool,
}

impl ResolvedInterval {
    /// `{type: "interval", value: <ms>}` as used by the resolved-duration variants.
    pub fn duration_object(&self) -> Value {
        json!({ "type": "interval", "value": self.millis })
    }
}

#[derive(Clone, Default)]
pub struct IntervalResolver;

impl IntervalResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve(&self, window: &TimeWindow, requested: &str) -> ResolvedInterval {
        let requested = requested.trim();
        let symbolic = if requested.is_empty() || requested == AUTO {
            auto_interval(window.duration_millis()).to_string()
        } else {
            requested.to_string()
        };

        if let Some(millis) = parse_interval_ms(&symbolic) {
            return ResolvedInterval { symbolic, millis, lenient: false };
        }
        // Well-formed counts with an unknown unit are taken as minutes.
        let millis = split_interval(&symbolic)
            .and_then(|(value, _)| value.checked_mul(FALLBACK_INTERVAL_MS))
            .filter(|ms| *ms > 0)
            .unwrap_or(FALLBACK_INTERVAL_MS);
        warn!(interval = %symbolic, millis, "unrecognised interval, resolved leniently");
        ResolvedInterval {
            symbolic,
            millis,
            lenient: true,
        }
    }
}

/// Picks a bucket size by ascending window thresholds.
pub fn auto_interval(duration_millis: u64) -> &'static str {
    match duration_millis {
        0..=3_600_000 => "1m",
        3_600_001..=86_400_000 => "5m",
        86_400_001..=604_800_000 => "1h",
        _ => "1d",
    }
}

/// `<integer><s|m|h|d>` → milliseconds. Zero-length intervals are rejected.
pub fn parse_interval_ms(interval: &str) -> Option<u64> {
    let (value, unit) = split_interval(interval)?;
    let unit_ms = match unit.to_ascii_lowercase().as_str() {
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        _ => return None,
    };
    value.checked_mul(unit_ms).filter(|ms| *ms > 0)
}

fn split_interval(interval: &str) -> Option<(u64, &str)> {
    let caps = interval_re().captures(interval)?;
    let value = caps.get(1)?.as_str().parse().ok()?;
    Some((value, caps.get(2)?.as_str()))
}
