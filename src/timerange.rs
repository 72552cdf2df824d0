use std::sync::OnceLock;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;

use crate::error::{GraylogMcpError, Result, TimeRangeRule};
use crate::model::{DurationInput, InstantInput, TimeRangeArgs, TimeWindow};

pub const MAX_RANGE_SECS: u64 = 31_536_000;
pub const DEFAULT_RANGE_SECS: u64 = 900;

/// Epoch values at or above this magnitude are treated as milliseconds.
const EPOCH_MILLIS_THRESHOLD: u64 = 100_000_000_000;

fn unit_seconds(unit: &str) -> Option<u64> {
    let secs = match unit {
        "s" | "sec" | "second" | "seconds" => 1,
        "m" | "min" | "minute" | "minutes" => 60,
        "h" | "hr" | "hour" | "hours" => 3_600,
        "d" | "day" | "days" => 86_400,
        "w" | "week" | "weeks" => 604_800,
        "M" | "month" | "months" => 2_592_000,
        "y" | "year" | "years" => 31_536_000,
        _ => return None,
    };
    Some(secs)
}

fn relative_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(-?\d+(?:\.\d+)?)\s*([a-zA-Z]+)$").expect("static relative-time pattern")
    })
}

/// 时间范围解析器：把相对时长、绝对起止时间转换为 `TimeWindow`。
///
/// Absolute bounds win over a relative range, which wins over the default.
#[derive(Clone, Default)]
pub struct TimeRangeResolver;

impl TimeRangeResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve(&self, args: &TimeRangeArgs) -> Result<TimeWindow> {
        self.resolve_at(args, DEFAULT_RANGE_SECS, Utc::now())
    }

    pub fn resolve_or(&self, args: &TimeRangeArgs, default_secs: u64) -> Result<TimeWindow> {
        self.resolve_at(args, default_secs, Utc::now())
    }

    /// `now` stands in for an omitted `to` bound.
    pub fn resolve_at(
        &self,
        args: &TimeRangeArgs,
        default_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<TimeWindow> {
        let (from, to) = (present(&args.from), present(&args.to));
        if from.is_some() || to.is_some() {
            let Some(from) = from else {
                return Err(GraylogMcpError::invalid_time(describe_instant(to), TimeRangeRule::MissingFrom));
            };
            let from = self.parse_instant(from)?;
            let to = match to {
                Some(to) => self.parse_instant(to)?,
                None => now,
            };
            return absolute_window(from, to);
        }

        if let Some(raw) = args.range.as_ref().or(args.last.as_ref()) {
            let seconds = self.parse_relative(raw)?;
            return Ok(TimeWindow::Relative { seconds });
        }

        Ok(TimeWindow::Relative {
            seconds: default_secs,
        })
    }

    /// `"90m"` → 5400. Bare numbers are seconds; fractions truncate toward zero.
    pub fn parse_relative(&self, input: &DurationInput) -> Result<u64> {
        match input {
            DurationInput::Seconds(n) => check_seconds(*n, &format_number(*n)),
            DurationInput::Text(text) => {
                let trimmed = text.trim();
                if let Ok(n) = trimmed.parse::<f64>() {
                    if n.is_finite() {
                        return check_seconds(n, text);
                    }
                }
                let caps = relative_re()
                    .captures(trimmed)
                    .ok_or_else(|| GraylogMcpError::invalid_time(text.as_str(), TimeRangeRule::Malformed))?;
                let value: f64 = caps[1]
                    .parse()
                    .map_err(|_| GraylogMcpError::invalid_time(text.as_str(), TimeRangeRule::Malformed))?;
                let unit = &caps[2];
                // `M` (months) and `m` (minutes) only differ by case.
                let per_unit = unit_seconds(unit)
                    .or_else(|| unit_seconds(&unit.to_lowercase()))
                    .ok_or_else(|| GraylogMcpError::invalid_time(text.as_str(), TimeRangeRule::UnknownUnit))?;
                check_seconds(value * per_unit as f64, text)
            }
        }
    }

    pub fn parse_instant(&self, input: &InstantInput) -> Result<DateTime<Utc>> {
        match input {
            InstantInput::Epoch(n) => from_epoch(*n)
                .ok_or_else(|| GraylogMcpError::invalid_time(n.to_string(), TimeRangeRule::Malformed)),
            InstantInput::Text(text) => parse_instant_text(text)
                .ok_or_else(|| GraylogMcpError::invalid_time(text.as_str(), TimeRangeRule::Malformed)),
        }
    }
}

/// Validates an absolute window: `from < to` and a span of at most one year.
pub fn absolute_window(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<TimeWindow> {
    let input = format!("{} .. {}", from.to_rfc3339(), to.to_rfc3339());
    if from >= to {
        return Err(GraylogMcpError::invalid_time(input, TimeRangeRule::InvertedBounds));
    }
    if to - from > Duration::seconds(MAX_RANGE_SECS as i64) {
        return Err(GraylogMcpError::invalid_time(input, TimeRangeRule::TooLong));
    }
    Ok(TimeWindow::Absolute { from, to })
}

pub fn parse_instant_text(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(n) = text.parse::<i64>() {
        return from_epoch(n);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    let normalized = text.replace('T', " ");
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&normalized, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn from_epoch(n: i64) -> Option<DateTime<Utc>> {
    if n.unsigned_abs() >= EPOCH_MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(n).single()
    } else {
        Utc.timestamp_opt(n, 0).single()
    }
}

fn check_seconds(value: f64, input: &str) -> Result<u64> {
    if value.is_nan() {
        return Err(GraylogMcpError::invalid_time(input, TimeRangeRule::Malformed));
    }
    if value < 0.0 {
        return Err(GraylogMcpError::invalid_time(input, TimeRangeRule::Negative));
    }
    let secs = value.trunc();
    if secs == 0.0 {
        return Err(GraylogMcpError::invalid_time(input, TimeRangeRule::Zero));
    }
    if secs > MAX_RANGE_SECS as f64 {
        return Err(GraylogMcpError::invalid_time(input, TimeRangeRule::TooLong));
    }
    Ok(secs as u64)
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Blank text bounds count as absent.
fn present(input: &Option<InstantInput>) -> Option<&InstantInput> {
    match input {
        Some(InstantInput::Text(t)) if t.trim().is_empty() => None,
        other => other.as_ref(),
    }
}

fn describe_instant(input: Option<&InstantInput>) -> String {
    match input {
        Some(InstantInput::Epoch(n)) => format!("to={n}"),
        Some(InstantInput::Text(t)) => format!("to={t}"),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> DurationInput {
        DurationInput::Text(s.to_string())
    }

    fn rule_of(err: GraylogMcpError) -> TimeRangeRule {
        match err {
            GraylogMcpError::InvalidTimeRange { rule, .. } => rule,
            other => panic!("unexpected error {other:?}"),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).single().unwrap()
    }

    #[test]
    fn relative_units_multiply() {
        let r = TimeRangeResolver::new();
        assert_eq!(r.parse_relative(&text("1h")).unwrap(), 3600);
        assert_eq!(r.parse_relative(&text("30m")).unwrap(), 1800);
        assert_eq!(r.parse_relative(&text("2d")).unwrap(), 172_800);
        assert_eq!(r.parse_relative(&text("90 minutes")).unwrap(), 5400);
        assert_eq!(r.parse_relative(&text("1w")).unwrap(), 604_800);
        assert_eq!(r.parse_relative(&text("1y")).unwrap(), 31_536_000);
        assert_eq!(r.parse_relative(&text("1.5h")).unwrap(), 5400);
        assert_eq!(r.parse_relative(&text("1.5s")).unwrap(), 1);
        assert_eq!(r.parse_relative(&DurationInput::Seconds(42.9)).unwrap(), 42);
        assert_eq!(r.parse_relative(&text("600")).unwrap(), 600);
    }

    #[test]
    fn month_and_minute_differ_by_case() {
        let r = TimeRangeResolver::new();
        assert_eq!(r.parse_relative(&text("2M")).unwrap(), 5_184_000);
        assert_eq!(r.parse_relative(&text("2m")).unwrap(), 120);
        assert_eq!(r.parse_relative(&text("2H")).unwrap(), 7200);
    }

    #[test]
    fn relative_rejections_carry_rule() {
        let r = TimeRangeResolver::new();
        assert_eq!(rule_of(r.parse_relative(&text("0h")).unwrap_err()), TimeRangeRule::Zero);
        assert_eq!(rule_of(r.parse_relative(&DurationInput::Seconds(0.0)).unwrap_err()), TimeRangeRule::Zero);
        assert_eq!(rule_of(r.parse_relative(&text("-5m")).unwrap_err()), TimeRangeRule::Negative);
        assert_eq!(rule_of(r.parse_relative(&DurationInput::Seconds(-1.0)).unwrap_err()), TimeRangeRule::Negative);
        assert_eq!(rule_of(r.parse_relative(&text("2y")).unwrap_err()), TimeRangeRule::TooLong);
        assert_eq!(
            rule_of(r.parse_relative(&DurationInput::Seconds(31_536_001.0)).unwrap_err()),
            TimeRangeRule::TooLong
        );
        assert_eq!(rule_of(r.parse_relative(&text("abc")).unwrap_err()), TimeRangeRule::Malformed);
        assert_eq!(rule_of(r.parse_relative(&text("5 fortnights")).unwrap_err()), TimeRangeRule::UnknownUnit);
    }

    #[test]
    fn invalid_time_error_keeps_raw_input() {
        let err = TimeRangeResolver::new().parse_relative(&text("12parsecs")).unwrap_err();
        assert!(err.to_string().contains("12parsecs"));
    }

    #[test]
    fn default_is_fifteen_minutes() {
        let w = TimeRangeResolver::new().resolve(&TimeRangeArgs::default()).unwrap();
        assert_eq!(w, TimeWindow::Relative { seconds: 900 });
    }

    #[test]
    fn range_takes_precedence_over_last() {
        let args = TimeRangeArgs {
            range: Some(text("1h")),
            last: Some(text("2h")),
            ..Default::default()
        };
        let w = TimeRangeResolver::new().resolve(&args).unwrap();
        assert_eq!(w, TimeWindow::Relative { seconds: 3600 });
    }

    #[test]
    fn absolute_wins_over_relative_and_to_defaults_to_now() {
        let args = TimeRangeArgs {
            range: Some(text("1h")),
            from: Some(InstantInput::Text("2025-06-01T10:00:00Z".into())),
            ..Default::default()
        };
        let w = TimeRangeResolver::new().resolve_at(&args, 900, now()).unwrap();
        assert_eq!(
            w,
            TimeWindow::Absolute {
                from: Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).single().unwrap(),
                to: now(),
            }
        );
        assert_eq!(w.duration_secs(), 7200);
    }

    #[test]
    fn absolute_rejections() {
        let r = TimeRangeResolver::new();
        let only_to = TimeRangeArgs {
            to: Some(InstantInput::Text("2025-06-01T10:00:00Z".into())),
            ..Default::default()
        };
        assert_eq!(rule_of(r.resolve_at(&only_to, 900, now()).unwrap_err()), TimeRangeRule::MissingFrom);

        let inverted = TimeRangeArgs {
            from: Some(InstantInput::Text("2025-06-01T10:00:00Z".into())),
            to: Some(InstantInput::Text("2025-06-01T10:00:00Z".into())),
            ..Default::default()
        };
        assert_eq!(rule_of(r.resolve_at(&inverted, 900, now()).unwrap_err()), TimeRangeRule::InvertedBounds);

        let too_long = TimeRangeArgs {
            from: Some(InstantInput::Text("2023-01-01".into())),
            to: Some(InstantInput::Text("2024-06-01".into())),
            ..Default::default()
        };
        assert_eq!(rule_of(r.resolve_at(&too_long, 900, now()).unwrap_err()), TimeRangeRule::TooLong);

        let garbage = TimeRangeArgs {
            from: Some(InstantInput::Text("yesterday-ish".into())),
            ..Default::default()
        };
        assert_eq!(rule_of(r.resolve_at(&garbage, 900, now()).unwrap_err()), TimeRangeRule::Malformed);
    }

    #[test]
    fn epoch_seconds_and_millis() {
        let r = TimeRangeResolver::new();
        let secs = r.parse_instant(&InstantInput::Epoch(1_700_000_000)).unwrap();
        let millis = r.parse_instant(&InstantInput::Epoch(1_700_000_000_000)).unwrap();
        assert_eq!(secs, millis);
        let text_millis = r.parse_instant(&InstantInput::Text("1700000000000".into())).unwrap();
        assert_eq!(secs, text_millis);
    }

    #[test]
    fn extreme_epochs_are_malformed_not_panics() {
        let r = TimeRangeResolver::new();
        for n in [i64::MIN, i64::MAX] {
            let err = r.parse_instant(&InstantInput::Epoch(n)).unwrap_err();
            assert_eq!(rule_of(err), TimeRangeRule::Malformed);
        }
        assert!(parse_instant_text("-9223372036854775808").is_none());
    }

    #[test]
    fn blank_bounds_fall_through_to_relative() {
        let r = TimeRangeResolver::new();
        let args = TimeRangeArgs {
            range: Some(text("1h")),
            from: Some(InstantInput::Text("".into())),
            to: Some(InstantInput::Text("  ".into())),
            ..Default::default()
        };
        assert_eq!(r.resolve_at(&args, 900, now()).unwrap(), TimeWindow::Relative { seconds: 3600 });

        let only_blank_from = TimeRangeArgs {
            from: Some(InstantInput::Text("".into())),
            ..Default::default()
        };
        assert_eq!(
            r.resolve_at(&only_blank_from, 900, now()).unwrap(),
            TimeWindow::Relative { seconds: 900 }
        );
    }

    #[test]
    fn instant_text_formats() {
        assert!(parse_instant_text("2025-06-01T10:00:00.123+02:00").is_some());
        assert!(parse_instant_text("2025-06-01 10:00:00").is_some());
        assert!(parse_instant_text("2025-06-01T10:00:00.500").is_some());
        assert!(parse_instant_text("2025-06-01").is_some());
        assert!(parse_instant_text("not a date").is_none());
    }
}
