use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub type FieldFilters = Map<String, Value>;
pub type Message = Map<String, Value>;

/// 解析后的时间窗口。每个请求单独构造，不可变。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeWindow {
    Relative { seconds: u64 },
    Absolute { from: DateTime<Utc>, to: DateTime<Utc> },
}

impl TimeWindow {
    pub fn duration_secs(&self) -> u64 {
        match self {
            TimeWindow::Relative { seconds } => *seconds,
            TimeWindow::Absolute { from, to } => (*to - *from).num_seconds().max(0) as u64,
        }
    }

    pub fn duration_millis(&self) -> u64 {
        match self {
            TimeWindow::Relative { seconds } => seconds.saturating_mul(1_000),
            TimeWindow::Absolute { from, to } => (*to - *from).num_milliseconds().max(0) as u64,
        }
    }

    /// Backend `timerange` object.
    pub fn to_payload(&self) -> Value {
        match self {
            TimeWindow::Relative { seconds } => json!({ "type": "relative", "range": seconds }),
            TimeWindow::Absolute { from, to } => json!({
                "type": "absolute",
                "from": from.to_rfc3339_opts(SecondsFormat::Millis, true),
                "to": to.to_rfc3339_opts(SecondsFormat::Millis, true),
            }),
        }
    }
}

/// A relative duration as supplied by the caller: raw seconds or `"2d"`-style text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DurationInput {
    Seconds(f64),
    Text(String),
}

/// An absolute instant: epoch number or ISO-8601 text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InstantInput {
    Epoch(i64),
    Text(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRangeArgs {
    #[serde(
        default,
        alias = "timeRange",
        alias = "searchTimeRangeInSeconds",
        alias = "timeRangeInSeconds"
    )]
    pub range: Option<DurationInput>,
    #[serde(default)]
    pub last: Option<DurationInput>,
    #[serde(default, alias = "startTime")]
    pub from: Option<InstantInput>,
    #[serde(default, alias = "endTime")]
    pub to: Option<InstantInput>,
}

/// Stream scoping: a single id, a list, or both.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamScope {
    #[serde(default)]
    pub stream_id: Option<String>,
    #[serde(default)]
    pub stream_ids: Vec<String>,
}

impl StreamScope {
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for id in self.stream_id.iter().chain(self.stream_ids.iter()) {
            let id = id.trim();
            if !id.is_empty() && !ids.iter().any(|x| x == id) {
                ids.push(id.to_string());
            }
        }
        ids
    }
}

fn default_exact_match() -> bool {
    true
}

fn default_interval() -> String {
    "auto".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMessagesParams {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub filters: FieldFilters,
    #[serde(default = "default_exact_match")]
    pub exact_match: bool,
    #[serde(default)]
    pub fields: Option<String>,
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(flatten)]
    pub time: TimeRangeArgs,
    #[serde(flatten)]
    pub streams: StreamScope,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurroundingMessagesParams {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub message_timestamp: Option<String>,
    #[serde(default)]
    pub surrounding_seconds: Option<f64>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub filters: FieldFilters,
    #[serde(default = "default_exact_match")]
    pub exact_match: bool,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub fields: Option<String>,
    #[serde(flatten)]
    pub streams: StreamScope,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateFieldParams {
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub filters: FieldFilters,
    #[serde(default = "default_exact_match")]
    pub exact_match: bool,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub metrics: Vec<String>,
    #[serde(default)]
    pub value_field: Option<String>,
    #[serde(flatten)]
    pub time: TimeRangeArgs,
    #[serde(flatten)]
    pub streams: StreamScope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistogramParams {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub filters: FieldFilters,
    #[serde(default = "default_exact_match")]
    pub exact_match: bool,
    #[serde(default = "default_interval")]
    pub interval: String,
    #[serde(flatten)]
    pub time: TimeRangeArgs,
    #[serde(flatten)]
    pub streams: StreamScope,
}

impl Default for HistogramParams {
    fn default() -> Self {
        Self {
            query: None,
            filters: FieldFilters::new(),
            exact_match: true,
            interval: default_interval(),
            time: TimeRangeArgs::default(),
            streams: StreamScope::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldTimeParams {
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub filters: FieldFilters,
    #[serde(default = "default_exact_match")]
    pub exact_match: bool,
    #[serde(default = "default_interval")]
    pub interval: String,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(flatten)]
    pub time: TimeRangeArgs,
    #[serde(flatten)]
    pub streams: StreamScope,
}

impl Default for FieldTimeParams {
    fn default() -> Self {
        Self {
            field: None,
            query: None,
            filters: FieldFilters::new(),
            exact_match: true,
            interval: default_interval(),
            limit: None,
            time: TimeRangeArgs::default(),
            streams: StreamScope::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeBucket {
    pub timestamp: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldBucket {
    pub key: Value,
    #[serde(flatten)]
    pub metrics: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageList {
    pub total_results: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<usize>,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeHistogram {
    pub total_buckets: usize,
    pub buckets: Vec<TimeBucket>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldAggregation {
    pub total_buckets: usize,
    pub buckets: Vec<FieldBucket>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldTimeSeries {
    pub total_buckets: usize,
    pub series: BTreeMap<String, Vec<TimeBucket>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

/// Uniform result shape handed back to the tool layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NormalizedResult {
    Messages(MessageList),
    TimeHistogram(TimeHistogram),
    FieldAggregation(FieldAggregation),
    FieldTimeAggregation(FieldTimeSeries),
}

impl NormalizedResult {
    /// Records which fallback variant produced the data.
    pub fn with_variant(self, label: &str) -> Self {
        match self {
            NormalizedResult::TimeHistogram(mut h) => {
                h.variant = Some(label.to_string());
                NormalizedResult::TimeHistogram(h)
            }
            NormalizedResult::FieldTimeAggregation(mut s) => {
                s.variant = Some(label.to_string());
                NormalizedResult::FieldTimeAggregation(s)
            }
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSummary {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSearchParams {
    #[serde(default)]
    pub query: Option<String>,
    /// `include` (default), `exclude` or `only`.
    #[serde(default)]
    pub alerts: Option<String>,
    #[serde(default)]
    pub event_definitions: Vec<String>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default, alias = "per_page")]
    pub per_page: Option<u32>,
    #[serde(flatten)]
    pub time: TimeRangeArgs,
}

/// Paging for the event definition and notification listings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventListParams {
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default, alias = "per_page")]
    pub per_page: Option<u32>,
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventList {
    pub total_events: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_page: Option<u32>,
    pub events: Vec<Message>,
}

/// Event definition or notification, reduced to what a caller needs to pick one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySummary {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityPage {
    pub total: u64,
    pub items: Vec<EntitySummary>,
}
