use std::fmt;
use std::str::FromStr;

use serde_json::{json, Value};

use crate::error::{GraylogMcpError, Result};
use crate::interval::ResolvedInterval;
use crate::model::TimeWindow;
use crate::query::stream_filter;

pub const QUERY_ID: &str = "q1";
pub const SEARCH_TYPE_ID: &str = "st1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationKind {
    MessageSearch,
    FieldAggregation,
    Histogram,
    FieldTimeAggregation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Count => "count",
            Metric::Sum => "sum",
            Metric::Avg => "avg",
            Metric::Min => "min",
            Metric::Max => "max",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = GraylogMcpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "count" => Ok(Metric::Count),
            "sum" => Ok(Metric::Sum),
            "avg" | "average" | "mean" => Ok(Metric::Avg),
            "min" => Ok(Metric::Min),
            "max" => Ok(Metric::Max),
            other => Err(GraylogMcpError::InvalidRequest(format!(
                "unknown metric '{other}', expected one of count, sum, avg, min, max"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Which events an event search returns, by alert flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AlertFilter {
    #[default]
    Include,
    Exclude,
    Only,
}

impl AlertFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertFilter::Include => "include",
            AlertFilter::Exclude => "exclude",
            AlertFilter::Only => "only",
        }
    }
}

impl FromStr for AlertFilter {
    type Err = GraylogMcpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "include" => Ok(AlertFilter::Include),
            "exclude" => Ok(AlertFilter::Exclude),
            "only" => Ok(AlertFilter::Only),
            other => Err(GraylogMcpError::InvalidRequest(format!(
                "unknown alerts filter '{other}', expected include, exclude or only"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventSearchRequest {
    pub window: TimeWindow,
    pub query: String,
    pub alerts: AlertFilter,
    pub definitions: Vec<String>,
    pub page: u32,
    pub per_page: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestKind {
    MessageSearch {
        limit: usize,
        offset: usize,
        sort: Option<SortOrder>,
    },
    FieldAggregation {
        field: String,
        limit: usize,
        metrics: Vec<Metric>,
        value_field: Option<String>,
    },
    Histogram {
        interval: ResolvedInterval,
    },
    FieldTimeAggregation {
        field: String,
        interval: ResolvedInterval,
        limit: usize,
    },
}

impl RequestKind {
    pub fn kind(&self) -> AggregationKind {
        match self {
            RequestKind::MessageSearch { .. } => AggregationKind::MessageSearch,
            RequestKind::FieldAggregation { .. } => AggregationKind::FieldAggregation,
            RequestKind::Histogram { .. } => AggregationKind::Histogram,
            RequestKind::FieldTimeAggregation { .. } => AggregationKind::FieldTimeAggregation,
        }
    }
}

/// One semantic request, before it is turned into backend payloads.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationRequest {
    pub window: TimeWindow,
    pub query: String,
    pub streams: Vec<String>,
    pub kind: RequestKind,
}

/// A complete backend payload plus the label reported when it wins.
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadVariant {
    pub label: &'static str,
    pub payload: Value,
}

type VariantBuilder = fn(&AggregationRequest, &ResolvedInterval) -> Value;

/// Histogram chain, most reliable first. The first entry mirrors the
/// field-time shape known to return data.
const HISTOGRAM_CHAIN: &[(&str, VariantBuilder)] = &[
    ("symbolic-interval-pivot", histogram_symbolic_pivot),
    ("chart", histogram_chart),
    ("simple-pivot", histogram_simple_pivot),
    ("resolved-duration-pivot", histogram_resolved_pivot),
];

const FIELD_TIME_CHAIN: &[(&str, VariantBuilder)] = &[
    ("simple-pivot", field_time_simple_pivot),
    ("resolved-duration-pivot", field_time_resolved_pivot),
];

/// 聚合载荷构造器：按请求类型生成一个或多个后端载荷变体。
#[derive(Clone, Default)]
pub struct AggregationPayloadBuilder;

impl AggregationPayloadBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Body for the events search endpoint, newest first.
    pub fn event_search(&self, req: &EventSearchRequest) -> Value {
        json!({
            "query": req.query,
            "page": req.page,
            "per_page": req.per_page,
            "timerange": req.window.to_payload(),
            "filter": {
                "alerts": req.alerts.as_str(),
                "event_definitions": req.definitions,
            },
            "sort_by": "timestamp",
            "sort_direction": "desc",
        })
    }

    /// Ordered variant chain for `req`. Single-shape kinds yield one entry.
    pub fn variants(&self, req: &AggregationRequest) -> Result<Vec<PayloadVariant>> {
        match &req.kind {
            RequestKind::MessageSearch { limit, offset, sort } => Ok(vec![PayloadVariant {
                label: "messages",
                payload: self.message_search(req, *limit, *offset, *sort),
            }]),
            RequestKind::FieldAggregation {
                field,
                limit,
                metrics,
                value_field,
            } => Ok(vec![PayloadVariant {
                label: "field-values-pivot",
                payload: self.field_aggregation(req, field, *limit, metrics, value_field.as_deref())?,
            }]),
            RequestKind::Histogram { interval } => Ok(build_chain(HISTOGRAM_CHAIN, req, interval)),
            RequestKind::FieldTimeAggregation { interval, .. } => {
                Ok(build_chain(FIELD_TIME_CHAIN, req, interval))
            }
        }
    }

    fn message_search(&self, req: &AggregationRequest, limit: usize, offset: usize, sort: Option<SortOrder>) -> Value {
        let mut st = json!({
            "id": SEARCH_TYPE_ID,
            "type": "messages",
            "limit": limit,
            "offset": offset,
        });
        if let Some(order) = sort {
            st["sort"] = json!([{ "field": "timestamp", "order": order.as_str() }]);
        }
        envelope(req, st)
    }

    fn field_aggregation(
        &self,
        req: &AggregationRequest,
        field: &str,
        limit: usize,
        metrics: &[Metric],
        value_field: Option<&str>,
    ) -> Result<Value> {
        let series = build_series(metrics, value_field)?;
        Ok(envelope(
            req,
            json!({
                "id": SEARCH_TYPE_ID,
                "type": "pivot",
                "row_groups": [{ "type": "values", "field": field, "limit": limit }],
                "series": series,
                "rollup": false,
                "sort": [{ "type": "series", "field": "count", "direction": "DESC" }],
            }),
        ))
    }
}

fn build_chain(
    chain: &[(&'static str, VariantBuilder)],
    req: &AggregationRequest,
    interval: &ResolvedInterval,
) -> Vec<PayloadVariant> {
    chain
        .iter()
        .map(|(label, build)| PayloadVariant {
            label: *label,
            payload: build(req, interval),
        })
        .collect()
}

/// `count` always leads the series; the other metrics need a numeric field.
fn build_series(metrics: &[Metric], value_field: Option<&str>) -> Result<Vec<Value>> {
    let mut series = vec![json!({ "type": "count", "id": "count" })];
    for metric in metrics {
        if *metric == Metric::Count {
            continue;
        }
        let field = value_field
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .ok_or_else(|| GraylogMcpError::MissingValueField {
                metric: metric.to_string(),
            })?;
        let id = metric.as_str();
        if series.iter().any(|s| s["id"] == id) {
            continue;
        }
        series.push(json!({ "type": id, "id": id, "field": field }));
    }
    Ok(series)
}

fn envelope(req: &AggregationRequest, search_type: Value) -> Value {
    let mut query = json!({
        "id": QUERY_ID,
        "query": { "type": "elasticsearch", "query_string": req.query },
        "timerange": req.window.to_payload(),
        "search_types": [search_type],
    });
    if let Some(filter) = stream_filter(&req.streams) {
        query["filter"] = filter;
    }
    json!({ "queries": [query] })
}

fn time_row_group(interval: Value) -> Value {
    json!({ "type": "time", "field": "timestamp", "interval": interval })
}

fn group_field(req: &AggregationRequest) -> (&str, usize) {
    match &req.kind {
        RequestKind::FieldTimeAggregation { field, limit, .. } => (field.as_str(), *limit),
        _ => ("", 0),
    }
}

fn histogram_symbolic_pivot(req: &AggregationRequest, interval: &ResolvedInterval) -> Value {
    envelope(
        req,
        json!({
            "id": SEARCH_TYPE_ID,
            "type": "pivot",
            "row_groups": [time_row_group(json!(interval.symbolic))],
            "series": [{ "type": "count" }],
            "rollup": false,
        }),
    )
}

fn histogram_chart(req: &AggregationRequest, interval: &ResolvedInterval) -> Value {
    envelope(
        req,
        json!({
            "id": SEARCH_TYPE_ID,
            "type": "chart",
            "time_range": req.window.to_payload(),
            "streams": req.streams,
            "name": "Timeline",
            "series": [{ "type": "count", "id": "count" }],
            "group_by": [],
            "interval": interval.symbolic,
        }),
    )
}

fn histogram_simple_pivot(req: &AggregationRequest, interval: &ResolvedInterval) -> Value {
    envelope(
        req,
        json!({
            "id": SEARCH_TYPE_ID,
            "type": "pivot",
            "row_groups": [{
                "type": "time",
                "field": "timestamp",
                "interval": interval.symbolic,
            }],
            "series": [{ "type": "count" }],
            "rollup": false,
        }),
    )
}

fn histogram_resolved_pivot(req: &AggregationRequest, interval: &ResolvedInterval) -> Value {
    envelope(
        req,
        json!({
            "id": SEARCH_TYPE_ID,
            "type": "pivot",
            "row_groups": [time_row_group(interval.duration_object())],
            "series": [{ "type": "count", "id": "count" }],
            "rollup": false,
            "sort": [{ "type": "pivot", "field": "timestamp", "direction": "ASC" }],
        }),
    )
}

fn field_time_simple_pivot(req: &AggregationRequest, interval: &ResolvedInterval) -> Value {
    let (field, limit) = group_field(req);
    envelope(
        req,
        json!({
            "id": SEARCH_TYPE_ID,
            "type": "pivot",
            "row_groups": [
                { "type": "values", "field": field, "limit": limit },
                time_row_group(json!(interval.symbolic)),
            ],
            "series": [{ "type": "count" }],
            "rollup": false,
        }),
    )
}

fn field_time_resolved_pivot(req: &AggregationRequest, interval: &ResolvedInterval) -> Value {
    let (field, limit) = group_field(req);
    envelope(
        req,
        json!({
            "id": SEARCH_TYPE_ID,
            "type": "pivot",
            "row_groups": [
                { "type": "values", "field": field, "limit": limit },
                time_row_group(interval.duration_object()),
            ],
            "series": [{ "type": "count", "id": "count" }],
            "rollup": false,
            "sort": [{ "type": "series", "field": "count", "direction": "DESC" }],
        }),
    )
}
