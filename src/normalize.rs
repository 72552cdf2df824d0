use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::fields::FieldSelection;
use crate::model::{
    EntityPage, EntitySummary, EventList, FieldAggregation, FieldBucket, FieldTimeSeries, Message, MessageList,
    NormalizedResult, TimeBucket, TimeHistogram,
};
use crate::payload::{AggregationKind, QUERY_ID, SEARCH_TYPE_ID};

/// Positional metric names used when the backend omits metric keys.
const POSITIONAL_METRICS: &[&str] = &["count", "sum", "avg", "min", "max"];

/// 结果归一化：把后端的行结构映射为统一输出。
#[derive(Clone, Default)]
pub struct ResultNormalizer;

impl ResultNormalizer {
    pub fn new() -> Self {
        Self
    }

    pub fn normalize(&self, raw: &Value, kind: AggregationKind, fields: &FieldSelection) -> NormalizedResult {
        match kind {
            AggregationKind::MessageSearch => NormalizedResult::Messages(self.messages(raw, fields)),
            AggregationKind::FieldAggregation => NormalizedResult::FieldAggregation(self.field_buckets(raw)),
            AggregationKind::Histogram => NormalizedResult::TimeHistogram(self.time_buckets(raw)),
            AggregationKind::FieldTimeAggregation => NormalizedResult::FieldTimeAggregation(self.field_time(raw)),
        }
    }

    pub fn messages(&self, raw: &Value, fields: &FieldSelection) -> MessageList {
        let st = search_type_result(raw);
        let total_results = st.and_then(|s| s.get("total_results")).and_then(Value::as_u64).unwrap_or(0);
        let messages = st
            .and_then(|s| s.get("messages"))
            .and_then(Value::as_array)
            .map(|list| list.iter().map(|m| fields.project(&message_body(m))).collect())
            .unwrap_or_default();
        MessageList {
            total_results,
            page: None,
            page_size: None,
            messages,
        }
    }

    pub fn time_buckets(&self, raw: &Value) -> TimeHistogram {
        let buckets: Vec<TimeBucket> = rows(raw)
            .iter()
            .map(|row| TimeBucket {
                timestamp: key_part(row, 0),
                count: first_count(row),
            })
            .collect();
        TimeHistogram {
            total_buckets: buckets.len(),
            buckets,
            variant: None,
        }
    }

    pub fn field_buckets(&self, raw: &Value) -> FieldAggregation {
        let buckets: Vec<FieldBucket> = rows(raw)
            .iter()
            .map(|row| {
                let key = row
                    .get("key")
                    .and_then(Value::as_array)
                    .and_then(|k| k.first())
                    .cloned()
                    .unwrap_or(Value::Null);
                let mut metrics = Map::new();
                for (i, value) in row_values(row).iter().enumerate() {
                    let name = metric_name(value, i);
                    metrics.insert(name, value.get("value").cloned().unwrap_or(Value::Null));
                }
                FieldBucket { key, metrics }
            })
            .collect();
        FieldAggregation {
            total_buckets: buckets.len(),
            buckets,
        }
    }

    /// Groups `[field_value, timestamp]` rows by field value, keeping row order per group.
    pub fn field_time(&self, raw: &Value) -> FieldTimeSeries {
        let rows = rows(raw);
        let mut series: BTreeMap<String, Vec<TimeBucket>> = BTreeMap::new();
        for row in &rows {
            series.entry(key_part(row, 0)).or_default().push(TimeBucket {
                timestamp: key_part(row, 1),
                count: first_count(row),
            });
        }
        FieldTimeSeries {
            total_buckets: rows.len(),
            series,
            variant: None,
        }
    }
}

impl ResultNormalizer {
    /// Event search reply: the `event` object of each hit, in reply order.
    pub fn events(&self, raw: &Value) -> EventList {
        let events = raw
            .get("events")
            .and_then(Value::as_array)
            .map(|hits| {
                hits.iter()
                    .map(|hit| hit.get("event").and_then(Value::as_object).cloned().unwrap_or_default())
                    .collect()
            })
            .unwrap_or_default();
        EventList {
            total_events: raw.get("total_events").and_then(Value::as_u64).unwrap_or(0),
            page: None,
            per_page: None,
            events,
        }
    }

    /// Paged entity listing stored under `collection`.
    pub fn entities(&self, raw: &Value, collection: &str) -> EntityPage {
        let items: Vec<EntitySummary> = raw
            .get(collection)
            .and_then(Value::as_array)
            .map(|list| list.iter().map(entity_summary).collect())
            .unwrap_or_default();
        let total = raw
            .get("total")
            .or_else(|| raw.get("pagination").and_then(|p| p.get("total")))
            .and_then(Value::as_u64)
            .unwrap_or(items.len() as u64);
        EntityPage { total, items }
    }
}

fn entity_summary(entity: &Value) -> EntitySummary {
    let text = |key: &str| entity.get(key).and_then(Value::as_str).map(str::to_string);
    EntitySummary {
        id: text("id").unwrap_or_default(),
        title: text("title").unwrap_or_default(),
        description: text("description").filter(|d| !d.is_empty()),
        priority: entity.get("priority").and_then(Value::as_i64),
        kind: entity
            .get("config")
            .and_then(|c| c.get("type"))
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

fn search_type_result(raw: &Value) -> Option<&Value> {
    raw.get("results")?.get(QUERY_ID)?.get("search_types")?.get(SEARCH_TYPE_ID)
}

fn rows(raw: &Value) -> Vec<Value> {
    search_type_result(raw)
        .and_then(|st| st.get("rows"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn message_body(entry: &Value) -> Message {
    entry
        .get("message")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

fn row_values(row: &Value) -> &[Value] {
    row.get("values").and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[])
}

fn key_part(row: &Value, index: usize) -> String {
    match row.get("key").and_then(|k| k.get(index)) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn first_count(row: &Value) -> u64 {
    let Some(value) = row_values(row).first().and_then(|v| v.get("value")) else {
        return 0;
    };
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
        .unwrap_or(0)
}

/// Explicit metric key when present (`"count()"` style arrays are joined), else positional.
fn metric_name(value: &Value, index: usize) -> String {
    match value.get("key") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Array(parts)) if !parts.is_empty() => parts
            .iter()
            .map(|p| p.as_str().map(str::to_string).unwrap_or_else(|| p.to_string()))
            .collect::<Vec<_>>()
            .join(","),
        _ => POSITIONAL_METRICS
            .get(index)
            .map(|m| m.to_string())
            .unwrap_or_else(|| format!("metric_{index}")),
    }
}
