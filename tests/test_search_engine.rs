use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use graylog_search_mcp::backend::SearchBackend;
use graylog_search_mcp::config::SearchConfig;
use graylog_search_mcp::error::{GraylogMcpError, Result, TimeRangeRule};
use graylog_search_mcp::model::{EventListParams, NormalizedResult, TimeBucket};
use graylog_search_mcp::search::SearchEngine;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

/// Replays queued replies in order and records every payload it receives.
#[derive(Default)]
struct ScriptedBackend {
    replies: Mutex<VecDeque<Result<Value>>>,
    calls: Mutex<Vec<Value>>,
    paging: Mutex<Vec<EventListParams>>,
}

impl ScriptedBackend {
    fn with_replies(replies: Vec<Result<Value>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
            paging: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<Value> {
        self.calls.lock().unwrap().clone()
    }

    fn next_reply(&self) -> Result<Value> {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(json!({})))
    }
}

#[async_trait]
impl SearchBackend for ScriptedBackend {
    async fn execute(&self, payload: &Value) -> Result<Value> {
        self.calls.lock().unwrap().push(payload.clone());
        self.next_reply()
    }

    async fn list_streams(&self) -> Result<Value> {
        Ok(json!({
            "total": 2,
            "streams": [
                { "id": "s1", "title": "All messages", "description": "default", "disabled": false },
                { "id": "s2", "title": "Payments" }
            ]
        }))
    }

    async fn search_events(&self, payload: &Value) -> Result<Value> {
        self.calls.lock().unwrap().push(payload.clone());
        self.next_reply()
    }

    async fn list_event_definitions(&self, paging: &EventListParams) -> Result<Value> {
        self.paging.lock().unwrap().push(paging.clone());
        self.next_reply()
    }

    async fn list_event_notifications(&self, paging: &EventListParams) -> Result<Value> {
        self.paging.lock().unwrap().push(paging.clone());
        self.next_reply()
    }
}

fn engine(backend: Arc<ScriptedBackend>) -> SearchEngine {
    SearchEngine::new(backend, SearchConfig::default())
}

fn params<T: DeserializeOwned>(v: Value) -> T {
    serde_json::from_value(v).unwrap()
}

fn rows(rows: Value) -> Value {
    json!({ "results": { "q1": { "search_types": { "st1": { "rows": rows } } } } })
}

fn messages(total: u64, bodies: Vec<Value>) -> Value {
    let messages: Vec<Value> = bodies.into_iter().map(|m| json!({ "message": m })).collect();
    json!({ "results": { "q1": { "search_types": { "st1": {
        "total_results": total,
        "messages": messages
    } } } } })
}

fn backend_error(status: u16) -> Result<Value> {
    Err(GraylogMcpError::Backend {
        status: Some(status),
        body: "unsupported search type".into(),
    })
}

fn search_type(payload: &Value) -> &Value {
    &payload["queries"][0]["search_types"][0]
}

#[tokio::test]
async fn field_time_one_hour_auto_interval_groups_series() {
    let backend = ScriptedBackend::with_replies(vec![Ok(rows(json!([
        { "key": ["prod", "t1"], "values": [{ "value": 5 }] },
        { "key": ["prod", "t2"], "values": [{ "value": 7 }] },
    ])))]);
    let out = engine(backend.clone())
        .field_time_aggregation(params(json!({ "field": "env", "timeRange": "1h" })))
        .await
        .unwrap();

    let calls = backend.calls();
    assert_eq!(calls.len(), 1);
    let st = search_type(&calls[0]);
    assert_eq!(st["row_groups"][0], json!({ "type": "values", "field": "env", "limit": 10 }));
    assert_eq!(st["row_groups"][1]["interval"], "1m");
    assert_eq!(calls[0]["queries"][0]["timerange"], json!({ "type": "relative", "range": 3600 }));

    let NormalizedResult::FieldTimeAggregation(series) = out else {
        panic!("unexpected result: {out:?}");
    };
    assert_eq!(series.variant.as_deref(), Some("simple-pivot"));
    assert_eq!(series.total_buckets, 2);
    assert_eq!(
        series.series["prod"],
        vec![
            TimeBucket { timestamp: "t1".into(), count: 5 },
            TimeBucket { timestamp: "t2".into(), count: 7 },
        ]
    );
}

#[tokio::test]
async fn histogram_falls_back_to_next_variant() {
    let backend = ScriptedBackend::with_replies(vec![
        backend_error(400),
        Ok(rows(json!([{ "key": ["2025-01-01T00:00:00.000Z"], "values": [{ "value": 3 }] }]))),
    ]);
    let out = engine(backend.clone())
        .histogram(params(json!({ "query": "timeout", "timeRange": 3600 })))
        .await
        .unwrap();

    let calls = backend.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(search_type(&calls[1])["type"], "chart");
    assert_eq!(calls[0]["queries"][0]["query"]["query_string"], "\"timeout\"");

    let NormalizedResult::TimeHistogram(h) = out else {
        panic!("unexpected result: {out:?}");
    };
    assert_eq!(h.variant.as_deref(), Some("chart"));
    assert_eq!(h.buckets[0].count, 3);
}

#[tokio::test]
async fn histogram_reports_every_failed_variant() {
    let backend = ScriptedBackend::with_replies((0..4).map(|_| backend_error(500)).collect());
    let err = engine(backend.clone())
        .histogram(params(json!({})))
        .await
        .unwrap_err();

    assert_eq!(backend.calls().len(), 4);
    let GraylogMcpError::AllVariantsFailed { attempts } = err else {
        panic!("unexpected error: {err:?}");
    };
    let labels: Vec<_> = attempts.iter().map(|a| a.label.as_str()).collect();
    assert_eq!(
        labels,
        vec!["symbolic-interval-pivot", "chart", "simple-pivot", "resolved-duration-pivot"]
    );
}

#[tokio::test]
async fn validation_errors_never_reach_the_backend() {
    let backend = ScriptedBackend::with_replies(Vec::new());
    let engine = engine(backend.clone());

    let err = engine
        .aggregate_field(params(json!({ "field": "service", "metrics": ["sum"] })))
        .await
        .unwrap_err();
    assert!(matches!(err, GraylogMcpError::MissingValueField { ref metric } if metric == "sum"));

    let err = engine
        .histogram(params(json!({ "timeRange": "-5m" })))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GraylogMcpError::InvalidTimeRange { rule: TimeRangeRule::Negative, .. }
    ));

    let err = engine
        .get_surrounding_messages(params(json!({ "surroundingSeconds": 10 })))
        .await
        .unwrap_err();
    assert!(matches!(err, GraylogMcpError::MissingRequiredParameter(_)));

    let err = engine
        .field_time_aggregation(params(json!({ "timeRange": "1h" })))
        .await
        .unwrap_err();
    assert!(matches!(err, GraylogMcpError::MissingRequiredParameter(ref p) if p == "field"));

    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn aggregate_field_names_metrics() {
    let backend = ScriptedBackend::with_replies(vec![Ok(rows(json!([
        { "key": ["checkout"], "values": [{ "key": ["count()"], "value": 4 }, { "key": ["avg(latency)"], "value": 120.5 }] },
    ])))]);
    let out = engine(backend.clone())
        .aggregate_field(params(json!({
            "field": "service",
            "metrics": ["count", "avg"],
            "valueField": "latency",
            "filters": { "env": "prod" }
        })))
        .await
        .unwrap();

    let calls = backend.calls();
    assert_eq!(calls[0]["queries"][0]["query"]["query_string"], "* AND env:\"prod\"");
    assert_eq!(search_type(&calls[0])["series"][1], json!({ "type": "avg", "id": "avg", "field": "latency" }));

    let NormalizedResult::FieldAggregation(agg) = out else {
        panic!("unexpected result: {out:?}");
    };
    assert_eq!(agg.buckets[0].key, json!("checkout"));
    assert_eq!(agg.buckets[0].metrics["count()"], json!(4));
    assert_eq!(agg.buckets[0].metrics["avg(latency)"], json!(120.5));
}

#[tokio::test]
async fn list_field_values_defaults_to_one_hour_counts() {
    let backend = ScriptedBackend::with_replies(vec![Ok(rows(json!([])))]);
    engine(backend.clone())
        .list_field_values(params(json!({ "field": "level", "metrics": ["max"] })))
        .await
        .unwrap();

    let calls = backend.calls();
    assert_eq!(calls[0]["queries"][0]["timerange"]["range"], 3600);
    assert_eq!(search_type(&calls[0])["series"], json!([{ "type": "count", "id": "count" }]));
    assert_eq!(search_type(&calls[0])["row_groups"][0]["limit"], 20);
}

#[tokio::test]
async fn search_messages_pages_newest_first() {
    let backend = ScriptedBackend::with_replies(vec![Ok(messages(
        120,
        vec![json!({ "timestamp": "2025-01-01T00:00:00.000Z", "message": "boom", "internal": 1 })],
    ))]);
    let out = engine(backend.clone())
        .search_messages(params(json!({
            "query": "level:3",
            "page": 3,
            "pageSize": 25,
            "fields": "timestamp, message",
            "streamIds": ["s1", "s1", " s2 "]
        })))
        .await
        .unwrap();

    let calls = backend.calls();
    let st = search_type(&calls[0]);
    assert_eq!(st["limit"], 25);
    assert_eq!(st["offset"], 50);
    assert_eq!(st["sort"][0]["order"], "DESC");
    assert_eq!(calls[0]["queries"][0]["query"]["query_string"], "level:3");
    assert_eq!(calls[0]["queries"][0]["filter"]["filters"].as_array().unwrap().len(), 2);

    let NormalizedResult::Messages(list) = out else {
        panic!("unexpected result: {out:?}");
    };
    assert_eq!(list.total_results, 120);
    assert_eq!(list.page, Some(3));
    let keys: Vec<_> = list.messages[0].keys().cloned().collect();
    assert_eq!(keys, vec!["timestamp".to_string(), "message".to_string()]);
}

#[tokio::test]
async fn search_messages_rejects_page_zero() {
    let backend = ScriptedBackend::with_replies(Vec::new());
    let err = engine(backend.clone())
        .search_messages(params(json!({ "page": 0 })))
        .await
        .unwrap_err();
    assert!(matches!(err, GraylogMcpError::InvalidRequest(_)));
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn surrounding_messages_by_id_centre_on_the_target() {
    let backend = ScriptedBackend::with_replies(vec![
        Ok(messages(
            1,
            vec![json!({ "gl2_message_id": "abc", "timestamp": "2024-05-01T12:00:00.000Z" })],
        )),
        Ok(messages(0, Vec::new())),
    ]);
    engine(backend.clone())
        .get_surrounding_messages(params(json!({ "messageId": "abc", "surroundingSeconds": 5 })))
        .await
        .unwrap();

    let calls = backend.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0]["queries"][0]["query"]["query_string"], "gl2_message_id:abc");
    assert_eq!(search_type(&calls[0])["limit"], 1);
    assert_eq!(
        calls[1]["queries"][0]["timerange"],
        json!({
            "type": "absolute",
            "from": "2024-05-01T11:59:55.000Z",
            "to": "2024-05-01T12:00:05.000Z"
        })
    );
    assert_eq!(search_type(&calls[1])["sort"][0]["order"], "ASC");
    assert_eq!(search_type(&calls[1])["limit"], 50);
}

#[tokio::test]
async fn surrounding_messages_unknown_id() {
    let backend = ScriptedBackend::with_replies(vec![Ok(messages(0, Vec::new()))]);
    let err = engine(backend.clone())
        .get_surrounding_messages(params(json!({ "messageId": "missing" })))
        .await
        .unwrap_err();
    assert!(matches!(err, GraylogMcpError::MessageNotFound(ref id) if id == "missing"));
    assert_eq!(backend.calls().len(), 1);
}

#[tokio::test]
async fn default_stream_scopes_unscoped_requests() {
    let backend = ScriptedBackend::with_replies(vec![Ok(rows(json!([]))), Ok(rows(json!([])))]);
    let engine = engine(backend.clone()).with_default_stream(Some("s-default".into()));

    engine.histogram(params(json!({}))).await.unwrap();
    engine
        .histogram(params(json!({ "streamId": "s-explicit" })))
        .await
        .unwrap();

    let calls = backend.calls();
    assert_eq!(
        calls[0]["queries"][0]["filter"],
        json!({ "type": "or", "filters": [{ "type": "stream", "id": "s-default" }] })
    );
    assert_eq!(calls[1]["queries"][0]["filter"]["filters"][0]["id"], "s-explicit");
}

#[tokio::test]
async fn list_streams_parses_summaries() {
    let backend = ScriptedBackend::with_replies(Vec::new());
    let streams = engine(backend).list_streams().await.unwrap();
    assert_eq!(streams.len(), 2);
    assert_eq!(streams[1].title, "Payments");
    assert!(!streams[1].disabled);
    assert_eq!(streams[0].description.as_deref(), Some("default"));
}

#[tokio::test]
async fn surrounding_seconds_out_of_bounds() {
    let backend = ScriptedBackend::with_replies(Vec::new());
    let engine = engine(backend.clone());

    for (seconds, expected) in [
        (json!(-1), TimeRangeRule::Negative),
        (json!(0), TimeRangeRule::Zero),
        (json!(1e13), TimeRangeRule::TooLong),
        (json!(1e300), TimeRangeRule::TooLong),
    ] {
        let err = engine
            .get_surrounding_messages(params(json!({
                "messageTimestamp": "2024-05-01T12:00:00Z",
                "surroundingSeconds": seconds
            })))
            .await
            .unwrap_err();
        let GraylogMcpError::InvalidTimeRange { rule, .. } = err else {
            panic!("unexpected error: {err:?}");
        };
        assert_eq!(rule, expected);
    }
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn surrounding_timestamp_must_parse() {
    let backend = ScriptedBackend::with_replies(Vec::new());
    let err = engine(backend.clone())
        .get_surrounding_messages(params(json!({ "messageTimestamp": "around lunch" })))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GraylogMcpError::InvalidTimeRange { rule: TimeRangeRule::Malformed, .. }
    ));
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn surrounding_messages_by_timestamp_with_fractional_seconds() {
    let backend = ScriptedBackend::with_replies(vec![Ok(messages(0, Vec::new()))]);
    engine(backend.clone())
        .get_surrounding_messages(params(json!({
            "messageTimestamp": "2024-05-01T12:00:00Z",
            "surroundingSeconds": 1.5
        })))
        .await
        .unwrap();
    assert_eq!(
        backend.calls()[0]["queries"][0]["timerange"],
        json!({
            "type": "absolute",
            "from": "2024-05-01T11:59:58.500Z",
            "to": "2024-05-01T12:00:01.500Z"
        })
    );
}

#[tokio::test]
async fn field_time_reports_both_failed_variants() {
    let backend = ScriptedBackend::with_replies((0..2).map(|_| backend_error(400)).collect());
    let err = engine(backend.clone())
        .field_time_aggregation(params(json!({ "field": "env" })))
        .await
        .unwrap_err();

    assert_eq!(backend.calls().len(), 2);
    let GraylogMcpError::AllVariantsFailed { attempts } = err else {
        panic!("unexpected error: {err:?}");
    };
    let labels: Vec<_> = attempts.iter().map(|a| a.label.as_str()).collect();
    assert_eq!(labels, vec!["simple-pivot", "resolved-duration-pivot"]);
}

#[tokio::test]
async fn absolute_span_over_a_year_is_rejected() {
    let backend = ScriptedBackend::with_replies(Vec::new());
    let err = engine(backend.clone())
        .histogram(params(json!({ "from": "2023-01-01T00:00:00Z", "to": "2024-06-01T00:00:00Z" })))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GraylogMcpError::InvalidTimeRange { rule: TimeRangeRule::TooLong, .. }
    ));
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn blank_from_uses_relative_range() {
    let backend = ScriptedBackend::with_replies(vec![Ok(rows(json!([])))]);
    engine(backend.clone())
        .histogram(params(json!({ "from": "", "to": " ", "timeRange": "15m" })))
        .await
        .unwrap();
    assert_eq!(
        backend.calls()[0]["queries"][0]["timerange"],
        json!({ "type": "relative", "range": 900 })
    );
}

#[tokio::test]
async fn search_events_builds_filter_and_unwraps_hits() {
    let backend = ScriptedBackend::with_replies(vec![Ok(json!({
        "total_events": 3,
        "events": [{ "event": { "id": "e1", "message": "disk full", "alert": true } }]
    }))]);
    let out = engine(backend.clone())
        .search_events(params(json!({
            "query": " source:db ",
            "alerts": "only",
            "eventDefinitions": ["d1", " d1 ", "", "d2"],
            "perPage": 5000,
            "timeRange": "1d"
        })))
        .await
        .unwrap();

    let calls = backend.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0]["query"], "source:db");
    assert_eq!(calls[0]["filter"], json!({ "alerts": "only", "event_definitions": ["d1", "d2"] }));
    assert_eq!(calls[0]["per_page"], 1000);
    assert_eq!(calls[0]["timerange"], json!({ "type": "relative", "range": 86400 }));

    assert_eq!(out.total_events, 3);
    assert_eq!(out.page, Some(1));
    assert_eq!(out.events[0]["message"], "disk full");
}

#[tokio::test]
async fn search_events_validates_before_sending() {
    let backend = ScriptedBackend::with_replies(Vec::new());
    let engine = engine(backend.clone());

    let err = engine
        .search_events(params(json!({ "alerts": "sometimes" })))
        .await
        .unwrap_err();
    assert!(matches!(err, GraylogMcpError::InvalidRequest(_)));

    let err = engine.search_events(params(json!({ "page": 0 }))).await.unwrap_err();
    assert!(matches!(err, GraylogMcpError::InvalidRequest(_)));

    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn event_listings_forward_paging() {
    let backend = ScriptedBackend::with_replies(vec![
        Ok(json!({
            "pagination": { "total": 4 },
            "event_definitions": [{ "id": "d1", "title": "Disk full", "priority": 3, "config": { "type": "aggregation-v1" } }]
        })),
        Ok(json!({ "total": 1, "notifications": [{ "id": "n1", "title": "Pager" }] })),
    ]);
    let engine = engine(backend.clone());

    let defs = engine
        .list_event_definitions(params(json!({ "page": 2, "perPage": 1, "query": "disk" })))
        .await
        .unwrap();
    assert_eq!(defs.total, 4);
    assert_eq!(defs.items[0].kind.as_deref(), Some("aggregation-v1"));
    assert_eq!(defs.items[0].priority, Some(3));

    let notes = engine
        .list_event_notifications(params(json!({ "query": "ignored" })))
        .await
        .unwrap();
    assert_eq!(notes.items[0].title, "Pager");

    let paging = backend.paging.lock().unwrap().clone();
    assert_eq!(paging[0].query.as_deref(), Some("disk"));
    assert_eq!(paging[0].per_page, Some(1));
    assert_eq!(paging[1].query, None);

    let err = engine
        .list_event_definitions(params(json!({ "page": 0 })))
        .await
        .unwrap_err();
    assert!(matches!(err, GraylogMcpError::InvalidRequest(_)));
    assert_eq!(backend.paging.lock().unwrap().len(), 2);
}
