//! Tool registration and dispatch.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{GraylogMcpError, Result};
use crate::state::ServerState;

pub struct ToolRegistry;

impl ToolRegistry {
    pub fn list_tools() -> Vec<Value> {
        vec![
            json!({
                "name": "list_connections",
                "description": "List the configured Graylog connections and which one is active.",
                "inputSchema": { "type": "object", "properties": {} }
            }),
            json!({
                "name": "use_connection",
                "description": "Select the Graylog connection used by every other tool.",
                "inputSchema": {
                    "type": "object",
                    "required": ["name"],
                    "properties": { "name": { "type": "string", "description": "Connection name from the config file" } }
                }
            }),
            json!({
                "name": "fetch_graylog_messages",
                "description": "Search messages in the active Graylog connection, newest first, with paging.",
                "inputSchema": with_common(json!({
                    "fields": { "type": "string", "description": "Comma-separated fields to return, or '*' for all" },
                    "page": { "type": "integer", "description": "Page number, starting at 1. Default: 1" },
                    "pageSize": { "type": "integer", "description": "Messages per page. Default: 50" }
                }))
            }),
            json!({
                "name": "get_surrounding_messages",
                "description": "Messages around a target message, identified by messageId (preferred) or messageTimestamp.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "messageId": { "type": "string", "description": "gl2_message_id of the target message" },
                        "messageTimestamp": { "type": "string", "description": "ISO timestamp of the target message" },
                        "surroundingSeconds": { "type": "number", "description": "Seconds either side of the target. Default: 5" },
                        "query": { "type": "string" },
                        "filters": { "type": "object" },
                        "exactMatch": { "type": "boolean" },
                        "limit": { "type": "integer", "description": "Default: 50" },
                        "fields": { "type": "string" },
                        "streamId": { "type": "string" }
                    }
                }
            }),
            json!({
                "name": "list_streams",
                "description": "List the streams of the active Graylog connection.",
                "inputSchema": { "type": "object", "properties": {} }
            }),
            json!({
                "name": "list_field_values",
                "description": "Distinct values of a field with message counts, sorted by count. Default window: 1 hour.",
                "inputSchema": with_common_required(json!({
                    "field": { "type": "string" },
                    "limit": { "type": "integer", "description": "Default: 20" }
                }), &["field"])
            }),
            json!({
                "name": "aggregate_field",
                "description": "Group messages by a field and compute count, sum, avg, min or max per value.",
                "inputSchema": with_common_required(json!({
                    "field": { "type": "string" },
                    "limit": { "type": "integer" },
                    "metrics": { "type": "array", "items": { "type": "string", "enum": ["count", "sum", "avg", "min", "max"] } },
                    "valueField": { "type": "string", "description": "Numeric field for sum/avg/min/max" }
                }), &["field"])
            }),
            json!({
                "name": "get_log_histogram",
                "description": "Message counts per time bucket. interval like '1m', '1h' or 'auto'.",
                "inputSchema": with_common(json!({
                    "interval": { "type": "string", "description": "Default: auto" }
                }))
            }),
            json!({
                "name": "field_time_aggregation",
                "description": "Message counts per time bucket for each value of a field.",
                "inputSchema": with_common_required(json!({
                    "field": { "type": "string" },
                    "interval": { "type": "string", "description": "Default: auto" },
                    "limit": { "type": "integer", "description": "Maximum field values. Default: 10" }
                }), &["field"])
            }),
            json!({
                "name": "search_events",
                "description": "Search events and alerts raised by event definitions, newest first.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "query": { "type": "string", "description": "Query over event fields" },
                        "alerts": { "type": "string", "enum": ["include", "exclude", "only"], "description": "Default: include" },
                        "eventDefinitions": { "type": "array", "items": { "type": "string" }, "description": "Event definition ids" },
                        "timeRange": { "type": ["string", "number"], "description": "Relative range like '15m', '2d', or seconds" },
                        "from": { "type": "string" },
                        "to": { "type": "string" },
                        "page": { "type": "integer", "description": "Default: 1" },
                        "perPage": { "type": "integer", "description": "Default: 50" }
                    }
                }
            }),
            json!({
                "name": "list_event_definitions",
                "description": "List the event definitions of the active Graylog connection.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "query": { "type": "string", "description": "Title filter" },
                        "page": { "type": "integer" },
                        "perPage": { "type": "integer" }
                    }
                }
            }),
            json!({
                "name": "list_event_notifications",
                "description": "List the event notifications of the active Graylog connection.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "page": { "type": "integer" },
                        "perPage": { "type": "integer" }
                    }
                }
            }),
        ]
    }

    pub async fn call(name: &str, arguments: Option<Value>, state: &ServerState) -> Result<Value> {
        let args = match arguments {
            Some(Value::Null) | None => Value::Object(serde_json::Map::new()),
            Some(v) => v,
        };

        match name {
            "list_connections" => {
                let active = state.active_connection();
                let connections: Vec<Value> = state
                    .connection_names()
                    .into_iter()
                    .map(|n| json!({ "name": n, "active": active.as_deref() == Some(n.as_str()) }))
                    .collect();
                Ok(json!({ "connections": connections, "active": active }))
            }
            "use_connection" => {
                let p: UseConnectionParams = parse_args(args)?;
                state.use_connection(p.name.trim())?;
                Ok(json!({ "active": p.name.trim() }))
            }
            "fetch_graylog_messages" => to_value(state.engine()?.search_messages(parse_args(args)?).await?),
            "get_surrounding_messages" => {
                to_value(state.engine()?.get_surrounding_messages(parse_args(args)?).await?)
            }
            "list_streams" => Ok(json!({ "streams": state.engine()?.list_streams().await? })),
            "list_field_values" => to_value(state.engine()?.list_field_values(parse_args(args)?).await?),
            "aggregate_field" => to_value(state.engine()?.aggregate_field(parse_args(args)?).await?),
            "get_log_histogram" => to_value(state.engine()?.histogram(parse_args(args)?).await?),
            "field_time_aggregation" => {
                to_value(state.engine()?.field_time_aggregation(parse_args(args)?).await?)
            }
            "search_events" => to_value(state.engine()?.search_events(parse_args(args)?).await?),
            "list_event_definitions" => {
                to_value(state.engine()?.list_event_definitions(parse_args(args)?).await?)
            }
            "list_event_notifications" => {
                to_value(state.engine()?.list_event_notifications(parse_args(args)?).await?)
            }
            _ => Err(GraylogMcpError::InvalidRequest(format!("unknown tool: {name}"))),
        }
    }
}

/// MCP `tools/call` result. Failures become `isError` results, never protocol errors.
pub fn tool_result(outcome: Result<Value>) -> Value {
    match outcome {
        Ok(value) => {
            let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
            json!({ "content": [{ "type": "text", "text": text }], "isError": false })
        }
        Err(e) => json!({ "content": [{ "type": "text", "text": e.to_string() }], "isError": true }),
    }
}

#[derive(Debug, Deserialize)]
struct UseConnectionParams {
    name: String,
}

fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T> {
    serde_json::from_value(args).map_err(|e| GraylogMcpError::InvalidRequest(format!("invalid arguments: {e}")))
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

fn with_common(extra: Value) -> Value {
    with_common_required(extra, &[])
}

/// Query, filter, stream and time-range properties shared by the search tools.
fn with_common_required(extra: Value, required: &[&str]) -> Value {
    let mut properties = json!({
        "query": { "type": "string", "description": "Free-text or Graylog query syntax" },
        "filters": { "type": "object", "description": "Field equality filters, e.g. {\"env\": \"prod\", \"level\": 3}" },
        "exactMatch": { "type": "boolean", "description": "Quote plain-text queries for exact matching. Default: true" },
        "timeRange": { "type": ["string", "number"], "description": "Relative range like '15m', '2d', or seconds" },
        "from": { "type": "string", "description": "Absolute start (ISO-8601 or epoch)" },
        "to": { "type": "string", "description": "Absolute end. Default: now" },
        "streamId": { "type": "string" },
        "streamIds": { "type": "array", "items": { "type": "string" } }
    });
    if let (Some(props), Some(extra)) = (properties.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            props.insert(k.clone(), v.clone());
        }
    }
    let mut schema = json!({ "type": "object", "properties": properties });
    if !required.is_empty() {
        schema["required"] = json!(required);
    }
    schema
}
