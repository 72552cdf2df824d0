use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};

use crate::error::Result;
use crate::state::ServerState;
use crate::tools::{tool_result, ToolRegistry};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

pub async fn run_stdio(state: Arc<ServerState>) -> Result<()> {
    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();
    info!("stdio transport ready");

    while let Some(line) = reader.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let req: RpcRequest = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                let resp = error_response(Value::Null, -32700, format!("parse error: {e}"));
                write_response(&mut stdout, resp).await?;
                continue;
            }
        };

        if let Some(resp) = process_request(state.clone(), req).await {
            write_response(&mut stdout, resp).await?;
        }
    }

    Ok(())
}

/// Handles one JSON-RPC message. Notifications (no id) get no response.
pub async fn process_request(state: Arc<ServerState>, req: RpcRequest) -> Option<RpcResponse> {
    debug!(method = %req.method, "rpc request");
    let resp = match req.method.as_str() {
        "initialize" => handle_initialize(&req),
        "notifications/initialized" | "notifications/cancelled" => {
            if req.id.is_null() {
                return None;
            }
            ok_response(req.id, Value::Bool(true))
        }
        "ping" => ok_response(req.id, serde_json::json!({})),
        "tools/list" | "list_tools" => {
            ok_response(req.id, serde_json::json!({ "tools": ToolRegistry::list_tools() }))
        }
        "tools/call" => handle_call_tool(&state, req).await,
        _ => error_response(req.id, -32601, format!("method not found: {}", req.method)),
    };
    Some(resp)
}

fn handle_initialize(req: &RpcRequest) -> RpcResponse {
    ok_response(
        req.id.clone(),
        serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION")
            }
        }),
    )
}

async fn handle_call_tool(state: &ServerState, req: RpcRequest) -> RpcResponse {
    let params: CallToolParams = match serde_json::from_value(req.params) {
        Ok(p) => p,
        Err(e) => return error_response(req.id, -32602, format!("invalid params: {e}")),
    };
    info!(tool = %params.name, "tool call");
    let outcome = ToolRegistry::call(&params.name, params.arguments, state).await;
    ok_response(req.id, tool_result(outcome))
}

async fn write_response(stdout: &mut tokio::io::Stdout, resp: RpcResponse) -> Result<()> {
    let line = serde_json::to_string(&resp).unwrap_or_else(|_| "{}".to_string());
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}

fn ok_response(id: Value, result: Value) -> RpcResponse {
    RpcResponse {
        jsonrpc: "2.0",
        id,
        result: Some(result),
        error: None,
    }
}

fn error_response(id: Value, code: i32, message: String) -> RpcResponse {
    RpcResponse {
        jsonrpc: "2.0",
        id,
        result: None,
        error: Some(RpcError { code, message }),
    }
}
