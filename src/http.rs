use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::{GraylogMcpError, Result};
use crate::state::ServerState;
use crate::tools::{tool_result, ToolRegistry};

const DEFAULT_ADDR: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;

type Sessions = Arc<RwLock<HashMap<String, mpsc::UnboundedSender<Event>>>>;

#[derive(Clone)]
pub struct AppState {
    pub state: Arc<ServerState>,
    pub sessions: Sessions,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> axum::response::Response {
        (StatusCode::BAD_REQUEST, Json(self)).into_response()
    }
}

async fn list_tools_handler() -> impl IntoResponse {
    Json(json!({ "tools": ToolRegistry::list_tools() }))
}

/// 直接调用工具；工具自身的失败仍以 200 + isError 返回。
async fn call_tool_handler(
    State(app): State<AppState>,
    Path(name): Path<String>,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> impl IntoResponse {
    let args = match payload {
        Ok(Json(args)) => args,
        Err(e) => {
            return ErrorResponse {
                error: format!("invalid request body: {e}"),
            }
            .into_response()
        }
    };
    let outcome = ToolRegistry::call(&name, Some(args), &app.state).await;
    (StatusCode::OK, Json(tool_result(outcome))).into_response()
}

async fn sse_handler(State(app): State<AppState>) -> Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let session_id = format!("{}", chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0));

    let endpoint_url = format!("/message?session_id={session_id}");
    let _ = tx.send(Event::default().event("endpoint").data(endpoint_url));

    match app.sessions.write() {
        Ok(mut sessions) => {
            sessions.insert(session_id.clone(), tx);
            debug!(session = %session_id, "sse session opened");
        }
        Err(_) => warn!("session table poisoned, sse session not registered"),
    }

    let guard = SessionGuard {
        sessions: app.sessions.clone(),
        session_id,
    };
    let stream = UnboundedReceiverStream::new(rx).map(move |event| {
        let _session = &guard;
        Ok::<_, axum::Error>(event)
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Removes its session from the table when the SSE stream is dropped.
struct SessionGuard {
    sessions: Sessions,
    session_id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.remove(&self.session_id);
        }
        debug!(session = %self.session_id, "sse session closed");
    }
}

#[derive(Deserialize)]
struct MessageQuery {
    session_id: String,
}

async fn message_handler(
    State(app): State<AppState>,
    Query(q): Query<MessageQuery>,
    Json(req): Json<crate::mcp::RpcRequest>,
) -> impl IntoResponse {
    let sender = app
        .sessions
        .read()
        .ok()
        .and_then(|sessions| sessions.get(&q.session_id).cloned());

    let Some(sender) = sender else {
        return StatusCode::NOT_FOUND;
    };

    let state = app.state.clone();
    let sessions = app.sessions.clone();
    let session_id = q.session_id;
    tokio::spawn(async move {
        let Some(resp) = crate::mcp::process_request(state, req).await else {
            return;
        };
        if let Ok(json_str) = serde_json::to_string(&resp) {
            if sender.send(Event::default().event("message").data(json_str)).is_err() {
                if let Ok(mut s) = sessions.write() {
                    s.remove(&session_id);
                }
                debug!(session = %session_id, "sse session closed");
            }
        }
    });
    StatusCode::ACCEPTED
}

pub fn build_router(state: Arc<ServerState>) -> Router {
    let app = AppState {
        state,
        sessions: Arc::new(RwLock::new(HashMap::new())),
    };
    Router::new()
        .route("/tools", get(list_tools_handler))
        .route("/tools/:name", post(call_tool_handler))
        .route("/sse", get(sse_handler))
        .route("/message", post(message_handler))
        .with_state(app)
}

pub async fn serve_http(state: Arc<ServerState>, server: &ServerConfig) -> Result<()> {
    let router = build_router(state);

    let addr = format!(
        "{}:{}",
        server.http_addr.as_deref().unwrap_or(DEFAULT_ADDR),
        server.http_port.unwrap_or(DEFAULT_PORT)
    );
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| GraylogMcpError::ConfigError(format!("bind {addr} failed: {e}")))?;
    info!(%addr, "HTTP server listening");
    axum::serve(listener, router).await.map_err(|e| e.into())
}
