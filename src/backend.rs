//! Graylog REST client.
//!
//! The engine only talks to [`SearchBackend`]; [`HttpBackend`] is the
//! production implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use tracing::debug;

use crate::config::ConnectionConfig;
use crate::error::{GraylogMcpError, Result};
use crate::model::EventListParams;

const SEARCH_PATH: &str = "/api/views/search/sync";
const STREAMS_PATH: &str = "/api/streams";
const EVENTS_SEARCH_PATH: &str = "/api/events/search";
const EVENT_DEFINITIONS_PATH: &str = "/api/events/definitions";
const EVENT_NOTIFICATIONS_PATH: &str = "/api/events/notifications";
const REQUESTED_BY: &str = "graylog-mcp";

#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Runs one search payload. A non-success reply is a `Backend` error.
    async fn execute(&self, payload: &Value) -> Result<Value>;

    async fn list_streams(&self) -> Result<Value>;

    async fn search_events(&self, payload: &Value) -> Result<Value>;

    async fn list_event_definitions(&self, paging: &EventListParams) -> Result<Value>;

    async fn list_event_notifications(&self, paging: &EventListParams) -> Result<Value>;
}

pub struct HttpBackend {
    client: Client,
    base_url: String,
    api_token: String,
}

impl HttpBackend {
    pub fn new(connection: &ConnectionConfig, timeout_ms: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| GraylogMcpError::ConfigError(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: connection.base_url.trim_end_matches('/').to_string(),
            api_token: connection.api_token.clone(),
        })
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .basic_auth(&self.api_token, Some("token"))
            .header("Accept", "application/json")
            .header("X-Requested-By", REQUESTED_BY)
    }

    async fn post_json(&self, path: &str, payload: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "posting payload");
        let response = self
            .authorized(self.client.post(&url))
            .json(payload)
            .send()
            .await?;
        read_json(response).await
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.authorized(self.client.get(&url)).query(query).send().await?;
        read_json(response).await
    }
}

#[async_trait]
impl SearchBackend for HttpBackend {
    async fn execute(&self, payload: &Value) -> Result<Value> {
        self.post_json(SEARCH_PATH, payload).await
    }

    async fn list_streams(&self) -> Result<Value> {
        self.get_json(STREAMS_PATH, &[]).await
    }

    async fn search_events(&self, payload: &Value) -> Result<Value> {
        self.post_json(EVENTS_SEARCH_PATH, payload).await
    }

    async fn list_event_definitions(&self, paging: &EventListParams) -> Result<Value> {
        self.get_json(EVENT_DEFINITIONS_PATH, &paging_query(paging)).await
    }

    async fn list_event_notifications(&self, paging: &EventListParams) -> Result<Value> {
        self.get_json(EVENT_NOTIFICATIONS_PATH, &paging_query(paging)).await
    }
}

/// `page`, `per_page` and `query` parameters, each only when set.
fn paging_query(paging: &EventListParams) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    if let Some(page) = paging.page.filter(|p| *p > 0) {
        query.push(("page", page.to_string()));
    }
    if let Some(per_page) = paging.per_page.filter(|p| *p > 0) {
        query.push(("per_page", per_page.to_string()));
    }
    if let Some(q) = paging.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        query.push(("query", q.to_string()));
    }
    query
}

async fn read_json(response: Response) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GraylogMcpError::Backend {
            status: Some(status.as_u16()),
            body,
        });
    }
    Ok(response.json::<Value>().await?)
}
