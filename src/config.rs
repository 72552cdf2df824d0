use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{GraylogMcpError, Result};
use crate::fields::FieldSelection;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    #[default]
    Stdio,
    Http,
    Both,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub mode: ServerMode,
    #[serde(default)]
    pub http_addr: Option<String>,
    #[serde(default)]
    pub http_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConnectionConfig {
    #[serde(alias = "baseUrl")]
    pub base_url: String,
    #[serde(alias = "apiToken")]
    pub api_token: String,
    #[serde(default, alias = "defaultStream")]
    pub default_stream: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub default_fields: FieldSelection,
    pub default_page_size: usize,
    pub default_surrounding_seconds: f64,
    pub default_field_limit: usize,
    pub request_timeout_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_fields: FieldSelection::default(),
            default_page_size: 50,
            default_surrounding_seconds: 5.0,
            default_field_limit: 20,
            request_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionConfig>,
    #[serde(default)]
    pub default_connection: Option<String>,
    #[serde(default)]
    pub search: SearchConfig,
}

/// Everything one request needs to reach a backend, resolved up front.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub name: String,
    pub connection: ConnectionConfig,
    pub search: SearchConfig,
}

impl Config {
    /// 按扩展名解析 YAML 或 JSON 配置文件。
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| GraylogMcpError::ConfigError(format!("read {}: {e}", path.display())))?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let config: Config = if is_json {
            serde_json::from_str(&text)
                .map_err(|e| GraylogMcpError::ConfigError(format!("parse {}: {e}", path.display())))?
        } else {
            serde_yaml::from_str(&text)
                .map_err(|e| GraylogMcpError::ConfigError(format!("parse {}: {e}", path.display())))?
        };
        config.validate()?;
        Ok(config)
    }

    /// `$HOME/.graylog-mcp/config.json`
    pub fn default_path() -> Option<PathBuf> {
        std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".graylog-mcp").join("config.json"))
    }

    pub fn validate(&self) -> Result<()> {
        for (name, conn) in &self.connections {
            if conn.base_url.trim().is_empty() {
                return Err(GraylogMcpError::ConfigError(format!("connection '{name}' has empty base_url")));
            }
        }
        if let Some(name) = &self.default_connection {
            if !self.connections.contains_key(name) {
                return Err(GraylogMcpError::ConfigError(format!(
                    "default_connection '{name}' is not a configured connection"
                )));
            }
        }
        if self.search.default_page_size == 0 {
            return Err(GraylogMcpError::ConfigError("search.default_page_size must be >= 1".into()));
        }
        Ok(())
    }

    pub fn connection_context(&self, name: &str) -> Result<ConnectionContext> {
        let connection = self
            .connections
            .get(name)
            .cloned()
            .ok_or_else(|| GraylogMcpError::UnknownConnection(name.to_string()))?;
        Ok(ConnectionContext {
            name: name.to_string(),
            connection,
            search: self.search.clone(),
        })
    }
}
