//! Server-wide state shared by the stdio and HTTP transports.
//!
//! Holds the config and the active-connection selector. Each tool call
//! resolves a [`ConnectionContext`] from these once and builds a fresh
//! [`SearchEngine`] for it.

use std::sync::{Arc, RwLock};

use tracing::info;

use crate::config::{Config, ConnectionContext};
use crate::error::{GraylogMcpError, Result};
use crate::search::SearchEngine;

pub type EngineFactory = Arc<dyn Fn(&ConnectionContext) -> Result<SearchEngine> + Send + Sync>;

pub struct ServerState {
    config: Arc<RwLock<Config>>,
    active: RwLock<Option<String>>,
    engines: EngineFactory,
}

impl ServerState {
    pub fn new(config: Arc<RwLock<Config>>) -> Self {
        Self::with_engine_factory(config, Arc::new(SearchEngine::for_connection))
    }

    pub fn with_engine_factory(config: Arc<RwLock<Config>>, engines: EngineFactory) -> Self {
        let active = config.read().ok().and_then(|c| c.default_connection.clone());
        Self {
            config,
            active: RwLock::new(active),
            engines,
        }
    }

    pub fn active_connection(&self) -> Option<String> {
        self.active.read().ok().and_then(|a| a.clone())
    }

    /// Configured connection names, sorted.
    pub fn connection_names(&self) -> Vec<String> {
        self.config
            .read()
            .map(|c| c.connections.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn use_connection(&self, name: &str) -> Result<()> {
        let known = self
            .config
            .read()
            .map(|c| c.connections.contains_key(name))
            .unwrap_or(false);
        if !known {
            return Err(GraylogMcpError::UnknownConnection(name.to_string()));
        }
        let mut active = self
            .active
            .write()
            .map_err(|_| GraylogMcpError::ConfigError("connection selector poisoned".into()))?;
        *active = Some(name.to_string());
        info!(connection = name, "active connection changed");
        Ok(())
    }

    pub fn connection_context(&self) -> Result<ConnectionContext> {
        let name = self.active_connection().ok_or(GraylogMcpError::NoActiveConnection)?;
        let config = self
            .config
            .read()
            .map_err(|_| GraylogMcpError::ConfigError("config lock poisoned".into()))?;
        config.connection_context(&name)
    }

    /// Engine bound to the active connection for the duration of one request.
    pub fn engine(&self) -> Result<SearchEngine> {
        let ctx = self.connection_context()?;
        (self.engines)(&ctx)
    }
}
