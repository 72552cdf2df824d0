use std::env;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{anyhow, Context};
use tokio::time::sleep;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use graylog_search_mcp::config::{Config, ServerMode};
use graylog_search_mcp::http::serve_http;
use graylog_search_mcp::mcp::run_stdio;
use graylog_search_mcp::state::ServerState;

const RELOAD_POLL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout 归 JSON-RPC 使用，日志只写 stderr
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cfg_path = match env::args().nth(1) {
        Some(p) => PathBuf::from(p),
        None => Config::default_path().ok_or_else(|| anyhow!("no config path given and HOME is not set"))?,
    };
    info!(path = %cfg_path.display(), "loading config");

    let config = Config::load_from_path(&cfg_path)
        .with_context(|| format!("failed to load config from {}", cfg_path.display()))?;
    info!(
        connections = config.connections.len(),
        default = ?config.default_connection,
        "config loaded"
    );

    let mode = config.server.mode;
    let server = config.server.clone();
    let config = Arc::new(RwLock::new(config));
    spawn_config_reload(cfg_path, config.clone());

    let state = Arc::new(ServerState::new(config));

    match mode {
        ServerMode::Stdio => run_stdio(state).await?,
        ServerMode::Http => serve_http(state, &server).await?,
        ServerMode::Both => {
            let http_state = state.clone();
            let http_task = tokio::spawn(async move { serve_http(http_state, &server).await });
            let stdio_task = tokio::spawn(async move { run_stdio(state).await });
            http_task.await.context("http task panicked")??;
            stdio_task.await.context("stdio task panicked")??;
        }
    }

    Ok(())
}

/// Polls the config file and swaps in new connections when it changes.
fn spawn_config_reload(path: PathBuf, config: Arc<RwLock<Config>>) {
    tokio::spawn(async move {
        let mut last_mtime = modified(&path);
        loop {
            sleep(RELOAD_POLL).await;
            let mtime = modified(&path);
            if mtime.is_none() || mtime == last_mtime {
                continue;
            }
            info!(path = %path.display(), "config changed, reloading");
            match Config::load_from_path(&path) {
                Ok(new_cfg) => match config.write() {
                    Ok(mut w) => {
                        *w = new_cfg;
                        last_mtime = mtime;
                        info!("config reloaded");
                    }
                    Err(_) => warn!("config lock poisoned, reload skipped"),
                },
                Err(e) => warn!(error = %e, "failed to reload config"),
            }
        }
    });
}

fn modified(path: &Path) -> Option<std::time::SystemTime> {
    std::fs::metadata(path).ok().and_then(|m| m.modified().ok())
}
