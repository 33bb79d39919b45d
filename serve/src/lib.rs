//! WebSocket + HTTP server for the Ensemble runtime (axum).
//!
//! Serves the session API under `/api/chats/...`, perf metrics under
//! `/metrics/perf/...`, and the per-session event stream at
//! `/ws/{workflow}/{tenant}/{chat_id}/{user}`.
//!
//! **Public API**: [`run_serve`], [`run_serve_on_listener`], [`AppState`].

pub mod app;
mod connection;
mod http;
mod resume;
mod transport;

use std::sync::Arc;

use config::ServerConfig;
use ensemble::{ChatOpenAI, SqliteSessionStore, ToolSet, TurnEngine, WorkflowCache};
use tokio::net::TcpListener;
use tracing::info;

pub use app::{AppState, SessionEntry};
pub use transport::Transport;

/// Builds the production state: SQLite persistence, workflow discovery from
/// the configured root, the built-in turn engine, and an OpenAI-compatible
/// LLM client (`OPENAI_MODEL`, default `gpt-4o-mini`).
pub fn production_state(
    config: ServerConfig,
    tool_set: Arc<ToolSet>,
) -> Result<Arc<AppState>, Box<dyn std::error::Error + Send + Sync>> {
    let store = Arc::new(SqliteSessionStore::new(&config.store_root)?);
    let workflows = Arc::new(WorkflowCache::discover(&config.workflow_root));
    info!(workflows = ?workflows.names(), "workflow discovery complete");
    let model =
        std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
    let state = AppState::new(
        config,
        store,
        workflows,
        Arc::new(TurnEngine::new()),
        Arc::new(ChatOpenAI::new(model)),
        tool_set,
    );
    Ok(state)
}

/// Runs the server on an existing listener. Tests bind `127.0.0.1:0` and pass
/// the listener together with a state built around in-memory doubles.
pub async fn run_serve_on_listener(
    listener: TcpListener,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = listener.local_addr()?;
    info!("listening on http://{addr} (ws at /ws/...)");
    axum::serve(listener, app::router(state)).await?;
    Ok(())
}

/// Binds the configured address and serves until the process exits.
pub async fn run_serve(
    config: ServerConfig,
    tool_set: Arc<ToolSet>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(&config.bind_addr).await?;
    let state = production_state(config, tool_set)?;
    run_serve_on_listener(listener, state).await
}
