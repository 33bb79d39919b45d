//! Application state and router.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use config::ServerConfig;
use dashmap::DashMap;
use ensemble::{
    Coordinator, ConversationEngine, EventDispatcher, LlmClient, Orchestrator, RuntimeOptions,
    SessionStore, ToolSet, WorkflowCache,
};
use tokio_util::sync::CancellationToken;

use crate::connection;
use crate::http;
use crate::transport::Transport;

/// One live (or finished-but-addressable) session: the dispatcher handle used
/// by inbound routing and the cancel token ending the run.
pub struct SessionEntry {
    pub tenant: String,
    pub events: EventDispatcher,
    pub cancel: CancellationToken,
}

pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<dyn SessionStore>,
    pub workflows: Arc<WorkflowCache>,
    pub transport: Arc<Transport>,
    pub coordinator: Arc<Coordinator>,
    pub orchestrator: Arc<Orchestrator>,
    pub sessions: DashMap<String, SessionEntry>,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn SessionStore>,
        workflows: Arc<WorkflowCache>,
        engine: Arc<dyn ConversationEngine>,
        llm: Arc<dyn LlmClient>,
        tool_set: Arc<ToolSet>,
    ) -> Arc<Self> {
        let transport = Arc::new(Transport::new(
            config.preconnect_buffer,
            config.outbound_high_water,
        ));
        let coordinator = Arc::new(Coordinator::new());
        let options = RuntimeOptions {
            input_deadline: config.input_deadline,
            ui_tool_deadline: config.ui_tool_deadline,
            llm_timeout: config.llm_timeout,
            ..RuntimeOptions::default()
        };
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&store),
            transport.clone(),
            Arc::clone(&coordinator),
            engine,
            llm,
            tool_set,
            options,
        ));
        Arc::new(Self {
            config,
            store,
            workflows,
            transport,
            coordinator,
            orchestrator,
            sessions: DashMap::new(),
        })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(http::health))
        .route("/api/chats/:tenant/:workflow/start", post(http::start_chat))
        .route("/api/chats/:tenant/:workflow", get(http::list_chats))
        .route(
            "/api/chats/exists/:tenant/:workflow/:chat_id",
            get(http::chat_exists),
        )
        .route(
            "/api/chats/meta/:tenant/:workflow/:chat_id",
            get(http::chat_meta),
        )
        .route("/metrics/perf/aggregate", get(http::perf_aggregate))
        .route("/metrics/perf/chats", get(http::perf_chats))
        .route("/metrics/perf/chats/:chat_id", get(http::perf_chat))
        .route(
            "/ws/:workflow/:tenant/:chat_id/:user",
            get(connection::ws_handler),
        )
        .with_state(state)
}
