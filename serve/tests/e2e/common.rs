//! Shared helpers for e2e tests. Received frames are logged with
//! `[e2e] received: ...`; run with `--nocapture` to see them.

use std::sync::Arc;
use std::time::Duration;

use config::ServerConfig;
use ensemble::{
    ConversationEngine, LlmClient, MemorySessionStore, SessionStart, ToolSet, WorkflowCache,
    WorkflowConfig,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use serve::{AppState, SessionEntry};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Builds a state around in-memory doubles: memory store, the given engine
/// and LLM, and a workflow cache holding exactly `workflow`.
pub fn test_state(
    workflow: WorkflowConfig,
    engine: Arc<dyn ConversationEngine>,
    llm: Arc<dyn LlmClient>,
    config: ServerConfig,
) -> Arc<AppState> {
    let mut workflows = WorkflowCache::empty();
    workflows.insert(workflow);
    AppState::new(
        config,
        Arc::new(MemorySessionStore::new()),
        Arc::new(workflows),
        engine,
        llm,
        Arc::new(ToolSet::new()),
    )
}

/// Binds a random port and spawns the server. Returns the bound address.
pub async fn spawn_server(
    state: Arc<AppState>,
) -> (
    std::net::SocketAddr,
    tokio::task::JoinHandle<Result<(), Box<dyn std::error::Error + Send + Sync>>>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(serve::run_serve_on_listener(listener, state));
    (addr, handle)
}

/// Starts a session the way the HTTP handler does, registering the dispatcher
/// for inbound routing.
pub async fn start_session(
    state: &Arc<AppState>,
    tenant: &str,
    workflow: &str,
    chat_id: &str,
) {
    let config = state.workflows.get(workflow).unwrap();
    let handle = state
        .orchestrator
        .start_session(SessionStart {
            tenant_id: tenant.to_string(),
            user_id: "tester".to_string(),
            workflow: config,
            chat_id: Some(chat_id.to_string()),
        })
        .await
        .unwrap();
    state.sessions.insert(
        handle.chat_id.clone(),
        SessionEntry {
            tenant: tenant.to_string(),
            events: handle.events.clone(),
            cancel: handle.cancel.clone(),
        },
    );
}

pub async fn connect_ws(
    addr: std::net::SocketAddr,
    workflow: &str,
    tenant: &str,
    chat_id: &str,
) -> WsStream {
    let url = format!("ws://{addr}/ws/{workflow}/{tenant}/{chat_id}/tester");
    let (stream, _) = connect_async(url).await.unwrap();
    stream
}

/// Receives the next text frame as JSON, skipping pings.
pub async fn recv_frame(ws: &mut WsStream) -> Value {
    let deadline = Duration::from_secs(10);
    loop {
        let msg = timeout(deadline, ws.next())
            .await
            .expect("timeout waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            eprintln!("[e2e] received: {text}");
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Receives frames until one of the given type arrives, returning it and the
/// frames skipped on the way.
pub async fn recv_until(ws: &mut WsStream, wanted: &str) -> (Value, Vec<Value>) {
    let mut skipped = Vec::new();
    loop {
        let frame = recv_frame(ws).await;
        if frame["type"] == wanted {
            return (frame, skipped);
        }
        skipped.push(frame);
    }
}

pub async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

/// A single-agent workflow that answers once and terminates.
pub fn single_agent_workflow(name: &str) -> WorkflowConfig {
    WorkflowConfig {
        name: name.to_string(),
        agents: serde_json::from_value(serde_json::json!([
            {"name": "solo", "system_message": "answer briefly"}
        ]))
        .unwrap(),
        tools: vec![],
        handoffs: serde_json::from_value(serde_json::json!([
            {"source_agent": "solo", "target_agent": "TERMINATE", "handoff_type": "after_work"}
        ]))
        .unwrap(),
        context_variables: vec![],
        structured_outputs: vec![],
        orchestrator: serde_json::from_value(serde_json::json!({
            "startup_mode": "AgentDriven",
            "initial_message": "go",
            "visual_agents": ["solo"]
        }))
        .unwrap(),
    }
}
