//! Two tenants running the same workflow concurrently: each connection sees
//! only its own session's events, and store queries stay tenant-scoped.

use std::sync::Arc;

use config::ServerConfig;
use ensemble::{MockLlm, SessionStore, TurnEngine};

use super::common::{
    connect_ws, recv_until, single_agent_workflow, spawn_server, start_session, test_state,
};

#[tokio::test]
async fn sessions_of_different_tenants_never_cross() {
    let state = test_state(
        single_agent_workflow("shared"),
        Arc::new(TurnEngine::new()),
        Arc::new(MockLlm::fixed("isolated answer")),
        ServerConfig::default(),
    );
    let (addr, _server) = spawn_server(state.clone()).await;

    start_session(&state, "tenant-a", "shared", "chat-a").await;
    start_session(&state, "tenant-b", "shared", "chat-b").await;

    let mut ws_a = connect_ws(addr, "shared", "tenant-a", "chat-a").await;
    let mut ws_b = connect_ws(addr, "shared", "tenant-b", "chat-b").await;

    let (done_a, frames_a) = recv_until(&mut ws_a, "chat.run_complete").await;
    let (done_b, frames_b) = recv_until(&mut ws_b, "chat.run_complete").await;
    for frame in frames_a.iter().chain(std::iter::once(&done_a)) {
        assert_eq!(frame["chat_id"], "chat-a");
    }
    for frame in frames_b.iter().chain(std::iter::once(&done_b)) {
        assert_eq!(frame["chat_id"], "chat-b");
    }

    // Store queries parameterized by tenant only see that tenant's sessions.
    let a_sessions = state.store.list_sessions("tenant-a", "shared", 10).await.unwrap();
    assert_eq!(a_sessions.len(), 1);
    assert_eq!(a_sessions[0].chat_id, "chat-a");
    assert!(state
        .store
        .session_meta("tenant-a", "chat-b")
        .await
        .unwrap()
        .is_none());

    // A cross-tenant websocket path is refused outright.
    let mut ws_cross = connect_ws(addr, "shared", "tenant-a", "chat-b").await;
    let (error, _) = recv_until(&mut ws_cross, "chat.error").await;
    assert_eq!(error["data"]["error_code"], "WORKFLOW_NOT_FOUND");
}
