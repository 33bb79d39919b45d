//! Input request and reply: the client answers a pending request and sees the
//! ack before the agent's follow-up text.

use std::sync::Arc;

use config::ServerConfig;
use ensemble::{EngineEvent, MockLlm, ScriptStep, ScriptedEngine, SessionStore};
use serde_json::json;

use super::common::{
    connect_ws, recv_until, send_json, single_agent_workflow, spawn_server, start_session,
    test_state,
};

#[tokio::test]
async fn input_request_reply_ack_then_text() {
    let engine = ScriptedEngine::new(vec![
        ScriptStep::AwaitInput {
            agent: "solo".to_string(),
            reply_template: "Nice to meet you, {input}!".to_string(),
        },
        ScriptStep::Emit(EngineEvent::RunComplete {
            reason: "terminate".to_string(),
        }),
    ]);
    let state = test_state(
        single_agent_workflow("greeter"),
        Arc::new(engine),
        Arc::new(MockLlm::fixed("unused")),
        ServerConfig::default(),
    );
    let (addr, _server) = spawn_server(state.clone()).await;

    start_session(&state, "t1", "greeter", "chat-e2").await;
    let mut ws = connect_ws(addr, "greeter", "t1", "chat-e2").await;

    let (request, _) = recv_until(&mut ws, "chat.input_request").await;
    let request_id = request["data"]["request_id"].as_str().unwrap().to_string();
    assert_eq!(request["corr"], request_id.as_str());

    // While the request is pending, the session is waiting for input.
    let meta = state.store.session_meta("t1", "chat-e2").await.unwrap().unwrap();
    assert_eq!(meta.status.as_str(), "waiting_for_input");

    send_json(
        &mut ws,
        json!({
            "type": "user.input.submit",
            "chat_id": "chat-e2",
            "request_id": request_id,
            "text": "Alice"
        }),
    )
    .await;

    let (ack, _) = recv_until(&mut ws, "chat.input_ack").await;
    assert_eq!(ack["corr"], request_id.as_str());

    let (text, _) = recv_until(&mut ws, "chat.text").await;
    assert!(text["data"]["content"]
        .as_str()
        .unwrap()
        .contains("Alice"));

    recv_until(&mut ws, "chat.run_complete").await;
    // The final status write runs after the completion frame is queued.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    let meta = state.store.session_meta("t1", "chat-e2").await.unwrap().unwrap();
    assert_eq!(meta.status.as_str(), "completed");
}
