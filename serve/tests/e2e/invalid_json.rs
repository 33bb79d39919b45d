//! Malformed inbound messages surface as recoverable schema errors; the
//! session keeps running.

use std::sync::Arc;

use config::ServerConfig;
use ensemble::{EngineEvent, MockLlm, ScriptStep, ScriptedEngine};
use futures_util::SinkExt;
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;

use super::common::{
    connect_ws, recv_until, send_json, single_agent_workflow, spawn_server, start_session,
    test_state,
};

#[tokio::test]
async fn garbage_and_unknown_types_get_schema_errors() {
    // An input step keeps the session alive while we probe it.
    let engine = ScriptedEngine::new(vec![
        ScriptStep::AwaitInput {
            agent: "solo".to_string(),
            reply_template: "ok {input}".to_string(),
        },
        ScriptStep::Emit(EngineEvent::RunComplete {
            reason: "terminate".to_string(),
        }),
    ]);
    let state = test_state(
        single_agent_workflow("strict"),
        Arc::new(engine),
        Arc::new(MockLlm::fixed("unused")),
        ServerConfig::default(),
    );
    let (addr, _server) = spawn_server(state.clone()).await;
    start_session(&state, "t1", "strict", "chat-json").await;
    let mut ws = connect_ws(addr, "strict", "t1", "chat-json").await;

    let (request, _) = recv_until(&mut ws, "chat.input_request").await;
    let request_id = request["data"]["request_id"].as_str().unwrap().to_string();

    ws.send(Message::Text("{ not json at all".to_string()))
        .await
        .unwrap();
    let (error, _) = recv_until(&mut ws, "chat.error").await;
    assert_eq!(error["data"]["error_code"], "SCHEMA_VALIDATION_FAILED");
    assert_eq!(error["data"]["recoverable"], true);

    // Unknown request id: the protocol violation is reported, nothing breaks.
    send_json(
        &mut ws,
        json!({
            "type": "user.input.submit",
            "chat_id": "chat-json",
            "request_id": "no-such-request",
            "text": "hello"
        }),
    )
    .await;
    let (error, _) = recv_until(&mut ws, "chat.error").await;
    assert_eq!(error["data"]["error_code"], "INPUT_REQUEST_NOT_FOUND");

    // The real pending request still resolves.
    send_json(
        &mut ws,
        json!({
            "type": "user.input.submit",
            "chat_id": "chat-json",
            "request_id": request_id,
            "text": "fine"
        }),
    )
    .await;
    recv_until(&mut ws, "chat.input_ack").await;
    recv_until(&mut ws, "chat.run_complete").await;
}
