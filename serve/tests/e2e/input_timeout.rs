//! Input timeout: no client reply within the deadline; the agent proceeds
//! with the timeout sentinel.

use std::sync::Arc;
use std::time::Duration;

use config::ServerConfig;
use ensemble::{EngineEvent, MockLlm, ScriptStep, ScriptedEngine};

use super::common::{
    connect_ws, recv_until, single_agent_workflow, spawn_server, start_session, test_state,
};

#[tokio::test]
async fn unanswered_input_times_out_and_agent_continues() {
    let engine = ScriptedEngine::new(vec![
        ScriptStep::AwaitInput {
            agent: "solo".to_string(),
            reply_template: "received: {input}".to_string(),
        },
        ScriptStep::Emit(EngineEvent::RunComplete {
            reason: "terminate".to_string(),
        }),
    ]);
    let config = ServerConfig {
        input_deadline: Duration::from_secs(1),
        ..ServerConfig::default()
    };
    let state = test_state(
        single_agent_workflow("impatient"),
        Arc::new(engine),
        Arc::new(MockLlm::fixed("unused")),
        config,
    );
    let (addr, _server) = spawn_server(state.clone()).await;

    start_session(&state, "t1", "impatient", "chat-e5").await;
    let mut ws = connect_ws(addr, "impatient", "t1", "chat-e5").await;

    let (request, _) = recv_until(&mut ws, "chat.input_request").await;
    let request_id = request["data"]["request_id"].as_str().unwrap();

    // Do not reply; the deadline fires.
    let (timeout_frame, _) = recv_until(&mut ws, "chat.input_timeout").await;
    assert_eq!(timeout_frame["corr"], request_id);
    assert_eq!(timeout_frame["data"]["timeout_seconds"], 1);

    let (text, _) = recv_until(&mut ws, "chat.text").await;
    assert_eq!(text["data"]["content"], "received: [TIMEOUT]");

    recv_until(&mut ws, "chat.run_complete").await;
}
