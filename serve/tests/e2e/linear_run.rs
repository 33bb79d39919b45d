//! Linear two-agent pipeline with no human input: the full expected outbound
//! sequence, strictly monotonic seq, and no leaked seed message.

use std::sync::Arc;

use config::ServerConfig;
use ensemble::{MockLlm, TurnEngine, WorkflowConfig};

use super::common::{connect_ws, recv_frame, spawn_server, start_session, test_state};

fn two_agent_workflow() -> WorkflowConfig {
    WorkflowConfig {
        name: "pipeline".to_string(),
        agents: serde_json::from_value(serde_json::json!([
            {"name": "a", "system_message": "you are a"},
            {"name": "b", "system_message": "you are b"}
        ]))
        .unwrap(),
        tools: vec![],
        handoffs: serde_json::from_value(serde_json::json!([
            {"source_agent": "a", "target_agent": "b", "handoff_type": "after_work"},
            {"source_agent": "b", "target_agent": "TERMINATE", "handoff_type": "after_work"}
        ]))
        .unwrap(),
        context_variables: vec![],
        structured_outputs: vec![],
        orchestrator: serde_json::from_value(serde_json::json!({
            "startup_mode": "AgentDriven",
            "initial_message": "go",
            "visual_agents": ["a", "b"]
        }))
        .unwrap(),
    }
}

#[tokio::test]
async fn linear_pipeline_streams_expected_sequence() {
    let state = test_state(
        two_agent_workflow(),
        Arc::new(TurnEngine::new()),
        Arc::new(MockLlm::scripted(vec![
            MockLlm::text_response("alpha speaking"),
            MockLlm::text_response("beta speaking"),
        ])),
        ServerConfig::default(),
    );
    let (addr, _server) = spawn_server(state.clone()).await;

    start_session(&state, "t1", "pipeline", "chat-e1").await;
    let mut ws = connect_ws(addr, "pipeline", "t1", "chat-e1").await;

    let mut types = Vec::new();
    let mut last_seq = 0u64;
    loop {
        let frame = recv_frame(&mut ws).await;
        assert_eq!(frame["chat_id"], "chat-e1");
        let seq = frame["seq"].as_u64().expect("live frames carry seq");
        assert!(seq > last_seq, "seq must be strictly monotonic");
        last_seq = seq;
        let frame_type = frame["type"].as_str().unwrap().to_string();
        // The hidden seed must never surface.
        if frame_type == "chat.text" {
            assert_ne!(frame["data"]["content"], "go");
        }
        let done = frame_type == "chat.run_complete";
        if done {
            assert_eq!(frame["data"]["reason"], "terminate");
        }
        types.push(frame_type);
        if done {
            break;
        }
    }

    assert_eq!(
        types,
        vec![
            "chat.select_speaker",
            "chat.text",
            "chat.usage_delta",
            "chat.select_speaker",
            "chat.text",
            "chat.usage_delta",
            "chat.usage_summary",
            "chat.run_complete",
        ]
    );
}
