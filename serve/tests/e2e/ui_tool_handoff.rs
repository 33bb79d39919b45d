//! UI tool with a context trigger feeding a conditional after-work handoff:
//! the client's approval decides whether the next speaker is selected or the
//! run terminates.

use std::sync::Arc;

use chat_event::DisplayMode;
use config::ServerConfig;
use ensemble::{EngineEvent, MockLlm, ScriptStep, ScriptedEngine, WorkflowConfig};
use serde_json::json;

use super::common::{
    connect_ws, recv_until, send_json, spawn_server, start_session, test_state,
};

fn approval_workflow() -> WorkflowConfig {
    WorkflowConfig {
        name: "approval".to_string(),
        agents: serde_json::from_value(json!([
            {"name": "a", "system_message": "ask for approval", "tools": ["approve"]},
            {"name": "b", "system_message": "proceed"}
        ]))
        .unwrap(),
        tools: serde_json::from_value(json!([
            {"name": "approve", "type": "ui", "description": "approval card",
             "ui": {"component": "ApprovalCard", "mode": "artifact"}}
        ]))
        .unwrap(),
        handoffs: serde_json::from_value(json!([
            {"source_agent": "a", "target_agent": "b", "handoff_type": "after_work",
             "condition": "${approved} == true"},
            {"source_agent": "a", "target_agent": "TERMINATE", "handoff_type": "after_work",
             "condition": "${approved} == false"}
        ]))
        .unwrap(),
        context_variables: serde_json::from_value(json!([
            {"name": "approved", "type": "derived",
             "triggers": [{"kind": "ui_response", "tool": "approve", "response_key": "approved"}]}
        ]))
        .unwrap(),
        structured_outputs: vec![],
        orchestrator: serde_json::from_value(json!({
            "startup_mode": "AgentDriven",
            "initial_message": "go",
            "visual_agents": ["a", "b"]
        }))
        .unwrap(),
    }
}

fn approval_script() -> ScriptedEngine {
    ScriptedEngine::new(vec![
        ScriptStep::Emit(EngineEvent::Text {
            agent: "a".to_string(),
            content: "Please approve the draft.".to_string(),
        }),
        ScriptStep::AwaitUiTool {
            agent: "a".to_string(),
            tool: "approve".to_string(),
            call_id: "tc-1".to_string(),
            component: "ApprovalCard".to_string(),
            display: DisplayMode::Artifact,
            payload: json!({"question": "Approve?"}),
        },
        ScriptStep::Emit(EngineEvent::RunComplete {
            reason: "terminate".to_string(),
        }),
    ])
}

async fn run_with_approval(approved: bool) -> (Vec<String>, bool) {
    let state = test_state(
        approval_workflow(),
        Arc::new(approval_script()),
        Arc::new(MockLlm::fixed("unused")),
        ServerConfig::default(),
    );
    let (addr, _server) = spawn_server(state.clone()).await;
    let chat_id = format!("chat-e3-{approved}");
    start_session(&state, "t1", "approval", &chat_id).await;
    let mut ws = connect_ws(addr, "approval", "t1", &chat_id).await;

    let (call, _) = recv_until(&mut ws, "chat.tool_call").await;
    assert_eq!(call["corr"], "tc-1");
    assert_eq!(call["data"]["display"], "artifact");
    assert_eq!(call["data"]["awaiting_response"], true);

    send_json(
        &mut ws,
        json!({
            "type": "inline_component.result",
            "chat_id": chat_id,
            "corr": "tc-1",
            "data": {"approved": approved}
        }),
    )
    .await;

    let (response, _) = recv_until(&mut ws, "chat.tool_response").await;
    assert_eq!(response["data"]["success"], true);

    // Everything after the tool response shows the routing decision.
    let (done, skipped) = recv_until(&mut ws, "chat.run_complete").await;
    let mut types: Vec<String> = skipped
        .iter()
        .map(|f| f["type"].as_str().unwrap().to_string())
        .collect();
    types.push(done["type"].as_str().unwrap().to_string());
    let routed_to_b = skipped
        .iter()
        .any(|f| f["type"] == "chat.select_speaker" && f["data"]["agent"] == "b");
    (types, routed_to_b)
}

#[tokio::test]
async fn approval_true_routes_to_next_agent() {
    let (types, routed_to_b) = run_with_approval(true).await;
    assert!(routed_to_b, "expected select_speaker for b, got {types:?}");
}

#[tokio::test]
async fn approval_false_terminates_the_run() {
    let (types, routed_to_b) = run_with_approval(false).await;
    assert!(!routed_to_b, "no speaker selection expected, got {types:?}");
}
