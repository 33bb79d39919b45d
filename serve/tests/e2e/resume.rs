//! Disconnect and resume: a reconnecting client replays exactly the missing
//! suffix, then sees the boundary marker, and live numbering restarts at 1.

use std::sync::Arc;

use config::ServerConfig;
use ensemble::{MockLlm, TurnEngine};
use serde_json::json;

use super::common::{
    connect_ws, recv_frame, recv_until, send_json, single_agent_workflow, spawn_server,
    start_session, test_state,
};

#[tokio::test]
async fn resume_replays_missing_suffix_then_boundary() {
    let state = test_state(
        single_agent_workflow("resumable"),
        Arc::new(TurnEngine::new()),
        Arc::new(MockLlm::fixed("the answer")),
        ServerConfig::default(),
    );
    let (addr, _server) = spawn_server(state.clone()).await;

    start_session(&state, "t1", "resumable", "chat-e4").await;

    // First connection: read to completion, note the final seq, disconnect.
    let mut ws = connect_ws(addr, "resumable", "t1", "chat-e4").await;
    let (done, earlier) = recv_until(&mut ws, "chat.run_complete").await;
    let final_seq = done["seq"].as_u64().unwrap();
    assert_eq!(final_seq as usize, earlier.len() + 1);
    drop(ws);

    // Let the concurrent event persistence land before asking for a replay.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    // Reconnect claiming we saw everything up to seq 2.
    let mut ws = connect_ws(addr, "resumable", "t1", "chat-e4").await;
    send_json(
        &mut ws,
        json!({"type": "client.resume", "chat_id": "chat-e4", "lastClientIndex": 2}),
    )
    .await;

    let mut expected_seq = 3u64;
    loop {
        let frame = recv_frame(&mut ws).await;
        if frame["type"] == "chat.resume_boundary" {
            assert!(frame.get("seq").is_none() || frame["seq"].is_null());
            break;
        }
        assert_eq!(frame["replay"], true, "replayed frames are marked");
        assert_eq!(frame["seq"].as_u64().unwrap(), expected_seq);
        expected_seq += 1;
    }
    assert_eq!(expected_seq, final_seq + 1, "replayed exactly seq 3..=final");
}

#[tokio::test]
async fn resume_beyond_high_water_is_rejected_but_recoverable() {
    let state = test_state(
        single_agent_workflow("resumable2"),
        Arc::new(TurnEngine::new()),
        Arc::new(MockLlm::fixed("short run")),
        ServerConfig::default(),
    );
    let (addr, _server) = spawn_server(state.clone()).await;
    start_session(&state, "t1", "resumable2", "chat-e4b").await;

    let mut ws = connect_ws(addr, "resumable2", "t1", "chat-e4b").await;
    recv_until(&mut ws, "chat.run_complete").await;
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    send_json(
        &mut ws,
        json!({"type": "client.resume", "chat_id": "chat-e4b", "lastClientIndex": 10_000}),
    )
    .await;
    let (error, _) = recv_until(&mut ws, "chat.error").await;
    assert_eq!(error["data"]["error_code"], "RESUME_FAILED");
    assert_eq!(error["data"]["recoverable"], true);

    // The connection survives; a correct handshake still works.
    send_json(
        &mut ws,
        json!({"type": "client.resume", "chat_id": "chat-e4b", "lastClientIndex": 0}),
    )
    .await;
    recv_until(&mut ws, "chat.resume_boundary").await;
}
