//! Session HTTP API over a raw socket: health, start, exists, meta.

use std::sync::Arc;

use config::ServerConfig;
use ensemble::{MockLlm, TurnEngine};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::common::{single_agent_workflow, spawn_server, test_state};

/// Sends one HTTP/1.1 request and returns (status line, body).
async fn http_request(
    addr: std::net::SocketAddr,
    method: &str,
    path: &str,
    body: Option<&str>,
) -> (String, Value) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let body = body.unwrap_or("");
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\
         Content-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let response = String::from_utf8_lossy(&response).into_owned();
    eprintln!("[e2e] http response: {response}");
    let status = response.lines().next().unwrap_or_default().to_string();
    // Tolerates chunked responses by slicing the outermost JSON object.
    let body_part = response.split("\r\n\r\n").nth(1).unwrap_or("");
    let json_body = match (body_part.find('{'), body_part.rfind('}')) {
        (Some(start), Some(end)) if end >= start => {
            serde_json::from_str(&body_part[start..=end]).unwrap_or(Value::Null)
        }
        _ => Value::Null,
    };
    (status, json_body)
}

#[tokio::test]
async fn health_start_exists_meta_round_trip() {
    let state = test_state(
        single_agent_workflow("api"),
        Arc::new(TurnEngine::new()),
        Arc::new(MockLlm::fixed("done")),
        ServerConfig::default(),
    );
    let (addr, _server) = spawn_server(state.clone()).await;

    let (status, body) = http_request(addr, "GET", "/api/health", None).await;
    assert!(status.contains("200"), "status: {status}");
    assert_eq!(body["status"], "ok");

    let (status, body) = http_request(
        addr,
        "POST",
        "/api/chats/t1/api/start",
        Some(r#"{"chat_id":"chat-http","user_id":"u1"}"#),
    )
    .await;
    assert!(status.contains("200"), "status: {status}");
    assert_eq!(body["chat_id"], "chat-http");
    assert!(body["cache_seed"].is_u64());

    // Starting again with the same chat_id is idempotent.
    let (status, body) = http_request(
        addr,
        "POST",
        "/api/chats/t1/api/start",
        Some(r#"{"chat_id":"chat-http"}"#),
    )
    .await;
    assert!(status.contains("200"), "status: {status}");
    assert_eq!(body["chat_id"], "chat-http");

    let (status, body) =
        http_request(addr, "GET", "/api/chats/exists/t1/api/chat-http", None).await;
    assert!(status.contains("200"), "status: {status}");
    assert_eq!(body["exists"], true);

    let (_, body) = http_request(addr, "GET", "/api/chats/exists/t2/api/chat-http", None).await;
    assert_eq!(body["exists"], false);

    let (status, body) = http_request(addr, "GET", "/api/chats/meta/t1/api/chat-http", None).await;
    assert!(status.contains("200"), "status: {status}");
    assert_eq!(body["workflow_name"], "api");
    assert_eq!(body["tenant_id"], "t1");

    let (status, _) = http_request(addr, "POST", "/api/chats/t1/missing/start", None).await;
    assert!(status.contains("404"), "status: {status}");
}
