//! WebSocket connection lifecycle: upgrade, outbound pump with heartbeat,
//! inbound recv loop and message routing.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use chat_event::{ChatEvent, ClientMessage, ErrorCode, EventEnvelope, RunEvent};
use ensemble::SessionStore;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::app::AppState;
use crate::resume;

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    Path((workflow, tenant, chat_id, user)): Path<(String, String, String, String)>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, workflow, tenant, chat_id, user))
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    workflow: String,
    tenant: String,
    chat_id: String,
    user: String,
) {
    tracing::info!(chat_id = %chat_id, user = %user, "websocket connected");

    // The session must exist for this tenant and workflow; the connection
    // table is keyed by chat_id alone, so this check is the tenant boundary.
    let known = matches!(
        state.store.session_meta(&tenant, &chat_id).await,
        Ok(Some(meta)) if meta.workflow_name == workflow
    );
    let mut socket = socket;
    if !known {
        let frame = error_frame(
            &chat_id,
            "unknown session for this tenant and workflow",
            ErrorCode::WorkflowNotFound,
        );
        if let Ok(json) = serde_json::to_string(&frame) {
            let _ = socket.send(Message::Text(json)).await;
        }
        let _ = socket.close().await;
        return;
    }

    let (conn_tx, conn_rx) = mpsc::channel(state.transport.connection_capacity());
    if !state.transport.attach(&chat_id, conn_tx.clone()) {
        let _ = socket.close().await;
        return;
    }

    let (sink, mut stream) = socket.split();
    let last_pong = Arc::new(Mutex::new(Instant::now()));
    let pump = tokio::spawn(pump_outbound(
        sink,
        conn_rx,
        state.config.heartbeat_interval,
        state.config.heartbeat_timeout,
        last_pong.clone(),
        chat_id.clone(),
    ));

    while let Some(result) = stream.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(chat_id = %chat_id, "read error (client closed?): {}", e);
                break;
            }
        };
        match msg {
            Message::Text(text) => route_inbound(&state, &chat_id, &text).await,
            Message::Binary(bytes) => {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                route_inbound(&state, &chat_id, &text).await;
            }
            Message::Pong(_) => {
                if let Ok(mut guard) = last_pong.lock() {
                    *guard = Instant::now();
                }
            }
            Message::Close(_) => break,
            Message::Ping(_) => {} // axum answers pings itself
        }
    }

    // Only drop the channel if a newer connection has not superseded it.
    state.transport.detach_if(&chat_id, &conn_tx);
    pump.abort();
    tracing::info!(chat_id = %chat_id, "websocket disconnected");
}

async fn pump_outbound(
    mut sink: futures_util::stream::SplitSink<WebSocket, Message>,
    mut frames: mpsc::Receiver<EventEnvelope>,
    heartbeat_interval: std::time::Duration,
    heartbeat_timeout: std::time::Duration,
    last_pong: Arc<Mutex<Instant>>,
    chat_id: String,
) {
    let mut ticker = tokio::time::interval(heartbeat_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                let json = match serde_json::to_string(&frame) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!(chat_id = %chat_id, "frame serialization failed: {}", e);
                        continue;
                    }
                };
                if sink.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let stale = last_pong
                    .lock()
                    .map(|guard| guard.elapsed() > heartbeat_timeout)
                    .unwrap_or(true);
                if stale {
                    tracing::warn!(chat_id = %chat_id, "no pong within timeout, closing connection");
                    break;
                }
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }
    let _ = sink.close().await;
}

fn error_frame(chat_id: &str, message: &str, code: ErrorCode) -> EventEnvelope {
    EventEnvelope {
        event: ChatEvent::Error {
            message: message.to_string(),
            error_code: code,
            details: None,
            recoverable: true,
        },
        seq: None,
        chat_id: chat_id.to_string(),
        corr: None,
        replay: None,
    }
}

/// Emits a recoverable error through the session's dispatcher (so it is
/// sequenced and persisted like any other event).
async fn emit_session_error(
    state: &AppState,
    chat_id: &str,
    message: String,
    code: ErrorCode,
    corr: Option<String>,
) {
    // Clone the handle out of the map before awaiting on it.
    let events = match state.sessions.get(chat_id) {
        Some(entry) => entry.events.clone(),
        None => {
            tracing::warn!(chat_id, %message, "error for unknown session");
            return;
        }
    };
    let mut event = RunEvent::new(ChatEvent::Error {
        message,
        error_code: code,
        details: None,
        recoverable: true,
    });
    event.corr = corr;
    events.emit(event).await;
}

async fn route_inbound(state: &Arc<AppState>, chat_id: &str, text: &str) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            emit_session_error(
                state,
                chat_id,
                format!("malformed client message: {}", e),
                ErrorCode::SchemaValidationFailed,
                None,
            )
            .await;
            return;
        }
    };
    if message.chat_id() != chat_id {
        emit_session_error(
            state,
            chat_id,
            "chat_id does not match this connection".to_string(),
            ErrorCode::SchemaValidationFailed,
            None,
        )
        .await;
        return;
    }

    match message {
        ClientMessage::UserInputSubmit {
            request_id, text, ..
        } => {
            if let Err(e) = state
                .coordinator
                .resolve(&request_id, serde_json::Value::String(text))
                .await
            {
                emit_session_error(
                    state,
                    chat_id,
                    e.to_string(),
                    ErrorCode::InputRequestNotFound,
                    Some(request_id),
                )
                .await;
            }
        }
        ClientMessage::InlineComponentResult { corr, data, .. } => {
            if let Err(e) = state.coordinator.resolve(&corr, data).await {
                emit_session_error(
                    state,
                    chat_id,
                    e.to_string(),
                    ErrorCode::InputRequestNotFound,
                    Some(corr),
                )
                .await;
            }
        }
        ClientMessage::ArtifactPatch { corr, patch, .. } => {
            if let Err(e) = state.coordinator.apply_artifact_patch(&corr, patch) {
                emit_session_error(
                    state,
                    chat_id,
                    e.to_string(),
                    ErrorCode::InputRequestNotFound,
                    Some(corr),
                )
                .await;
            }
        }
        ClientMessage::ClientResume {
            last_client_index, ..
        } => {
            resume::handle_resume(state, chat_id, last_client_index).await;
        }
    }
}
