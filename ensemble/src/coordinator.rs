//! Rendezvous for human input and UI tool responses.
//!
//! The engine parks a oneshot responder here and suspends the agent; the
//! inbound connection resolves it by request id. The coordinator owns the
//! responder map, so neither the transport nor the orchestrator holds a
//! reference to the other — the only surface is `resolve`.

use std::sync::Arc;
use std::time::Duration;

use chat_event::{ChatEvent, ErrorCode, RunEvent};
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::context::ContextHandle;
use crate::dispatch::EventDispatcher;

/// Fixed text an agent receives when a request deadline elapses.
pub const TIMEOUT_SENTINEL: &str = "[TIMEOUT]";

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("no pending request with id {0}")]
    NotFound(String),
}

/// Terminal outcome of one pending request.
#[derive(Debug)]
pub enum Resolution {
    /// The client replied with this payload (text for inputs, component data
    /// for UI tools).
    Reply(Value),
    /// The deadline elapsed; the agent proceeds with [`TIMEOUT_SENTINEL`].
    Timeout,
    /// The session ended while the request was pending.
    Aborted,
}

enum PendingKind {
    Input,
    UiTool { tool: String },
}

struct PendingEntry {
    chat_id: String,
    kind: PendingKind,
    responder: oneshot::Sender<Resolution>,
    deadline_task: tokio::task::JoinHandle<()>,
    deadline: Duration,
    events: EventDispatcher,
    /// UI tools carry the session context so `ui_response` triggers run
    /// before the responder resolves.
    context: Option<ContextHandle>,
    /// Incremental artifact patches received before the final response.
    patches: Vec<Value>,
}

/// Pending request map shared by all sessions; entries are keyed by the
/// globally unique request / tool-call id. The map is behind its own `Arc`
/// so deadline tasks can hold it without a back-reference to the coordinator.
#[derive(Default)]
pub struct Coordinator {
    pending: Arc<DashMap<String, PendingEntry>>,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks a pending input request and returns the receiver the engine
    /// awaits. The entry must be registered before the `input_request` event
    /// is emitted so an immediate client reply finds it.
    pub fn register_input(
        &self,
        chat_id: &str,
        request_id: &str,
        events: EventDispatcher,
        deadline: Duration,
    ) -> oneshot::Receiver<Resolution> {
        self.register(chat_id, request_id, PendingKind::Input, events, None, deadline)
    }

    /// Parks a pending UI tool call, keyed by the tool call id.
    pub fn register_ui_tool(
        &self,
        chat_id: &str,
        call_id: &str,
        tool: &str,
        events: EventDispatcher,
        context: ContextHandle,
        deadline: Duration,
    ) -> oneshot::Receiver<Resolution> {
        self.register(
            chat_id,
            call_id,
            PendingKind::UiTool {
                tool: tool.to_string(),
            },
            events,
            Some(context),
            deadline,
        )
    }

    fn register(
        &self,
        chat_id: &str,
        corr: &str,
        kind: PendingKind,
        events: EventDispatcher,
        context: Option<ContextHandle>,
        deadline: Duration,
    ) -> oneshot::Receiver<Resolution> {
        let (tx, rx) = oneshot::channel();
        let deadline_task = {
            let pending = Arc::clone(&self.pending);
            let corr = corr.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                fire_timeout(&pending, &corr).await;
            })
        };
        self.pending.insert(
            corr.to_string(),
            PendingEntry {
                chat_id: chat_id.to_string(),
                kind,
                responder: tx,
                deadline_task,
                deadline,
                events,
                context,
                patches: Vec::new(),
            },
        );
        rx
    }

    /// Records incremental patches from an artifact-mode component. They ride
    /// along with the final resolution payload so the tool result reflects
    /// the artifact's edit history.
    pub fn apply_artifact_patch(
        &self,
        corr: &str,
        patch: Vec<Value>,
    ) -> Result<(), CoordinatorError> {
        let mut entry = self
            .pending
            .get_mut(corr)
            .ok_or_else(|| CoordinatorError::NotFound(corr.to_string()))?;
        entry.patches.extend(patch);
        Ok(())
    }

    /// Resolves a pending request with the client's payload. For UI tools,
    /// context triggers run *before* the responder completes, so any
    /// after-work handoff evaluated next sees the new values. Emits
    /// `input_ack` for input requests.
    pub async fn resolve(&self, corr: &str, payload: Value) -> Result<(), CoordinatorError> {
        let (_, entry) = self
            .pending
            .remove(corr)
            .ok_or_else(|| CoordinatorError::NotFound(corr.to_string()))?;
        entry.deadline_task.abort();

        match &entry.kind {
            PendingKind::UiTool { tool } => {
                if let Some(context) = &entry.context {
                    let writes = match context.lock() {
                        Ok(mut store) => store.apply_ui_response(tool, &payload),
                        Err(_) => {
                            tracing::error!(corr, "context lock poisoned, skipping triggers");
                            Vec::new()
                        }
                    };
                    for (var, value) in &writes {
                        tracing::debug!(corr, var = %var, value = %value, "ui response trigger wrote");
                    }
                }
            }
            PendingKind::Input => {
                entry
                    .events
                    .emit(
                        RunEvent::new(ChatEvent::InputAck {
                            request_id: corr.to_string(),
                        })
                        .with_corr(corr),
                    )
                    .await;
            }
        }

        let payload = if entry.patches.is_empty() {
            payload
        } else {
            serde_json::json!({ "result": payload, "patches": entry.patches })
        };
        if entry.responder.send(Resolution::Reply(payload)).is_err() {
            tracing::warn!(corr, "responder dropped before resolution (engine gone?)");
        }
        Ok(())
    }

    /// Drains every pending request of a session to the aborted state. Called
    /// on session failure or cancellation; the agents never resume.
    pub fn abort_session(&self, chat_id: &str) {
        let ids: Vec<String> = self
            .pending
            .iter()
            .filter(|e| e.chat_id == chat_id)
            .map(|e| e.key().clone())
            .collect();
        for id in ids {
            if let Some((_, entry)) = self.pending.remove(&id) {
                entry.deadline_task.abort();
                let _ = entry.responder.send(Resolution::Aborted);
            }
        }
    }

    pub fn pending_count(&self, chat_id: &str) -> usize {
        self.pending.iter().filter(|e| e.chat_id == chat_id).count()
    }
}

/// Deadline expiry for one pending entry: emits `input_timeout` (or the UI
/// tool timeout error) and completes the responder with [`Resolution::Timeout`].
async fn fire_timeout(pending: &DashMap<String, PendingEntry>, corr: &str) {
    let Some((_, entry)) = pending.remove(corr) else {
        return; // already resolved
    };
    match &entry.kind {
        PendingKind::Input => {
            entry
                .events
                .emit(
                    RunEvent::new(ChatEvent::InputTimeout {
                        request_id: corr.to_string(),
                        timeout_seconds: entry.deadline.as_secs(),
                    })
                    .with_corr(corr),
                )
                .await;
        }
        PendingKind::UiTool { tool } => {
            entry
                .events
                .emit(
                    RunEvent::new(ChatEvent::Error {
                        message: format!("ui tool {} timed out", tool),
                        error_code: ErrorCode::UiToolTimeout,
                        details: None,
                        recoverable: true,
                    })
                    .with_corr(corr),
                )
                .await;
        }
    }
    if entry.responder.send(Resolution::Timeout).is_err() {
        tracing::debug!(corr, "responder gone at timeout");
    }
}
