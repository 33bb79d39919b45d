//! Deterministic engine double: replays a fixed script, pausing at input and
//! UI-tool steps exactly like a live engine would. Used by end-to-end tests.

use async_trait::async_trait;
use chat_event::DisplayMode;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{
    ConversationEngine, EngineError, EngineEvent, EngineSetup, EngineStream, HandoffPhase,
    HandoffTarget,
};
use crate::coordinator::{Resolution, TIMEOUT_SENTINEL};

/// One step of a scripted run.
#[derive(Clone, Debug)]
pub enum ScriptStep {
    /// Emit the event as-is.
    Emit(EngineEvent),
    /// Request user input, then emit a text turn with `{input}` substituted by
    /// the reply (or the timeout sentinel).
    AwaitInput {
        agent: String,
        reply_template: String,
    },
    /// Surface a UI tool call, await the client response, emit the tool
    /// response, then follow the after-work handoff for `agent`.
    AwaitUiTool {
        agent: String,
        tool: String,
        call_id: String,
        component: String,
        display: DisplayMode,
        payload: Value,
    },
}

pub struct ScriptedEngine {
    steps: Vec<ScriptStep>,
}

impl ScriptedEngine {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self { steps }
    }
}

async fn send(tx: &mpsc::Sender<EngineEvent>, event: EngineEvent) {
    let _ = tx.send(event).await;
}

#[async_trait]
impl ConversationEngine for ScriptedEngine {
    async fn run(&self, setup: EngineSetup) -> Result<EngineStream, EngineError> {
        let steps = self.steps.clone();
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            for step in steps {
                if setup.cancel.is_cancelled() {
                    return;
                }
                match step {
                    ScriptStep::Emit(event) => {
                        if let EngineEvent::Text { agent, content } = &event {
                            (setup.hooks.on_text)(agent, content);
                        }
                        send(&tx, event).await;
                    }
                    ScriptStep::AwaitInput {
                        agent,
                        reply_template,
                    } => {
                        let (request_id, rx_input) = setup.hooks.input.request_input().await;
                        send(
                            &tx,
                            EngineEvent::InputRequest {
                                agent: agent.clone(),
                                request_id,
                                prompt: "Your turn.".to_string(),
                            },
                        )
                        .await;
                        let resolution = tokio::select! {
                            res = rx_input => res,
                            _ = setup.cancel.cancelled() => return,
                        };
                        let text = match resolution {
                            Ok(Resolution::Reply(v)) => {
                                v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string())
                            }
                            Ok(Resolution::Timeout) => TIMEOUT_SENTINEL.to_string(),
                            Ok(Resolution::Aborted) | Err(_) => return,
                        };
                        let content = reply_template.replace("{input}", &text);
                        (setup.hooks.on_text)(&agent, &content);
                        send(&tx, EngineEvent::Text { agent, content }).await;
                    }
                    ScriptStep::AwaitUiTool {
                        agent,
                        tool,
                        call_id,
                        component,
                        display,
                        payload,
                    } => {
                        let rx_tool =
                            setup.hooks.input.request_ui_tool(&call_id, &tool).await;
                        send(
                            &tx,
                            EngineEvent::ToolCall {
                                agent: agent.clone(),
                                tool: tool.clone(),
                                call_id: call_id.clone(),
                                payload,
                                component: Some(component),
                                display: Some(display),
                                awaiting_response: true,
                            },
                        )
                        .await;
                        let resolution = tokio::select! {
                            res = rx_tool => res,
                            _ = setup.cancel.cancelled() => return,
                        };
                        let (content, success) = match resolution {
                            Ok(Resolution::Reply(v)) => (v, true),
                            Ok(Resolution::Timeout) => {
                                (Value::String(TIMEOUT_SENTINEL.to_string()), false)
                            }
                            Ok(Resolution::Aborted) | Err(_) => return,
                        };
                        send(
                            &tx,
                            EngineEvent::ToolResponse {
                                agent: agent.clone(),
                                tool,
                                call_id,
                                content,
                                success,
                            },
                        )
                        .await;
                        // The client response may have written context vars;
                        // follow the after-work route like the live engine.
                        match setup.hooks.handoffs.next(&agent, HandoffPhase::AfterWork).await {
                            HandoffTarget::Agent(next) => {
                                send(&tx, EngineEvent::SelectSpeaker { agent: next }).await;
                            }
                            HandoffTarget::Terminate => {
                                send(
                                    &tx,
                                    EngineEvent::RunComplete {
                                        reason: "terminate".to_string(),
                                    },
                                )
                                .await;
                                return;
                            }
                            HandoffTarget::User | HandoffTarget::None => {}
                        }
                    }
                }
            }
        });
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
