//! Session orchestration: builds the agent graph from a workflow config,
//! drives the engine, and routes its event stream through the dispatcher.

mod handoff;
mod hooks;

pub use handoff::RuleBasedHandoffs;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chat_event::{ChatEvent, DisplayMode, ErrorCode, RunEvent};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::context::{ContextError, ContextHandle, ContextSource, ContextStore};
use crate::coordinator::Coordinator;
use crate::dispatch::{
    spawn_dispatcher, EventDispatcher, OutboundChannel, SessionRef, VisibilityPolicy,
};
use crate::engine::{
    ConversationEngine, EngineAgent, EngineError, EngineEvent, EngineHooks, EngineSetup,
};
use crate::llm::LlmClient;
use crate::manifest::{ManifestError, StartupMode, WorkflowConfig};
use crate::message::Message;
use crate::session::{SessionMeta, SessionStatus};
use crate::store::{SessionStore, StoreError};
use crate::tools::{ToolError, ToolRegistry, ToolSet};
use crate::usage::{UsageDelta, UsageTotals};
use hooks::{ContextSystemMessage, ContextTermination, CoordinatorBroker};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Tools(#[from] ToolError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Timeouts and capacities for session runs. All defaults are overridable
/// through the server config.
#[derive(Clone, Debug)]
pub struct RuntimeOptions {
    pub input_deadline: Duration,
    pub ui_tool_deadline: Duration,
    pub llm_timeout: Duration,
    pub mailbox_capacity: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            input_deadline: Duration::from_secs(300),
            ui_tool_deadline: Duration::from_secs(600),
            llm_timeout: Duration::from_secs(120),
            mailbox_capacity: 128,
        }
    }
}

/// Request to start (or restart) one session.
pub struct SessionStart {
    pub tenant_id: String,
    pub user_id: String,
    pub workflow: Arc<WorkflowConfig>,
    /// Reuse an existing id (idempotent start / resume); a fresh one is
    /// generated when absent.
    pub chat_id: Option<String>,
}

/// Live session: the dispatcher handle for inbound routing and the cancel
/// token ending the run.
pub struct SessionHandle {
    pub chat_id: String,
    pub cache_seed: u32,
    pub events: EventDispatcher,
    pub cancel: CancellationToken,
    pub join: tokio::task::JoinHandle<()>,
}

impl SessionHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

pub struct Orchestrator {
    store: Arc<dyn SessionStore>,
    outbound: Arc<dyn OutboundChannel>,
    coordinator: Arc<Coordinator>,
    engine: Arc<dyn ConversationEngine>,
    llm: Arc<dyn LlmClient>,
    tool_set: Arc<ToolSet>,
    context_source: Option<Arc<dyn ContextSource>>,
    options: RuntimeOptions,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        outbound: Arc<dyn OutboundChannel>,
        coordinator: Arc<Coordinator>,
        engine: Arc<dyn ConversationEngine>,
        llm: Arc<dyn LlmClient>,
        tool_set: Arc<ToolSet>,
        options: RuntimeOptions,
    ) -> Self {
        Self {
            store,
            outbound,
            coordinator,
            engine,
            llm,
            tool_set,
            context_source: None,
            options,
        }
    }

    pub fn with_context_source(mut self, source: Arc<dyn ContextSource>) -> Self {
        self.context_source = Some(source);
        self
    }

    /// Starts one session end to end: creates the record, initializes context
    /// and tools, seeds the startup message, launches the engine, and spawns
    /// the event loop. Returns once the run is underway.
    pub async fn start_session(
        &self,
        start: SessionStart,
    ) -> Result<SessionHandle, OrchestratorError> {
        let config = start.workflow;
        let chat_id = start
            .chat_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let meta = SessionMeta::new(
            chat_id.clone(),
            start.tenant_id.clone(),
            start.user_id.clone(),
            config.name.clone(),
        );
        let cache_seed = meta.cache_seed;
        self.store.create_session(&meta).await?;

        self.outbound
            .open_session(&chat_id, VisibilityPolicy::from_workflow(&config));

        let cancel = CancellationToken::new();
        let session_ref = SessionRef {
            tenant: start.tenant_id.clone(),
            chat_id: chat_id.clone(),
        };
        let (events, _drain) = spawn_dispatcher(
            session_ref.clone(),
            Arc::clone(&self.outbound),
            Arc::clone(&self.store),
            cancel.clone(),
            self.options.mailbox_capacity,
        );

        events
            .emit_business(
                "workflow_execution_started",
                serde_json::json!({ "workflow": config.name, "tenant": start.tenant_id }),
            )
            .await;

        let mut context_store = ContextStore::initialize(
            &config.context_variables,
            self.context_source.as_deref(),
        )
        .await?;

        // A persisted conversation state means this start is a recovery.
        let mut initial_messages: Vec<Message> = Vec::new();
        let mut recovered = false;
        if let Some(state) = self
            .store
            .load_conversation_state(&start.tenant_id, &chat_id)
            .await?
        {
            if let Some(snapshot) = state.get("context") {
                context_store.restore(snapshot);
            }
            if let Some(messages) = state.get("messages") {
                initial_messages =
                    serde_json::from_value(messages.clone()).unwrap_or_default();
            }
            recovered = !initial_messages.is_empty();
            tracing::info!(chat_id = %chat_id, "recovered conversation state");
        }
        let context: ContextHandle = Arc::new(Mutex::new(context_store));

        let registry = Arc::new(ToolRegistry::from_manifest(&config.tools, &self.tool_set)?);

        let agents: Vec<EngineAgent> = config
            .agents
            .iter()
            .map(|spec| EngineAgent {
                spec: spec.clone(),
                llm: Arc::clone(&self.llm),
            })
            .collect();

        let mut user_driven_start = false;
        if !recovered {
            match config.orchestrator.startup_mode {
                StartupMode::AgentDriven => {
                    let seed = config
                        .orchestrator
                        .initial_message
                        .clone()
                        .unwrap_or_else(|| "Begin.".to_string());
                    // The seed is persisted for forensics but never reaches the
                    // client, on live delivery or on replay.
                    events
                        .emit(
                            RunEvent::new(ChatEvent::Text {
                                agent: "user".to_string(),
                                content: seed.clone(),
                            })
                            .with_agent("user")
                            .hidden(),
                        )
                        .await;
                    initial_messages.push(Message::user(seed));
                }
                StartupMode::UserDriven => {
                    user_driven_start = true;
                    if let Some(greeting) = &config.orchestrator.initial_message_to_user {
                        let agent = config
                            .agents
                            .first()
                            .map(|a| a.name.clone())
                            .unwrap_or_default();
                        events
                            .emit(
                                RunEvent::new(ChatEvent::Text {
                                    agent: agent.clone(),
                                    content: greeting.clone(),
                                })
                                .with_agent(agent),
                            )
                            .await;
                    }
                }
            }
        }

        let hooks = EngineHooks {
            handoffs: Arc::new(RuleBasedHandoffs::new(
                config.handoffs.clone(),
                context.clone(),
                Arc::clone(&self.llm),
            )),
            input: Arc::new(CoordinatorBroker {
                coordinator: Arc::clone(&self.coordinator),
                events: events.clone(),
                context: context.clone(),
                chat_id: chat_id.clone(),
                input_deadline: self.options.input_deadline,
                ui_tool_deadline: self.options.ui_tool_deadline,
            }),
            before_call: Arc::new(ContextSystemMessage {
                context: context.clone(),
            }),
            termination: Arc::new(ContextTermination {
                context: context.clone(),
                trigger: config
                    .orchestrator
                    .termination_conditions
                    .context_variable_trigger
                    .clone(),
            }),
            on_text: {
                let context = context.clone();
                Arc::new(move |agent: &str, text: &str| {
                    if let Ok(mut store) = context.lock() {
                        let writes = store.apply_agent_text(agent, text);
                        for (var, value) in writes {
                            tracing::debug!(agent, var = %var, value = %value, "agent text trigger wrote");
                        }
                    }
                })
            },
        };

        let mut max_turns = config.orchestrator.max_turns;
        if max_turns == 0 {
            max_turns = u32::MAX;
        }
        let setup = EngineSetup {
            chat_id: chat_id.clone(),
            agents,
            registry,
            context: context.clone(),
            hooks,
            structured_outputs: config.structured_outputs.clone(),
            initial_messages,
            user_driven_start,
            max_turns,
            llm_timeout: self.options.llm_timeout,
            cancel: cancel.clone(),
        };

        let stream = match self.engine.run(setup).await {
            Ok(stream) => stream,
            Err(e) => {
                events
                    .emit(RunEvent::new(ChatEvent::Error {
                        message: e.to_string(),
                        error_code: ErrorCode::AgentInitializationFailed,
                        details: None,
                        recoverable: false,
                    }))
                    .await;
                self.store
                    .set_status(&start.tenant_id, &chat_id, SessionStatus::Failed)
                    .await?;
                return Err(e.into());
            }
        };

        let join = tokio::spawn(run_event_loop(
            session_ref,
            stream,
            events.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.coordinator),
            context,
            cancel.clone(),
        ));

        Ok(SessionHandle {
            chat_id,
            cache_seed,
            events,
            cancel,
            join,
        })
    }
}

fn normalize(event: EngineEvent) -> Option<RunEvent> {
    let out = match event {
        EngineEvent::SelectSpeaker { agent } => RunEvent::new(ChatEvent::SelectSpeaker {
            agent: agent.clone(),
        })
        .with_agent(agent),
        EngineEvent::Print { agent, content } => RunEvent::new(ChatEvent::Print {
            agent: agent.clone(),
            content,
        })
        .with_agent(agent),
        EngineEvent::Text { agent, content } => RunEvent::new(ChatEvent::Text {
            agent: agent.clone(),
            content,
        })
        .with_agent(agent),
        EngineEvent::InputRequest {
            agent,
            request_id,
            prompt,
        } => RunEvent::new(ChatEvent::InputRequest {
            request_id: request_id.clone(),
            prompt,
        })
        .with_agent(agent)
        .with_corr(request_id),
        EngineEvent::ToolCall {
            agent,
            tool,
            call_id,
            payload,
            component,
            display,
            awaiting_response,
        } => RunEvent::new(ChatEvent::ToolCall {
            tool_name: tool,
            component_type: component,
            awaiting_response,
            payload,
            display: display.unwrap_or(DisplayMode::Inline),
        })
        .with_agent(agent)
        .with_corr(call_id),
        EngineEvent::ToolResponse {
            agent,
            tool,
            call_id,
            content,
            success,
        } => RunEvent::new(ChatEvent::ToolResponse {
            tool_name: tool,
            content,
            success,
        })
        .with_agent(agent)
        .with_corr(call_id),
        EngineEvent::ToolProgress {
            agent,
            tool,
            progress_percent,
            status_message,
        } => RunEvent::new(ChatEvent::ToolProgress {
            tool_name: tool,
            progress_percent,
            status_message,
        })
        .with_agent(agent),
        EngineEvent::StructuredOutput { agent, output } => {
            RunEvent::new(ChatEvent::StructuredOutputReady {
                agent: agent.clone(),
                output,
            })
            .with_agent(agent)
        }
        EngineEvent::Usage(delta) => RunEvent::new(ChatEvent::UsageDelta {
            prompt_tokens: delta.prompt_tokens,
            completion_tokens: delta.completion_tokens,
            total_tokens: delta.total_tokens,
            cached: delta.cached,
            duration_sec: delta.duration_sec,
            agent: delta.agent,
            model: delta.model,
        }),
        EngineEvent::RunComplete { reason } => {
            RunEvent::new(ChatEvent::RunComplete { reason })
        }
        EngineEvent::Error {
            message,
            code,
            recoverable,
        } => RunEvent::new(ChatEvent::Error {
            message,
            error_code: code,
            details: None,
            recoverable,
        }),
        // Handled by the event loop, never forwarded.
        EngineEvent::StateSnapshot { .. } => return None,
    };
    Some(out)
}

#[allow(clippy::too_many_arguments)]
async fn run_event_loop(
    session: SessionRef,
    mut stream: crate::engine::EngineStream,
    events: EventDispatcher,
    store: Arc<dyn SessionStore>,
    coordinator: Arc<Coordinator>,
    context: ContextHandle,
    cancel: CancellationToken,
) {
    use futures_util::StreamExt;

    let mut totals = UsageTotals::default();
    let mut state_snapshot: Option<Value> = None;
    let mut waiting_for_input = false;
    let mut outcome: Option<SessionStatus> = None;

    while let Some(engine_event) = stream.next().await {
        // Any progress after a pending input means the agent resumed.
        if waiting_for_input && !matches!(engine_event, EngineEvent::InputRequest { .. }) {
            waiting_for_input = false;
            set_status(&store, &session, SessionStatus::Running).await;
        }

        match &engine_event {
            EngineEvent::Usage(delta) => {
                totals.add(delta);
                record_usage(&store, &session, delta).await;
            }
            EngineEvent::InputRequest { .. } => {
                waiting_for_input = true;
                set_status(&store, &session, SessionStatus::WaitingForInput).await;
            }
            EngineEvent::StateSnapshot { state } => {
                state_snapshot = Some(state.clone());
            }
            EngineEvent::RunComplete { .. } => {
                // Summary precedes completion so clients can render totals
                // before tearing the stream down.
                events
                    .emit(RunEvent::new(ChatEvent::UsageSummary {
                        prompt_tokens: totals.prompt_tokens,
                        completion_tokens: totals.completion_tokens,
                        total_tokens: totals.total_tokens,
                        cost: totals.cost,
                    }))
                    .await;
                outcome = Some(SessionStatus::Completed);
            }
            EngineEvent::Error { recoverable, .. } if !*recoverable => {
                outcome = Some(SessionStatus::Failed);
            }
            _ => {}
        }

        let terminal = matches!(
            &engine_event,
            EngineEvent::RunComplete { .. }
                | EngineEvent::Error {
                    recoverable: false,
                    ..
                }
        );
        if let Some(run_event) = normalize(engine_event) {
            events.emit(run_event).await;
        }
        if terminal {
            if outcome == Some(SessionStatus::Failed) {
                events
                    .emit(RunEvent::new(ChatEvent::RunComplete {
                        reason: "engine_error".to_string(),
                    }))
                    .await;
            }
            break;
        }
    }

    // A stream that ended without a terminal event was cancelled or lost its
    // engine; surface that to any attached client.
    if outcome.is_none() {
        let reason = if cancel.is_cancelled() {
            "cancelled"
        } else {
            "engine_error"
        };
        events
            .emit(RunEvent::new(ChatEvent::Error {
                message: format!("run ended: {}", reason),
                error_code: ErrorCode::TransportError,
                details: None,
                recoverable: false,
            }))
            .await;
        events
            .emit(RunEvent::new(ChatEvent::RunComplete {
                reason: reason.to_string(),
            }))
            .await;
        outcome = Some(SessionStatus::Failed);
    }

    // Pending inputs and UI tools never resolve once the run is over.
    coordinator.abort_session(&session.chat_id);

    if let Err(e) = store
        .record_final_usage(&session.tenant, &session.chat_id, &totals)
        .await
    {
        tracing::warn!(chat_id = %session.chat_id, "final usage write failed: {}", e);
    }

    let context_snapshot = context
        .lock()
        .map(|store| store.snapshot())
        .unwrap_or(Value::Null);
    let state = serde_json::json!({
        "messages": state_snapshot.and_then(|s| s.get("messages").cloned()).unwrap_or(Value::Array(Vec::new())),
        "context": context_snapshot,
    });
    if let Err(e) = store
        .save_conversation_state(&session.tenant, &session.chat_id, &state)
        .await
    {
        tracing::warn!(chat_id = %session.chat_id, "conversation state save failed: {}", e);
    }

    let status = outcome.unwrap_or(SessionStatus::Failed);
    set_status(&store, &session, status).await;
    events
        .emit_business(
            "workflow_execution_finished",
            serde_json::json!({ "status": status.as_str() }),
        )
        .await;
}

async fn set_status(store: &Arc<dyn SessionStore>, session: &SessionRef, status: SessionStatus) {
    if let Err(e) = store
        .set_status(&session.tenant, &session.chat_id, status)
        .await
    {
        tracing::warn!(chat_id = %session.chat_id, "status update failed: {}", e);
    }
}

async fn record_usage(store: &Arc<dyn SessionStore>, session: &SessionRef, delta: &UsageDelta) {
    if let Err(e) = store
        .record_usage(&session.tenant, &session.chat_id, delta)
        .await
    {
        tracing::warn!(chat_id = %session.chat_id, "usage write failed: {}", e);
    }
}
