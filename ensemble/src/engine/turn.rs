//! Built-in turn-based engine: select speaker, run hooks, call the LLM, run
//! tools (UI tools suspend for the client), evaluate handoffs, repeat until a
//! termination condition fires.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{
    ConversationEngine, EngineAgent, EngineError, EngineEvent, EngineSetup, EngineStream,
    HandoffPhase, HandoffTarget,
};
use crate::coordinator::{Resolution, TIMEOUT_SENTINEL};
use crate::llm::{LlmResponse, LlmToolCall};
use crate::manifest::ToolType;
use crate::message::Message;
use crate::tools::{ToolCallContext, ToolOutput};
use crate::usage::UsageDelta;
use chat_event::ErrorCode;

const EVENT_QUEUE_CAPACITY: usize = 64;

pub struct TurnEngine;

impl TurnEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TurnEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationEngine for TurnEngine {
    async fn run(&self, setup: EngineSetup) -> Result<EngineStream, EngineError> {
        if setup.agents.is_empty() {
            return Err(EngineError::AgentInit("no agents configured".to_string()));
        }
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        tokio::spawn(run_loop(setup, tx));
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

async fn send(tx: &mpsc::Sender<EngineEvent>, event: EngineEvent) {
    if tx.send(event).await.is_err() {
        tracing::debug!("engine stream receiver dropped");
    }
}

fn agent<'a>(setup: &'a EngineSetup, name: &str) -> Option<&'a EngineAgent> {
    setup.agents.iter().find(|a| a.spec.name == name)
}

fn snapshot(transcript: &[Message]) -> EngineEvent {
    let state = serde_json::json!({ "messages": transcript });
    EngineEvent::StateSnapshot { state }
}

/// Outcome of waiting for user input: `false` means the session aborted and
/// the run must end without a completion event.
async fn wait_for_user(
    setup: &EngineSetup,
    tx: &mpsc::Sender<EngineEvent>,
    current: &str,
    transcript: &mut Vec<Message>,
) -> bool {
    let prompt = transcript
        .iter()
        .rev()
        .find_map(|m| match m {
            Message::Assistant(c) => Some(c.clone()),
            _ => None,
        })
        .unwrap_or_else(|| "Your turn.".to_string());

    // Register first: a reply racing the event must find the pending entry.
    let (request_id, rx) = setup.hooks.input.request_input().await;
    send(
        tx,
        EngineEvent::InputRequest {
            agent: current.to_string(),
            request_id,
            prompt,
        },
    )
    .await;

    let resolution = tokio::select! {
        res = rx => res,
        _ = setup.cancel.cancelled() => return false,
    };
    match resolution {
        Ok(Resolution::Reply(value)) => {
            let text = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
            transcript.push(Message::user(text));
            true
        }
        Ok(Resolution::Timeout) => {
            transcript.push(Message::user(TIMEOUT_SENTINEL));
            true
        }
        Ok(Resolution::Aborted) | Err(_) => false,
    }
}

/// Runs one tool call. Returns `false` when the session aborted mid-wait.
async fn run_tool_call(
    setup: &EngineSetup,
    tx: &mpsc::Sender<EngineEvent>,
    current: &str,
    call: &LlmToolCall,
    transcript: &mut Vec<Message>,
) -> bool {
    let Some(binding) = setup.registry.binding(&call.name) else {
        send(
            tx,
            EngineEvent::ToolResponse {
                agent: current.to_string(),
                tool: call.name.clone(),
                call_id: call.call_id.clone(),
                content: Value::String(format!("unknown tool: {}", call.name)),
                success: false,
            },
        )
        .await;
        return true;
    };
    let binding = binding.clone();

    let ctx = ToolCallContext {
        chat_id: setup.chat_id.clone(),
        agent: current.to_string(),
        context: match setup.context.lock() {
            Ok(store) => store.expose_for(current),
            Err(_) => HashMap::new(),
        },
    };

    let output = setup
        .registry
        .invoke(&call.name, call.arguments.clone(), &ctx)
        .await;

    match output {
        Ok(ToolOutput::Value(value)) => {
            if binding.tool_type == ToolType::Backend {
                send(
                    tx,
                    EngineEvent::ToolCall {
                        agent: current.to_string(),
                        tool: call.name.clone(),
                        call_id: call.call_id.clone(),
                        payload: call.arguments.clone(),
                        component: None,
                        display: None,
                        awaiting_response: false,
                    },
                )
                .await;
            }
            send(
                tx,
                EngineEvent::ToolResponse {
                    agent: current.to_string(),
                    tool: call.name.clone(),
                    call_id: call.call_id.clone(),
                    content: value.clone(),
                    success: true,
                },
            )
            .await;
            transcript.push(Message::tool_result(&call.name, value.to_string()));
            true
        }
        Ok(ToolOutput::Ui {
            component,
            mode,
            payload,
        }) => {
            // Park the pending entry before surfacing the call.
            let rx = setup
                .hooks
                .input
                .request_ui_tool(&call.call_id, &call.name)
                .await;
            send(
                tx,
                EngineEvent::ToolCall {
                    agent: current.to_string(),
                    tool: call.name.clone(),
                    call_id: call.call_id.clone(),
                    payload,
                    component: Some(component),
                    display: Some(mode),
                    awaiting_response: true,
                },
            )
            .await;
            let resolution = tokio::select! {
                res = rx => res,
                _ = setup.cancel.cancelled() => return false,
            };
            match resolution {
                Ok(Resolution::Reply(value)) => {
                    send(
                        tx,
                        EngineEvent::ToolResponse {
                            agent: current.to_string(),
                            tool: call.name.clone(),
                            call_id: call.call_id.clone(),
                            content: value.clone(),
                            success: true,
                        },
                    )
                    .await;
                    transcript.push(Message::tool_result(&call.name, value.to_string()));
                    true
                }
                Ok(Resolution::Timeout) => {
                    send(
                        tx,
                        EngineEvent::ToolResponse {
                            agent: current.to_string(),
                            tool: call.name.clone(),
                            call_id: call.call_id.clone(),
                            content: Value::String(TIMEOUT_SENTINEL.to_string()),
                            success: false,
                        },
                    )
                    .await;
                    transcript.push(Message::tool_result(&call.name, TIMEOUT_SENTINEL));
                    true
                }
                Ok(Resolution::Aborted) | Err(_) => false,
            }
        }
        Err(e) => {
            send(
                tx,
                EngineEvent::Error {
                    message: e.to_string(),
                    code: ErrorCode::ToolExecutionError,
                    recoverable: true,
                },
            )
            .await;
            send(
                tx,
                EngineEvent::ToolResponse {
                    agent: current.to_string(),
                    tool: call.name.clone(),
                    call_id: call.call_id.clone(),
                    content: Value::String(e.to_string()),
                    success: false,
                },
            )
            .await;
            transcript.push(Message::tool_result(&call.name, e.to_string()));
            true
        }
    }
}

/// Appends synthesized auto-invoke tool calls for a structured output that
/// designates a tool.
fn auto_invoke_calls(
    setup: &EngineSetup,
    current: &str,
    output: &Value,
    existing: &[LlmToolCall],
) -> Vec<LlmToolCall> {
    let mut out = Vec::new();
    for so in setup
        .structured_outputs
        .iter()
        .filter(|so| so.agent == current)
    {
        let Some(tool) = &so.tool else { continue };
        if existing.iter().any(|c| &c.name == tool) {
            continue;
        }
        let auto = setup
            .registry
            .binding(tool)
            .map(|b| b.auto_invoke)
            .unwrap_or(false);
        if auto {
            out.push(LlmToolCall {
                call_id: format!("auto-{}", uuid::Uuid::new_v4()),
                name: tool.clone(),
                arguments: output.clone(),
            });
        }
    }
    out
}

async fn run_loop(setup: EngineSetup, tx: mpsc::Sender<EngineEvent>) {
    let mut transcript: Vec<Message> = setup.initial_messages.clone();
    let mut current = setup.agents[0].spec.name.clone();
    let mut auto_replies: HashMap<String, u32> = HashMap::new();
    let mut turns: u32 = 0;
    let mut reason: Option<String> = None;

    if setup.user_driven_start && !wait_for_user(&setup, &tx, &current, &mut transcript).await {
        send(&tx, snapshot(&transcript)).await;
        return;
    }

    loop {
        if setup.cancel.is_cancelled() {
            send(&tx, snapshot(&transcript)).await;
            return;
        }
        if turns >= setup.max_turns {
            reason = Some("max_turns".to_string());
            break;
        }
        turns += 1;

        send(
            &tx,
            EngineEvent::SelectSpeaker {
                agent: current.clone(),
            },
        )
        .await;

        let Some(speaker) = agent(&setup, &current) else {
            send(
                &tx,
                EngineEvent::Error {
                    message: format!("handoff to unknown agent {}", current),
                    code: ErrorCode::AgentInitializationFailed,
                    recoverable: false,
                },
            )
            .await;
            reason = Some("engine_error".to_string());
            break;
        };

        let system = setup
            .hooks
            .before_call
            .effective_system_message(&current, &speaker.spec.system_message);
        let tool_specs = setup.registry.specs_for(&speaker.spec.tools);

        let started = Instant::now();
        let response = tokio::time::timeout(
            setup.llm_timeout,
            speaker.llm.invoke(&system, &transcript, &tool_specs),
        )
        .await;
        let duration_sec = started.elapsed().as_secs_f64();

        let LlmResponse {
            content,
            mut tool_calls,
            usage,
            model,
        } = match response {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => {
                send(
                    &tx,
                    EngineEvent::Error {
                        message: e.to_string(),
                        code: ErrorCode::AgentInitializationFailed,
                        recoverable: false,
                    },
                )
                .await;
                reason = Some("engine_error".to_string());
                break;
            }
            Err(_) => {
                send(
                    &tx,
                    EngineEvent::Error {
                        message: format!("llm call for {} timed out", current),
                        code: ErrorCode::AgentInitializationFailed,
                        recoverable: false,
                    },
                )
                .await;
                reason = Some("engine_error".to_string());
                break;
            }
        };

        send(
            &tx,
            EngineEvent::Text {
                agent: current.clone(),
                content: content.clone(),
            },
        )
        .await;
        transcript.push(Message::assistant(content.clone()));
        // Context triggers land before any handoff below reads them.
        (setup.hooks.on_text)(&current, &content);

        if let Some(usage) = usage {
            send(
                &tx,
                EngineEvent::Usage(UsageDelta {
                    prompt_tokens: usage.prompt_tokens,
                    completion_tokens: usage.completion_tokens,
                    total_tokens: usage.total_tokens,
                    cached: false,
                    duration_sec,
                    agent: current.clone(),
                    model: model.unwrap_or_default(),
                    cost: 0.0,
                }),
            )
            .await;
        }

        if speaker.spec.structured_outputs_required {
            match serde_json::from_str::<Value>(&content) {
                Ok(output) => {
                    send(
                        &tx,
                        EngineEvent::StructuredOutput {
                            agent: current.clone(),
                            output: output.clone(),
                        },
                    )
                    .await;
                    tool_calls.extend(auto_invoke_calls(&setup, &current, &output, &tool_calls));
                }
                Err(e) => {
                    tracing::warn!(agent = %current, "expected structured output: {}", e);
                }
            }
        }

        let mut target = setup.hooks.handoffs.next(&current, HandoffPhase::AfterText).await;

        for call in &tool_calls {
            if !run_tool_call(&setup, &tx, &current, call, &mut transcript).await {
                send(&tx, snapshot(&transcript)).await;
                return;
            }
        }

        let replies = auto_replies.entry(current.clone()).or_insert(0);
        *replies += 1;
        if *replies > speaker.spec.max_consecutive_auto_reply {
            reason = Some("max_consecutive_auto_replies".to_string());
            break;
        }

        if let Some(termination_reason) = setup.hooks.termination.should_terminate() {
            reason = Some(termination_reason);
            break;
        }

        if target == HandoffTarget::None {
            target = setup.hooks.handoffs.next(&current, HandoffPhase::AfterWork).await;
        }

        match target {
            HandoffTarget::Agent(next) => current = next,
            HandoffTarget::Terminate => {
                reason = Some("terminate".to_string());
                break;
            }
            HandoffTarget::User => {
                if !wait_for_user(&setup, &tx, &current, &mut transcript).await {
                    send(&tx, snapshot(&transcript)).await;
                    return;
                }
                // Human input resets the consecutive auto-reply counters.
                auto_replies.clear();
            }
            HandoffTarget::None => {
                reason = Some("no_handoff".to_string());
                break;
            }
        }
    }

    send(&tx, snapshot(&transcript)).await;
    send(
        &tx,
        EngineEvent::RunComplete {
            reason: reason.unwrap_or_else(|| "terminate".to_string()),
        },
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextStore;
    use crate::engine::{BeforeCallHook, EngineHooks, HandoffEvaluator, InputBroker, TerminationCheck};
    use crate::llm::MockLlm;
    use crate::manifest::AgentSpec;
    use crate::tools::{ToolRegistry, ToolSet};
    use futures_util::StreamExt;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::oneshot;
    use tokio_util::sync::CancellationToken;

    struct LinearHandoffs {
        chain: Vec<(String, HandoffTarget)>,
    }

    #[async_trait]
    impl HandoffEvaluator for LinearHandoffs {
        async fn next(&self, source: &str, phase: HandoffPhase) -> HandoffTarget {
            if phase == HandoffPhase::AfterText {
                return HandoffTarget::None;
            }
            self.chain
                .iter()
                .find(|(s, _)| s == source)
                .map(|(_, t)| t.clone())
                .unwrap_or(HandoffTarget::None)
        }
    }

    struct NoInput;

    #[async_trait]
    impl InputBroker for NoInput {
        async fn request_input(&self) -> (String, oneshot::Receiver<Resolution>) {
            let (tx, rx) = oneshot::channel();
            tx.send(Resolution::Reply(serde_json::json!("hi"))).ok();
            ("r".to_string(), rx)
        }

        async fn request_ui_tool(
            &self,
            _call_id: &str,
            _tool: &str,
        ) -> oneshot::Receiver<Resolution> {
            let (tx, rx) = oneshot::channel();
            tx.send(Resolution::Reply(serde_json::json!({}))).ok();
            rx
        }
    }

    struct PlainSystem;

    impl BeforeCallHook for PlainSystem {
        fn effective_system_message(&self, _agent: &str, base: &str) -> String {
            base.to_string()
        }
    }

    struct NeverTerminate;

    impl TerminationCheck for NeverTerminate {
        fn should_terminate(&self) -> Option<String> {
            None
        }
    }

    fn agent_spec(name: &str) -> AgentSpec {
        serde_json::from_value(serde_json::json!({
            "name": name, "system_message": "test"
        }))
        .unwrap()
    }

    async fn setup_with(
        agents: Vec<EngineAgent>,
        chain: Vec<(String, HandoffTarget)>,
    ) -> EngineSetup {
        let texts: Arc<StdMutex<Vec<(String, String)>>> = Arc::default();
        let texts_clone = texts.clone();
        EngineSetup {
            chat_id: "c1".to_string(),
            agents,
            registry: Arc::new(ToolRegistry::from_manifest(&[], &ToolSet::new()).unwrap()),
            context: Arc::new(StdMutex::new(
                ContextStore::initialize(&[], None).await.unwrap(),
            )),
            hooks: EngineHooks {
                handoffs: Arc::new(LinearHandoffs { chain }),
                input: Arc::new(NoInput),
                before_call: Arc::new(PlainSystem),
                termination: Arc::new(NeverTerminate),
                on_text: Arc::new(move |agent, text| {
                    texts_clone
                        .lock()
                        .unwrap()
                        .push((agent.to_string(), text.to_string()));
                }),
            },
            structured_outputs: vec![],
            initial_messages: vec![Message::user("go")],
            user_driven_start: false,
            max_turns: 10,
            llm_timeout: std::time::Duration::from_secs(5),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn linear_two_agent_pipeline_terminates() {
        let agents = vec![
            EngineAgent {
                spec: agent_spec("a"),
                llm: Arc::new(MockLlm::fixed("from a")),
            },
            EngineAgent {
                spec: agent_spec("b"),
                llm: Arc::new(MockLlm::fixed("from b")),
            },
        ];
        let chain = vec![
            ("a".to_string(), HandoffTarget::Agent("b".to_string())),
            ("b".to_string(), HandoffTarget::Terminate),
        ];
        let engine = TurnEngine::new();
        let mut stream = engine.run(setup_with(agents, chain).await).await.unwrap();

        let mut kinds = Vec::new();
        while let Some(ev) = stream.next().await {
            kinds.push(match &ev {
                EngineEvent::SelectSpeaker { agent } => format!("select:{agent}"),
                EngineEvent::Text { agent, .. } => format!("text:{agent}"),
                EngineEvent::Usage(_) => "usage".to_string(),
                EngineEvent::StateSnapshot { .. } => "state".to_string(),
                EngineEvent::RunComplete { reason } => format!("complete:{reason}"),
                other => format!("{other:?}"),
            });
        }
        assert_eq!(
            kinds,
            vec![
                "select:a", "text:a", "usage", "select:b", "text:b", "usage", "state",
                "complete:terminate"
            ]
        );
    }

    #[tokio::test]
    async fn max_turns_caps_the_run() {
        let agents = vec![EngineAgent {
            spec: agent_spec("a"),
            llm: Arc::new(MockLlm::fixed("again")),
        }];
        // a always hands back to itself.
        let chain = vec![("a".to_string(), HandoffTarget::Agent("a".to_string()))];
        let mut setup = setup_with(agents, chain).await;
        setup.max_turns = 3;
        let engine = TurnEngine::new();
        let mut stream = engine.run(setup).await.unwrap();
        let mut complete_reason = None;
        let mut text_count = 0;
        while let Some(ev) = stream.next().await {
            match ev {
                EngineEvent::Text { .. } => text_count += 1,
                EngineEvent::RunComplete { reason } => complete_reason = Some(reason),
                _ => {}
            }
        }
        assert_eq!(text_count, 3);
        assert_eq!(complete_reason.as_deref(), Some("max_turns"));
    }

    #[tokio::test]
    async fn no_matching_handoff_ends_the_run() {
        let agents = vec![EngineAgent {
            spec: agent_spec("a"),
            llm: Arc::new(MockLlm::fixed("alone")),
        }];
        let engine = TurnEngine::new();
        let mut stream = engine.run(setup_with(agents, vec![]).await).await.unwrap();
        let mut complete_reason = None;
        while let Some(ev) = stream.next().await {
            if let EngineEvent::RunComplete { reason } = ev {
                complete_reason = Some(reason);
            }
        }
        assert_eq!(complete_reason.as_deref(), Some("no_handoff"));
    }

    #[tokio::test]
    async fn empty_agent_list_is_rejected() {
        let engine = TurnEngine::new();
        let err = engine.run(setup_with(vec![], vec![]).await).await;
        assert!(matches!(err, Err(EngineError::AgentInit(_))));
    }
}
