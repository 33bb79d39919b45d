//! Conversation engine contract.
//!
//! The orchestrator treats the engine as a library: given agents, hooks, and
//! initial messages, `run` yields an async stream of tagged events. Hooks
//! expose the three seams the runtime owns — system-message mutation before
//! each LLM call, handoff evaluation, and the input/UI-tool rendezvous.

mod scripted;
mod turn;

pub use scripted::{ScriptStep, ScriptedEngine};
pub use turn::TurnEngine;

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chat_event::{DisplayMode, ErrorCode};
use futures_util::Stream;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::context::ContextHandle;
use crate::coordinator::Resolution;
use crate::llm::LlmClient;
use crate::manifest::{AgentSpec, StructuredOutputSpec};
use crate::message::Message;
use crate::tools::ToolRegistry;
use crate::usage::UsageDelta;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("agent setup: {0}")]
    AgentInit(String),
}

/// Events produced by an engine run, in emission order.
#[derive(Clone, Debug)]
pub enum EngineEvent {
    SelectSpeaker {
        agent: String,
    },
    Print {
        agent: String,
        content: String,
    },
    Text {
        agent: String,
        content: String,
    },
    InputRequest {
        agent: String,
        request_id: String,
        prompt: String,
    },
    ToolCall {
        agent: String,
        tool: String,
        call_id: String,
        payload: Value,
        component: Option<String>,
        display: Option<DisplayMode>,
        awaiting_response: bool,
    },
    ToolResponse {
        agent: String,
        tool: String,
        call_id: String,
        content: Value,
        success: bool,
    },
    ToolProgress {
        agent: String,
        tool: String,
        progress_percent: u8,
        status_message: String,
    },
    StructuredOutput {
        agent: String,
        output: Value,
    },
    Usage(UsageDelta),
    /// Serialized conversation state, emitted before the stream ends so the
    /// orchestrator can persist it for resume.
    StateSnapshot {
        state: Value,
    },
    RunComplete {
        reason: String,
    },
    Error {
        message: String,
        code: ErrorCode,
        recoverable: bool,
    },
}

pub type EngineStream = Pin<Box<dyn Stream<Item = EngineEvent> + Send>>;

/// Which phase of a turn a handoff evaluation belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandoffPhase {
    /// Right after the agent's text, before its tools run.
    AfterText,
    /// After the agent's tool invocations have fully completed.
    AfterWork,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandoffTarget {
    Agent(String),
    User,
    Terminate,
    /// No rule matched.
    None,
}

/// Evaluates declared handoff rules for one source agent.
#[async_trait]
pub trait HandoffEvaluator: Send + Sync {
    async fn next(&self, source_agent: &str, phase: HandoffPhase) -> HandoffTarget;
}

/// Registers pending input / UI tool requests with the coordinator. The entry
/// must be registered before the corresponding event is emitted, so a fast
/// client reply always finds it.
#[async_trait]
pub trait InputBroker: Send + Sync {
    /// Allocates a request id and parks a pending input request.
    async fn request_input(&self) -> (String, oneshot::Receiver<Resolution>);

    /// Parks a pending UI tool call under `call_id`.
    async fn request_ui_tool(&self, call_id: &str, tool: &str)
        -> oneshot::Receiver<Resolution>;
}

/// Runs before each LLM call; may extend the agent's system message from
/// read-only context state.
pub trait BeforeCallHook: Send + Sync {
    fn effective_system_message(&self, agent: &str, base: &str) -> String;
}

/// Checked after each turn; a `Some(reason)` ends the run.
pub trait TerminationCheck: Send + Sync {
    fn should_terminate(&self) -> Option<String>;
}

/// The orchestrator-owned seams handed to the engine.
pub struct EngineHooks {
    pub handoffs: Arc<dyn HandoffEvaluator>,
    pub input: Arc<dyn InputBroker>,
    pub before_call: Arc<dyn BeforeCallHook>,
    pub termination: Arc<dyn TerminationCheck>,
    /// Invoked synchronously right after each finalized text turn, before any
    /// handoff evaluation, so context-variable triggers land first.
    pub on_text: Arc<dyn Fn(&str, &str) + Send + Sync>,
}

/// One agent as the engine runs it.
pub struct EngineAgent {
    pub spec: AgentSpec,
    pub llm: Arc<dyn LlmClient>,
}

pub struct EngineSetup {
    pub chat_id: String,
    pub agents: Vec<EngineAgent>,
    pub registry: Arc<ToolRegistry>,
    pub context: ContextHandle,
    pub hooks: EngineHooks,
    pub structured_outputs: Vec<StructuredOutputSpec>,
    /// Transcript to start from (seed message, or a restored session).
    pub initial_messages: Vec<Message>,
    /// When true the run begins by requesting user input.
    pub user_driven_start: bool,
    pub max_turns: u32,
    pub llm_timeout: Duration,
    pub cancel: CancellationToken,
}

/// The conversation engine contract.
#[async_trait]
pub trait ConversationEngine: Send + Sync {
    async fn run(&self, setup: EngineSetup) -> Result<EngineStream, EngineError>;
}
