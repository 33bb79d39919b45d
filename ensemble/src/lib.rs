//! # Ensemble
//!
//! Core execution runtime for declarative multi-agent workflows: load a
//! workflow manifest (agents, tools, handoffs, context variables, structured
//! outputs, orchestration policy), run the conversation between LLM-backed
//! agents, and stream typed `chat.*` events with ordered, resumable,
//! per-session delivery.
//!
//! ## Main modules
//!
//! - [`manifest`]: workflow folder loading, schema records, cross-reference
//!   validation, startup discovery cache ([`WorkflowConfig`], [`WorkflowCache`]).
//! - [`context`]: per-session variable store with trigger-based mutation and
//!   per-agent read filtering ([`ContextStore`], [`ContextSource`]).
//! - [`tools`]: the [`Tool`] trait, [`ToolSet`] registration, and per-workflow
//!   [`ToolRegistry`] binding (backend vs UI tools, auto-invoke).
//! - [`store`]: per-tenant persistence ([`SessionStore`], [`SqliteSessionStore`],
//!   [`MemorySessionStore`]) — append-only event logs, usage, state blobs.
//! - [`dispatch`]: per-session FIFO event routing to transport, persistence,
//!   and observability ([`EventDispatcher`], [`OutboundChannel`]).
//! - [`coordinator`]: pending input / UI tool rendezvous ([`Coordinator`]).
//! - [`engine`]: the conversation engine contract and the built-in
//!   [`TurnEngine`] (plus [`ScriptedEngine`] for deterministic tests).
//! - [`orchestrator`]: session startup and the engine event loop
//!   ([`Orchestrator`], [`SessionHandle`]).
//! - [`llm`]: [`LlmClient`] trait with [`MockLlm`] and [`ChatOpenAI`].
//!
//! The wire protocol lives in the `chat-event` crate; the WebSocket/HTTP
//! surface lives in the `serve` crate.

pub mod context;
pub mod coordinator;
pub mod dispatch;
pub mod engine;
pub mod llm;
pub mod manifest;
pub mod message;
pub mod orchestrator;
pub mod session;
pub mod store;
pub mod tools;
pub mod usage;

#[cfg(test)]
pub(crate) mod transport_test_support;

pub use context::{ContextHandle, ContextSource, ContextStore, SqliteContextSource};
pub use coordinator::{Coordinator, CoordinatorError, Resolution, TIMEOUT_SENTINEL};
pub use dispatch::{
    spawn_dispatcher, DeliverOutcome, EventDispatcher, OutboundChannel, SessionRef,
    VisibilityPolicy,
};
pub use engine::{
    ConversationEngine, EngineAgent, EngineError, EngineEvent, EngineHooks, EngineSetup,
    EngineStream, HandoffEvaluator, HandoffPhase, HandoffTarget, InputBroker, ScriptStep,
    ScriptedEngine, TurnEngine,
};
pub use llm::{ChatOpenAI, LlmClient, LlmError, LlmResponse, LlmToolCall, LlmUsage, MockLlm};
pub use manifest::{ManifestError, WorkflowCache, WorkflowConfig};
pub use message::Message;
pub use orchestrator::{
    Orchestrator, OrchestratorError, RuleBasedHandoffs, RuntimeOptions, SessionHandle,
    SessionStart,
};
pub use session::{cache_seed, SessionMeta, SessionStatus};
pub use store::{
    AggregateMetrics, ChatMetrics, MemorySessionStore, SessionStore, SqliteSessionStore,
    StoreError, StoredEvent,
};
pub use tools::{
    OrderLookupTool, Tool, ToolBinding, ToolCallContext, ToolError, ToolOutput, ToolRegistry,
    ToolSet,
};
pub use usage::{AgentLatency, UsageDelta, UsageTotals};
