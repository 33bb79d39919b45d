//! Tools callable by agents.
//!
//! Backend tools are native implementations of [`Tool`] registered at startup;
//! their return value flows back to the engine as the tool result. UI tools
//! emit a `chat.tool_call` to the client and suspend the agent until the
//! coordinator resolves the client's response, which becomes the tool result.

mod order_lookup;
mod registry;

pub use order_lookup::OrderLookupTool;
pub use registry::{ToolBinding, ToolRegistry, ToolSet};

use std::collections::HashMap;

use async_trait::async_trait;
use chat_event::DisplayMode;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    NotFound(String),
    #[error("tool {name} has no registered implementation")]
    NotImplemented { name: String },
    #[error("invalid arguments for {name}: {reason}")]
    InvalidArgs { name: String, reason: String },
    #[error("tool {name} failed: {reason}")]
    Execution { name: String, reason: String },
}

/// Specification shown to the LLM: name, description, argument schema.
#[derive(Clone, Debug, serde::Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

/// Per-call context: session identity plus the context variables exposed to
/// the calling agent.
#[derive(Clone, Debug)]
pub struct ToolCallContext {
    pub chat_id: String,
    pub agent: String,
    pub context: HashMap<String, Value>,
}

/// What a tool call produced.
#[derive(Debug)]
pub enum ToolOutput {
    /// Backend result, returned to the engine directly.
    Value(Value),
    /// UI invocation: the client renders `component` and the engine suspends
    /// until the response arrives.
    Ui {
        component: String,
        mode: DisplayMode,
        payload: Value,
    },
}

/// A single callable tool. Implementations are registered in a [`ToolSet`] at
/// startup and bound to workflow declarations by name.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name, matching the workflow's tool declaration.
    fn name(&self) -> &str;

    /// Specification (description and JSON schema for arguments).
    fn spec(&self) -> ToolSpec;

    /// Executes the tool.
    async fn call(&self, args: Value, ctx: &ToolCallContext) -> Result<ToolOutput, ToolError>;
}
