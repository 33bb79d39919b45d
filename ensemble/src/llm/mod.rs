//! LLM client abstraction for agent turns.
//!
//! The engine depends on a callable that, given the conversation so far and the
//! agent's tool specs, returns assistant text and optional tool calls. This module
//! defines the trait, a mock for tests, and an OpenAI-compatible implementation.

mod mock;
mod openai;

pub use mock::MockLlm;
pub use openai::ChatOpenAI;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::message::Message;
use crate::tools::ToolSpec;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("provider error: {0}")]
    Provider(String),
    #[error("llm call timed out")]
    Timeout,
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Token usage for one LLM call (prompt + completion).
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// One tool invocation requested by the model.
#[derive(Clone, Debug)]
pub struct LlmToolCall {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
}

/// Response from one LLM completion.
pub struct LlmResponse {
    pub content: String,
    pub tool_calls: Vec<LlmToolCall>,
    pub usage: Option<LlmUsage>,
    /// Model that served the call, when the provider reports it.
    pub model: Option<String>,
}

/// LLM client: given a system message, the transcript, and tool specs, returns
/// assistant content and optional tool calls.
///
/// Implementations: [`MockLlm`] (scripted responses for tests), [`ChatOpenAI`]
/// (OpenAI-compatible API).
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn invoke(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<LlmResponse, LlmError>;
}
