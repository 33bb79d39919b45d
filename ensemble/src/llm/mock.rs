//! Scripted LLM double for tests: pops queued responses, repeats the last one.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{LlmClient, LlmError, LlmResponse, LlmToolCall, LlmUsage};
use crate::message::Message;
use crate::tools::ToolSpec;

pub struct MockLlm {
    responses: Mutex<VecDeque<LlmResponse>>,
    fallback: String,
}

impl MockLlm {
    /// A mock that always answers with `content` and no tool calls.
    pub fn fixed(content: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            fallback: content.into(),
        }
    }

    /// A mock that answers with each queued response in order, then falls back
    /// to a plain "done" reply.
    pub fn scripted(responses: Vec<LlmResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fallback: "done".to_string(),
        }
    }

    /// Convenience: a text-only scripted response.
    pub fn text_response(content: impl Into<String>) -> LlmResponse {
        LlmResponse {
            content: content.into(),
            tool_calls: Vec::new(),
            usage: Some(LlmUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: Some("mock".to_string()),
        }
    }

    /// Convenience: a response that calls one tool.
    pub fn tool_response(
        content: impl Into<String>,
        tool: impl Into<String>,
        arguments: serde_json::Value,
    ) -> LlmResponse {
        let tool = tool.into();
        LlmResponse {
            content: content.into(),
            tool_calls: vec![LlmToolCall {
                call_id: format!("call-{}", tool),
                name: tool,
                arguments,
            }],
            usage: Some(LlmUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: Some("mock".to_string()),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn invoke(
        &self,
        _system: &str,
        _messages: &[Message],
        _tools: &[ToolSpec],
    ) -> Result<LlmResponse, LlmError> {
        let mut queue = self
            .responses
            .lock()
            .map_err(|_| LlmError::Provider("mock queue poisoned".to_string()))?;
        Ok(queue.pop_front().unwrap_or_else(|| LlmResponse {
            content: self.fallback.clone(),
            tool_calls: Vec::new(),
            usage: Some(LlmUsage {
                prompt_tokens: 1,
                completion_tokens: 1,
                total_tokens: 2,
            }),
            model: Some("mock".to_string()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_responses_in_order_then_fallback() {
        let llm = MockLlm::scripted(vec![
            MockLlm::text_response("first"),
            MockLlm::text_response("second"),
        ]);
        let r1 = llm.invoke("", &[], &[]).await.unwrap();
        assert_eq!(r1.content, "first");
        let r2 = llm.invoke("", &[], &[]).await.unwrap();
        assert_eq!(r2.content, "second");
        let r3 = llm.invoke("", &[], &[]).await.unwrap();
        assert_eq!(r3.content, "done");
    }
}
