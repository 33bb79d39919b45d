//! OpenAI-compatible chat client. Works against api.openai.com or any
//! compatible endpoint via a custom base URL.
//!
//! Requires `OPENAI_API_KEY` in the environment (or a custom [`OpenAIConfig`]).

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionTool, ChatCompletionTools, CreateChatCompletionRequestArgs,
        FunctionObjectArgs,
    },
    Client,
};
use async_trait::async_trait;

use super::{LlmClient, LlmError, LlmResponse, LlmToolCall, LlmUsage};
use crate::message::Message;
use crate::tools::ToolSpec;

pub struct ChatOpenAI {
    client: Client<OpenAIConfig>,
    model: String,
}

impl ChatOpenAI {
    /// Creates a client for `model`; API key from `OPENAI_API_KEY`.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            model: model.into(),
        }
    }

    /// Creates a client with explicit configuration (custom base URL / key).
    pub fn with_config(config: OpenAIConfig, model: impl Into<String>) -> Self {
        Self {
            client: Client::with_config(config),
            model: model.into(),
        }
    }

    fn to_request_messages(
        system: &str,
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        let mut out = Vec::with_capacity(messages.len() + 1);
        if !system.is_empty() {
            out.push(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system)
                    .build()
                    .map_err(|e| LlmError::Provider(e.to_string()))?
                    .into(),
            );
        }
        for msg in messages {
            let m: ChatCompletionRequestMessage = match msg {
                Message::System(c) => ChatCompletionRequestSystemMessageArgs::default()
                    .content(c.as_str())
                    .build()
                    .map_err(|e| LlmError::Provider(e.to_string()))?
                    .into(),
                Message::User(c) => ChatCompletionRequestUserMessageArgs::default()
                    .content(c.as_str())
                    .build()
                    .map_err(|e| LlmError::Provider(e.to_string()))?
                    .into(),
                Message::Assistant(c) => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(c.as_str())
                    .build()
                    .map_err(|e| LlmError::Provider(e.to_string()))?
                    .into(),
                // Tool results are folded into user turns: this client does not
                // track provider-side tool call ids across engine suspensions.
                Message::ToolResult { name, content } => {
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(format!("[tool {}] {}", name, content))
                        .build()
                        .map_err(|e| LlmError::Provider(e.to_string()))?
                        .into()
                }
            };
            out.push(m);
        }
        Ok(out)
    }
}

#[async_trait]
impl LlmClient for ChatOpenAI {
    async fn invoke(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<LlmResponse, LlmError> {
        let request_messages = Self::to_request_messages(system, messages)?;

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(&self.model).messages(request_messages);
        if !tools.is_empty() {
            let mut request_tools = Vec::with_capacity(tools.len());
            for spec in tools {
                let function = FunctionObjectArgs::default()
                    .name(&spec.name)
                    .description(spec.description.clone().unwrap_or_default())
                    .parameters(spec.input_schema.clone())
                    .build()
                    .map_err(|e| LlmError::Provider(e.to_string()))?;
                request_tools.push(ChatCompletionTools::Function(ChatCompletionTool {
                    function,
                }));
            }
            builder.tools(request_tools);
        }
        let request = builder
            .build()
            .map_err(|e| LlmError::Provider(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| LlmError::Provider(e.to_string()))?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("no choices in response".to_string()))?;

        let content = choice.message.content.unwrap_or_default();
        let mut tool_calls = Vec::new();
        for tc in choice.message.tool_calls.unwrap_or_default() {
            if let async_openai::types::chat::ChatCompletionMessageToolCalls::Function(tc) = tc {
                let arguments = serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(serde_json::Value::String(tc.function.arguments.clone()));
                tool_calls.push(LlmToolCall {
                    call_id: tc.id,
                    name: tc.function.name,
                    arguments,
                });
            }
        }

        let usage = response.usage.map(|u| LlmUsage {
            prompt_tokens: u.prompt_tokens as u64,
            completion_tokens: u.completion_tokens as u64,
            total_tokens: u.total_tokens as u64,
        });

        Ok(LlmResponse {
            content,
            tool_calls,
            usage,
            model: Some(response.model),
        })
    }
}
