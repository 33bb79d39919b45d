//! Conversation messages exchanged with the LLM.

use serde::{Deserialize, Serialize};

/// One message in an agent conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Message {
    System(String),
    User(String),
    Assistant(String),
    /// Result of a tool invocation, fed back to the model.
    ToolResult { name: String, content: String },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System(content.into())
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User(content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant(content.into())
    }

    pub fn tool_result(name: impl Into<String>, content: impl Into<String>) -> Self {
        Message::ToolResult {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Text content regardless of role.
    pub fn content(&self) -> &str {
        match self {
            Message::System(c) | Message::User(c) | Message::Assistant(c) => c,
            Message::ToolResult { content, .. } => content,
        }
    }
}
