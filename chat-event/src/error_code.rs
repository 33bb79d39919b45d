//! Closed set of error codes the client can receive in `chat.error`.
//! Clients key retry logic off these; never invent codes outside this set.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    SchemaValidationFailed,
    InputRequestNotFound,
    ToolExecutionError,
    UiToolTimeout,
    ResumeFailed,
    PersistenceError,
    WorkflowNotFound,
    AgentInitializationFailed,
    TransportError,
    RateLimitExceeded,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::SchemaValidationFailed => "SCHEMA_VALIDATION_FAILED",
            ErrorCode::InputRequestNotFound => "INPUT_REQUEST_NOT_FOUND",
            ErrorCode::ToolExecutionError => "TOOL_EXECUTION_ERROR",
            ErrorCode::UiToolTimeout => "UI_TOOL_TIMEOUT",
            ErrorCode::ResumeFailed => "RESUME_FAILED",
            ErrorCode::PersistenceError => "PERSISTENCE_ERROR",
            ErrorCode::WorkflowNotFound => "WORKFLOW_NOT_FOUND",
            ErrorCode::AgentInitializationFailed => "AGENT_INITIALIZATION_FAILED",
            ErrorCode::TransportError => "TRANSPORT_ERROR",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
