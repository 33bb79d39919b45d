//! Outbound event types: one `chat.*` wire event per variant (type + data payload).
//! The envelope (seq, chat_id, corr, replay) is applied separately.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error_code::ErrorCode;

/// How a UI tool call is rendered by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    /// Rendered in the message flow.
    Inline,
    /// Rendered in the side artifact panel.
    Artifact,
}

/// Wire event: `type` is the `chat.*` name, `data` is the variant payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChatEvent {
    /// Marks the transition from replayed history to live streaming after a reconnect.
    #[serde(rename = "chat.resume_boundary")]
    ResumeBoundary {},
    /// The conversation moved to a new speaking agent.
    #[serde(rename = "chat.select_speaker")]
    SelectSpeaker { agent: String },
    /// Partial (streaming) text from an agent turn.
    #[serde(rename = "chat.print")]
    Print { agent: String, content: String },
    /// Finalized text for one agent turn.
    #[serde(rename = "chat.text")]
    Text { agent: String, content: String },
    /// The run is suspended until the client submits text for `request_id`.
    #[serde(rename = "chat.input_request")]
    InputRequest { request_id: String, prompt: String },
    /// No reply arrived within the deadline; the agent resumes with a timeout sentinel.
    #[serde(rename = "chat.input_timeout")]
    InputTimeout {
        request_id: String,
        timeout_seconds: u64,
    },
    /// A pending input request was answered.
    #[serde(rename = "chat.input_ack")]
    InputAck { request_id: String },
    /// A tool invocation. `awaiting_response` is true for UI tools that suspend the run.
    #[serde(rename = "chat.tool_call")]
    ToolCall {
        tool_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        component_type: Option<String>,
        awaiting_response: bool,
        payload: Value,
        display: DisplayMode,
    },
    /// Result of a tool invocation (backend return value or UI reply).
    #[serde(rename = "chat.tool_response")]
    ToolResponse {
        tool_name: String,
        content: Value,
        success: bool,
    },
    /// Progress report from a long-running tool.
    #[serde(rename = "chat.tool_progress")]
    ToolProgress {
        tool_name: String,
        progress_percent: u8,
        status_message: String,
    },
    /// Token usage for one LLM call.
    #[serde(rename = "chat.usage_delta")]
    UsageDelta {
        prompt_tokens: u64,
        completion_tokens: u64,
        total_tokens: u64,
        cached: bool,
        duration_sec: f64,
        agent: String,
        model: String,
    },
    /// Session usage totals, emitted at run completion.
    #[serde(rename = "chat.usage_summary")]
    UsageSummary {
        prompt_tokens: u64,
        completion_tokens: u64,
        total_tokens: u64,
        cost: f64,
    },
    /// The run finished. `reason` names the termination cause.
    #[serde(rename = "chat.run_complete")]
    RunComplete { reason: String },
    /// An error surfaced to the client; `error_code` is from the closed set.
    #[serde(rename = "chat.error")]
    Error {
        message: String,
        error_code: ErrorCode,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
        recoverable: bool,
    },
    /// An agent produced output conforming to a declared structured-output schema.
    #[serde(rename = "chat.structured_output_ready")]
    StructuredOutputReady { agent: String, output: Value },
    /// A file attachment became available to the session.
    #[serde(rename = "chat.attachment_uploaded")]
    AttachmentUploaded {
        file_name: String,
        content_type: String,
        url: String,
    },
}

impl ChatEvent {
    /// The `chat.*` wire name of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            ChatEvent::ResumeBoundary {} => "chat.resume_boundary",
            ChatEvent::SelectSpeaker { .. } => "chat.select_speaker",
            ChatEvent::Print { .. } => "chat.print",
            ChatEvent::Text { .. } => "chat.text",
            ChatEvent::InputRequest { .. } => "chat.input_request",
            ChatEvent::InputTimeout { .. } => "chat.input_timeout",
            ChatEvent::InputAck { .. } => "chat.input_ack",
            ChatEvent::ToolCall { .. } => "chat.tool_call",
            ChatEvent::ToolResponse { .. } => "chat.tool_response",
            ChatEvent::ToolProgress { .. } => "chat.tool_progress",
            ChatEvent::UsageDelta { .. } => "chat.usage_delta",
            ChatEvent::UsageSummary { .. } => "chat.usage_summary",
            ChatEvent::RunComplete { .. } => "chat.run_complete",
            ChatEvent::Error { .. } => "chat.error",
            ChatEvent::StructuredOutputReady { .. } => "chat.structured_output_ready",
            ChatEvent::AttachmentUploaded { .. } => "chat.attachment_uploaded",
        }
    }

    /// True for events that end the run (`run_complete`, non-recoverable `error`).
    pub fn is_terminal(&self) -> bool {
        match self {
            ChatEvent::RunComplete { .. } => true,
            ChatEvent::Error { recoverable, .. } => !recoverable,
            _ => false,
        }
    }
}

/// One event as emitted inside the runtime, before envelope construction.
///
/// `agent` is the emitting agent (drives visibility filtering; payload fields
/// drive the wire). `corr` links responses to prior requests. `hidden` marks
/// seed events that are persisted but never delivered or replayed.
#[derive(Clone, Debug, PartialEq)]
pub struct RunEvent {
    pub event: ChatEvent,
    pub agent: Option<String>,
    pub corr: Option<String>,
    pub hidden: bool,
    /// Milliseconds since session start; monotonic within one session.
    pub ts_ms: u64,
}

impl RunEvent {
    pub fn new(event: ChatEvent) -> Self {
        Self {
            event,
            agent: None,
            corr: None,
            hidden: false,
            ts_ms: 0,
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_corr(mut self, corr: impl Into<String>) -> Self {
        self.corr = Some(corr.into());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn with_ts(mut self, ts_ms: u64) -> Self {
        self.ts_ms = ts_ms;
        self
    }
}
