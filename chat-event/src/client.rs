//! Inbound client messages. Each variant maps to a JSON object with
//! `"type": "<wire name>"`; unknown types fail parsing and surface as
//! `SCHEMA_VALIDATION_FAILED`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client-to-server message union.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Reply to a pending `chat.input_request`.
    #[serde(rename = "user.input.submit")]
    UserInputSubmit {
        chat_id: String,
        request_id: String,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_client_seq: Option<u64>,
    },
    /// Reply to an inline UI tool call; `corr` is the tool call id.
    #[serde(rename = "inline_component.result")]
    InlineComponentResult {
        chat_id: String,
        corr: String,
        data: Value,
    },
    /// Incremental patch from an artifact-mode UI tool.
    #[serde(rename = "artifact_patch")]
    ArtifactPatch {
        chat_id: String,
        corr: String,
        patch: Vec<Value>,
    },
    /// Resume handshake: replay everything after `lastClientIndex`.
    #[serde(rename = "client.resume")]
    ClientResume {
        chat_id: String,
        #[serde(rename = "lastClientIndex", default)]
        last_client_index: u64,
    },
}

impl ClientMessage {
    /// The session this message addresses.
    pub fn chat_id(&self) -> &str {
        match self {
            ClientMessage::UserInputSubmit { chat_id, .. } => chat_id,
            ClientMessage::InlineComponentResult { chat_id, .. } => chat_id,
            ClientMessage::ArtifactPatch { chat_id, .. } => chat_id,
            ClientMessage::ClientResume { chat_id, .. } => chat_id,
        }
    }
}
