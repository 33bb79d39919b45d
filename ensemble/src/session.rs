//! Session identity and lifecycle metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Lifecycle state of one conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    WaitingForInput,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::WaitingForInput => "waiting_for_input",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(SessionStatus::Running),
            "waiting_for_input" => Ok(SessionStatus::WaitingForInput),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            other => Err(format!("unknown session status: {}", other)),
        }
    }
}

/// Metadata for one session, as persisted and returned by the HTTP API.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionMeta {
    pub chat_id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub workflow_name: String,
    pub cache_seed: u32,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionMeta {
    pub fn new(
        chat_id: impl Into<String>,
        tenant_id: impl Into<String>,
        user_id: impl Into<String>,
        workflow_name: impl Into<String>,
    ) -> Self {
        let chat_id = chat_id.into();
        let tenant_id = tenant_id.into();
        let seed = cache_seed(&tenant_id, &chat_id);
        let now = Utc::now();
        Self {
            chat_id,
            tenant_id,
            user_id: user_id.into(),
            workflow_name: workflow_name.into(),
            cache_seed: seed,
            status: SessionStatus::Running,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Deterministic per-session seed isolating UI component state across sessions:
/// the first 4 bytes of SHA-256 over `tenant_id:chat_id`, big-endian.
pub fn cache_seed(tenant_id: &str, chat_id: &str) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update(tenant_id.as_bytes());
    hasher.update(b":");
    hasher.update(chat_id.as_bytes());
    let digest = hasher.finalize();
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}
