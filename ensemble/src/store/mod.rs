//! Per-tenant session persistence: append-only event logs, usage accounting,
//! and conversation-state blobs for crash recovery.
//!
//! Appends run concurrently with delivery and never block it; a failed append
//! is logged and the affected events simply do not appear on resume
//! (at-least-once delivery, client-driven replay).

mod memory;
mod sqlite;

pub use memory::MemorySessionStore;
pub use sqlite::SqliteSessionStore;

use async_trait::async_trait;
use chat_event::RunEvent;
use serde_json::Value;
use thiserror::Error;

use crate::session::{SessionMeta, SessionStatus};
use crate::usage::{AgentLatency, UsageDelta, UsageTotals};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid tenant id: {0}")]
    InvalidTenant(String),
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("storage backend: {0}")]
    Backend(String),
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One persisted event. `seq` is 0 for hidden seed events, which never reach
/// resume queries.
#[derive(Clone, Debug)]
pub struct StoredEvent {
    pub seq: u64,
    pub event: RunEvent,
}

/// Per-session usage as persisted: running totals plus the authoritative
/// final totals written at run completion.
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct ChatMetrics {
    pub chat_id: String,
    pub totals: UsageTotals,
    pub final_totals: Option<UsageTotals>,
    pub last_model: Option<String>,
    pub last_billed_total_tokens: u64,
    pub per_agent_latency: Vec<AgentLatency>,
}

/// Tenant-level rollup for the perf endpoints.
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct AggregateMetrics {
    pub sessions: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
}

impl AggregateMetrics {
    pub fn merge(&mut self, other: &AggregateMetrics) {
        self.sessions += other.sessions;
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        self.cost += other.cost;
    }
}

/// Session document store. Implementations must namespace all data by tenant
/// such that cross-tenant reads are impossible by construction.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Creates the session record. Idempotent: an existing record is left
    /// untouched.
    async fn create_session(&self, meta: &SessionMeta) -> Result<(), StoreError>;

    async fn session_meta(
        &self,
        tenant: &str,
        chat_id: &str,
    ) -> Result<Option<SessionMeta>, StoreError>;

    async fn list_sessions(
        &self,
        tenant: &str,
        workflow: &str,
        limit: u32,
    ) -> Result<Vec<SessionMeta>, StoreError>;

    async fn set_status(
        &self,
        tenant: &str,
        chat_id: &str,
        status: SessionStatus,
    ) -> Result<(), StoreError>;

    /// Appends one event. `seq` must be the transport-assigned sequence number
    /// (0 for hidden events).
    async fn append_event(
        &self,
        tenant: &str,
        chat_id: &str,
        seq: u64,
        event: &RunEvent,
    ) -> Result<(), StoreError>;

    /// Events with `seq > since_seq` in order, excluding hidden ones.
    async fn load_events(
        &self,
        tenant: &str,
        chat_id: &str,
        since_seq: u64,
    ) -> Result<Vec<StoredEvent>, StoreError>;

    /// Highest persisted sequence number (0 when none).
    async fn high_water(&self, tenant: &str, chat_id: &str) -> Result<u64, StoreError>;

    /// Accumulates one usage delta and the agent's call latency.
    async fn record_usage(
        &self,
        tenant: &str,
        chat_id: &str,
        delta: &UsageDelta,
    ) -> Result<(), StoreError>;

    /// Writes the authoritative totals at run completion.
    async fn record_final_usage(
        &self,
        tenant: &str,
        chat_id: &str,
        totals: &UsageTotals,
    ) -> Result<(), StoreError>;

    async fn save_conversation_state(
        &self,
        tenant: &str,
        chat_id: &str,
        state: &Value,
    ) -> Result<(), StoreError>;

    async fn load_conversation_state(
        &self,
        tenant: &str,
        chat_id: &str,
    ) -> Result<Option<Value>, StoreError>;

    async fn chat_metrics(
        &self,
        tenant: &str,
        chat_id: &str,
    ) -> Result<Option<ChatMetrics>, StoreError>;

    async fn aggregate_metrics(&self, tenant: &str) -> Result<AggregateMetrics, StoreError>;

    /// Tenants with any stored data (for platform-wide rollups).
    async fn tenants(&self) -> Result<Vec<String>, StoreError>;

    /// Backend liveness probe for the health endpoint.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Tenant ids become storage namespaces; restrict them to a safe alphabet.
pub(crate) fn check_tenant(tenant: &str) -> Result<(), StoreError> {
    let ok = !tenant.is_empty()
        && tenant
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidTenant(tenant.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_alphabet_is_enforced() {
        assert!(check_tenant("acme-01").is_ok());
        assert!(check_tenant("").is_err());
        assert!(check_tenant("../escape").is_err());
        assert!(check_tenant("a/b").is_err());
    }
}
