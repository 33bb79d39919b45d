//! In-memory store for tests and single-process development runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chat_event::RunEvent;
use dashmap::DashMap;
use serde_json::Value;

use super::{check_tenant, AggregateMetrics, ChatMetrics, SessionStore, StoreError, StoredEvent};
use crate::session::{SessionMeta, SessionStatus};
use crate::usage::{AgentLatency, UsageDelta, UsageTotals};

#[derive(Debug)]
struct SessionRecord {
    meta: SessionMeta,
    events: Vec<StoredEvent>,
    totals: UsageTotals,
    final_totals: Option<UsageTotals>,
    last_model: Option<String>,
    last_billed_total_tokens: u64,
    latency: HashMap<String, AgentLatency>,
    state: Option<Value>,
}

/// DashMap-backed [`SessionStore`]; keys are `(tenant, chat_id)` so reads are
/// always tenant-scoped.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<(String, String), SessionRecord>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(tenant: &str, chat_id: &str) -> (String, String) {
        (tenant.to_string(), chat_id.to_string())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create_session(&self, meta: &SessionMeta) -> Result<(), StoreError> {
        check_tenant(&meta.tenant_id)?;
        self.sessions
            .entry(Self::key(&meta.tenant_id, &meta.chat_id))
            .or_insert_with(|| SessionRecord {
                meta: meta.clone(),
                events: Vec::new(),
                totals: UsageTotals::default(),
                final_totals: None,
                last_model: None,
                last_billed_total_tokens: 0,
                latency: HashMap::new(),
                state: None,
            });
        Ok(())
    }

    async fn session_meta(
        &self,
        tenant: &str,
        chat_id: &str,
    ) -> Result<Option<SessionMeta>, StoreError> {
        check_tenant(tenant)?;
        Ok(self
            .sessions
            .get(&Self::key(tenant, chat_id))
            .map(|r| r.meta.clone()))
    }

    async fn list_sessions(
        &self,
        tenant: &str,
        workflow: &str,
        limit: u32,
    ) -> Result<Vec<SessionMeta>, StoreError> {
        check_tenant(tenant)?;
        let mut out: Vec<SessionMeta> = self
            .sessions
            .iter()
            .filter(|r| r.key().0 == tenant && r.meta.workflow_name == workflow)
            .map(|r| r.meta.clone())
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit as usize);
        Ok(out)
    }

    async fn set_status(
        &self,
        tenant: &str,
        chat_id: &str,
        status: SessionStatus,
    ) -> Result<(), StoreError> {
        check_tenant(tenant)?;
        let mut record = self
            .sessions
            .get_mut(&Self::key(tenant, chat_id))
            .ok_or_else(|| StoreError::NotFound(chat_id.to_string()))?;
        record.meta.status = status;
        record.meta.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn append_event(
        &self,
        tenant: &str,
        chat_id: &str,
        seq: u64,
        event: &RunEvent,
    ) -> Result<(), StoreError> {
        check_tenant(tenant)?;
        let mut record = self
            .sessions
            .get_mut(&Self::key(tenant, chat_id))
            .ok_or_else(|| StoreError::NotFound(chat_id.to_string()))?;
        record.events.push(StoredEvent {
            seq,
            event: event.clone(),
        });
        Ok(())
    }

    async fn load_events(
        &self,
        tenant: &str,
        chat_id: &str,
        since_seq: u64,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        check_tenant(tenant)?;
        let record = self
            .sessions
            .get(&Self::key(tenant, chat_id))
            .ok_or_else(|| StoreError::NotFound(chat_id.to_string()))?;
        // Appends land concurrently with delivery, so insertion order is not
        // authoritative; the sequence number is.
        let mut out: Vec<StoredEvent> = record
            .events
            .iter()
            .filter(|e| !e.event.hidden && e.seq > since_seq)
            .cloned()
            .collect();
        out.sort_by_key(|e| e.seq);
        Ok(out)
    }

    async fn high_water(&self, tenant: &str, chat_id: &str) -> Result<u64, StoreError> {
        check_tenant(tenant)?;
        Ok(self
            .sessions
            .get(&Self::key(tenant, chat_id))
            .map(|r| r.events.iter().map(|e| e.seq).max().unwrap_or(0))
            .unwrap_or(0))
    }

    async fn record_usage(
        &self,
        tenant: &str,
        chat_id: &str,
        delta: &UsageDelta,
    ) -> Result<(), StoreError> {
        check_tenant(tenant)?;
        let mut record = self
            .sessions
            .get_mut(&Self::key(tenant, chat_id))
            .ok_or_else(|| StoreError::NotFound(chat_id.to_string()))?;
        record.totals.add(delta);
        record.last_model = Some(delta.model.clone());
        record.last_billed_total_tokens = record.totals.total_tokens;
        record
            .latency
            .entry(delta.agent.clone())
            .or_insert_with(|| AgentLatency {
                agent: delta.agent.clone(),
                ..Default::default()
            })
            .record((delta.duration_sec * 1000.0) as u64);
        Ok(())
    }

    async fn record_final_usage(
        &self,
        tenant: &str,
        chat_id: &str,
        totals: &UsageTotals,
    ) -> Result<(), StoreError> {
        check_tenant(tenant)?;
        let mut record = self
            .sessions
            .get_mut(&Self::key(tenant, chat_id))
            .ok_or_else(|| StoreError::NotFound(chat_id.to_string()))?;
        record.final_totals = Some(totals.clone());
        Ok(())
    }

    async fn save_conversation_state(
        &self,
        tenant: &str,
        chat_id: &str,
        state: &Value,
    ) -> Result<(), StoreError> {
        check_tenant(tenant)?;
        let mut record = self
            .sessions
            .get_mut(&Self::key(tenant, chat_id))
            .ok_or_else(|| StoreError::NotFound(chat_id.to_string()))?;
        record.state = Some(state.clone());
        Ok(())
    }

    async fn load_conversation_state(
        &self,
        tenant: &str,
        chat_id: &str,
    ) -> Result<Option<Value>, StoreError> {
        check_tenant(tenant)?;
        Ok(self
            .sessions
            .get(&Self::key(tenant, chat_id))
            .and_then(|r| r.state.clone()))
    }

    async fn chat_metrics(
        &self,
        tenant: &str,
        chat_id: &str,
    ) -> Result<Option<ChatMetrics>, StoreError> {
        check_tenant(tenant)?;
        Ok(self.sessions.get(&Self::key(tenant, chat_id)).map(|r| {
            let mut per_agent_latency: Vec<AgentLatency> = r.latency.values().cloned().collect();
            per_agent_latency.sort_by(|a, b| a.agent.cmp(&b.agent));
            ChatMetrics {
                chat_id: chat_id.to_string(),
                totals: r.totals.clone(),
                final_totals: r.final_totals.clone(),
                last_model: r.last_model.clone(),
                last_billed_total_tokens: r.last_billed_total_tokens,
                per_agent_latency,
            }
        }))
    }

    async fn aggregate_metrics(&self, tenant: &str) -> Result<AggregateMetrics, StoreError> {
        check_tenant(tenant)?;
        let mut out = AggregateMetrics::default();
        for record in self.sessions.iter().filter(|r| r.key().0 == tenant) {
            let totals = record.final_totals.as_ref().unwrap_or(&record.totals);
            out.sessions += 1;
            out.prompt_tokens += totals.prompt_tokens;
            out.completion_tokens += totals.completion_tokens;
            out.total_tokens += totals.total_tokens;
            out.cost += totals.cost;
        }
        Ok(out)
    }

    async fn tenants(&self) -> Result<Vec<String>, StoreError> {
        let mut out: Vec<String> = self
            .sessions
            .iter()
            .map(|r| r.key().0.clone())
            .collect();
        out.sort();
        out.dedup();
        Ok(out)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
