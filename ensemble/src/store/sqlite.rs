//! SQLite-backed session store: one database file per tenant under a root
//! directory, so the namespace is a closed function of the tenant id and
//! cross-tenant reads are impossible by construction.
//!
//! All rusqlite work runs under `spawn_blocking`; connections are opened per
//! call and the schema is ensured idempotently.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chat_event::{ChatEvent, RunEvent};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use super::{check_tenant, AggregateMetrics, ChatMetrics, SessionStore, StoreError, StoredEvent};
use crate::session::{SessionMeta, SessionStatus};
use crate::usage::{AgentLatency, UsageDelta, UsageTotals};

pub struct SqliteSessionStore {
    root: PathBuf,
}

fn db_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl SqliteSessionStore {
    /// Creates the store; tenant databases are created lazily under `root`.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(db_err)?;
        Ok(Self { root })
    }

    fn tenant_db(&self, tenant: &str) -> Result<PathBuf, StoreError> {
        check_tenant(tenant)?;
        Ok(self.root.join(format!("{tenant}.db")))
    }

    fn open(path: &Path) -> Result<Connection, StoreError> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                chat_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                workflow TEXT NOT NULL,
                cache_seed INTEGER NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                kind TEXT NOT NULL,
                agent TEXT,
                corr TEXT,
                hidden INTEGER NOT NULL DEFAULT 0,
                ts_ms INTEGER NOT NULL,
                data TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_events_chat_seq
                ON events(chat_id, seq) WHERE seq > 0;
            CREATE INDEX IF NOT EXISTS idx_events_chat ON events(chat_id);
            CREATE TABLE IF NOT EXISTS usage (
                chat_id TEXT PRIMARY KEY,
                prompt_tokens INTEGER NOT NULL DEFAULT 0,
                completion_tokens INTEGER NOT NULL DEFAULT 0,
                total_tokens INTEGER NOT NULL DEFAULT 0,
                cost REAL NOT NULL DEFAULT 0,
                last_model TEXT,
                last_billed_total_tokens INTEGER NOT NULL DEFAULT 0,
                final_prompt_tokens INTEGER,
                final_completion_tokens INTEGER,
                final_total_tokens INTEGER,
                final_cost REAL
            );
            CREATE TABLE IF NOT EXISTS agent_latency (
                chat_id TEXT NOT NULL,
                agent TEXT NOT NULL,
                calls INTEGER NOT NULL DEFAULT 0,
                total_ms INTEGER NOT NULL DEFAULT 0,
                max_ms INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (chat_id, agent)
            );
            CREATE TABLE IF NOT EXISTS conversation_state (
                chat_id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .map_err(db_err)?;
        Ok(conn)
    }

    async fn with_conn<T, F>(&self, tenant: &str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let path = self.tenant_db(tenant)?;
        tokio::task::spawn_blocking(move || {
            let conn = Self::open(&path)?;
            f(&conn)
        })
        .await
        .map_err(db_err)?
    }
}

fn row_to_meta(row: &rusqlite::Row<'_>, tenant: &str) -> rusqlite::Result<SessionMeta> {
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    Ok(SessionMeta {
        chat_id: row.get("chat_id")?,
        tenant_id: tenant.to_string(),
        user_id: row.get("user_id")?,
        workflow_name: row.get("workflow")?,
        cache_seed: row.get::<_, i64>("cache_seed")? as u32,
        status: status.parse().unwrap_or(SessionStatus::Failed),
        created_at: created_at.parse().unwrap_or_else(|_| chrono::Utc::now()),
        updated_at: updated_at.parse().unwrap_or_else(|_| chrono::Utc::now()),
    })
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn create_session(&self, meta: &SessionMeta) -> Result<(), StoreError> {
        let meta = meta.clone();
        self.with_conn(&meta.tenant_id.clone(), move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO sessions
                 (chat_id, user_id, workflow, cache_seed, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    meta.chat_id,
                    meta.user_id,
                    meta.workflow_name,
                    meta.cache_seed as i64,
                    meta.status.as_str(),
                    meta.created_at.to_rfc3339(),
                    meta.updated_at.to_rfc3339(),
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn session_meta(
        &self,
        tenant: &str,
        chat_id: &str,
    ) -> Result<Option<SessionMeta>, StoreError> {
        let chat_id = chat_id.to_string();
        let tenant_owned = tenant.to_string();
        self.with_conn(tenant, move |conn| {
            conn.query_row(
                "SELECT chat_id, user_id, workflow, cache_seed, status, created_at, updated_at
                 FROM sessions WHERE chat_id = ?1",
                params![chat_id],
                |row| row_to_meta(row, &tenant_owned),
            )
            .optional()
            .map_err(db_err)
        })
        .await
    }

    async fn list_sessions(
        &self,
        tenant: &str,
        workflow: &str,
        limit: u32,
    ) -> Result<Vec<SessionMeta>, StoreError> {
        let workflow = workflow.to_string();
        let tenant_owned = tenant.to_string();
        self.with_conn(tenant, move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT chat_id, user_id, workflow, cache_seed, status, created_at, updated_at
                     FROM sessions WHERE workflow = ?1
                     ORDER BY created_at DESC LIMIT ?2",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![workflow, limit as i64], |row| {
                    row_to_meta(row, &tenant_owned)
                })
                .map_err(db_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
        })
        .await
    }

    async fn set_status(
        &self,
        tenant: &str,
        chat_id: &str,
        status: SessionStatus,
    ) -> Result<(), StoreError> {
        let chat_id = chat_id.to_string();
        self.with_conn(tenant, move |conn| {
            let changed = conn
                .execute(
                    "UPDATE sessions SET status = ?1, updated_at = ?2 WHERE chat_id = ?3",
                    params![status.as_str(), chrono::Utc::now().to_rfc3339(), chat_id],
                )
                .map_err(db_err)?;
            if changed == 0 {
                return Err(StoreError::NotFound(chat_id));
            }
            Ok(())
        })
        .await
    }

    async fn append_event(
        &self,
        tenant: &str,
        chat_id: &str,
        seq: u64,
        event: &RunEvent,
    ) -> Result<(), StoreError> {
        let chat_id = chat_id.to_string();
        let kind = event.event.kind().to_string();
        let data = serde_json::to_string(&event.event)?;
        let agent = event.agent.clone();
        let corr = event.corr.clone();
        let hidden = event.hidden;
        let ts_ms = event.ts_ms;
        self.with_conn(tenant, move |conn| {
            conn.execute(
                "INSERT INTO events (chat_id, seq, kind, agent, corr, hidden, ts_ms, data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![chat_id, seq as i64, kind, agent, corr, hidden as i64, ts_ms as i64, data],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn load_events(
        &self,
        tenant: &str,
        chat_id: &str,
        since_seq: u64,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        let chat_id = chat_id.to_string();
        self.with_conn(tenant, move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT seq, agent, corr, ts_ms, data FROM events
                     WHERE chat_id = ?1 AND hidden = 0 AND seq > ?2
                     ORDER BY seq ASC",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![chat_id, since_seq as i64], |row| {
                    let seq: i64 = row.get(0)?;
                    let agent: Option<String> = row.get(1)?;
                    let corr: Option<String> = row.get(2)?;
                    let ts_ms: i64 = row.get(3)?;
                    let data: String = row.get(4)?;
                    Ok((seq, agent, corr, ts_ms, data))
                })
                .map_err(db_err)?;
            let mut out = Vec::new();
            for row in rows {
                let (seq, agent, corr, ts_ms, data) = row.map_err(db_err)?;
                let event: ChatEvent = serde_json::from_str(&data)?;
                out.push(StoredEvent {
                    seq: seq as u64,
                    event: RunEvent {
                        event,
                        agent,
                        corr,
                        hidden: false,
                        ts_ms: ts_ms as u64,
                    },
                });
            }
            Ok(out)
        })
        .await
    }

    async fn high_water(&self, tenant: &str, chat_id: &str) -> Result<u64, StoreError> {
        let chat_id = chat_id.to_string();
        self.with_conn(tenant, move |conn| {
            let max: Option<i64> = conn
                .query_row(
                    "SELECT MAX(seq) FROM events WHERE chat_id = ?1",
                    params![chat_id],
                    |row| row.get(0),
                )
                .map_err(db_err)?;
            Ok(max.unwrap_or(0) as u64)
        })
        .await
    }

    async fn record_usage(
        &self,
        tenant: &str,
        chat_id: &str,
        delta: &UsageDelta,
    ) -> Result<(), StoreError> {
        let chat_id = chat_id.to_string();
        let delta = delta.clone();
        self.with_conn(tenant, move |conn| {
            conn.execute(
                "INSERT INTO usage (chat_id, prompt_tokens, completion_tokens, total_tokens, cost,
                                    last_model, last_billed_total_tokens)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?4)
                 ON CONFLICT(chat_id) DO UPDATE SET
                    prompt_tokens = prompt_tokens + excluded.prompt_tokens,
                    completion_tokens = completion_tokens + excluded.completion_tokens,
                    total_tokens = total_tokens + excluded.total_tokens,
                    cost = cost + excluded.cost,
                    last_model = excluded.last_model,
                    last_billed_total_tokens = total_tokens + excluded.total_tokens",
                params![
                    chat_id,
                    delta.prompt_tokens as i64,
                    delta.completion_tokens as i64,
                    delta.total_tokens as i64,
                    delta.cost,
                    delta.model,
                ],
            )
            .map_err(db_err)?;
            let duration_ms = (delta.duration_sec * 1000.0) as i64;
            conn.execute(
                "INSERT INTO agent_latency (chat_id, agent, calls, total_ms, max_ms)
                 VALUES (?1, ?2, 1, ?3, ?3)
                 ON CONFLICT(chat_id, agent) DO UPDATE SET
                    calls = calls + 1,
                    total_ms = total_ms + excluded.total_ms,
                    max_ms = MAX(max_ms, excluded.max_ms)",
                params![chat_id, delta.agent, duration_ms],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn record_final_usage(
        &self,
        tenant: &str,
        chat_id: &str,
        totals: &UsageTotals,
    ) -> Result<(), StoreError> {
        let chat_id = chat_id.to_string();
        let totals = totals.clone();
        self.with_conn(tenant, move |conn| {
            conn.execute(
                "INSERT INTO usage (chat_id, final_prompt_tokens, final_completion_tokens,
                                    final_total_tokens, final_cost)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(chat_id) DO UPDATE SET
                    final_prompt_tokens = excluded.final_prompt_tokens,
                    final_completion_tokens = excluded.final_completion_tokens,
                    final_total_tokens = excluded.final_total_tokens,
                    final_cost = excluded.final_cost",
                params![
                    chat_id,
                    totals.prompt_tokens as i64,
                    totals.completion_tokens as i64,
                    totals.total_tokens as i64,
                    totals.cost,
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn save_conversation_state(
        &self,
        tenant: &str,
        chat_id: &str,
        state: &Value,
    ) -> Result<(), StoreError> {
        let chat_id = chat_id.to_string();
        let state = serde_json::to_string(state)?;
        self.with_conn(tenant, move |conn| {
            conn.execute(
                "INSERT INTO conversation_state (chat_id, state, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(chat_id) DO UPDATE SET
                    state = excluded.state, updated_at = excluded.updated_at",
                params![chat_id, state, chrono::Utc::now().to_rfc3339()],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn load_conversation_state(
        &self,
        tenant: &str,
        chat_id: &str,
    ) -> Result<Option<Value>, StoreError> {
        let chat_id = chat_id.to_string();
        self.with_conn(tenant, move |conn| {
            let state: Option<String> = conn
                .query_row(
                    "SELECT state FROM conversation_state WHERE chat_id = ?1",
                    params![chat_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?;
            match state {
                Some(s) => Ok(Some(serde_json::from_str(&s)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn chat_metrics(
        &self,
        tenant: &str,
        chat_id: &str,
    ) -> Result<Option<ChatMetrics>, StoreError> {
        let chat_id = chat_id.to_string();
        self.with_conn(tenant, move |conn| {
            let usage = conn
                .query_row(
                    "SELECT prompt_tokens, completion_tokens, total_tokens, cost, last_model,
                            last_billed_total_tokens, final_prompt_tokens,
                            final_completion_tokens, final_total_tokens, final_cost
                     FROM usage WHERE chat_id = ?1",
                    params![chat_id],
                    |row| {
                        let totals = UsageTotals {
                            prompt_tokens: row.get::<_, i64>(0)? as u64,
                            completion_tokens: row.get::<_, i64>(1)? as u64,
                            total_tokens: row.get::<_, i64>(2)? as u64,
                            cost: row.get(3)?,
                        };
                        let final_totals = match row.get::<_, Option<i64>>(8)? {
                            Some(total) => Some(UsageTotals {
                                prompt_tokens: row.get::<_, Option<i64>>(6)?.unwrap_or(0) as u64,
                                completion_tokens: row.get::<_, Option<i64>>(7)?.unwrap_or(0)
                                    as u64,
                                total_tokens: total as u64,
                                cost: row.get::<_, Option<f64>>(9)?.unwrap_or(0.0),
                            }),
                            None => None,
                        };
                        Ok((
                            totals,
                            final_totals,
                            row.get::<_, Option<String>>(4)?,
                            row.get::<_, i64>(5)? as u64,
                        ))
                    },
                )
                .optional()
                .map_err(db_err)?;
            let Some((totals, final_totals, last_model, last_billed_total_tokens)) = usage else {
                return Ok(None);
            };

            let mut stmt = conn
                .prepare(
                    "SELECT agent, calls, total_ms, max_ms FROM agent_latency
                     WHERE chat_id = ?1 ORDER BY agent",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![chat_id], |row| {
                    Ok(AgentLatency {
                        agent: row.get(0)?,
                        calls: row.get::<_, i64>(1)? as u64,
                        total_ms: row.get::<_, i64>(2)? as u64,
                        max_ms: row.get::<_, i64>(3)? as u64,
                    })
                })
                .map_err(db_err)?;
            let per_agent_latency = rows.collect::<Result<Vec<_>, _>>().map_err(db_err)?;

            Ok(Some(ChatMetrics {
                chat_id,
                totals,
                final_totals,
                last_model,
                last_billed_total_tokens,
                per_agent_latency,
            }))
        })
        .await
    }

    async fn aggregate_metrics(&self, tenant: &str) -> Result<AggregateMetrics, StoreError> {
        self.with_conn(tenant, move |conn| {
            conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(COALESCE(final_prompt_tokens, prompt_tokens)), 0),
                        COALESCE(SUM(COALESCE(final_completion_tokens, completion_tokens)), 0),
                        COALESCE(SUM(COALESCE(final_total_tokens, total_tokens)), 0),
                        COALESCE(SUM(COALESCE(final_cost, cost)), 0)
                 FROM usage",
                [],
                |row| {
                    Ok(AggregateMetrics {
                        sessions: row.get::<_, i64>(0)? as u64,
                        prompt_tokens: row.get::<_, i64>(1)? as u64,
                        completion_tokens: row.get::<_, i64>(2)? as u64,
                        total_tokens: row.get::<_, i64>(3)? as u64,
                        cost: row.get(4)?,
                    })
                },
            )
            .map_err(db_err)
        })
        .await
    }

    async fn tenants(&self) -> Result<Vec<String>, StoreError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            for entry in std::fs::read_dir(&root).map_err(db_err)? {
                let entry = entry.map_err(db_err)?;
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if let Some(tenant) = name.strip_suffix(".db") {
                    out.push(tenant.to_string());
                }
            }
            out.sort();
            Ok(out)
        })
        .await
        .map_err(db_err)?
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            // Root must stay writable for lazy tenant database creation.
            std::fs::metadata(&root).map_err(db_err)?;
            let conn = Connection::open_in_memory().map_err(db_err)?;
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(db_err)?;
            Ok(())
        })
        .await
        .map_err(db_err)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_event::ChatEvent;

    fn text_event(agent: &str, content: &str) -> RunEvent {
        RunEvent::new(ChatEvent::Text {
            agent: agent.to_string(),
            content: content.to_string(),
        })
        .with_agent(agent)
    }

    #[tokio::test]
    async fn events_round_trip_with_resume_query() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteSessionStore::new(dir.path()).unwrap();
        let meta = SessionMeta::new("c1", "t1", "u1", "wf");
        store.create_session(&meta).await.unwrap();
        store
            .append_event("t1", "c1", 0, &text_event("a", "seed").hidden())
            .await
            .unwrap();
        for seq in 1..=3u64 {
            store
                .append_event("t1", "c1", seq, &text_event("a", &format!("m{seq}")))
                .await
                .unwrap();
        }
        let events = store.load_events("t1", "c1", 1).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].seq, 2);
        match &events[0].event.event {
            ChatEvent::Text { content, .. } => assert_eq!(content, "m2"),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(store.high_water("t1", "c1").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn tenants_live_in_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteSessionStore::new(dir.path()).unwrap();
        store
            .create_session(&SessionMeta::new("c1", "t1", "u1", "wf"))
            .await
            .unwrap();
        store
            .create_session(&SessionMeta::new("c2", "t2", "u1", "wf"))
            .await
            .unwrap();
        assert!(dir.path().join("t1.db").is_file());
        assert!(dir.path().join("t2.db").is_file());
        // t1's database has no row for c2 at all.
        assert!(store.session_meta("t1", "c2").await.unwrap().is_none());
        assert!(store.session_meta("t2", "c2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn path_escaping_tenant_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteSessionStore::new(dir.path()).unwrap();
        let err = store.session_meta("../../etc", "c1").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTenant(_)));
    }

    #[tokio::test]
    async fn conversation_state_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteSessionStore::new(dir.path()).unwrap();
        store
            .create_session(&SessionMeta::new("c1", "t1", "u1", "wf"))
            .await
            .unwrap();
        let state = serde_json::json!({"messages": [["a", "hi"]], "context": {"k": 1}});
        store
            .save_conversation_state("t1", "c1", &state)
            .await
            .unwrap();
        let loaded = store.load_conversation_state("t1", "c1").await.unwrap();
        assert_eq!(loaded, Some(state));
        assert_eq!(
            store.load_conversation_state("t1", "missing").await.unwrap(),
            None
        );
    }
}
