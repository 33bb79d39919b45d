//! Session HTTP API and perf metrics endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chat_event::ErrorCode;
use ensemble::{AggregateMetrics, SessionStart, SessionStore};
use serde::Deserialize;
use serde_json::json;

use crate::app::{AppState, SessionEntry};

fn error_response(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({ "error": message.into(), "error_code": code })),
    )
        .into_response()
}

#[derive(Deserialize, Default)]
pub(crate) struct StartRequest {
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Creates (or idempotently revisits) a session and starts its run. When the
/// given `chat_id` is already live, the existing identity is returned without
/// starting a second run.
pub(crate) async fn start_chat(
    Path((tenant, workflow)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
    body: Option<Json<StartRequest>>,
) -> Response {
    let Json(request) = body.unwrap_or_default();
    let config = match state.workflows.get(&workflow) {
        Ok(config) => config,
        Err(e) => {
            return error_response(StatusCode::NOT_FOUND, ErrorCode::WorkflowNotFound, e.to_string())
        }
    };

    if let Some(chat_id) = &request.chat_id {
        if state.sessions.contains_key(chat_id) {
            match state.store.session_meta(&tenant, chat_id).await {
                Ok(Some(meta)) => {
                    return Json(json!({
                        "chat_id": meta.chat_id,
                        "cache_seed": meta.cache_seed,
                    }))
                    .into_response();
                }
                Ok(None) => {
                    // Live under another tenant; reject rather than leak it.
                    return error_response(
                        StatusCode::CONFLICT,
                        ErrorCode::SchemaValidationFailed,
                        "chat_id is already in use",
                    );
                }
                Err(e) => {
                    return error_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ErrorCode::PersistenceError,
                        e.to_string(),
                    )
                }
            }
        }
    }

    let start = SessionStart {
        tenant_id: tenant.clone(),
        user_id: request.user_id.unwrap_or_else(|| "anonymous".to_string()),
        workflow: config,
        chat_id: request.chat_id,
    };
    match state.orchestrator.start_session(start).await {
        Ok(handle) => {
            let response = json!({
                "chat_id": handle.chat_id,
                "cache_seed": handle.cache_seed,
            });
            state.sessions.insert(
                handle.chat_id.clone(),
                SessionEntry {
                    tenant,
                    events: handle.events.clone(),
                    cancel: handle.cancel.clone(),
                },
            );
            Json(response).into_response()
        }
        Err(e) => {
            tracing::error!(workflow = %workflow, "session start failed: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::AgentInitializationFailed,
                e.to_string(),
            )
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct ListQuery {
    #[serde(default = "default_limit")]
    limit: u32,
}

fn default_limit() -> u32 {
    50
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            limit: default_limit(),
        }
    }
}

pub(crate) async fn list_chats(
    Path((tenant, workflow)): Path<(String, String)>,
    Query(query): Query<ListQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match state.store.list_sessions(&tenant, &workflow, query.limit).await {
        Ok(sessions) => Json(sessions).into_response(),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::PersistenceError,
            e.to_string(),
        ),
    }
}

pub(crate) async fn chat_exists(
    Path((tenant, workflow, chat_id)): Path<(String, String, String)>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match state.store.session_meta(&tenant, &chat_id).await {
        Ok(meta) => {
            let exists = meta.map(|m| m.workflow_name == workflow).unwrap_or(false);
            Json(json!({ "exists": exists })).into_response()
        }
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::PersistenceError,
            e.to_string(),
        ),
    }
}

pub(crate) async fn chat_meta(
    Path((tenant, workflow, chat_id)): Path<(String, String, String)>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match state.store.session_meta(&tenant, &chat_id).await {
        Ok(Some(meta)) if meta.workflow_name == workflow => Json(meta).into_response(),
        Ok(_) => error_response(
            StatusCode::NOT_FOUND,
            ErrorCode::WorkflowNotFound,
            "no such session",
        ),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::PersistenceError,
            e.to_string(),
        ),
    }
}

pub(crate) async fn health(State(state): State<Arc<AppState>>) -> Response {
    match state.store.ping().await {
        Ok(()) => Json(json!({ "status": "ok", "store": "ok" })).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded", "store": e.to_string() })),
        )
            .into_response(),
    }
}

/// Platform totals: the sum of every tenant's rollup.
pub(crate) async fn perf_aggregate(State(state): State<Arc<AppState>>) -> Response {
    let tenants = match state.store.tenants().await {
        Ok(tenants) => tenants,
        Err(e) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::PersistenceError,
                e.to_string(),
            )
        }
    };
    let mut totals = AggregateMetrics::default();
    for tenant in &tenants {
        match state.store.aggregate_metrics(tenant).await {
            Ok(metrics) => totals.merge(&metrics),
            Err(e) => tracing::warn!(tenant = %tenant, "aggregate metrics failed: {}", e),
        }
    }
    Json(json!({ "tenants": tenants.len(), "totals": totals })).into_response()
}

#[derive(Deserialize)]
pub(crate) struct PerfQuery {
    tenant: String,
    #[serde(default)]
    workflow: Option<String>,
    #[serde(default = "default_limit")]
    limit: u32,
}

/// Per-session metrics for one tenant (workflow filter optional).
pub(crate) async fn perf_chats(
    Query(query): Query<PerfQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let workflow = query.workflow.unwrap_or_default();
    let sessions = match state
        .store
        .list_sessions(&query.tenant, &workflow, query.limit)
        .await
    {
        Ok(sessions) => sessions,
        Err(e) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::PersistenceError,
                e.to_string(),
            )
        }
    };
    let mut out = Vec::with_capacity(sessions.len());
    for meta in sessions {
        if let Ok(Some(metrics)) = state.store.chat_metrics(&query.tenant, &meta.chat_id).await {
            out.push(metrics);
        }
    }
    Json(out).into_response()
}

pub(crate) async fn perf_chat(
    Path(chat_id): Path<String>,
    Query(query): Query<PerfQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match state.store.chat_metrics(&query.tenant, &chat_id).await {
        Ok(Some(metrics)) => Json(metrics).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            ErrorCode::WorkflowNotFound,
            "no metrics for this session",
        ),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::PersistenceError,
            e.to_string(),
        ),
    }
}
