//! Typed server settings, read from the environment after [`crate::load_and_apply`].

use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings for the serve binary. Every field has a documented default;
/// all timeouts are configurable via environment variables.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// HTTP/WebSocket bind address. `ENSEMBLE_BIND_ADDR`, default `127.0.0.1:8420`.
    pub bind_addr: String,
    /// Directory scanned for workflow folders at startup. `WORKFLOW_ROOT`, default `./workflows`.
    pub workflow_root: PathBuf,
    /// Directory holding one SQLite file per tenant. `STORE_ROOT`, default `./data`.
    pub store_root: PathBuf,
    /// WebSocket ping interval. `HEARTBEAT_INTERVAL_SECS`, default 20.
    pub heartbeat_interval: Duration,
    /// Disconnect when no pong arrives within this window. `HEARTBEAT_TIMEOUT_SECS`, default 60.
    pub heartbeat_timeout: Duration,
    /// Deadline for `chat.input_request` replies. `INPUT_DEADLINE_SECS`, default 300.
    pub input_deadline: Duration,
    /// Deadline for UI tool replies. `UI_TOOL_DEADLINE_SECS`, default 600.
    pub ui_tool_deadline: Duration,
    /// Per-LLM-call timeout. `LLM_TIMEOUT_SECS`, default 120.
    pub llm_timeout: Duration,
    /// Events buffered before a connection exists. `PRECONNECT_BUFFER`, default
    /// 256, clamped to `outbound_high_water` so a buffered backlog always fits
    /// into a fresh connection queue.
    pub preconnect_buffer: usize,
    /// Outbound queue length that marks a connection unhealthy. `OUTBOUND_HIGH_WATER`, default 512.
    pub outbound_high_water: usize,
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl ServerConfig {
    /// Reads settings from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let outbound_high_water = env_usize("OUTBOUND_HIGH_WATER", 512);
        Self {
            bind_addr: std::env::var("ENSEMBLE_BIND_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:8420".to_string()),
            workflow_root: std::env::var("WORKFLOW_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./workflows")),
            store_root: std::env::var("STORE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),
            heartbeat_interval: Duration::from_secs(env_u64("HEARTBEAT_INTERVAL_SECS", 20)),
            heartbeat_timeout: Duration::from_secs(env_u64("HEARTBEAT_TIMEOUT_SECS", 60)),
            input_deadline: Duration::from_secs(env_u64("INPUT_DEADLINE_SECS", 300)),
            ui_tool_deadline: Duration::from_secs(env_u64("UI_TOOL_DEADLINE_SECS", 600)),
            llm_timeout: Duration::from_secs(env_u64("LLM_TIMEOUT_SECS", 120)),
            preconnect_buffer: env_usize("PRECONNECT_BUFFER", 256).min(outbound_high_water),
            outbound_high_water,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8420".to_string(),
            workflow_root: PathBuf::from("./workflows"),
            store_root: PathBuf::from("./data"),
            heartbeat_interval: Duration::from_secs(20),
            heartbeat_timeout: Duration::from_secs(60),
            input_deadline: Duration::from_secs(300),
            ui_tool_deadline: Duration::from_secs(600),
            llm_timeout: Duration::from_secs(120),
            preconnect_buffer: 256,
            outbound_high_water: 512,
        }
    }
}
