//! Per-session context variables: typed key/value store with trigger-based
//! mutation and per-agent read filtering.
//!
//! The store is owned by one session. It is wrapped in a `Mutex` because the
//! coordinator applies UI-response triggers from the inbound connection task;
//! the lock is only held for map access, never across awaits.

mod expr;
mod source;
mod trigger;

pub use source::{ContextSource, SqliteContextSource};

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use thiserror::Error;

use crate::manifest::{ContextVarType, ContextVariableSpec, TriggerSpec};
use trigger::{AgentTextTrigger, TextMatcher, UiResponseTrigger};

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("context source: {0}")]
    Source(String),
    #[error("invalid trigger for {var}: {reason}")]
    InvalidTrigger { var: String, reason: String },
    #[error("environment variable {0} is not set")]
    MissingEnv(String),
}

/// Shared handle to one session's store.
pub type ContextHandle = Arc<Mutex<ContextStore>>;

#[derive(Clone, Debug)]
struct Entry {
    value: Value,
    /// Milliseconds since session start, for write auditing.
    written_at_ms: u64,
}

pub struct ContextStore {
    values: HashMap<String, Entry>,
    exposure: HashMap<String, HashSet<String>>,
    text_triggers: Vec<AgentTextTrigger>,
    ui_triggers: Vec<UiResponseTrigger>,
    started: std::time::Instant,
}

impl ContextStore {
    /// Builds the store from variable specs: static values, environment
    /// lookups, and database fetches through `source`. Derived variables start
    /// unset until a trigger fires.
    pub async fn initialize(
        specs: &[ContextVariableSpec],
        source: Option<&dyn ContextSource>,
    ) -> Result<Self, ContextError> {
        let mut store = Self {
            values: HashMap::new(),
            exposure: HashMap::new(),
            text_triggers: Vec::new(),
            ui_triggers: Vec::new(),
            started: std::time::Instant::now(),
        };

        for spec in specs {
            if !spec.exposed_to.is_empty() {
                store
                    .exposure
                    .insert(spec.name.clone(), spec.exposed_to.iter().cloned().collect());
            }
            match spec.var_type {
                ContextVarType::Static => {
                    if let Some(value) = &spec.value {
                        store.write(&spec.name, value.clone());
                    }
                }
                ContextVarType::Environment => {
                    let env_var = spec
                        .env_var
                        .as_deref()
                        .ok_or_else(|| ContextError::MissingEnv(spec.name.clone()))?;
                    match std::env::var(env_var) {
                        Ok(v) => store.write(&spec.name, Value::String(v)),
                        Err(_) => {
                            tracing::warn!(var = %spec.name, env = %env_var, "environment variable unset");
                        }
                    }
                }
                ContextVarType::Database => {
                    let query = spec.query.as_deref().unwrap_or_default();
                    let Some(source) = source else {
                        tracing::warn!(var = %spec.name, "no context source configured, skipping database variable");
                        continue;
                    };
                    if let Some(value) = source.fetch(query).await? {
                        store.write(&spec.name, value);
                    }
                }
                ContextVarType::Derived => {}
            }
            store.compile_triggers(spec)?;
        }
        Ok(store)
    }

    fn compile_triggers(&mut self, spec: &ContextVariableSpec) -> Result<(), ContextError> {
        for trigger in &spec.triggers {
            match trigger {
                TriggerSpec::AgentText {
                    agent,
                    regex,
                    equals,
                    contains,
                    set_value,
                } => {
                    let matcher = if let Some(pattern) = regex {
                        TextMatcher::Regex(regex::Regex::new(pattern).map_err(|e| {
                            ContextError::InvalidTrigger {
                                var: spec.name.clone(),
                                reason: e.to_string(),
                            }
                        })?)
                    } else if let Some(needle) = equals {
                        TextMatcher::Equals(needle.clone())
                    } else if let Some(needle) = contains {
                        TextMatcher::Contains(needle.clone())
                    } else {
                        return Err(ContextError::InvalidTrigger {
                            var: spec.name.clone(),
                            reason: "agent_text trigger has no matcher".to_string(),
                        });
                    };
                    self.text_triggers.push(AgentTextTrigger {
                        var: spec.name.clone(),
                        agent: agent.clone(),
                        matcher,
                        set_value: set_value.clone(),
                    });
                }
                TriggerSpec::UiResponse { tool, response_key } => {
                    self.ui_triggers.push(UiResponseTrigger {
                        var: spec.name.clone(),
                        tool: tool.clone(),
                        response_key: response_key.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.values.get(name).map(|e| e.value.clone())
    }

    /// Atomic per-key write; records the write time.
    pub fn set(&mut self, name: &str, value: Value) {
        self.write(name, value);
    }

    fn write(&mut self, name: &str, value: Value) {
        let written_at_ms = self.started.elapsed().as_millis() as u64;
        self.values.insert(
            name.to_string(),
            Entry {
                value,
                written_at_ms,
            },
        );
    }

    /// Milliseconds since session start at which `name` was last written.
    pub fn written_at_ms(&self, name: &str) -> Option<u64> {
        self.values.get(name).map(|e| e.written_at_ms)
    }

    /// Variables readable by `agent`, per each variable's `exposed_to` set.
    pub fn expose_for(&self, agent: &str) -> HashMap<String, Value> {
        self.values
            .iter()
            .filter(|(name, _)| {
                self.exposure
                    .get(*name)
                    .map(|agents| agents.contains(agent))
                    .unwrap_or(false)
            })
            .map(|(name, entry)| (name.clone(), entry.value.clone()))
            .collect()
    }

    /// Substitutes `${name}` and evaluates the boolean expression. Undefined
    /// names become empty strings; any evaluation failure yields `false`.
    pub fn evaluate(&self, template: &str) -> bool {
        expr::evaluate(template, &|name| self.get(name))
    }

    /// Substitutes `${name}` references without evaluating (for `string_llm`
    /// condition prompts).
    pub fn substitute(&self, template: &str) -> String {
        expr::substitute_raw(template, &|name| self.get(name))
    }

    /// Runs all `agent_text` triggers targeting `agent` against a finished text
    /// turn. Returns the writes performed, in trigger order.
    pub fn apply_agent_text(&mut self, agent: &str, text: &str) -> Vec<(String, Value)> {
        let mut writes = Vec::new();
        let matched: Vec<(String, Value)> = self
            .text_triggers
            .iter()
            .filter(|t| t.agent == agent)
            .filter_map(|t| t.apply(text).map(|v| (t.var.clone(), v)))
            .collect();
        for (var, value) in matched {
            self.write(&var, value.clone());
            writes.push((var, value));
        }
        writes
    }

    /// Runs all `ui_response` triggers for `tool` against a client response
    /// payload. Called by the coordinator *before* the tool's callback
    /// resolves, so later handoff evaluation sees the new values.
    pub fn apply_ui_response(&mut self, tool: &str, payload: &Value) -> Vec<(String, Value)> {
        let mut writes = Vec::new();
        let matched: Vec<(String, Value)> = self
            .ui_triggers
            .iter()
            .filter(|t| t.tool == tool)
            .filter_map(|t| t.extract(payload).map(|v| (t.var.clone(), v)))
            .collect();
        for (var, value) in matched {
            self.write(&var, value.clone());
            writes.push((var, value));
        }
        writes
    }

    /// Serializes current values for the conversation-state blob.
    pub fn snapshot(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(k, e)| (k.clone(), e.value.clone()))
                .collect(),
        )
    }

    /// Restores values from a snapshot (resumed sessions).
    pub fn restore(&mut self, snapshot: &Value) {
        if let Some(map) = snapshot.as_object() {
            for (k, v) in map {
                self.write(k, v.clone());
            }
        }
    }
}
