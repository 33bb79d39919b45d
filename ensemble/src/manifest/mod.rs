//! Workflow manifests: schema records, folder loading, cross-reference
//! validation, and the startup discovery cache.
//!
//! A workflow is a directory holding `agents.json`, `tools.json`,
//! `handoffs.json`, `context_variables.json`, `structured_outputs.json`, and
//! `orchestrator.json` (plus a `tools/` subdirectory with the declarative half
//! of tool definitions). Loading produces an immutable [`WorkflowConfig`];
//! configs are cached and read-only after startup.

mod loader;
mod schema;
mod validate;

pub use loader::{load_workflow, WorkflowCache};
pub use schema::{
    AgentSpec, ConditionScope, ConditionType, ContextVarType, ContextVariableSpec, HandoffRule,
    HandoffType, OrchestratorSpec, StartupMode, StructuredOutputSpec, TerminationConditions,
    ToolDecl, ToolType, TriggerSpec, UiSpec, TARGET_TERMINATE, TARGET_USER,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("workflow not found: {0}")]
    UnknownWorkflow(String),
    #[error("read {file}: {source}")]
    Io {
        file: String,
        source: std::io::Error,
    },
    #[error("parse {file}: {source}")]
    Parse {
        file: String,
        source: serde_json::Error,
    },
    /// All validation errors for the workflow, collected in one pass.
    #[error("invalid workflow config: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Immutable, validated view of one workflow folder.
#[derive(Clone, Debug)]
pub struct WorkflowConfig {
    pub name: String,
    pub agents: Vec<AgentSpec>,
    pub tools: Vec<ToolDecl>,
    pub handoffs: Vec<HandoffRule>,
    pub context_variables: Vec<ContextVariableSpec>,
    pub structured_outputs: Vec<StructuredOutputSpec>,
    pub orchestrator: OrchestratorSpec,
}

impl WorkflowConfig {
    pub fn agent(&self, name: &str) -> Option<&AgentSpec> {
        self.agents.iter().find(|a| a.name == name)
    }

    pub fn tool(&self, name: &str) -> Option<&ToolDecl> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Handoff rules whose source is `agent`, in declaration order.
    pub fn handoffs_from<'a>(&'a self, agent: &'a str) -> impl Iterator<Item = &'a HandoffRule> {
        self.handoffs.iter().filter(move |h| h.source_agent == agent)
    }

    pub fn context_variable(&self, name: &str) -> Option<&ContextVariableSpec> {
        self.context_variables.iter().find(|v| v.name == name)
    }
}
