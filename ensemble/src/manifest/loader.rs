//! Workflow folder loading and the startup discovery cache.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use super::schema::{
    AgentsFile, ContextVariablesFile, HandoffsFile, OrchestratorSpec, StructuredOutputsFile,
    ToolsFile,
};
use super::validate::validate;
use super::{ManifestError, WorkflowConfig};

fn read_json<T: DeserializeOwned>(dir: &Path, file: &str) -> Result<T, ManifestError> {
    let path = dir.join(file);
    let content = std::fs::read_to_string(&path).map_err(|source| ManifestError::Io {
        file: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ManifestError::Parse {
        file: path.display().to_string(),
        source,
    })
}

fn read_json_or<T: DeserializeOwned + Default>(dir: &Path, file: &str) -> Result<T, ManifestError> {
    if dir.join(file).is_file() {
        read_json(dir, file)
    } else {
        Ok(T::default())
    }
}

/// Loads and validates one workflow folder. `agents.json` and
/// `orchestrator.json` are required; the remaining files default to empty.
pub fn load_workflow(dir: &Path) -> Result<WorkflowConfig, ManifestError> {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string());

    let agents: AgentsFile = read_json(dir, "agents.json")?;
    let orchestrator: OrchestratorSpec = read_json(dir, "orchestrator.json")?;
    let tools: ToolsFile = read_json_or(dir, "tools.json")?;
    let handoffs: HandoffsFile = read_json_or(dir, "handoffs.json")?;
    let context_variables: ContextVariablesFile = read_json_or(dir, "context_variables.json")?;
    let structured_outputs: StructuredOutputsFile = read_json_or(dir, "structured_outputs.json")?;

    let config = WorkflowConfig {
        name,
        agents: agents.agents,
        tools: tools.tools,
        handoffs: handoffs.handoffs,
        context_variables: context_variables.context_variables,
        structured_outputs: structured_outputs.structured_outputs,
        orchestrator,
    };
    validate(&config)?;
    Ok(config)
}

/// Workflow configs discovered at startup. Read-only afterwards.
pub struct WorkflowCache {
    workflows: HashMap<String, Arc<WorkflowConfig>>,
}

impl WorkflowCache {
    /// Scans `root` for workflow folders (any subdirectory with an
    /// `agents.json`). Folders that fail to load are skipped with a warning so
    /// one bad workflow does not take the server down.
    pub fn discover(root: &Path) -> Self {
        let mut workflows = HashMap::new();
        let entries = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(root = %root.display(), "workflow root not readable: {}", e);
                return Self { workflows };
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() || !path.join("agents.json").is_file() {
                continue;
            }
            match load_workflow(&path) {
                Ok(config) => {
                    tracing::info!(workflow = %config.name, "loaded workflow");
                    workflows.insert(config.name.clone(), Arc::new(config));
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), "skipping workflow: {}", e);
                }
            }
        }
        Self { workflows }
    }

    /// An empty cache, for tests that register configs directly.
    pub fn empty() -> Self {
        Self {
            workflows: HashMap::new(),
        }
    }

    /// Registers a config built in code (tests, embedded workflows).
    pub fn insert(&mut self, config: WorkflowConfig) {
        self.workflows
            .insert(config.name.clone(), Arc::new(config));
    }

    pub fn get(&self, name: &str) -> Result<Arc<WorkflowConfig>, ManifestError> {
        self.workflows
            .get(name)
            .cloned()
            .ok_or_else(|| ManifestError::UnknownWorkflow(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.workflows.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_minimal_workflow(dir: &Path) {
        std::fs::write(
            dir.join("agents.json"),
            r#"{"agents":[{"name":"a","system_message":"hi"}]}"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("orchestrator.json"),
            r#"{"startup_mode":"AgentDriven","initial_message":"go"}"#,
        )
        .unwrap();
    }

    #[test]
    fn loads_minimal_workflow_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        write_minimal_workflow(dir.path());
        let config = load_workflow(dir.path()).unwrap();
        assert_eq!(config.agents.len(), 1);
        assert!(config.tools.is_empty());
        assert!(config.handoffs.is_empty());
    }

    #[test]
    fn missing_agents_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_workflow(dir.path()).unwrap_err();
        assert!(matches!(err, ManifestError::Io { .. }));
    }

    #[test]
    fn discover_skips_invalid_folders() {
        let root = tempfile::tempdir().unwrap();
        let good = root.path().join("good");
        std::fs::create_dir(&good).unwrap();
        write_minimal_workflow(&good);
        let bad = root.path().join("bad");
        std::fs::create_dir(&bad).unwrap();
        std::fs::write(bad.join("agents.json"), "{ not json").unwrap();

        let cache = WorkflowCache::discover(root.path());
        assert!(cache.get("good").is_ok());
        assert!(matches!(
            cache.get("bad"),
            Err(ManifestError::UnknownWorkflow(_))
        ));
    }
}
