//! Binding workflow tool declarations to executable callables.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chat_event::DisplayMode;
use serde_json::Value;

use super::{Tool, ToolCallContext, ToolError, ToolOutput, ToolSpec};
use crate::manifest::{ToolDecl, ToolType};

/// Native tool implementations registered at startup, before any workflow
/// loads. This is the plugin surface: the manifest's declarative half must
/// name an implementation registered here (UI tools need none; a passthrough
/// is synthesized).
#[derive(Default)]
pub struct ToolSet {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.insert(tool.name().to_string(), tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }
}

/// Runtime metadata for one bound tool.
#[derive(Clone, Debug)]
pub struct ToolBinding {
    pub tool_type: ToolType,
    /// When true, a structured output designating this tool invokes it without
    /// asking the agent for confirmation.
    pub auto_invoke: bool,
    pub display: Option<DisplayMode>,
    pub component: Option<String>,
    pub description: String,
}

/// UI tool without a backend callable: echoes its arguments as the component
/// payload and suspends for the client response.
struct UiPassthrough {
    name: String,
    description: String,
    component: String,
    mode: DisplayMode,
}

#[async_trait]
impl Tool for UiPassthrough {
    fn name(&self) -> &str {
        &self.name
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: Some(self.description.clone()),
            input_schema: serde_json::json!({"type": "object"}),
        }
    }

    async fn call(&self, args: Value, _ctx: &ToolCallContext) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::Ui {
            component: self.component.clone(),
            mode: self.mode,
            payload: args,
        })
    }
}

/// Tools bound for one workflow: declaration metadata plus callables.
/// Read-only after workflow load.
pub struct ToolRegistry {
    tools: HashMap<String, (Arc<dyn Tool>, ToolBinding)>,
}

impl ToolRegistry {
    /// Binds every declaration to an implementation from `set`. Backend
    /// declarations without an implementation are an error; UI declarations
    /// fall back to a passthrough that surfaces the call to the client.
    pub fn from_manifest(decls: &[ToolDecl], set: &ToolSet) -> Result<Self, ToolError> {
        let mut tools = HashMap::new();
        for decl in decls {
            let binding = ToolBinding {
                tool_type: decl.tool_type,
                auto_invoke: decl.auto_invoke(),
                display: decl.ui.as_ref().map(|ui| ui.mode),
                component: decl.ui.as_ref().map(|ui| ui.component.clone()),
                description: decl.description.clone(),
            };
            let tool = match (set.get(&decl.name), decl.tool_type) {
                (Some(tool), _) => tool,
                (None, ToolType::Ui) => {
                    let ui = decl.ui.as_ref().ok_or_else(|| ToolError::InvalidArgs {
                        name: decl.name.clone(),
                        reason: "ui tool without ui section".to_string(),
                    })?;
                    Arc::new(UiPassthrough {
                        name: decl.name.clone(),
                        description: decl.description.clone(),
                        component: ui.component.clone(),
                        mode: ui.mode,
                    }) as Arc<dyn Tool>
                }
                (None, ToolType::Backend) => {
                    return Err(ToolError::NotImplemented {
                        name: decl.name.clone(),
                    })
                }
            };
            tools.insert(decl.name.clone(), (tool, binding));
        }
        Ok(Self { tools })
    }

    pub fn binding(&self, name: &str) -> Option<&ToolBinding> {
        self.tools.get(name).map(|(_, b)| b)
    }

    /// Specs for the given tool names, in order, for the LLM request.
    pub fn specs_for(&self, names: &[String]) -> Vec<ToolSpec> {
        names
            .iter()
            .filter_map(|n| self.tools.get(n).map(|(t, _)| t.spec()))
            .collect()
    }

    pub async fn invoke(
        &self,
        name: &str,
        args: Value,
        ctx: &ToolCallContext,
    ) -> Result<ToolOutput, ToolError> {
        let (tool, _) = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.call(args, ctx).await
    }
}
