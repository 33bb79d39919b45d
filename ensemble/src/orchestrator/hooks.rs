//! Orchestrator-owned hook implementations handed to the engine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::context::ContextHandle;
use crate::coordinator::{Coordinator, Resolution};
use crate::dispatch::EventDispatcher;
use crate::engine::{BeforeCallHook, InputBroker, TerminationCheck};

/// Extends an agent's system message with the context variables exposed to it.
/// Read-only with respect to the store.
pub(super) struct ContextSystemMessage {
    pub context: ContextHandle,
}

impl BeforeCallHook for ContextSystemMessage {
    fn effective_system_message(&self, agent: &str, base: &str) -> String {
        let exposed = match self.context.lock() {
            Ok(store) => store.expose_for(agent),
            Err(_) => return base.to_string(),
        };
        if exposed.is_empty() {
            return base.to_string();
        }
        let mut out = String::from(base);
        out.push_str("\n\nCurrent context:\n");
        let mut names: Vec<&String> = exposed.keys().collect();
        names.sort();
        for name in names {
            out.push_str(&format!("- {}: {}\n", name, exposed[name]));
        }
        out
    }
}

/// Ends the run when the configured context expression becomes true.
pub(super) struct ContextTermination {
    pub context: ContextHandle,
    pub trigger: Option<String>,
}

impl TerminationCheck for ContextTermination {
    fn should_terminate(&self) -> Option<String> {
        let trigger = self.trigger.as_deref()?;
        let fired = self
            .context
            .lock()
            .map(|store| store.evaluate(trigger))
            .unwrap_or(false);
        fired.then(|| "context_trigger".to_string())
    }
}

/// Bridges the engine's input seam onto the coordinator for one session.
pub(super) struct CoordinatorBroker {
    pub coordinator: Arc<Coordinator>,
    pub events: EventDispatcher,
    pub context: ContextHandle,
    pub chat_id: String,
    pub input_deadline: Duration,
    pub ui_tool_deadline: Duration,
}

#[async_trait]
impl InputBroker for CoordinatorBroker {
    async fn request_input(&self) -> (String, oneshot::Receiver<Resolution>) {
        let request_id = uuid::Uuid::new_v4().to_string();
        let rx = self.coordinator.register_input(
            &self.chat_id,
            &request_id,
            self.events.clone(),
            self.input_deadline,
        );
        (request_id, rx)
    }

    async fn request_ui_tool(&self, call_id: &str, tool: &str) -> oneshot::Receiver<Resolution> {
        self.coordinator.register_ui_tool(
            &self.chat_id,
            call_id,
            tool,
            self.events.clone(),
            self.context.clone(),
            self.ui_tool_deadline,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextStore;
    use crate::manifest::{ContextVarType, ContextVariableSpec};
    use serde_json::json;
    use std::sync::Mutex;

    async fn handle_with(specs: &[ContextVariableSpec]) -> ContextHandle {
        Arc::new(Mutex::new(
            ContextStore::initialize(specs, None).await.unwrap(),
        ))
    }

    #[tokio::test]
    async fn system_message_gets_exposed_vars_only() {
        let specs = vec![
            ContextVariableSpec {
                name: "tier".to_string(),
                var_type: ContextVarType::Static,
                value: Some(json!("gold")),
                env_var: None,
                query: None,
                triggers: vec![],
                exposed_to: vec!["seller".to_string()],
            },
            ContextVariableSpec {
                name: "internal".to_string(),
                var_type: ContextVarType::Static,
                value: Some(json!("hidden")),
                env_var: None,
                query: None,
                triggers: vec![],
                exposed_to: vec![],
            },
        ];
        let hook = ContextSystemMessage {
            context: handle_with(&specs).await,
        };
        let msg = hook.effective_system_message("seller", "Sell things.");
        assert!(msg.contains("tier: \"gold\""));
        assert!(!msg.contains("internal"));
        // Agents with nothing exposed keep the bare system message.
        assert_eq!(
            hook.effective_system_message("other", "Sell things."),
            "Sell things."
        );
    }

    #[tokio::test]
    async fn termination_fires_on_trigger_expression() {
        let specs = vec![ContextVariableSpec {
            name: "workflow_complete".to_string(),
            var_type: ContextVarType::Static,
            value: Some(json!(false)),
            env_var: None,
            query: None,
            triggers: vec![],
            exposed_to: vec![],
        }];
        let context = handle_with(&specs).await;
        let check = ContextTermination {
            context: context.clone(),
            trigger: Some("${workflow_complete} == true".to_string()),
        };
        assert!(check.should_terminate().is_none());
        context
            .lock()
            .unwrap()
            .set("workflow_complete", json!(true));
        assert_eq!(check.should_terminate().as_deref(), Some("context_trigger"));
    }
}
