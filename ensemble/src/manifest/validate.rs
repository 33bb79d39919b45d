//! Cross-reference validation over a loaded workflow. All errors are collected
//! in one pass so authors fix everything at once.

use std::collections::{HashMap, HashSet};

use super::schema::{
    ConditionScope, ContextVarType, HandoffType, ToolType, TriggerSpec, TARGET_TERMINATE,
    TARGET_USER,
};
use super::{ManifestError, WorkflowConfig};

/// Extracts `${name}` references from a condition template.
fn template_vars(template: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        rest = &rest[start + 2..];
        if let Some(end) = rest.find('}') {
            out.push(&rest[..end]);
            rest = &rest[end + 1..];
        } else {
            break;
        }
    }
    out
}

pub(super) fn validate(config: &WorkflowConfig) -> Result<(), ManifestError> {
    let mut errors = Vec::new();

    let mut agent_names = HashSet::new();
    for agent in &config.agents {
        if !agent_names.insert(agent.name.as_str()) {
            errors.push(format!("duplicate agent name: {}", agent.name));
        }
    }
    if config.agents.is_empty() {
        errors.push("workflow declares no agents".to_string());
    }

    let mut tool_names = HashSet::new();
    for tool in &config.tools {
        if !tool_names.insert(tool.name.as_str()) {
            errors.push(format!("duplicate tool name: {}", tool.name));
        }
        match tool.tool_type {
            ToolType::Ui if tool.ui.is_none() => {
                errors.push(format!("ui tool {} is missing the ui section", tool.name));
            }
            ToolType::Backend if tool.ui.is_some() => {
                errors.push(format!("backend tool {} must not declare ui", tool.name));
            }
            _ => {}
        }
    }

    let mut var_names = HashSet::new();
    for var in &config.context_variables {
        if !var_names.insert(var.name.as_str()) {
            errors.push(format!("duplicate context variable: {}", var.name));
        }
        match var.var_type {
            ContextVarType::Static if var.value.is_none() => {
                errors.push(format!("static variable {} has no value", var.name));
            }
            ContextVarType::Environment if var.env_var.is_none() => {
                errors.push(format!("environment variable {} has no env_var", var.name));
            }
            ContextVarType::Database if var.query.is_none() => {
                errors.push(format!("database variable {} has no query", var.name));
            }
            ContextVarType::Derived if var.triggers.is_empty() => {
                errors.push(format!("derived variable {} has no triggers", var.name));
            }
            _ => {}
        }
        for trigger in &var.triggers {
            match trigger {
                TriggerSpec::AgentText {
                    agent,
                    regex,
                    equals,
                    contains,
                    ..
                } => {
                    if !agent_names.contains(agent.as_str()) {
                        errors.push(format!(
                            "variable {} trigger names unknown agent {}",
                            var.name, agent
                        ));
                    }
                    let matchers =
                        regex.is_some() as u8 + equals.is_some() as u8 + contains.is_some() as u8;
                    if matchers != 1 {
                        errors.push(format!(
                            "variable {} agent_text trigger needs exactly one of regex/equals/contains",
                            var.name
                        ));
                    }
                    if let Some(pattern) = regex {
                        if let Err(e) = regex::Regex::new(pattern) {
                            errors.push(format!(
                                "variable {} has invalid regex {:?}: {}",
                                var.name, pattern, e
                            ));
                        }
                    }
                }
                TriggerSpec::UiResponse { tool, .. } => {
                    if !tool_names.contains(tool.as_str()) {
                        errors.push(format!(
                            "variable {} trigger names unknown tool {}",
                            var.name, tool
                        ));
                    }
                }
            }
        }
        for agent in &var.exposed_to {
            if !agent_names.contains(agent.as_str()) {
                errors.push(format!(
                    "variable {} exposed to unknown agent {}",
                    var.name, agent
                ));
            }
        }
    }

    for agent in &config.agents {
        for tool in &agent.tools {
            if !tool_names.contains(tool.as_str()) {
                errors.push(format!("agent {} binds unknown tool {}", agent.name, tool));
            }
        }
    }

    for rule in &config.handoffs {
        if !agent_names.contains(rule.source_agent.as_str()) {
            errors.push(format!(
                "handoff source is not a known agent: {}",
                rule.source_agent
            ));
        }
        let target_ok = agent_names.contains(rule.target_agent.as_str())
            || rule.target_agent == TARGET_USER
            || rule.target_agent == TARGET_TERMINATE;
        if !target_ok {
            errors.push(format!(
                "handoff target is not an agent, {TARGET_USER:?} or {TARGET_TERMINATE:?}: {}",
                rule.target_agent
            ));
        }
        if rule.handoff_type == HandoffType::Condition && rule.condition.is_none() {
            errors.push(format!(
                "condition handoff {} -> {} has no condition",
                rule.source_agent, rule.target_agent
            ));
        }
        if let Some(condition) = &rule.condition {
            for var in template_vars(condition) {
                if !var_names.contains(var) {
                    errors.push(format!(
                        "handoff {} -> {} references unknown context variable {}",
                        rule.source_agent, rule.target_agent, var
                    ));
                }
            }
        }
    }

    for output in &config.structured_outputs {
        if !agent_names.contains(output.agent.as_str()) {
            errors.push(format!(
                "structured output {} names unknown agent {}",
                output.name, output.agent
            ));
        }
        if let Some(tool) = &output.tool {
            if !tool_names.contains(tool.as_str()) {
                errors.push(format!(
                    "structured output {} names unknown tool {}",
                    output.name, tool
                ));
            }
        }
    }

    for agent in &config.orchestrator.visual_agents {
        if !agent_names.contains(agent.as_str()) {
            errors.push(format!("visual_agents names unknown agent {}", agent));
        }
    }

    warn_stale_condition_reads(config);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ManifestError::Invalid(errors))
    }
}

/// Warns about the stale-read shape: a `condition` handoff (which fires right
/// after the agent's text, before its tools run) reading a variable whose only
/// writers are `ui_response` triggers of tools bound to that same source
/// agent. Such a rule always sees the value from *before* the tool completed;
/// it should be declared `after_work` (or scoped `pre`).
fn warn_stale_condition_reads(config: &WorkflowConfig) {
    let mut ui_only_writers: HashMap<&str, Vec<&str>> = HashMap::new();
    for var in &config.context_variables {
        let mut tools = Vec::new();
        let mut ui_only = !var.triggers.is_empty();
        for trigger in &var.triggers {
            match trigger {
                TriggerSpec::UiResponse { tool, .. } => tools.push(tool.as_str()),
                TriggerSpec::AgentText { .. } => ui_only = false,
            }
        }
        if ui_only && var.var_type == ContextVarType::Derived {
            ui_only_writers.insert(var.name.as_str(), tools);
        }
    }

    for rule in &config.handoffs {
        if rule.handoff_type != HandoffType::Condition
            || rule.condition_scope == Some(ConditionScope::Pre)
        {
            continue;
        }
        let Some(condition) = &rule.condition else {
            continue;
        };
        let Some(source) = config.agent(&rule.source_agent) else {
            continue;
        };
        for var in template_vars(condition) {
            let Some(writer_tools) = ui_only_writers.get(var) else {
                continue;
            };
            if writer_tools.iter().any(|t| source.tools.iter().any(|b| b == t)) {
                tracing::warn!(
                    workflow = %config.name,
                    source = %rule.source_agent,
                    variable = %var,
                    "condition handoff reads a variable written only by a ui_response \
                     trigger of the source agent's own tool; it will see the stale value. \
                     Declare the handoff after_work or scope it pre."
                );
            }
        }
    }
}
