//! Serde records for the six workflow manifest files. Unknown fields are
//! rejected everywhere so authoring typos fail at load, not at runtime.

use chat_event::DisplayMode;
use serde::Deserialize;
use serde_json::Value;

/// Reserved handoff target: hand the turn to the human user.
pub const TARGET_USER: &str = "user";
/// Reserved handoff target: end the run.
pub const TARGET_TERMINATE: &str = "TERMINATE";

fn default_max_auto_reply() -> u32 {
    10
}

fn default_max_turns() -> u32 {
    40
}

/// One agent role, from `agents.json`.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentSpec {
    pub name: String,
    pub system_message: String,
    #[serde(default = "default_max_auto_reply")]
    pub max_consecutive_auto_reply: u32,
    /// Agents in auto-tool mode emit a tool call right after their text; the
    /// transport drops the redundant text.
    #[serde(default)]
    pub auto_tool_mode: bool,
    #[serde(default)]
    pub structured_outputs_required: bool,
    #[serde(default)]
    pub tools: Vec<String>,
    /// Named LLM configuration this agent uses (model selection).
    #[serde(default)]
    pub llm_config: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentsFile {
    pub agents: Vec<AgentSpec>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolType {
    Backend,
    Ui,
}

/// UI rendering details for `type = "ui"` tools.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UiSpec {
    pub component: String,
    pub mode: DisplayMode,
}

/// One tool declaration, from `tools.json`. The implementation is a native
/// `Tool` registered at startup under the same name.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    /// Defaults to true for UI tools and false for backend tools.
    #[serde(default)]
    pub auto_invoke: Option<bool>,
    pub description: String,
    #[serde(default)]
    pub ui: Option<UiSpec>,
}

impl ToolDecl {
    pub fn auto_invoke(&self) -> bool {
        self.auto_invoke
            .unwrap_or(self.tool_type == ToolType::Ui)
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolsFile {
    #[serde(default)]
    pub tools: Vec<ToolDecl>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffType {
    /// Evaluated after the agent's tool invocations have completed.
    AfterWork,
    /// Evaluated immediately after the agent's text turn.
    Condition,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    Expression,
    StringLlm,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionScope {
    /// Evaluate after tool completion even for `condition` handoffs.
    Pre,
}

/// One routing rule, from `handoffs.json`. Rules are evaluated in declaration
/// order; the first whose condition holds wins.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandoffRule {
    pub source_agent: String,
    /// Agent name, or the reserved `user` / `TERMINATE` tokens.
    pub target_agent: String,
    pub handoff_type: HandoffType,
    #[serde(default)]
    pub condition_type: Option<ConditionType>,
    /// Template over context variables, e.g. `${approved} == true`.
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub condition_scope: Option<ConditionScope>,
    /// For `string_llm` conditions: the answer treated as true (default "yes").
    #[serde(default)]
    pub truthy_match: Option<String>,
}

impl HandoffRule {
    pub fn is_terminate(&self) -> bool {
        self.target_agent == TARGET_TERMINATE
    }

    pub fn is_user(&self) -> bool {
        self.target_agent == TARGET_USER
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandoffsFile {
    #[serde(default)]
    pub handoffs: Vec<HandoffRule>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextVarType {
    Static,
    Environment,
    Database,
    Derived,
}

/// Mutation rule for a derived context variable.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum TriggerSpec {
    /// Fires after a text turn from `agent`. Exactly one of `regex`, `equals`,
    /// `contains` must be set. Without `set_value`, the written value is the
    /// first regex capture group (or the matched text).
    AgentText {
        agent: String,
        #[serde(default)]
        regex: Option<String>,
        #[serde(default)]
        equals: Option<String>,
        #[serde(default)]
        contains: Option<String>,
        #[serde(default)]
        set_value: Option<Value>,
    },
    /// Fires when the named UI tool's client response resolves; `response_key`
    /// is a dotted path into the response payload.
    UiResponse { tool: String, response_key: String },
}

/// One context variable, from `context_variables.json`.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContextVariableSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub var_type: ContextVarType,
    /// Initial value for `static` variables.
    #[serde(default)]
    pub value: Option<Value>,
    /// Environment variable name for `environment` variables.
    #[serde(default)]
    pub env_var: Option<String>,
    /// Free-form query passed to the configured context source for `database`
    /// variables.
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub triggers: Vec<TriggerSpec>,
    /// Agents allowed to read this variable. Empty means not exposed to any
    /// agent prompt (still readable by handoff conditions).
    #[serde(default)]
    pub exposed_to: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContextVariablesFile {
    #[serde(default)]
    pub context_variables: Vec<ContextVariableSpec>,
}

/// One structured output declaration, from `structured_outputs.json`. When
/// `tool` names an auto-invoke tool, conforming output triggers it without
/// asking the agent for confirmation.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StructuredOutputSpec {
    pub name: String,
    pub agent: String,
    pub schema: Value,
    #[serde(default)]
    pub tool: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StructuredOutputsFile {
    #[serde(default)]
    pub structured_outputs: Vec<StructuredOutputSpec>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum StartupMode {
    /// A hidden seed message starts the first agent immediately.
    AgentDriven,
    /// The run waits for the first user submission.
    UserDriven,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TerminationConditions {
    #[serde(default)]
    pub max_consecutive_auto_replies: Option<u32>,
    /// Expression terminating the run when it evaluates true, e.g.
    /// `${workflow_complete} == true`.
    #[serde(default)]
    pub context_variable_trigger: Option<String>,
}

/// Orchestration policy, from `orchestrator.json`.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrchestratorSpec {
    pub startup_mode: StartupMode,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// Allowlist of agents whose events reach the client. Empty = all visible.
    #[serde(default)]
    pub visual_agents: Vec<String>,
    #[serde(default)]
    pub termination_conditions: TerminationConditions,
    /// Hidden seed injected in AgentDriven mode.
    #[serde(default)]
    pub initial_message: Option<String>,
    /// Visible greeting injected in UserDriven mode.
    #[serde(default)]
    pub initial_message_to_user: Option<String>,
}
