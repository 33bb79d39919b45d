//! Rule-based handoff evaluation over the declared routing table.
//!
//! Rules are checked in declaration order; the first applicable rule whose
//! condition holds wins, which keeps routing deterministic for a fixed
//! context (no rule randomness, no tie-breaking).

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::ContextHandle;
use crate::engine::{HandoffEvaluator, HandoffPhase, HandoffTarget};
use crate::llm::LlmClient;
use crate::manifest::{
    ConditionScope, ConditionType, HandoffRule, HandoffType, TARGET_TERMINATE, TARGET_USER,
};
use crate::message::Message;

pub struct RuleBasedHandoffs {
    rules: Vec<HandoffRule>,
    context: ContextHandle,
    llm: Arc<dyn LlmClient>,
}

impl RuleBasedHandoffs {
    pub fn new(rules: Vec<HandoffRule>, context: ContextHandle, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            rules,
            context,
            llm,
        }
    }

    /// `condition` handoffs fire after the agent's text; `after_work` handoffs
    /// (and `condition` rules scoped `pre`) fire after its tools complete —
    /// the required shape for conditions over UI-tool-written variables.
    fn applies(rule: &HandoffRule, phase: HandoffPhase) -> bool {
        match phase {
            HandoffPhase::AfterText => {
                rule.handoff_type == HandoffType::Condition
                    && rule.condition_scope != Some(ConditionScope::Pre)
            }
            HandoffPhase::AfterWork => {
                rule.handoff_type == HandoffType::AfterWork
                    || (rule.handoff_type == HandoffType::Condition
                        && rule.condition_scope == Some(ConditionScope::Pre))
            }
        }
    }

    async fn condition_holds(&self, rule: &HandoffRule) -> bool {
        let Some(condition) = &rule.condition else {
            return true; // unconditional after_work rule
        };
        match rule.condition_type {
            Some(ConditionType::StringLlm) => {
                let prompt = match self.context.lock() {
                    Ok(store) => store.substitute(condition),
                    Err(_) => return false,
                };
                let truthy = rule.truthy_match.as_deref().unwrap_or("yes");
                match self
                    .llm
                    .invoke(
                        "Answer the question with a single word.",
                        &[Message::user(prompt)],
                        &[],
                    )
                    .await
                {
                    Ok(response) => response
                        .content
                        .trim()
                        .to_lowercase()
                        .starts_with(&truthy.to_lowercase()),
                    Err(e) => {
                        tracing::warn!("string_llm condition failed, treating as false: {}", e);
                        false
                    }
                }
            }
            Some(ConditionType::Expression) | None => match self.context.lock() {
                Ok(store) => store.evaluate(condition),
                Err(_) => false,
            },
        }
    }

    fn target(rule: &HandoffRule) -> HandoffTarget {
        if rule.target_agent == TARGET_TERMINATE {
            HandoffTarget::Terminate
        } else if rule.target_agent == TARGET_USER {
            HandoffTarget::User
        } else {
            HandoffTarget::Agent(rule.target_agent.clone())
        }
    }
}

#[async_trait]
impl HandoffEvaluator for RuleBasedHandoffs {
    async fn next(&self, source_agent: &str, phase: HandoffPhase) -> HandoffTarget {
        for rule in self
            .rules
            .iter()
            .filter(|r| r.source_agent == source_agent)
        {
            if !Self::applies(rule, phase) {
                continue;
            }
            if self.condition_holds(rule).await {
                return Self::target(rule);
            }
        }
        HandoffTarget::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextStore;
    use crate::llm::MockLlm;
    use serde_json::json;
    use std::sync::Mutex;

    fn rule(json: serde_json::Value) -> HandoffRule {
        serde_json::from_value(json).unwrap()
    }

    async fn empty_context() -> ContextHandle {
        Arc::new(Mutex::new(ContextStore::initialize(&[], None).await.unwrap()))
    }

    #[tokio::test]
    async fn after_work_rules_fire_in_after_work_phase_only() {
        let rules = vec![rule(json!({
            "source_agent": "a", "target_agent": "b", "handoff_type": "after_work"
        }))];
        let handoffs =
            RuleBasedHandoffs::new(rules, empty_context().await, Arc::new(MockLlm::fixed("")));
        assert_eq!(
            handoffs.next("a", HandoffPhase::AfterText).await,
            HandoffTarget::None
        );
        assert_eq!(
            handoffs.next("a", HandoffPhase::AfterWork).await,
            HandoffTarget::Agent("b".to_string())
        );
        assert_eq!(
            handoffs.next("other", HandoffPhase::AfterWork).await,
            HandoffTarget::None
        );
    }

    #[tokio::test]
    async fn conditional_after_work_routes_by_context() {
        let rules = vec![
            rule(json!({
                "source_agent": "a", "target_agent": "b", "handoff_type": "after_work",
                "condition": "${approved} == true"
            })),
            rule(json!({
                "source_agent": "a", "target_agent": "TERMINATE", "handoff_type": "after_work",
                "condition": "${approved} == false"
            })),
        ];
        let context = empty_context().await;
        let handoffs =
            RuleBasedHandoffs::new(rules, context.clone(), Arc::new(MockLlm::fixed("")));

        context.lock().unwrap().set("approved", json!(true));
        assert_eq!(
            handoffs.next("a", HandoffPhase::AfterWork).await,
            HandoffTarget::Agent("b".to_string())
        );

        context.lock().unwrap().set("approved", json!(false));
        assert_eq!(
            handoffs.next("a", HandoffPhase::AfterWork).await,
            HandoffTarget::Terminate
        );
    }

    #[tokio::test]
    async fn evaluation_is_deterministic_for_fixed_context() {
        let rules = vec![rule(json!({
            "source_agent": "a", "target_agent": "b", "handoff_type": "condition",
            "condition": "${stage} == review"
        }))];
        let context = empty_context().await;
        context.lock().unwrap().set("stage", json!("review"));
        let handoffs =
            RuleBasedHandoffs::new(rules, context, Arc::new(MockLlm::fixed("")));
        let first = handoffs.next("a", HandoffPhase::AfterText).await;
        let second = handoffs.next("a", HandoffPhase::AfterText).await;
        assert_eq!(first, second);
        assert_eq!(first, HandoffTarget::Agent("b".to_string()));
    }

    #[tokio::test]
    async fn string_llm_condition_uses_truthy_match() {
        let rules = vec![rule(json!({
            "source_agent": "a", "target_agent": "b", "handoff_type": "condition",
            "condition_type": "string_llm",
            "condition": "Is ${topic} resolved?",
            "truthy_match": "yes"
        }))];
        let context = empty_context().await;
        context.lock().unwrap().set("topic", json!("the bug"));

        let handoffs = RuleBasedHandoffs::new(
            rules.clone(),
            context.clone(),
            Arc::new(MockLlm::fixed("Yes, it is.")),
        );
        assert_eq!(
            handoffs.next("a", HandoffPhase::AfterText).await,
            HandoffTarget::Agent("b".to_string())
        );

        let handoffs =
            RuleBasedHandoffs::new(rules, context, Arc::new(MockLlm::fixed("No.")));
        assert_eq!(
            handoffs.next("a", HandoffPhase::AfterText).await,
            HandoffTarget::None
        );
    }

    #[tokio::test]
    async fn pre_scoped_condition_moves_to_after_work() {
        let rules = vec![rule(json!({
            "source_agent": "a", "target_agent": "b", "handoff_type": "condition",
            "condition": "${approved} == true", "condition_scope": "pre"
        }))];
        let context = empty_context().await;
        context.lock().unwrap().set("approved", json!(true));
        let handoffs =
            RuleBasedHandoffs::new(rules, context, Arc::new(MockLlm::fixed("")));
        assert_eq!(
            handoffs.next("a", HandoffPhase::AfterText).await,
            HandoffTarget::None
        );
        assert_eq!(
            handoffs.next("a", HandoffPhase::AfterWork).await,
            HandoffTarget::Agent("b".to_string())
        );
    }
}
