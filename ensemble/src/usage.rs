//! Token usage and latency accounting. Deltas accumulate as calls complete;
//! the authoritative totals are written once at run completion.

use serde::{Deserialize, Serialize};

/// Usage for one LLM call, attributed to an agent and model.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UsageDelta {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cached: bool,
    pub duration_sec: f64,
    pub agent: String,
    pub model: String,
    pub cost: f64,
}

/// Session totals across all calls.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
}

impl UsageTotals {
    pub fn add(&mut self, delta: &UsageDelta) {
        self.prompt_tokens += delta.prompt_tokens;
        self.completion_tokens += delta.completion_tokens;
        self.total_tokens += delta.total_tokens;
        self.cost += delta.cost;
    }
}

/// Per-agent call latency, kept as count/total/max rather than full histograms.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AgentLatency {
    pub agent: String,
    pub calls: u64,
    pub total_ms: u64,
    pub max_ms: u64,
}

impl AgentLatency {
    pub fn record(&mut self, duration_ms: u64) {
        self.calls += 1;
        self.total_ms += duration_ms;
        self.max_ms = self.max_ms.max(duration_ms);
    }

    pub fn mean_ms(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.total_ms as f64 / self.calls as f64
        }
    }
}
