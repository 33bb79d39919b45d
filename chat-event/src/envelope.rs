//! Outbound envelope `{type, data, seq, chat_id, corr?, replay?}` and the
//! per-session sequence counter.

use serde::{Deserialize, Serialize};

use crate::event::ChatEvent;

/// One delivered frame. `seq` is absent only on `chat.resume_boundary`, which
/// acts as a restart marker: the counter resets and live events restart at 1.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(flatten)]
    pub event: ChatEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    pub chat_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replay: Option<bool>,
}

impl EventEnvelope {
    /// Builds a live envelope with the given sequence number.
    pub fn live(event: ChatEvent, seq: u64, chat_id: impl Into<String>) -> Self {
        Self {
            event,
            seq: Some(seq),
            chat_id: chat_id.into(),
            corr: None,
            replay: None,
        }
    }

    /// Builds a replayed envelope, keeping the original sequence number.
    pub fn replayed(event: ChatEvent, seq: u64, chat_id: impl Into<String>) -> Self {
        Self {
            event,
            seq: Some(seq),
            chat_id: chat_id.into(),
            corr: None,
            replay: Some(true),
        }
    }

    /// Builds the boundary frame emitted between replay and live streaming.
    pub fn resume_boundary(chat_id: impl Into<String>) -> Self {
        Self {
            event: ChatEvent::ResumeBoundary {},
            seq: None,
            chat_id: chat_id.into(),
            corr: None,
            replay: None,
        }
    }

    pub fn with_corr(mut self, corr: impl Into<String>) -> Self {
        self.corr = Some(corr.into());
        self
    }
}

/// Per-session sequence counter: strictly monotonic from 1, reset at each
/// resume boundary. Clients key deduplication off (connection, seq).
#[derive(Clone, Debug)]
pub struct SequenceState {
    next: u64,
}

impl SequenceState {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Returns the next sequence number and advances the counter.
    pub fn assign(&mut self) -> u64 {
        let seq = self.next;
        self.next += 1;
        seq
    }

    /// Highest sequence number assigned so far (0 if none since the last reset).
    pub fn high_water(&self) -> u64 {
        self.next - 1
    }

    /// Resets after a resume boundary; the next live event gets seq 1.
    pub fn reset(&mut self) {
        self.next = 1;
    }
}

impl Default for SequenceState {
    fn default() -> Self {
        Self::new()
    }
}
