//! Transport doubles shared by unit tests.

use std::sync::Mutex;

use chat_event::{EventEnvelope, RunEvent, SequenceState};

use crate::dispatch::{DeliverOutcome, OutboundChannel, VisibilityPolicy};

/// Assigns sequence numbers and records everything; never blocks.
#[derive(Default)]
pub(crate) struct NullChannel {
    seq: Mutex<SequenceState>,
    pub delivered: Mutex<Vec<(u64, RunEvent)>>,
    pub frames: Mutex<Vec<EventEnvelope>>,
}

impl NullChannel {
    pub fn delivered_kinds(&self) -> Vec<String> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|(_, e)| e.event.kind().to_string())
            .collect()
    }
}

#[async_trait::async_trait]
impl OutboundChannel for NullChannel {
    fn open_session(&self, _chat_id: &str, _policy: VisibilityPolicy) {}

    async fn deliver(&self, _chat_id: &str, event: &RunEvent) -> DeliverOutcome {
        let seq = self.seq.lock().unwrap().assign();
        self.delivered.lock().unwrap().push((seq, event.clone()));
        DeliverOutcome::Delivered(seq)
    }

    async fn send_frame(&self, _chat_id: &str, frame: EventEnvelope) -> bool {
        self.frames.lock().unwrap().push(frame);
        true
    }

    fn reset_sequence(&self, _chat_id: &str) {
        self.seq.lock().unwrap().reset();
    }
}
