//! Per-session outbound transport: visibility filtering, sequence assignment,
//! pre-connect buffering, and connection supersession.
//!
//! One session has at most one active connection; a new attach supersedes the
//! previous one. Events arriving with no connection are buffered up to a
//! configured bound — overflow fails the session rather than grow without
//! limit. A connection whose outbound queue fills is considered unhealthy and
//! dropped; the session keeps running and the client is expected to resume.

use std::collections::VecDeque;

use chat_event::{ChatEvent, EventEnvelope, RunEvent, SequenceState};
use dashmap::DashMap;
use ensemble::dispatch::{DeliverOutcome, OutboundChannel, VisibilityPolicy};
use tokio::sync::mpsc;

pub(crate) struct TransportConfig {
    pub preconnect_buffer: usize,
    pub outbound_high_water: usize,
}

struct SessionChannel {
    policy: VisibilityPolicy,
    seq: SequenceState,
    buffer: VecDeque<EventEnvelope>,
    conn: Option<mpsc::Sender<EventEnvelope>>,
    overflowed: bool,
}

pub struct Transport {
    sessions: DashMap<String, SessionChannel>,
    config: TransportConfig,
}

impl Transport {
    pub fn new(preconnect_buffer: usize, outbound_high_water: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            config: TransportConfig {
                preconnect_buffer,
                outbound_high_water,
            },
        }
    }

    /// Queue capacity for new connection channels.
    pub fn connection_capacity(&self) -> usize {
        self.config.outbound_high_water
    }

    /// Attaches a connection, superseding any previous one, and flushes the
    /// pre-connect buffer into it in order. Frames the connection queue cannot
    /// take yet stay buffered for the next attach. Returns false for unknown
    /// chats.
    pub fn attach(&self, chat_id: &str, conn: mpsc::Sender<EventEnvelope>) -> bool {
        let Some(mut entry) = self.sessions.get_mut(chat_id) else {
            return false;
        };
        while let Some(frame) = entry.buffer.pop_front() {
            if let Err(e) = conn.try_send(frame) {
                let frame = match e {
                    mpsc::error::TrySendError::Full(frame)
                    | mpsc::error::TrySendError::Closed(frame) => frame,
                };
                entry.buffer.push_front(frame);
                tracing::warn!(chat_id, "buffer flush into fresh connection stalled");
                break;
            }
        }
        entry.conn = Some(conn);
        true
    }

    /// Drops the active connection, but only when `conn` is still the one
    /// registered — a superseding connection must not be detached by the old
    /// socket's teardown. The session and its buffer stay.
    pub fn detach_if(&self, chat_id: &str, conn: &mpsc::Sender<EventEnvelope>) {
        if let Some(mut entry) = self.sessions.get_mut(chat_id) {
            let is_current = entry
                .conn
                .as_ref()
                .map(|current| current.same_channel(conn))
                .unwrap_or(false);
            if is_current {
                entry.conn = None;
            }
        }
    }

    pub fn has_session(&self, chat_id: &str) -> bool {
        self.sessions.contains_key(chat_id)
    }

    fn passes_filters(entry: &SessionChannel, event: &RunEvent) -> bool {
        // Filter order: allowlist, auto-tool text dedup, hidden.
        if let (Some(allow), Some(agent)) = (&entry.policy.visual_agents, &event.agent) {
            if !allow.contains(agent) {
                return false;
            }
        }
        if matches!(event.event, ChatEvent::Text { .. }) {
            if let Some(agent) = &event.agent {
                if entry.policy.auto_tool_agents.contains(agent) {
                    return false;
                }
            }
        }
        !event.hidden
    }

    fn enqueue(
        config: &TransportConfig,
        entry: &mut SessionChannel,
        chat_id: &str,
        frame: EventEnvelope,
    ) -> bool {
        if let Some(conn) = &entry.conn {
            match conn.try_send(frame) {
                Ok(()) => return true,
                Err(mpsc::error::TrySendError::Full(frame)) => {
                    tracing::warn!(
                        chat_id,
                        "outbound queue past high-water, closing unhealthy connection"
                    );
                    entry.conn = None;
                    return Self::buffer(config, entry, frame);
                }
                Err(mpsc::error::TrySendError::Closed(frame)) => {
                    entry.conn = None;
                    return Self::buffer(config, entry, frame);
                }
            }
        }
        Self::buffer(config, entry, frame)
    }

    fn buffer(config: &TransportConfig, entry: &mut SessionChannel, frame: EventEnvelope) -> bool {
        if entry.buffer.len() >= config.preconnect_buffer {
            entry.overflowed = true;
            return false;
        }
        entry.buffer.push_back(frame);
        true
    }
}

#[async_trait::async_trait]
impl OutboundChannel for Transport {
    fn open_session(&self, chat_id: &str, policy: VisibilityPolicy) {
        let refreshed = policy.clone();
        self.sessions
            .entry(chat_id.to_string())
            .and_modify(|entry| entry.policy = refreshed)
            .or_insert_with(|| SessionChannel {
                policy,
                seq: SequenceState::new(),
                buffer: VecDeque::new(),
                conn: None,
                overflowed: false,
            });
    }

    async fn deliver(&self, chat_id: &str, event: &RunEvent) -> DeliverOutcome {
        let Some(mut entry) = self.sessions.get_mut(chat_id) else {
            return DeliverOutcome::NoSession;
        };
        if entry.overflowed {
            return DeliverOutcome::Overflow;
        }
        if !Self::passes_filters(&entry, event) {
            return DeliverOutcome::Filtered;
        }
        let seq = entry.seq.assign();
        let mut frame = EventEnvelope::live(event.event.clone(), seq, chat_id);
        frame.corr = event.corr.clone();
        if Self::enqueue(&self.config, &mut entry, chat_id, frame) {
            DeliverOutcome::Delivered(seq)
        } else {
            DeliverOutcome::Overflow
        }
    }

    async fn send_frame(&self, chat_id: &str, frame: EventEnvelope) -> bool {
        let Some(mut entry) = self.sessions.get_mut(chat_id) else {
            return false;
        };
        Self::enqueue(&self.config, &mut entry, chat_id, frame)
    }

    fn reset_sequence(&self, chat_id: &str) {
        if let Some(mut entry) = self.sessions.get_mut(chat_id) {
            entry.seq.reset();
        }
    }
}
