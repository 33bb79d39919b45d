//! Unified event dispatch: one mailbox per session, drained by one task, so
//! downstream components see strict emission order. Sessions are independent.
//!
//! Routing per message class: runtime events go to the transport (which
//! filters and assigns seq) and then to persistence, concurrently with
//! delivery; business events go to the observability sink (tracing) only;
//! resume requests replay the persisted suffix through the transport and
//! reset the sequence counter — running them on the mailbox keeps replay
//! atomic with respect to live events without any locks.

use std::collections::HashSet;
use std::sync::Arc;

use chat_event::{ChatEvent, ErrorCode, EventEnvelope, RunEvent};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::session::SessionStatus;
use crate::store::SessionStore;

/// Per-session delivery policy applied by the transport.
#[derive(Clone, Debug, Default)]
pub struct VisibilityPolicy {
    /// Agents whose events reach the client. `None` = all agents visible.
    pub visual_agents: Option<HashSet<String>>,
    /// Agents with `auto_tool_mode`; their finalized text events are dropped
    /// as redundant (a tool call always follows).
    pub auto_tool_agents: HashSet<String>,
}

impl VisibilityPolicy {
    pub fn from_workflow(config: &crate::manifest::WorkflowConfig) -> Self {
        let visual_agents = if config.orchestrator.visual_agents.is_empty() {
            None
        } else {
            Some(config.orchestrator.visual_agents.iter().cloned().collect())
        };
        let auto_tool_agents = config
            .agents
            .iter()
            .filter(|a| a.auto_tool_mode)
            .map(|a| a.name.clone())
            .collect();
        Self {
            visual_agents,
            auto_tool_agents,
        }
    }
}

/// What the transport did with one runtime event.
#[derive(Debug, PartialEq, Eq)]
pub enum DeliverOutcome {
    /// Filters passed; the event got this sequence number and was queued or
    /// buffered for the connection.
    Delivered(u64),
    /// Dropped by a visibility filter; not persisted either.
    Filtered,
    /// No channel registered for this chat.
    NoSession,
    /// Pre-connect buffer overflowed; the session must fail.
    Overflow,
}

/// Outbound side of the transport, as seen by the dispatcher and the resume
/// path. Implemented by the serve crate's connection manager.
#[async_trait::async_trait]
pub trait OutboundChannel: Send + Sync {
    /// Registers a session channel with its delivery policy.
    fn open_session(&self, chat_id: &str, policy: VisibilityPolicy);

    /// Applies visibility filters, assigns a sequence number, and queues the
    /// event for delivery (or buffers it pre-connect).
    async fn deliver(&self, chat_id: &str, event: &RunEvent) -> DeliverOutcome;

    /// Sends a prebuilt frame (replay, boundary) bypassing filters and
    /// sequence assignment. Returns false when the session is unknown.
    async fn send_frame(&self, chat_id: &str, frame: EventEnvelope) -> bool;

    /// Resets the session's sequence counter (after a resume boundary).
    fn reset_sequence(&self, chat_id: &str);
}

/// Identifies the session a dispatcher serves.
#[derive(Clone, Debug)]
pub struct SessionRef {
    pub tenant: String,
    pub chat_id: String,
}

enum DispatchMsg {
    Runtime(RunEvent),
    Business { name: String, detail: Value },
    Resume { last_client_seq: u64 },
}

/// Cloneable handle feeding one session's mailbox.
#[derive(Clone)]
pub struct EventDispatcher {
    tx: mpsc::Sender<DispatchMsg>,
    chat_id: String,
}

impl EventDispatcher {
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    /// Enqueues a runtime event. Awaiting here is the engine's backpressure:
    /// a slow pipeline slows the producer instead of reordering or dropping.
    pub async fn emit(&self, event: RunEvent) {
        if self.tx.send(DispatchMsg::Runtime(event)).await.is_err() {
            tracing::debug!(chat_id = %self.chat_id, "dispatcher closed, dropping event");
        }
    }

    /// Enqueues a business (bookkeeping) event for the observability sink.
    pub async fn emit_business(&self, name: impl Into<String>, detail: Value) {
        let msg = DispatchMsg::Business {
            name: name.into(),
            detail,
        };
        if self.tx.send(msg).await.is_err() {
            tracing::debug!(chat_id = %self.chat_id, "dispatcher closed, dropping business event");
        }
    }

    /// Enqueues a resume request; replay runs in mailbox order, atomically
    /// with respect to live events.
    pub async fn request_resume(&self, last_client_seq: u64) {
        let msg = DispatchMsg::Resume { last_client_seq };
        if self.tx.send(msg).await.is_err() {
            tracing::debug!(chat_id = %self.chat_id, "dispatcher closed, dropping resume request");
        }
    }
}

/// Spawns the drain task for one session. The returned handle is the only way
/// to feed it; dropping all handles ends the task.
pub fn spawn_dispatcher(
    session: SessionRef,
    outbound: Arc<dyn OutboundChannel>,
    store: Arc<dyn SessionStore>,
    cancel: CancellationToken,
    capacity: usize,
) -> (EventDispatcher, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<DispatchMsg>(capacity);
    let chat_id = session.chat_id.clone();
    let handle = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match msg {
                DispatchMsg::Runtime(event) => {
                    handle_runtime(&session, &outbound, &store, &cancel, event).await;
                }
                DispatchMsg::Business { name, detail } => {
                    tracing::info!(
                        chat_id = %session.chat_id,
                        event = %name,
                        detail = %detail,
                        "workflow bookkeeping"
                    );
                }
                DispatchMsg::Resume { last_client_seq } => {
                    handle_resume(&session, &outbound, &store, last_client_seq).await;
                }
            }
        }
    });
    (EventDispatcher { tx, chat_id }, handle)
}

fn persist(
    session: &SessionRef,
    store: &Arc<dyn SessionStore>,
    seq: u64,
    event: RunEvent,
) {
    let store = Arc::clone(store);
    let session = session.clone();
    // Persistence runs concurrently with delivery and never blocks it; a lost
    // write only means the event is absent from future replays.
    tokio::spawn(async move {
        if let Err(e) = store
            .append_event(&session.tenant, &session.chat_id, seq, &event)
            .await
        {
            tracing::warn!(chat_id = %session.chat_id, seq, "event append failed: {}", e);
        }
    });
}

async fn handle_runtime(
    session: &SessionRef,
    outbound: &Arc<dyn OutboundChannel>,
    store: &Arc<dyn SessionStore>,
    cancel: &CancellationToken,
    event: RunEvent,
) {
    tracing::debug!(
        chat_id = %session.chat_id,
        kind = event.event.kind(),
        agent = event.agent.as_deref().unwrap_or(""),
        "event"
    );

    // Hidden seed events are persisted (seq 0) but never delivered; resume
    // queries exclude them.
    if event.hidden {
        persist(session, store, 0, event);
        return;
    }

    match outbound.deliver(&session.chat_id, &event).await {
        DeliverOutcome::Delivered(seq) => persist(session, store, seq, event),
        DeliverOutcome::Filtered => {}
        DeliverOutcome::NoSession => {
            tracing::warn!(chat_id = %session.chat_id, "no transport channel for event");
        }
        DeliverOutcome::Overflow => {
            tracing::error!(
                chat_id = %session.chat_id,
                "pre-connect buffer overflow, failing session"
            );
            if let Err(e) = store
                .set_status(&session.tenant, &session.chat_id, SessionStatus::Failed)
                .await
            {
                tracing::warn!(chat_id = %session.chat_id, "status update failed: {}", e);
            }
            cancel.cancel();
        }
    }
}

async fn handle_resume(
    session: &SessionRef,
    outbound: &Arc<dyn OutboundChannel>,
    store: &Arc<dyn SessionStore>,
    last_client_seq: u64,
) {
    let high = match store.high_water(&session.tenant, &session.chat_id).await {
        Ok(high) => high,
        Err(e) => {
            tracing::warn!(chat_id = %session.chat_id, "resume high-water query failed: {}", e);
            send_error_frame(
                outbound,
                &session.chat_id,
                "could not read the event log",
                ErrorCode::PersistenceError,
            )
            .await;
            return;
        }
    };

    if last_client_seq > high {
        tracing::warn!(
            chat_id = %session.chat_id,
            last_client_seq,
            high,
            "resume beyond persisted high-water"
        );
        send_error_frame(
            outbound,
            &session.chat_id,
            "last_client_seq is beyond the persisted log; resume with 0",
            ErrorCode::ResumeFailed,
        )
        .await;
        return;
    }

    let events = match store
        .load_events(&session.tenant, &session.chat_id, last_client_seq)
        .await
    {
        Ok(events) => events,
        Err(e) => {
            tracing::warn!(chat_id = %session.chat_id, "resume load failed: {}", e);
            send_error_frame(
                outbound,
                &session.chat_id,
                "could not load events for replay",
                ErrorCode::PersistenceError,
            )
            .await;
            return;
        }
    };

    let replayed = events.len();
    for stored in events {
        let mut frame =
            EventEnvelope::replayed(stored.event.event, stored.seq, session.chat_id.clone());
        frame.corr = stored.event.corr;
        outbound.send_frame(&session.chat_id, frame).await;
    }
    outbound
        .send_frame(&session.chat_id, EventEnvelope::resume_boundary(session.chat_id.clone()))
        .await;
    outbound.reset_sequence(&session.chat_id);
    tracing::info!(
        chat_id = %session.chat_id,
        last_client_seq,
        replayed,
        "resume replay complete"
    );
}

async fn send_error_frame(
    outbound: &Arc<dyn OutboundChannel>,
    chat_id: &str,
    message: &str,
    error_code: ErrorCode,
) {
    let frame = EventEnvelope {
        event: ChatEvent::Error {
            message: message.to_string(),
            error_code,
            details: None,
            recoverable: true,
        },
        seq: None,
        chat_id: chat_id.to_string(),
        corr: None,
        replay: None,
    };
    outbound.send_frame(chat_id, frame).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionMeta;
    use crate::store::{MemorySessionStore, SessionStore};
    use std::sync::Mutex;

    /// Transport double recording everything it is asked to do.
    #[derive(Default)]
    struct RecordingChannel {
        seq: Mutex<u64>,
        delivered: Mutex<Vec<(u64, String)>>,
        frames: Mutex<Vec<EventEnvelope>>,
        resets: Mutex<u32>,
    }

    #[async_trait::async_trait]
    impl OutboundChannel for RecordingChannel {
        fn open_session(&self, _chat_id: &str, _policy: VisibilityPolicy) {}

        async fn deliver(&self, _chat_id: &str, event: &RunEvent) -> DeliverOutcome {
            let mut seq = self.seq.lock().unwrap();
            *seq += 1;
            self.delivered
                .lock()
                .unwrap()
                .push((*seq, event.event.kind().to_string()));
            DeliverOutcome::Delivered(*seq)
        }

        async fn send_frame(&self, _chat_id: &str, frame: EventEnvelope) -> bool {
            self.frames.lock().unwrap().push(frame);
            true
        }

        fn reset_sequence(&self, _chat_id: &str) {
            *self.resets.lock().unwrap() += 1;
        }
    }

    fn text(agent: &str, content: &str) -> RunEvent {
        RunEvent::new(ChatEvent::Text {
            agent: agent.to_string(),
            content: content.to_string(),
        })
        .with_agent(agent)
    }

    async fn setup() -> (
        EventDispatcher,
        Arc<RecordingChannel>,
        Arc<MemorySessionStore>,
        tokio::task::JoinHandle<()>,
    ) {
        let store = Arc::new(MemorySessionStore::new());
        store
            .create_session(&SessionMeta::new("c1", "t1", "u1", "wf"))
            .await
            .unwrap();
        let channel = Arc::new(RecordingChannel::default());
        let (dispatcher, handle) = spawn_dispatcher(
            SessionRef {
                tenant: "t1".to_string(),
                chat_id: "c1".to_string(),
            },
            channel.clone() as Arc<dyn OutboundChannel>,
            store.clone() as Arc<dyn SessionStore>,
            CancellationToken::new(),
            16,
        );
        (dispatcher, channel, store, handle)
    }

    #[tokio::test]
    async fn events_keep_emission_order() {
        let (dispatcher, channel, _store, handle) = setup().await;
        for i in 0..5 {
            dispatcher.emit(text("a", &format!("m{i}"))).await;
        }
        drop(dispatcher);
        handle.await.unwrap();
        let delivered = channel.delivered.lock().unwrap();
        let seqs: Vec<u64> = delivered.iter().map(|(s, _)| *s).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn hidden_events_are_persisted_not_delivered() {
        let (dispatcher, channel, store, handle) = setup().await;
        dispatcher.emit(text("a", "seed").hidden()).await;
        dispatcher.emit(text("a", "visible")).await;
        drop(dispatcher);
        handle.await.unwrap();
        // Give the spawned persistence writes a moment to land.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(channel.delivered.lock().unwrap().len(), 1);
        let replay = store.load_events("t1", "c1", 0).await.unwrap();
        assert_eq!(replay.len(), 1);
        match &replay[0].event.event {
            ChatEvent::Text { content, .. } => assert_eq!(content, "visible"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn resume_replays_suffix_then_boundary_and_reset() {
        let (dispatcher, channel, store, handle) = setup().await;
        for seq in 1..=4u64 {
            store
                .append_event("t1", "c1", seq, &text("a", &format!("m{seq}")))
                .await
                .unwrap();
        }
        dispatcher.request_resume(2).await;
        drop(dispatcher);
        handle.await.unwrap();

        let frames = channel.frames.lock().unwrap();
        assert_eq!(frames.len(), 3); // seq 3, seq 4, boundary
        assert_eq!(frames[0].seq, Some(3));
        assert_eq!(frames[0].replay, Some(true));
        assert_eq!(frames[1].seq, Some(4));
        assert!(matches!(frames[2].event, ChatEvent::ResumeBoundary {}));
        assert_eq!(*channel.resets.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn stale_resume_gets_resume_failed() {
        let (dispatcher, channel, _store, handle) = setup().await;
        dispatcher.request_resume(99).await;
        drop(dispatcher);
        handle.await.unwrap();
        let frames = channel.frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        match &frames[0].event {
            ChatEvent::Error {
                error_code,
                recoverable,
                ..
            } => {
                assert_eq!(*error_code, ErrorCode::ResumeFailed);
                assert!(recoverable);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(*channel.resets.lock().unwrap(), 0);
    }
}
