//! Resume handling: a reconnecting client's `client.resume` is routed onto
//! the session's dispatcher mailbox, where replay runs in FIFO order with
//! live events — the replayed suffix, the boundary marker, and the counter
//! reset cannot interleave with anything else.

use std::sync::Arc;

use chat_event::{ChatEvent, ErrorCode, EventEnvelope};
use ensemble::dispatch::OutboundChannel;

use crate::app::AppState;

pub(crate) async fn handle_resume(state: &Arc<AppState>, chat_id: &str, last_client_seq: u64) {
    let events = state.sessions.get(chat_id).map(|entry| entry.events.clone());
    let Some(events) = events else {
        // No live dispatcher (e.g. the server restarted since the run ended):
        // tell the client to restart through the HTTP start endpoint, which
        // recovers persisted state.
        tracing::warn!(chat_id, "resume for session with no live dispatcher");
        let frame = EventEnvelope {
            event: ChatEvent::Error {
                message: "session is not live on this server; restart it first".to_string(),
                error_code: ErrorCode::ResumeFailed,
                details: None,
                recoverable: true,
            },
            seq: None,
            chat_id: chat_id.to_string(),
            corr: None,
            replay: None,
        };
        state.transport.send_frame(chat_id, frame).await;
        return;
    };
    tracing::info!(chat_id, last_client_seq, "resume requested");
    events.request_resume(last_client_seq).await;
}
