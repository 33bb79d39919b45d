//! Chat stream wire protocol: outbound `chat.*` events and envelopes, inbound client messages.
//!
//! This crate defines the wire shape only. It does not depend on ensemble; the runtime
//! wraps its internal events into [`RunEvent`] and the transport builds [`EventEnvelope`]s.

pub mod client;
pub mod envelope;
pub mod error_code;
pub mod event;

pub use client::ClientMessage;
pub use envelope::{EventEnvelope, SequenceState};
pub use error_code::ErrorCode;
pub use event::{ChatEvent, DisplayMode, RunEvent};
