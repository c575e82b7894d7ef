//! Webhook intake and control plane
//!
//! Control events from the conferencing platform arrive as HTTP
//! webhooks, are decoded against a closed event-kind set, and dispatched
//! serially to registered handlers. Only `bot.status_change` with code
//! `in_call_not_recording` affects transcription; everything else is
//! observational.

mod dispatcher;
mod events;

pub use dispatcher::ControlDispatcher;
pub use events::{
    decode, ControlEvent, ControlEventKind, DecodeError, WebhookEnvelope,
    STATUS_IN_CALL_NOT_RECORDING,
};
