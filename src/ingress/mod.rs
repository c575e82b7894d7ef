//! Audio ingress
//!
//! Accepts persistent WebSocket connections from the meeting bot,
//! classifies each frame (registration, speaker metadata, raw PCM), and
//! demultiplexes into the session orchestrator.

mod frame;
mod socket;

pub use frame::{classify, IngressFrame, Registration};
pub use socket::handle_socket;
