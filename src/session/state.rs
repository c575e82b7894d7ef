use serde::Serialize;
use std::fmt;

/// Lifecycle of one meeting session.
///
/// ```text
/// Idle -> AwaitingIngress -> AwaitingGate -> Streaming -> Draining -> Terminated
///                                 |              |
///                                 |              +-> FatalError -> Draining
///                                 +-> Draining (permission denied / meeting ended)
/// ```
///
/// Local mode skips `AwaitingGate`: the first ingress connection moves the
/// session straight to `Streaming`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Server constructed, not yet listening
    Idle,
    /// Listening, no ingress connection yet
    AwaitingIngress,
    /// Ingress connected, waiting for the platform to authorize recording
    AwaitingGate,
    /// Audio is being forwarded to the provider
    Streaming,
    /// Teardown in progress
    Draining,
    /// Session released
    Terminated,
    /// Provider init failed; drains after a grace window
    FatalError,
}

impl SessionState {
    /// Whether a transition to `next` is part of the state machine.
    ///
    /// Draining is reachable from every live state (external interrupt),
    /// and teardown is idempotent, so Draining -> Draining is allowed.
    pub fn can_transition(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Idle, AwaitingIngress) => true,
            (AwaitingIngress, AwaitingGate) => true,
            (AwaitingIngress, Streaming) => true,
            (AwaitingGate, Streaming) => true,
            (Streaming, FatalError) => true,
            (FatalError, Draining) => true,
            (Draining, Draining) => true,
            (Draining, Terminated) => true,
            (Terminated, _) => false,
            (_, Draining) => true,
            _ => false,
        }
    }

    /// True once teardown has begun or completed.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Draining | SessionState::Terminated
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::AwaitingIngress => "awaiting_ingress",
            SessionState::AwaitingGate => "awaiting_gate",
            SessionState::Streaming => "streaming",
            SessionState::Draining => "draining",
            SessionState::Terminated => "terminated",
            SessionState::FatalError => "fatal_error",
        };
        write!(f, "{}", name)
    }
}
