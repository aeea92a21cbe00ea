//! Connection state machine and connect-attempt identity.
//!
//! The session moves through four states:
//!
//! ```text
//! Stopped ──connect_async──▶ Connecting ──completion ok──▶ Connected
//!    ▲  ▲──sync connect ok──────────────────────────────────┘   │
//!    │                                                          │
//!    └───────── Stopping ◀──────── stop() / disconnect ─────────┘
//! ```
//!
//! `Stopping` is transient and re-entrant-guarded: the session enters it at
//! the start of `stop()` and leaves it as `Stopped` before `stop()` returns.
//! Completions that arrive while `Stopping` detect staleness and are handled
//! synchronously instead of touching half-torn-down state.

use std::sync::atomic::{AtomicU64, Ordering};

/// Current connection status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection. The initial and final state of every cycle.
    Stopped,
    /// An async connect attempt is outstanding.
    Connecting,
    /// Connection established; traffic APIs are accepted.
    Connected,
    /// Teardown in progress. All client APIs are rejected until `Stopped`.
    Stopping,
}

impl ConnectionState {
    /// Whether `request`/`notify`/`subscribe` are accepted in this state.
    pub const fn accepts_traffic(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether the per-tick dispatch runs in this state.
    pub const fn dispatch_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }

    /// Whether teardown has begun or finished.
    pub const fn is_down(self) -> bool {
        matches!(self, Self::Stopped | Self::Stopping)
    }

    /// The legal transition table. Used by tests and the fuzzer to validate
    /// observed state sequences.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Stopped, Self::Connecting | Self::Connected)
                | (Self::Connecting, Self::Connected | Self::Stopped | Self::Stopping)
                | (Self::Connected, Self::Stopping)
                | (Self::Stopping, Self::Stopped)
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Holder for the current [`ConnectionState`] with transition logging.
#[derive(Debug)]
pub struct StateMachine {
    current: ConnectionState,
}

impl StateMachine {
    /// Start in `Stopped`.
    pub fn new() -> Self {
        Self { current: ConnectionState::Stopped }
    }

    /// The current state.
    pub fn current(&self) -> ConnectionState {
        self.current
    }

    /// Move to `next`.
    ///
    /// The session's control flow only produces legal transitions; an
    /// illegal one here is a session bug, logged rather than panicked on.
    pub fn transition(&mut self, next: ConnectionState) {
        if self.current == next {
            return;
        }
        if self.current.can_transition_to(next) {
            tracing::debug!(from = %self.current, to = %next, "connection state transition");
        } else {
            tracing::warn!(from = %self.current, to = %next, "unexpected connection state transition");
        }
        self.current = next;
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

static NEXT_ATTEMPT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Identity of one async connect attempt.
///
/// Exactly one may be outstanding per session. A worker-thread completion is
/// accepted only if its token still matches the session's current token; a
/// mismatch means the session stopped or reconnected in the meantime and the
/// stale completion must be discarded without touching session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttemptToken(u64);

impl AttemptToken {
    /// Mint a fresh, process-unique token.
    pub fn next() -> Self {
        Self(NEXT_ATTEMPT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for AttemptToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "attempt-{}", self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn traffic_only_accepted_while_connected() {
        assert!(ConnectionState::Connected.accepts_traffic());
        assert!(!ConnectionState::Stopped.accepts_traffic());
        assert!(!ConnectionState::Connecting.accepts_traffic());
        assert!(!ConnectionState::Stopping.accepts_traffic());
    }

    #[test]
    fn stopping_only_reachable_from_live_states() {
        use ConnectionState::{Connected, Connecting, Stopped, Stopping};

        assert!(Connected.can_transition_to(Stopping));
        assert!(Connecting.can_transition_to(Stopping));
        assert!(!Stopped.can_transition_to(Stopping));
        assert!(!Stopping.can_transition_to(Stopping));
    }

    #[test]
    fn stopping_always_lands_in_stopped() {
        use ConnectionState::{Connected, Connecting, Stopped, Stopping};

        assert!(Stopping.can_transition_to(Stopped));
        assert!(!Stopping.can_transition_to(Connecting));
        assert!(!Stopping.can_transition_to(Connected));
    }

    #[test]
    fn connecting_resolves_three_ways() {
        use ConnectionState::{Connected, Connecting, Stopped, Stopping};

        assert!(Connecting.can_transition_to(Connected));
        assert!(Connecting.can_transition_to(Stopped));
        assert!(Connecting.can_transition_to(Stopping));
    }

    #[test]
    fn machine_starts_stopped_and_applies_transitions() {
        let mut machine = StateMachine::new();
        assert_eq!(machine.current(), ConnectionState::Stopped);

        machine.transition(ConnectionState::Connecting);
        machine.transition(ConnectionState::Connected);
        assert_eq!(machine.current(), ConnectionState::Connected);
    }

    #[test]
    fn attempt_tokens_are_unique() {
        assert_ne!(AttemptToken::next(), AttemptToken::next());
    }
}
