//! Completion records and callback status.
//!
//! A completion record is what the worker-thread hook enqueues into a
//! mailbox: the minimal payload needed to re-associate the completion with
//! its correlation entry or subscription and hand it to the callback. Each
//! record kind has its own mailbox, so the per-tick dispatch can cap work
//! at one item per category per tick.

use bytes::Bytes;

use crate::{correlation::CorrelationId, state::AttemptToken};

/// Status delivered to a caller's callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// The operation completed successfully.
    Ok,
    /// The transport reported a non-zero status code.
    Transport(i32),
    /// The session was stopped (or the connection lost) while the operation
    /// was outstanding; it was resolved by the forced drain.
    Aborted,
    /// The payload arrived but could not be decoded. The callback still
    /// fires, with an absent payload.
    DecodeFailed,
}

impl CompletionStatus {
    /// Whether the operation succeeded.
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Map a raw transport status code: zero is success.
    pub const fn from_transport(code: i32) -> Self {
        if code == 0 { Self::Ok } else { Self::Transport(code) }
    }
}

/// Worker-side record of an async connect completion.
///
/// Held in a single slot rather than a mailbox: only one connect attempt may
/// be outstanding at a time.
#[derive(Debug, Clone)]
pub struct ConnectCompletion {
    /// The attempt this completion belongs to. Checked against the session's
    /// current token before the record is accepted.
    pub token: AttemptToken,
    /// Raw transport status; zero means the connection is established.
    pub status: i32,
}

/// Worker-side record of a request completion.
#[derive(Debug, Clone)]
pub struct RequestCompletion {
    /// Correlation handle minted when the request was issued.
    pub id: CorrelationId,
    /// Raw transport status; zero means the reply in `payload` is valid.
    pub status: i32,
    /// Undecoded reply payload. Decoding happens on the owner thread.
    pub payload: Bytes,
}

/// Worker-side record of a notify send-acknowledgement.
#[derive(Debug, Clone)]
pub struct NotifyCompletion {
    /// Correlation handle minted when the notify was issued.
    pub id: CorrelationId,
    /// Raw transport status; zero means the notify was sent.
    pub status: i32,
}

/// Worker-side record of a server push.
///
/// Pushed events and the transport's disconnect notice share one mailbox so
/// their relative order is preserved.
#[derive(Debug, Clone)]
pub enum EventCompletion {
    /// A server-pushed event for a subscribed name.
    Event {
        /// Event name the subscriber registered under.
        name: String,
        /// Undecoded event payload.
        payload: Bytes,
    },
    /// The transport lost the connection. Dispatch tears the session down
    /// and then fires the caller's disconnect callback.
    Disconnect,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn zero_transport_code_is_ok() {
        assert_eq!(CompletionStatus::from_transport(0), CompletionStatus::Ok);
        assert!(CompletionStatus::from_transport(0).is_ok());
    }

    #[test]
    fn nonzero_transport_code_is_failure() {
        assert_eq!(CompletionStatus::from_transport(-7), CompletionStatus::Transport(-7));
        assert!(!CompletionStatus::from_transport(500).is_ok());
    }

    #[test]
    fn aborted_and_decode_failed_are_failures() {
        assert!(!CompletionStatus::Aborted.is_ok());
        assert!(!CompletionStatus::DecodeFailed.is_ok());
    }
}
