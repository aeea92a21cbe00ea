//! Session error types.

use thiserror::Error;

use crate::state::ConnectionState;

/// Errors reported synchronously by session operations.
///
/// Everything else — transport failures after a send was accepted, codec
/// failures on received payloads, disconnects — is reported asynchronously
/// through the registered callback's status field. Nothing here is fatal to
/// the process; `stop()` is always safe to call.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The call was made outside `Connected` (or while a connect/stop was
    /// busy). The call is rejected rather than queued.
    #[error("invalid state: session is {state}")]
    InvalidState {
        /// The state the session was in when the call was rejected.
        state: ConnectionState,
    },

    /// The underlying transport rejected the send or connect immediately.
    #[error("transport rejected: code {code}")]
    TransportRejected {
        /// Non-zero status code returned by the transport.
        code: i32,
    },

    /// The event name is reserved for internal use and cannot be subscribed.
    #[error("reserved event name: {event:?}")]
    ReservedEvent {
        /// The rejected event name.
        event: String,
    },

    /// The outgoing payload could not be encoded. Nothing was registered or
    /// sent.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl SessionError {
    /// Legacy numeric return code: zero is success, so every error maps to a
    /// distinct non-zero value. Transport rejections keep the transport's
    /// own code.
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidState { .. } => -1,
            Self::TransportRejected { code } => *code,
            Self::ReservedEvent { .. } => -3,
            Self::Codec(_) => -4,
        }
    }

    /// Whether retrying the same call later can succeed. State and
    /// transport rejections clear once the session reconnects; a reserved
    /// name or unencodable payload will fail the same way every time.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::InvalidState { .. } | Self::TransportRejected { .. })
    }
}

/// Payload encode/decode failure at the codec boundary.
///
/// Codec failures never cross the boundary as panics: a decode failure on a
/// received payload is delivered to the callback as a failure result with an
/// absent payload.
#[derive(Debug, Error)]
#[error("codec failure: {reason}")]
pub struct CodecError {
    /// Description of the failure.
    pub reason: String,
}

impl CodecError {
    /// Build from anything displayable.
    pub fn new(reason: impl std::fmt::Display) -> Self {
        Self { reason: reason.to_string() }
    }
}

/// Immediate failure at the transport boundary.
#[derive(Debug, Error)]
#[error("transport error: code {code} ({reason})")]
pub struct TransportError {
    /// Non-zero status code. The transport defines the code space.
    pub code: i32,
    /// Description of the failure.
    pub reason: String,
}

impl TransportError {
    /// Build from a status code and a description.
    pub fn new(code: i32, reason: impl Into<String>) -> Self {
        Self { code, reason: reason.into() }
    }
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        Self::TransportRejected { code: err.code }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_nonzero() {
        let errors = [
            SessionError::InvalidState { state: ConnectionState::Stopped },
            SessionError::TransportRejected { code: 42 },
            SessionError::ReservedEvent { event: "disconnect".to_owned() },
            SessionError::Codec(CodecError::new("truncated")),
        ];
        for err in &errors {
            assert_ne!(err.code(), 0);
        }
    }

    #[test]
    fn caller_bugs_are_not_transient() {
        assert!(SessionError::InvalidState { state: ConnectionState::Stopped }.is_transient());
        assert!(!SessionError::ReservedEvent { event: "disconnect".to_owned() }.is_transient());
        assert!(!SessionError::Codec(CodecError::new("loop")).is_transient());
    }

    #[test]
    fn transport_rejection_keeps_transport_code() {
        let err: SessionError = TransportError::new(17, "refused").into();
        assert_eq!(err.code(), 17);
    }

    #[test]
    fn error_display() {
        let err = SessionError::InvalidState { state: ConnectionState::Stopping };
        assert_eq!(err.to_string(), "invalid state: session is stopping");
    }
}
