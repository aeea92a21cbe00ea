//! Core primitives for the Tether client session layer.
//!
//! The session layer delivers transport completions that arrive on an
//! arbitrary worker thread to caller-supplied callbacks, exactly once and
//! only on the owning thread. This crate holds the leaf components that
//! make that possible; none of them perform I/O.
//!
//! ```text
//! tether-core
//!   ├─ Mailbox              (thread-safe FIFO, worker → owner)
//!   ├─ CorrelationTable     (in-flight handle → pending callback)
//!   ├─ SubscriptionRegistry (event name → single subscriber)
//!   ├─ StateMachine         (Stopped / Connecting / Connected / Stopping)
//!   └─ completion records   (what the worker enqueues per category)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod completion;
pub mod correlation;
pub mod error;
pub mod mailbox;
pub mod state;
pub mod subscription;

pub use completion::{
    CompletionStatus, ConnectCompletion, EventCompletion, NotifyCompletion, RequestCompletion,
};
pub use correlation::{CorrelationId, CorrelationTable};
pub use error::{CodecError, SessionError, TransportError};
pub use mailbox::Mailbox;
pub use state::{AttemptToken, ConnectionState, StateMachine};
pub use subscription::SubscriptionRegistry;
