//! Tether client session layer.
//!
//! Sits between a caller's application logic and a duplex network transport,
//! offering three message kinds over one persistent connection:
//!
//! - **request** — expects a correlated reply
//! - **notify** — fire-and-forget with a send-acknowledgement
//! - **event** — server-pushed, subscribed by name
//!
//! Transport completions arrive on the transport's worker thread at
//! arbitrary times, including during teardown. The [`Session`] delivers them
//! to caller-supplied callbacks exactly once, in order, and only on the
//! owning thread — the thread that drives [`Session::on_tick`] — with one
//! documented exception: the forced drain inside [`Session::stop`] runs
//! callbacks synchronously on whatever thread called `stop()`.
//!
//! The actual socket I/O, handshake, and framing belong to the consumed
//! [`Transport`] boundary; payload encoding belongs to the consumed
//! [`Codec`] boundary.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod session;
pub mod transport;

pub use codec::{CborCodec, Codec};
pub use session::{
    ConnectCallback, DisconnectCallback, EventCallback, EventMessage, NotifyCallback,
    NotifyResult, RequestCallback, RequestResult, Session,
};
pub use tether_core::{CompletionStatus, ConnectionState, SessionError};
pub use transport::{
    ConnectHook, Connection, DISCONNECT_EVENT, EventHook, NotifyHook, RequestHook, Transport,
};
