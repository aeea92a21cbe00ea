//! Consumed transport boundary.
//!
//! The transport/protocol engine owns the socket, handshake, and framing.
//! This module specifies only the seam the session layer talks through:
//! connect primitives, per-connection send primitives, named-event
//! listeners, and teardown.
//!
//! # Threading contract
//!
//! Completion hooks are invoked from the transport's worker thread(s), at
//! any time after the primitive that registered them returns — including
//! concurrently with session calls. The one exception is
//! [`Connection::destroy`], which fires every still-outstanding hook
//! synchronously on the thread that called it.
//!
//! # Hook contract
//!
//! - Every accepted `send_request`/`send_notify`/`connect_async` fires its
//!   hook exactly once: with the real completion, or with a non-zero reset
//!   status from `destroy()`.
//! - A rejected primitive (`Err` return) never fires the hook.
//! - `destroy()` and `remove_listener()` release every hook they retain, so
//!   no closure (and nothing it captures) outlives the connection.

use bytes::Bytes;
use tether_core::TransportError;

/// Reserved event name the transport raises when the connection is lost.
///
/// Never user-subscribable; the session wires it internally to trigger full
/// teardown followed by the caller's disconnect callback.
pub const DISCONNECT_EVENT: &str = "disconnect";

/// Completion hook for an async connect attempt. Receives the transport's
/// status code; zero means the connection is established.
pub type ConnectHook = Box<dyn FnOnce(i32) + Send + 'static>;

/// Completion hook for a request. Receives the status code and the raw,
/// undecoded reply payload.
pub type RequestHook = Box<dyn FnOnce(i32, Bytes) + Send + 'static>;

/// Completion hook for a notify send-acknowledgement.
pub type NotifyHook = Box<dyn FnOnce(i32) + Send + 'static>;

/// Listener hook for a named server-pushed event. Receives the raw payload;
/// the event name is whatever the hook was registered under.
pub type EventHook = Box<dyn FnMut(Bytes) + Send + 'static>;

/// One established transport connection.
pub trait Connection: Send + Sync + 'static {
    /// Send a request expecting a correlated reply.
    ///
    /// The returned `Result` is the immediate accept/reject, not the
    /// eventual outcome; on `Ok`, `on_complete` fires exactly once later.
    fn send_request(
        &self,
        route: &str,
        payload: Bytes,
        on_complete: RequestHook,
    ) -> Result<(), TransportError>;

    /// Send a fire-and-forget notify. On `Ok`, `on_complete` fires exactly
    /// once with the send-acknowledgement.
    fn send_notify(
        &self,
        route: &str,
        payload: Bytes,
        on_complete: NotifyHook,
    ) -> Result<(), TransportError>;

    /// Arm a listener for a named event. Replaces any previous listener the
    /// transport holds for that name.
    fn add_listener(&self, event: &str, on_event: EventHook) -> Result<(), TransportError>;

    /// Disarm the listener for `event` and release its hook. No-op if the
    /// name is not armed.
    fn remove_listener(&self, event: &str);

    /// Tear the connection down.
    ///
    /// Fires every outstanding request/notify/connect hook synchronously on
    /// the calling thread with a non-zero status before returning, then
    /// releases all retained hooks. Idempotent.
    fn destroy(&self);
}

/// Factory for connections.
pub trait Transport: Send + Sync + 'static {
    /// Connection type this transport produces.
    type Conn: Connection;

    /// Blocking connect on the calling thread.
    fn connect(&self, host: &str, port: u16) -> Result<Self::Conn, TransportError>;

    /// Non-blocking connect. On `Ok`, the attempt is in flight and
    /// `on_complete` fires exactly once from the worker thread (or from a
    /// later `destroy()`). On `Err`, the hook is released unfired.
    fn connect_async(
        &self,
        host: &str,
        port: u16,
        on_complete: ConnectHook,
    ) -> Result<Self::Conn, TransportError>;
}
