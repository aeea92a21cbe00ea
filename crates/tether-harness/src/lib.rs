//! Test harness for the Tether session layer.
//!
//! Provides [`StubTransport`], an in-process scripted implementation of the
//! transport boundary. Tests control exactly when and on which thread each
//! completion fires, which makes the cross-thread dispatch properties of
//! the session observable and deterministic:
//!
//! - Manual mode holds completions until the test fires them, inline or
//!   from a spawned worker thread.
//! - Echo mode completes each request immediately with its own payload.
//! - Failure injection (seeded RNG) rejects sends probabilistically for
//!   stress tests.
//!
//! `destroy()` honors the transport contract: every outstanding hook fires
//! synchronously on the calling thread with [`RESET_STATUS`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod stub;

pub use stub::{CompletionMode, RESET_STATUS, StubConnection, StubHandle, StubTransport};
