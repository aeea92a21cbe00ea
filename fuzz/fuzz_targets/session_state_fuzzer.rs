//! Fuzz target for [`Session`] lifecycle and completion dispatch
//!
//! # Strategy
//!
//! - Operation sequences: Arbitrary interleavings of connect, traffic,
//!   subscription, transport completions, ticks, and stop
//! - Completion timing: Replies and disconnect notices can arrive in any
//!   state, including mid-teardown
//! - Payload probing: Events and replies carry valid or undecodable bytes
//!
//! # Invariants
//!
//! - Every accepted request/notify resolves its callback EXACTLY once,
//!   with a final stop() flushing whatever is still outstanding
//! - `status()` only ever reports one of the four lifecycle states, and
//!   `stop()` always lands in `Stopped`
//! - A rejected send never produces a late callback
//! - Reserved event name is rejected in every state
//! - NEVER panic on any operation order

#![no_main]

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use arbitrary::Arbitrary;
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use tether_harness::StubTransport;
use tether_session::{CborCodec, ConnectionState, Session, SessionError};

const EVENT_NAMES: [&str; 3] = ["alpha", "beta", "gamma"];

#[derive(Debug, Clone, Arbitrary)]
enum SessionOp {
    Connect,
    ConnectAsync,
    CompleteConnect { status: i8 },
    Request,
    Notify,
    CompleteRequest { status: i8, garbage: bool },
    CompleteNotify { status: i8 },
    Subscribe { name: u8 },
    SubscribeReserved,
    Unsubscribe { name: u8 },
    UnsubscribeAll,
    PushEvent { name: u8, garbage: bool },
    FireDisconnect,
    Tick,
    Stop,
}

#[derive(Debug, Clone, Arbitrary)]
struct FuzzInput {
    ops: Vec<SessionOp>,
}

fn event_name(index: u8) -> &'static str {
    EVENT_NAMES[index as usize % EVENT_NAMES.len()]
}

fn reply_bytes(garbage: bool) -> Bytes {
    if garbage {
        Bytes::from_static(b"\xff")
    } else {
        let mut buf = Vec::new();
        if ciborium::ser::into_writer(&ciborium::value::Value::Null, &mut buf).is_err() {
            return Bytes::new();
        }
        Bytes::from(buf)
    }
}

fuzz_target!(|input: FuzzInput| {
    let transport = StubTransport::new();
    let session = Session::new(transport.clone(), CborCodec::new());
    let payload = ciborium::value::Value::Integer(7.into());

    let resolved = Arc::new(AtomicUsize::new(0));
    let mut accepted: usize = 0;

    for op in input.ops.iter().take(256) {
        let state_before = session.status();

        match op {
            SessionOp::Connect => {
                let result = session.connect("127.0.0.1", 3010);
                match result {
                    Ok(()) => assert_eq!(session.status(), ConnectionState::Connected),
                    Err(_) => assert_eq!(session.status(), ConnectionState::Stopped),
                }
            },

            SessionOp::ConnectAsync => {
                if session.connect_async("127.0.0.1", 3010, |_| {}).is_ok() {
                    assert_eq!(session.status(), ConnectionState::Connecting);
                }
            },

            SessionOp::CompleteConnect { status } => {
                transport.complete_connect(i32::from(*status));
            },

            SessionOp::Request => {
                let observer = Arc::clone(&resolved);
                let result = session.request("gate.echo", &payload, move |_| {
                    observer.fetch_add(1, Ordering::SeqCst);
                });
                match result {
                    Ok(()) => accepted += 1,
                    Err(SessionError::InvalidState { .. }) => {
                        assert_ne!(state_before, ConnectionState::Connected);
                    },
                    Err(_) => {},
                }
            },

            SessionOp::Notify => {
                let observer = Arc::clone(&resolved);
                if session
                    .notify("gate.ping", &payload, move |_| {
                        observer.fetch_add(1, Ordering::SeqCst);
                    })
                    .is_ok()
                {
                    accepted += 1;
                }
            },

            SessionOp::CompleteRequest { status, garbage } => {
                if let Some(handle) = transport.connection() {
                    handle.complete_next_request(i32::from(*status), reply_bytes(*garbage));
                }
            },

            SessionOp::CompleteNotify { status } => {
                if let Some(handle) = transport.connection() {
                    handle.complete_next_notify(i32::from(*status));
                }
            },

            SessionOp::Subscribe { name } => {
                let _ = session.subscribe(event_name(*name), |_| {});
            },

            SessionOp::SubscribeReserved => {
                let result = session.subscribe(tether_session::DISCONNECT_EVENT, |_| {});
                assert!(matches!(result, Err(SessionError::ReservedEvent { .. })));
            },

            SessionOp::Unsubscribe { name } => {
                session.unsubscribe(event_name(*name));
            },

            SessionOp::UnsubscribeAll => {
                session.unsubscribe_all();
            },

            SessionOp::PushEvent { name, garbage } => {
                if let Some(handle) = transport.connection() {
                    handle.push_event(event_name(*name), reply_bytes(*garbage));
                }
            },

            SessionOp::FireDisconnect => {
                if let Some(handle) = transport.connection() {
                    handle.fire_disconnect();
                }
            },

            SessionOp::Tick => {
                session.on_tick();
            },

            SessionOp::Stop => {
                session.stop();
                assert_eq!(session.status(), ConnectionState::Stopped);
            },
        }

        // Nothing resolves a callback that was never registered.
        assert!(resolved.load(Ordering::SeqCst) <= accepted);
    }

    // The final stop flushes every outstanding correlation; at this point
    // each accepted send has resolved exactly once.
    session.stop();
    assert_eq!(session.status(), ConnectionState::Stopped);
    assert_eq!(resolved.load(Ordering::SeqCst), accepted);
});
