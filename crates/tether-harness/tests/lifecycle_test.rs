//! Connection lifecycle: connect, connect failure, stop idempotence.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use tether_harness::StubTransport;
use tether_session::{CborCodec, CompletionStatus, ConnectionState, Session, SessionError};

fn new_session(transport: &StubTransport) -> Session<StubTransport, CborCodec> {
    Session::new(transport.clone(), CborCodec::new())
}

#[test]
fn sync_connect_establishes_and_arms_disconnect_listener() {
    let transport = StubTransport::new();
    let session = new_session(&transport);

    session.connect("127.0.0.1", 3010).unwrap();

    assert_eq!(session.status(), ConnectionState::Connected);
    let handle = transport.connection().unwrap();
    assert!(handle.has_listener(tether_session::DISCONNECT_EVENT));
}

#[test]
fn failed_sync_connect_returns_code_and_stays_stopped() {
    let transport = StubTransport::new();
    transport.refuse_connects(61);
    let session = new_session(&transport);

    let err = session.connect("127.0.0.1", 9999).unwrap_err();

    assert!(matches!(err, SessionError::TransportRejected { code: 61 }));
    assert_ne!(err.code(), 0);
    assert_eq!(session.status(), ConnectionState::Stopped);
}

#[test]
fn async_connect_completes_on_tick() {
    let transport = StubTransport::new();
    let session = new_session(&transport);

    let outcomes = Arc::new(AtomicUsize::new(0));
    let observer = Arc::clone(&outcomes);
    session
        .connect_async("127.0.0.1", 3010, move |status| {
            assert_eq!(status, CompletionStatus::Ok);
            observer.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    assert_eq!(session.status(), ConnectionState::Connecting);

    transport.complete_connect(0);
    // Completion is queued, not yet dispatched.
    assert_eq!(session.status(), ConnectionState::Connecting);
    assert_eq!(outcomes.load(Ordering::SeqCst), 0);

    session.on_tick();
    assert_eq!(session.status(), ConnectionState::Connected);
    assert_eq!(outcomes.load(Ordering::SeqCst), 1);

    // The callback fired exactly once; further ticks do nothing.
    session.on_tick();
    assert_eq!(outcomes.load(Ordering::SeqCst), 1);
}

#[test]
fn failed_async_completion_lands_in_stopped_before_callback() {
    let transport = StubTransport::new();
    let session = new_session(&transport);

    let outcomes = Arc::new(AtomicUsize::new(0));
    let observer = Arc::clone(&outcomes);
    session
        .connect_async("127.0.0.1", 3010, move |status| {
            assert_eq!(status, CompletionStatus::Transport(104));
            observer.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    transport.complete_connect(104);
    session.on_tick();

    assert_eq!(session.status(), ConnectionState::Stopped);
    assert_eq!(outcomes.load(Ordering::SeqCst), 1);
    assert!(transport.connection().unwrap().is_destroyed());
}

#[test]
fn stop_is_idempotent_with_no_second_round_of_callbacks() {
    let transport = StubTransport::new();
    let session = new_session(&transport);
    session.connect("127.0.0.1", 3010).unwrap();

    let aborted = Arc::new(AtomicUsize::new(0));
    let observer = Arc::clone(&aborted);
    let payload = ciborium::value::Value::Text("m".to_owned());
    session
        .request("echo", &payload, move |_| {
            observer.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    session.stop();
    assert_eq!(session.status(), ConnectionState::Stopped);
    assert_eq!(aborted.load(Ordering::SeqCst), 1);

    session.stop();
    assert_eq!(session.status(), ConnectionState::Stopped);
    assert_eq!(aborted.load(Ordering::SeqCst), 1);
}

#[test]
fn reconnect_after_stop_uses_a_fresh_connection() {
    let transport = StubTransport::new();
    let session = new_session(&transport);

    session.connect("127.0.0.1", 3010).unwrap();
    let first = transport.connection().unwrap();
    session.stop();
    assert!(first.is_destroyed());

    session.connect("127.0.0.1", 3010).unwrap();
    assert_eq!(session.status(), ConnectionState::Connected);
    let second = transport.connection().unwrap();
    assert!(!second.is_destroyed());
}

#[test]
fn dropping_the_session_stops_the_connection() {
    let transport = StubTransport::new();
    {
        let session = new_session(&transport);
        session.connect("127.0.0.1", 3010).unwrap();
    }
    assert!(transport.connection().unwrap().is_destroyed());
}
