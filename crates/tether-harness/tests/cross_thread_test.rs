//! Cross-thread delivery: completions fire on the transport worker thread,
//! callbacks run on the owning thread.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};

use bytes::Bytes;
use ciborium::value::Value;
use tether_harness::{CompletionMode, StubTransport};
use tether_session::{CborCodec, CompletionStatus, ConnectionState, Session};

fn connected_session(transport: &StubTransport) -> Session<StubTransport, CborCodec> {
    let session = Session::new(transport.clone(), CborCodec::new());
    session.connect("127.0.0.1", 3010).unwrap();
    session
}

fn cbor_bytes(value: &Value) -> Bytes {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).unwrap();
    Bytes::from(buf)
}

#[test]
fn worker_completed_request_dispatches_on_the_owning_thread() {
    let transport = StubTransport::new();
    let session = connected_session(&transport);
    let handle = transport.connection().unwrap();

    let owner = thread::current().id();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let observer = Arc::clone(&seen);
    session
        .request("gate.echo", &Value::Null, move |result| {
            observer.lock().unwrap().push((thread::current().id(), result.status));
        })
        .unwrap();

    handle
        .complete_next_request_on_worker(0, cbor_bytes(&Value::Null))
        .join()
        .unwrap();
    // The worker finished; nothing may have been delivered yet.
    assert!(seen.lock().unwrap().is_empty());

    session.on_tick();
    assert_eq!(*seen.lock().unwrap(), vec![(owner, CompletionStatus::Ok)]);
}

#[test]
fn worker_pushed_event_dispatches_on_the_owning_thread() {
    let transport = StubTransport::new();
    let session = connected_session(&transport);
    let handle = transport.connection().unwrap();

    let owner = thread::current().id();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let observer = Arc::clone(&seen);
    session
        .subscribe("chat.message", move |_| {
            observer.lock().unwrap().push(thread::current().id());
        })
        .unwrap();

    handle
        .push_event_on_worker("chat.message", cbor_bytes(&Value::Null))
        .join()
        .unwrap();
    session.on_tick();

    assert_eq!(*seen.lock().unwrap(), vec![owner]);
}

#[test]
fn worker_completed_connect_dispatches_on_the_owning_thread() {
    let transport = StubTransport::new();
    let session = Session::new(transport.clone(), CborCodec::new());

    let owner = thread::current().id();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let observer = Arc::clone(&seen);
    session
        .connect_async("127.0.0.1", 3010, move |status| {
            observer.lock().unwrap().push((thread::current().id(), status));
        })
        .unwrap();

    transport.complete_connect_on_worker(0).join().unwrap();
    session.on_tick();

    assert_eq!(*seen.lock().unwrap(), vec![(owner, CompletionStatus::Ok)]);
    assert_eq!(session.status(), ConnectionState::Connected);
}

#[test]
fn concurrent_worker_completions_each_deliver_exactly_once() {
    let transport = StubTransport::new();
    let session = connected_session(&transport);
    let handle = transport.connection().unwrap();

    const IN_FLIGHT: usize = 16;
    let delivered = Arc::new(AtomicUsize::new(0));
    for _ in 0..IN_FLIGHT {
        let observer = Arc::clone(&delivered);
        session
            .request("gate.echo", &Value::Null, move |result| {
                assert_eq!(result.status, CompletionStatus::Ok);
                observer.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
    }

    let workers: Vec<_> = (0..IN_FLIGHT)
        .map(|_| handle.complete_next_request_on_worker(0, cbor_bytes(&Value::Null)))
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    for _ in 0..IN_FLIGHT {
        session.on_tick();
    }
    assert_eq!(delivered.load(Ordering::SeqCst), IN_FLIGHT);

    session.on_tick();
    assert_eq!(delivered.load(Ordering::SeqCst), IN_FLIGHT);
}

#[test]
fn stop_racing_the_dispatch_tick_still_resolves_exactly_once() {
    for _ in 0..50 {
        let transport = StubTransport::new();
        let session = Arc::new(connected_session(&transport));
        let handle = transport.connection().unwrap();

        let resolved = Arc::new(AtomicUsize::new(0));
        let observer = Arc::clone(&resolved);
        session
            .request("gate.echo", &Value::Null, move |_| {
                observer.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        handle.complete_next_request(0, cbor_bytes(&Value::Null));

        // stop() runs on a foreign thread while the owner keeps ticking;
        // whichever side wins, the callback fires exactly once and the
        // session lands in Stopped.
        let stopper = {
            let session = Arc::clone(&session);
            thread::spawn(move || session.stop())
        };
        while session.status() != ConnectionState::Stopped {
            session.on_tick();
        }
        stopper.join().unwrap();

        session.on_tick();
        assert_eq!(session.status(), ConnectionState::Stopped);
        assert_eq!(resolved.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn stop_racing_a_connect_completion_always_lands_stopped() {
    for _ in 0..50 {
        let transport = StubTransport::new();
        let session = Arc::new(Session::new(transport.clone(), CborCodec::new()));
        session.connect_async("127.0.0.1", 3010, |_| {}).unwrap();
        transport.complete_connect(0);

        let stopper = {
            let session = Arc::clone(&session);
            thread::spawn(move || session.stop())
        };
        session.on_tick();
        stopper.join().unwrap();

        // The tick may have reached Connected first, but once stop() has
        // returned the session is down and stays down.
        assert_eq!(session.status(), ConnectionState::Stopped);
        session.on_tick();
        assert_eq!(session.status(), ConnectionState::Stopped);
    }
}

#[test]
fn every_accepted_send_resolves_exactly_once_under_injected_failures() {
    let transport = StubTransport::with_mode(CompletionMode::Echo);
    let session = connected_session(&transport);
    let handle = transport.connection().unwrap();
    handle.inject_send_failures(42, 0.3, -9);

    let resolved = Arc::new(AtomicUsize::new(0));
    let mut accepted = 0;
    for _ in 0..64 {
        let observer = Arc::clone(&resolved);
        let outcome = session.request("gate.echo", &Value::Null, move |_| {
            observer.fetch_add(1, Ordering::SeqCst);
        });
        if outcome.is_ok() {
            accepted += 1;
        }
    }
    assert!(accepted > 0);
    assert!(accepted < 64);

    for _ in 0..64 {
        session.on_tick();
    }
    assert_eq!(resolved.load(Ordering::SeqCst), accepted);

    // Rejected sends never produce a late callback, even through stop.
    session.stop();
    assert_eq!(resolved.load(Ordering::SeqCst), accepted);
}
