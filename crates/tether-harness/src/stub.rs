//! Scripted in-process transport.
//!
//! [`StubTransport`] implements the [`Transport`] boundary without sockets.
//! Every completion is driven by the test: held until fired (manual mode),
//! fired inline at send time (echo / fail modes), or fired from a spawned
//! worker thread to exercise the cross-thread path.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError, atomic::{AtomicBool, Ordering}},
    thread::JoinHandle,
};

use bytes::Bytes;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tether_core::TransportError;
use tether_session::{
    ConnectHook, Connection, EventHook, NotifyHook, RequestHook, Transport,
};

/// Status code `destroy()` reports to outstanding hooks.
pub const RESET_STATUS: i32 = -32;

/// How the stub resolves accepted sends and async connects.
#[derive(Debug, Clone, Copy)]
pub enum CompletionMode {
    /// Hold every completion until the test fires it.
    Manual,
    /// Complete immediately at send time: requests echo their payload,
    /// notifies and connects acknowledge with status 0.
    Echo,
    /// Complete immediately with this non-zero status.
    Fail(i32),
}

/// Probabilistic send rejection, deterministic under a fixed seed.
struct FailurePlan {
    rng: ChaCha8Rng,
    probability: f64,
    code: i32,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A hook waiting to be fired, with what it was registered for.
struct PendingSend<H> {
    route: String,
    payload: Bytes,
    hook: H,
}

/// Shared state of one stub connection.
struct ConnState {
    mode: Mutex<CompletionMode>,
    connect: Mutex<Option<ConnectHook>>,
    requests: Mutex<VecDeque<PendingSend<RequestHook>>>,
    notifies: Mutex<VecDeque<PendingSend<NotifyHook>>>,
    listeners: Mutex<HashMap<String, EventHook>>,
    failure: Mutex<Option<FailurePlan>>,
    destroyed: AtomicBool,
}

impl ConnState {
    fn new(mode: CompletionMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            connect: Mutex::new(None),
            requests: Mutex::new(VecDeque::new()),
            notifies: Mutex::new(VecDeque::new()),
            listeners: Mutex::new(HashMap::new()),
            failure: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        }
    }

    fn roll_failure(&self) -> Option<i32> {
        let mut failure = lock(&self.failure);
        let plan = failure.as_mut()?;
        if plan.rng.gen_bool(plan.probability) { Some(plan.code) } else { None }
    }
}

/// Test-side control handle for a live stub connection.
///
/// Cheap to clone; all methods are callable from any thread, so tests can
/// fire completions from spawned workers.
#[derive(Clone)]
pub struct StubHandle {
    state: Arc<ConnState>,
}

impl StubHandle {
    /// Number of requests whose completion has not fired yet.
    pub fn pending_requests(&self) -> usize {
        lock(&self.state.requests).len()
    }

    /// Number of notifies whose completion has not fired yet.
    pub fn pending_notifies(&self) -> usize {
        lock(&self.state.notifies).len()
    }

    /// Whether a listener is armed for `event`.
    pub fn has_listener(&self, event: &str) -> bool {
        lock(&self.state.listeners).contains_key(event)
    }

    /// Whether `destroy()` ran.
    pub fn is_destroyed(&self) -> bool {
        self.state.destroyed.load(Ordering::SeqCst)
    }

    /// Fire the oldest pending request hook with `status` and `payload`.
    /// Returns the route it was sent to, or `None` if nothing is pending.
    pub fn complete_next_request(&self, status: i32, payload: Bytes) -> Option<String> {
        let pending = lock(&self.state.requests).pop_front()?;
        (pending.hook)(status, payload);
        Some(pending.route)
    }

    /// Fire the oldest pending request hook, echoing the payload it was
    /// sent with.
    pub fn echo_next_request(&self) -> Option<String> {
        let pending = lock(&self.state.requests).pop_front()?;
        let payload = pending.payload.clone();
        (pending.hook)(0, payload);
        Some(pending.route)
    }

    /// Fire the oldest pending notify hook with `status`.
    pub fn complete_next_notify(&self, status: i32) -> Option<String> {
        let pending = lock(&self.state.notifies).pop_front()?;
        (pending.hook)(status);
        Some(pending.route)
    }

    /// Fire the oldest pending request hook from a spawned worker thread.
    pub fn complete_next_request_on_worker(
        &self,
        status: i32,
        payload: Bytes,
    ) -> JoinHandle<Option<String>> {
        let handle = self.clone();
        std::thread::spawn(move || handle.complete_next_request(status, payload))
    }

    /// Deliver a server-pushed event to the armed listener, if any.
    /// Returns whether a listener consumed it.
    pub fn push_event(&self, event: &str, payload: Bytes) -> bool {
        let mut listeners = lock(&self.state.listeners);
        match listeners.get_mut(event) {
            Some(hook) => {
                hook(payload);
                true
            },
            None => false,
        }
    }

    /// Deliver a server-pushed event from a spawned worker thread.
    pub fn push_event_on_worker(&self, event: &str, payload: Bytes) -> JoinHandle<bool> {
        let handle = self.clone();
        let event = event.to_owned();
        std::thread::spawn(move || handle.push_event(&event, payload))
    }

    /// Raise the transport's disconnect notice, as a lost socket would.
    /// Returns whether the disconnect listener was armed.
    pub fn fire_disconnect(&self) -> bool {
        self.push_event(tether_session::DISCONNECT_EVENT, Bytes::new())
    }

    /// Reject each subsequent send with `code` at the given probability,
    /// deterministically under `seed`.
    pub fn inject_send_failures(&self, seed: u64, probability: f64, code: i32) {
        *lock(&self.state.failure) = Some(FailurePlan {
            rng: ChaCha8Rng::seed_from_u64(seed),
            probability,
            code,
        });
    }
}

/// One stub connection, handed to the session by [`StubTransport`].
pub struct StubConnection {
    state: Arc<ConnState>,
}

impl Connection for StubConnection {
    fn send_request(
        &self,
        route: &str,
        payload: Bytes,
        on_complete: RequestHook,
    ) -> Result<(), TransportError> {
        if self.state.destroyed.load(Ordering::SeqCst) {
            return Err(TransportError::new(RESET_STATUS, "connection destroyed"));
        }
        if let Some(code) = self.state.roll_failure() {
            return Err(TransportError::new(code, "injected send failure"));
        }

        let mode = *lock(&self.state.mode);
        match mode {
            CompletionMode::Manual => {
                lock(&self.state.requests).push_back(PendingSend {
                    route: route.to_owned(),
                    payload,
                    hook: on_complete,
                });
            },
            CompletionMode::Echo => on_complete(0, payload),
            CompletionMode::Fail(code) => on_complete(code, Bytes::new()),
        }
        Ok(())
    }

    fn send_notify(
        &self,
        route: &str,
        payload: Bytes,
        on_complete: NotifyHook,
    ) -> Result<(), TransportError> {
        if self.state.destroyed.load(Ordering::SeqCst) {
            return Err(TransportError::new(RESET_STATUS, "connection destroyed"));
        }
        if let Some(code) = self.state.roll_failure() {
            return Err(TransportError::new(code, "injected send failure"));
        }

        let mode = *lock(&self.state.mode);
        match mode {
            CompletionMode::Manual => {
                lock(&self.state.notifies).push_back(PendingSend {
                    route: route.to_owned(),
                    payload,
                    hook: on_complete,
                });
            },
            CompletionMode::Echo => on_complete(0),
            CompletionMode::Fail(code) => on_complete(code),
        }
        Ok(())
    }

    fn add_listener(&self, event: &str, on_event: EventHook) -> Result<(), TransportError> {
        if self.state.destroyed.load(Ordering::SeqCst) {
            return Err(TransportError::new(RESET_STATUS, "connection destroyed"));
        }
        lock(&self.state.listeners).insert(event.to_owned(), on_event);
        Ok(())
    }

    fn remove_listener(&self, event: &str) {
        lock(&self.state.listeners).remove(event);
    }

    fn destroy(&self) {
        if self.state.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Contract: fire every outstanding hook synchronously on this
        // thread, then release everything retained.
        if let Some(hook) = lock(&self.state.connect).take() {
            hook(RESET_STATUS);
        }
        let requests: Vec<_> = lock(&self.state.requests).drain(..).collect();
        for pending in requests {
            (pending.hook)(RESET_STATUS, Bytes::new());
        }
        let notifies: Vec<_> = lock(&self.state.notifies).drain(..).collect();
        for pending in notifies {
            (pending.hook)(RESET_STATUS);
        }
        lock(&self.state.listeners).clear();
    }
}

/// Shared transport-level state.
struct TransportState {
    mode: Mutex<CompletionMode>,
    refuse_code: Mutex<Option<i32>>,
    last: Mutex<Option<Arc<ConnState>>>,
}

/// Scripted implementation of the transport boundary.
///
/// Each successful connect produces a fresh connection; the control handle
/// for the most recent one is available via [`StubTransport::connection`].
#[derive(Clone)]
pub struct StubTransport {
    state: Arc<TransportState>,
}

impl StubTransport {
    /// Manual-mode transport: completions wait for the test to fire them.
    pub fn new() -> Self {
        Self::with_mode(CompletionMode::Manual)
    }

    /// Echo-mode transport: everything completes immediately, requests
    /// echoing their payload.
    pub fn echo() -> Self {
        Self::with_mode(CompletionMode::Echo)
    }

    /// Transport with an explicit completion mode.
    pub fn with_mode(mode: CompletionMode) -> Self {
        Self {
            state: Arc::new(TransportState {
                mode: Mutex::new(mode),
                refuse_code: Mutex::new(None),
                last: Mutex::new(None),
            }),
        }
    }

    /// Change the completion mode for subsequently created connections.
    pub fn set_mode(&self, mode: CompletionMode) {
        *lock(&self.state.mode) = mode;
    }

    /// Reject every subsequent connect attempt immediately with `code`.
    pub fn refuse_connects(&self, code: i32) {
        *lock(&self.state.refuse_code) = Some(code);
    }

    /// Accept connect attempts again.
    pub fn accept_connects(&self) {
        *lock(&self.state.refuse_code) = None;
    }

    /// Control handle for the most recently created connection.
    pub fn connection(&self) -> Option<StubHandle> {
        lock(&self.state.last).as_ref().map(|state| StubHandle { state: Arc::clone(state) })
    }

    /// Whether an async connect hook is waiting to be fired on the most
    /// recent connection.
    pub fn connect_pending(&self) -> bool {
        lock(&self.state.last)
            .as_ref()
            .is_some_and(|state| lock(&state.connect).is_some())
    }

    /// Fire the held async connect hook inline with `status`. Returns
    /// whether a hook was pending.
    pub fn complete_connect(&self, status: i32) -> bool {
        let Some(state) = lock(&self.state.last).as_ref().map(Arc::clone) else {
            return false;
        };
        match lock(&state.connect).take() {
            Some(hook) => {
                hook(status);
                true
            },
            None => false,
        }
    }

    /// Fire the held async connect hook from a spawned worker thread.
    pub fn complete_connect_on_worker(&self, status: i32) -> JoinHandle<bool> {
        let transport = self.clone();
        std::thread::spawn(move || transport.complete_connect(status))
    }

    fn open_connection(&self) -> StubConnection {
        let mode = *lock(&self.state.mode);
        let state = Arc::new(ConnState::new(mode));
        *lock(&self.state.last) = Some(Arc::clone(&state));
        StubConnection { state }
    }
}

impl Default for StubTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for StubTransport {
    type Conn = StubConnection;

    fn connect(&self, _host: &str, _port: u16) -> Result<Self::Conn, TransportError> {
        if let Some(code) = *lock(&self.state.refuse_code) {
            return Err(TransportError::new(code, "scripted connect refusal"));
        }
        Ok(self.open_connection())
    }

    fn connect_async(
        &self,
        _host: &str,
        _port: u16,
        on_complete: ConnectHook,
    ) -> Result<Self::Conn, TransportError> {
        if let Some(code) = *lock(&self.state.refuse_code) {
            return Err(TransportError::new(code, "scripted connect refusal"));
        }

        let conn = self.open_connection();
        let mode = *lock(&conn.state.mode);
        match mode {
            CompletionMode::Manual => *lock(&conn.state.connect) = Some(on_complete),
            CompletionMode::Echo => on_complete(0),
            CompletionMode::Fail(code) => on_complete(code),
        }
        Ok(conn)
    }
}
