//! Session orchestration and per-tick completion dispatch.
//!
//! The [`Session`] validates state, registers correlations, and calls into
//! the transport; the transport's worker thread enqueues completion records
//! into per-category mailboxes; the owning thread's [`Session::on_tick`]
//! drains them and invokes caller callbacks.
//!
//! # Threading contract
//!
//! Client APIs (`connect*`, `request`, `notify`, `subscribe*`, `on_tick`)
//! are meant to be driven from one owning thread. All callbacks run on that
//! thread, with one documented exception: [`Session::stop`] resolves every
//! outstanding correlation synchronously on the thread that called it
//! (forced drain). Callbacks running inside that drain observe the session
//! as `Stopping` and must not start a new connection until `status()`
//! reports `Stopped`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tether_core::{
    AttemptToken, CompletionStatus, ConnectCompletion, ConnectionState, CorrelationId,
    CorrelationTable, EventCompletion, Mailbox, NotifyCompletion, RequestCompletion, SessionError,
    StateMachine, SubscriptionRegistry,
};

use crate::{
    codec::Codec,
    transport::{Connection, DISCONNECT_EVENT, EventHook, NotifyHook, RequestHook, Transport},
};

/// Outcome of a request, handed to its callback.
#[derive(Debug)]
pub struct RequestResult<V> {
    /// Completion status. `Ok` means `payload` holds the decoded reply.
    pub status: CompletionStatus,
    /// The route the request was sent to.
    pub route: String,
    /// Decoded reply payload; absent on any non-`Ok` status.
    pub payload: Option<V>,
}

/// Outcome of a notify send-acknowledgement, handed to its callback.
#[derive(Debug)]
pub struct NotifyResult {
    /// Completion status of the send.
    pub status: CompletionStatus,
    /// The route the notify was sent to.
    pub route: String,
}

/// A server-pushed event, handed to the subscriber callback.
#[derive(Debug)]
pub struct EventMessage<V> {
    /// The event name subscribed to.
    pub event: String,
    /// Decoded event payload; absent when the payload was undecodable.
    pub payload: Option<V>,
}

/// Callback for an async connect attempt.
pub type ConnectCallback = Box<dyn FnOnce(CompletionStatus) + Send + 'static>;

/// Callback for a request outcome.
pub type RequestCallback<V> = Box<dyn FnOnce(RequestResult<V>) + Send + 'static>;

/// Callback for a notify send-acknowledgement.
pub type NotifyCallback = Box<dyn FnOnce(NotifyResult) + Send + 'static>;

/// Callback for server-pushed events. Fires once per delivered event.
pub type EventCallback<V> = Box<dyn FnMut(EventMessage<V>) + Send + 'static>;

/// Callback fired after an unsolicited disconnect has torn the session
/// down. Stays registered across connect/stop cycles.
pub type DisconnectCallback = Box<dyn FnMut() + Send + 'static>;

/// In-flight request: the registered callback plus what the result needs.
struct PendingRequest<V> {
    route: String,
    callback: RequestCallback<V>,
}

/// In-flight notify.
struct PendingNotify {
    route: String,
    callback: NotifyCallback,
}

/// Subscriber callbacks are invoked with the core lock released, so they
/// live behind their own lock: dispatch clones the handle out of the
/// registry, drops the core lock, then invokes.
type SharedEventCallback<V> = Arc<Mutex<EventCallback<V>>>;
type SharedDisconnectCallback = Arc<Mutex<DisconnectCallback>>;

/// Mutable session state guarded by the single core mutex.
///
/// Critical sections are short and never invoke user code or transport
/// primitives while held.
struct Core<N, V> {
    state: StateMachine,
    conn: Option<Arc<N>>,
    /// Identity of the outstanding async connect attempt, if any.
    attempt: Option<AttemptToken>,
    /// Callback registered by `connect_async`, waiting for its completion.
    pending_connect: Option<ConnectCallback>,
    /// Single-slot connect completion enqueued by the worker hook.
    connect_ready: Option<ConnectCompletion>,
    requests: CorrelationTable<PendingRequest<V>>,
    notifies: CorrelationTable<PendingNotify>,
    subscriptions: SubscriptionRegistry<SharedEventCallback<V>>,
    on_disconnect: Option<SharedDisconnectCallback>,
}

/// State shared between the session handle and the transport hooks.
struct Shared<N, V> {
    core: Mutex<Core<N, V>>,
    request_results: Mailbox<RequestCompletion>,
    notify_results: Mailbox<NotifyCompletion>,
    events: Mailbox<EventCompletion>,
}

impl<N, V> Shared<N, V> {
    fn lock_core(&self) -> MutexGuard<'_, Core<N, V>> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Worker-side completion path for a request.
    ///
    /// Normally enqueues a record for the next tick. If teardown has begun,
    /// this is the forced drain: the entry is resolved inline on the
    /// current thread, which is the thread that called `stop()` because
    /// `destroy()` fires outstanding hooks synchronously.
    fn complete_request(&self, id: CorrelationId, status: i32, payload: bytes::Bytes) {
        let mut core = self.lock_core();
        if core.state.current().is_down() {
            let pending = core.requests.remove(id);
            drop(core);
            if let Some(pending) = pending {
                (pending.callback)(RequestResult {
                    status: CompletionStatus::Aborted,
                    route: pending.route,
                    payload: None,
                });
            }
        } else {
            drop(core);
            self.request_results.push(RequestCompletion { id, status, payload });
        }
    }

    /// Worker-side completion path for a notify. Same staleness handling as
    /// [`Self::complete_request`].
    fn complete_notify(&self, id: CorrelationId, status: i32) {
        let mut core = self.lock_core();
        if core.state.current().is_down() {
            let pending = core.notifies.remove(id);
            drop(core);
            if let Some(pending) = pending {
                (pending.callback)(NotifyResult {
                    status: CompletionStatus::Aborted,
                    route: pending.route,
                });
            }
        } else {
            drop(core);
            self.notify_results.push(NotifyCompletion { id, status });
        }
    }
}

/// Client session over one persistent transport connection.
///
/// Created once and reused across connect/stop cycles. Dropping the session
/// performs a final [`Session::stop`].
pub struct Session<T: Transport, C: Codec> {
    transport: T,
    codec: Arc<C>,
    shared: Arc<Shared<T::Conn, C::Value>>,
}

impl<T: Transport, C: Codec> Session<T, C> {
    /// Create a stopped session around a transport and codec.
    pub fn new(transport: T, codec: C) -> Self {
        Self {
            transport,
            codec: Arc::new(codec),
            shared: Arc::new(Shared {
                core: Mutex::new(Core {
                    state: StateMachine::new(),
                    conn: None,
                    attempt: None,
                    pending_connect: None,
                    connect_ready: None,
                    requests: CorrelationTable::new(),
                    notifies: CorrelationTable::new(),
                    subscriptions: SubscriptionRegistry::new(),
                    on_disconnect: None,
                }),
                request_results: Mailbox::new(),
                notify_results: Mailbox::new(),
                events: Mailbox::new(),
            }),
        }
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionState {
        self.shared.lock_core().state.current()
    }

    /// Blocking connect on the calling thread. Prefer
    /// [`Session::connect_async`] in production.
    ///
    /// Any existing connection is stopped first. On failure the session is
    /// left `Stopped` with no partial state.
    pub fn connect(&self, host: &str, port: u16) -> Result<(), SessionError> {
        self.stop();

        let conn = Arc::new(self.transport.connect(host, port)?);
        self.arm_disconnect_listener(&conn);

        let mut core = self.shared.lock_core();
        core.conn = Some(conn);
        core.state.transition(ConnectionState::Connected);
        Ok(())
    }

    /// Non-blocking connect.
    ///
    /// Any existing connection is stopped first. On `Ok`, exactly one of
    /// the following happens: `callback` fires once on the owning thread
    /// from a later tick, or the attempt is abandoned by a `stop()` before
    /// its completion is dispatched and `callback` never fires.
    pub fn connect_async(
        &self,
        host: &str,
        port: u16,
        callback: impl FnOnce(CompletionStatus) + Send + 'static,
    ) -> Result<(), SessionError> {
        self.stop();

        let token = AttemptToken::next();
        {
            let mut core = self.shared.lock_core();
            core.attempt = Some(token);
            core.pending_connect = Some(Box::new(callback));
            core.state.transition(ConnectionState::Connecting);
        }

        let shared = Arc::clone(&self.shared);
        let hook = Box::new(move |status: i32| {
            let mut core = shared.lock_core();
            if core.attempt == Some(token) {
                core.connect_ready = Some(ConnectCompletion { token, status });
            } else {
                // The session stopped or reconnected while this attempt was
                // in flight; its resources die with this hook.
                tracing::debug!(%token, status, "stale connect completion discarded");
            }
        });

        match self.transport.connect_async(host, port, hook) {
            Ok(conn) => {
                self.shared.lock_core().conn = Some(Arc::new(conn));
                Ok(())
            },
            Err(err) => {
                let mut core = self.shared.lock_core();
                core.attempt = None;
                core.pending_connect = None;
                core.state.transition(ConnectionState::Stopped);
                Err(err.into())
            },
        }
    }

    /// Send a request expecting a correlated reply.
    ///
    /// Requires `Connected`. The `Ok` return means the transport accepted
    /// the send; the outcome arrives later through `callback`, exactly once.
    pub fn request(
        &self,
        route: &str,
        payload: &C::Value,
        callback: impl FnOnce(RequestResult<C::Value>) + Send + 'static,
    ) -> Result<(), SessionError> {
        let bytes = self.codec.encode(payload)?;

        let (conn, id) = {
            let mut core = self.shared.lock_core();
            let state = core.state.current();
            let Some(conn) = core.conn.clone().filter(|_| state.accepts_traffic()) else {
                return Err(SessionError::InvalidState { state });
            };
            let id = CorrelationId::next();
            core.requests
                .insert(id, PendingRequest { route: route.to_owned(), callback: Box::new(callback) });
            (conn, id)
        };

        let shared = Arc::clone(&self.shared);
        let hook: RequestHook = Box::new(move |status, payload| {
            shared.complete_request(id, status, payload);
        });

        if let Err(err) = conn.send_request(route, bytes, hook) {
            // Rejected synchronously: the caller gets the error, not a
            // callback, so the registration must not linger.
            self.shared.lock_core().requests.remove(id);
            return Err(err.into());
        }
        Ok(())
    }

    /// Send a fire-and-forget notify.
    ///
    /// Requires `Connected`. `callback` receives the send-acknowledgement,
    /// exactly once.
    pub fn notify(
        &self,
        route: &str,
        payload: &C::Value,
        callback: impl FnOnce(NotifyResult) + Send + 'static,
    ) -> Result<(), SessionError> {
        let bytes = self.codec.encode(payload)?;

        let (conn, id) = {
            let mut core = self.shared.lock_core();
            let state = core.state.current();
            let Some(conn) = core.conn.clone().filter(|_| state.accepts_traffic()) else {
                return Err(SessionError::InvalidState { state });
            };
            let id = CorrelationId::next();
            core.notifies
                .insert(id, PendingNotify { route: route.to_owned(), callback: Box::new(callback) });
            (conn, id)
        };

        let shared = Arc::clone(&self.shared);
        let hook: NotifyHook = Box::new(move |status| {
            shared.complete_notify(id, status);
        });

        if let Err(err) = conn.send_notify(route, bytes, hook) {
            self.shared.lock_core().notifies.remove(id);
            return Err(err.into());
        }
        Ok(())
    }

    /// Subscribe to a named server-pushed event.
    ///
    /// Requires `Connected`. Re-subscribing a name replaces the previous
    /// subscriber (last-registration-wins); the old callback never fires
    /// again. The reserved disconnect event is rejected.
    pub fn subscribe(
        &self,
        event: &str,
        callback: impl FnMut(EventMessage<C::Value>) + Send + 'static,
    ) -> Result<(), SessionError> {
        if event == DISCONNECT_EVENT {
            return Err(SessionError::ReservedEvent { event: event.to_owned() });
        }

        let conn = {
            let core = self.shared.lock_core();
            let state = core.state.current();
            let Some(conn) = core.conn.clone().filter(|_| state.accepts_traffic()) else {
                return Err(SessionError::InvalidState { state });
            };
            conn
        };

        // Disarm any prior listener for the name before arming the new one.
        conn.remove_listener(event);

        let shared = Arc::clone(&self.shared);
        let name = event.to_owned();
        let hook: EventHook = Box::new(move |payload| {
            shared.events.push(EventCompletion::Event { name: name.clone(), payload });
        });
        conn.add_listener(event, hook)?;

        let mut core = self.shared.lock_core();
        let state = core.state.current();
        if !state.accepts_traffic() {
            // A concurrent stop() won; leave no armed listener behind.
            drop(core);
            conn.remove_listener(event);
            return Err(SessionError::InvalidState { state });
        }
        core.subscriptions.insert(event, Arc::new(Mutex::new(Box::new(callback))));
        Ok(())
    }

    /// Remove the subscription for `event` and disarm its listener. No-op
    /// if absent.
    pub fn unsubscribe(&self, event: &str) {
        let conn = {
            let mut core = self.shared.lock_core();
            if core.subscriptions.remove(event).is_none() {
                return;
            }
            core.conn.clone()
        };
        if let Some(conn) = conn {
            conn.remove_listener(event);
        }
    }

    /// Remove every subscription, then discard already-queued but
    /// not-yet-delivered events. Delivery is best-effort once unsubscribed.
    /// Queued disconnect notices are kept: teardown is never skipped.
    pub fn unsubscribe_all(&self) {
        let (removed, conn) = {
            let mut core = self.shared.lock_core();
            (core.subscriptions.drain(), core.conn.clone())
        };
        if let Some(conn) = conn {
            for (name, _) in &removed {
                conn.remove_listener(name);
            }
        }
        drop(removed);

        let kept: Vec<_> = self
            .shared
            .events
            .drain_all()
            .into_iter()
            .filter(|record| matches!(record, EventCompletion::Disconnect))
            .collect();
        for record in kept {
            self.shared.events.push(record);
        }
    }

    /// Register the callback fired after an unsolicited transport
    /// disconnect has torn the session down. Replaces any previous one;
    /// stays registered across connect/stop cycles.
    pub fn set_disconnect_callback(&self, callback: impl FnMut() + Send + 'static) {
        self.shared.lock_core().on_disconnect = Some(Arc::new(Mutex::new(Box::new(callback))));
    }

    /// Stop the current connection. Idempotent; always leaves the session
    /// `Stopped`.
    ///
    /// Every outstanding request/notify correlation is resolved exactly
    /// once during this call, synchronously on the calling thread, with
    /// [`CompletionStatus::Aborted`]. An unresolved async connect attempt
    /// is abandoned: its callback never fires. Queued events and disconnect
    /// notices are discarded without dispatch.
    pub fn stop(&self) {
        let conn = {
            let mut core = self.shared.lock_core();
            if core.state.current().is_down() {
                // Includes the re-entrant case: stop() called from inside a
                // callback that stop() itself is draining.
                return;
            }
            core.state.transition(ConnectionState::Stopping);
            core.attempt = None;
            core.pending_connect = None;
            core.connect_ready = None;
            core.conn.take()
        };

        // Results that completed but were never dispatched resolve first,
        // then the transport teardown fires whatever is still outstanding;
        // both paths land in the same inline resolution below or in the
        // Stopping branch of the completion hooks.
        while let Some(record) = self.shared.request_results.try_pop_one() {
            let pending = self.shared.lock_core().requests.remove(record.id);
            if let Some(pending) = pending {
                (pending.callback)(RequestResult {
                    status: CompletionStatus::Aborted,
                    route: pending.route,
                    payload: None,
                });
            }
        }
        while let Some(record) = self.shared.notify_results.try_pop_one() {
            let pending = self.shared.lock_core().notifies.remove(record.id);
            if let Some(pending) = pending {
                (pending.callback)(NotifyResult {
                    status: CompletionStatus::Aborted,
                    route: pending.route,
                });
            }
        }

        if let Some(conn) = conn {
            conn.remove_listener(DISCONNECT_EVENT);
            conn.destroy();
        }

        let (leftover_requests, leftover_notifies) = {
            let mut core = self.shared.lock_core();
            let requests = core.requests.drain();
            let notifies = core.notifies.drain();
            core.subscriptions.drain();
            core.state.transition(ConnectionState::Stopped);
            (requests, notifies)
        };

        self.shared.request_results.drain_all();
        self.shared.notify_results.drain_all();
        self.shared.events.drain_all();

        // Entries can survive to this point when the transport never fired
        // their hooks, or when a tick on another thread popped a record the
        // drain above raced. A registered callback is never silently
        // dropped: whatever remains resolves here.
        if !(leftover_requests.is_empty() && leftover_notifies.is_empty()) {
            tracing::warn!(
                requests = leftover_requests.len(),
                notifies = leftover_notifies.len(),
                "resolving correlation entries left after transport teardown"
            );
        }
        for (_, pending) in leftover_requests {
            (pending.callback)(RequestResult {
                status: CompletionStatus::Aborted,
                route: pending.route,
                payload: None,
            });
        }
        for (_, pending) in leftover_notifies {
            (pending.callback)(NotifyResult {
                status: CompletionStatus::Aborted,
                route: pending.route,
            });
        }
    }

    /// Per-tick dispatch step, driven by the host's scheduler on the owning
    /// thread. Safe to call in any state; a no-op while `Stopped` or
    /// `Stopping`.
    ///
    /// Fixed order, at most one item per category per tick: the pending
    /// connect completion first (it decides whether the rest is
    /// meaningful), then one request result, one notify result, and one
    /// event or disconnect notice.
    pub fn on_tick(&self) {
        if !self.status().dispatch_active() {
            return;
        }
        self.dispatch_connect();
        self.dispatch_request_result();
        self.dispatch_notify_result();
        self.dispatch_event();
    }

    /// Arm the internal listener that converts the transport's disconnect
    /// event into a teardown notice.
    fn arm_disconnect_listener(&self, conn: &Arc<T::Conn>) {
        let shared = Arc::clone(&self.shared);
        let hook: EventHook = Box::new(move |_payload| {
            shared.events.push(EventCompletion::Disconnect);
        });
        if let Err(err) = conn.add_listener(DISCONNECT_EVENT, hook) {
            // The connection stays usable; it just cannot report loss.
            tracing::warn!(%err, "failed to arm disconnect listener");
        }
    }

    /// Resolve a pending async connect completion, if one is ready.
    fn dispatch_connect(&self) {
        let (completion, callback) = {
            let mut core = self.shared.lock_core();
            let Some(completion) = core.connect_ready.take() else { return };
            if core.attempt != Some(completion.token) {
                return;
            }
            core.attempt = None;
            (completion, core.pending_connect.take())
        };

        // A stop() on another thread can complete between any two of the
        // critical sections below. Each one re-checks that the session is
        // still `Connecting`; once stop() has run, the attempt is
        // abandoned and the callback never fires.
        if completion.status == 0 {
            let conn = {
                let core = self.shared.lock_core();
                if core.state.current() != ConnectionState::Connecting {
                    return;
                }
                core.conn.clone()
            };
            if let Some(conn) = conn {
                self.arm_disconnect_listener(&conn);
            }
            {
                let mut core = self.shared.lock_core();
                if core.state.current() != ConnectionState::Connecting {
                    return;
                }
                core.state.transition(ConnectionState::Connected);
            }
            if let Some(callback) = callback {
                callback(CompletionStatus::Ok);
            }
        } else {
            // Failed attempt: land in Stopped before the callback runs so
            // no partial state is observable.
            let conn = {
                let mut core = self.shared.lock_core();
                if core.state.current() != ConnectionState::Connecting {
                    return;
                }
                core.state.transition(ConnectionState::Stopped);
                core.conn.take()
            };
            if let Some(conn) = conn {
                conn.destroy();
            }
            if let Some(callback) = callback {
                callback(CompletionStatus::Transport(completion.status));
            }
        }
    }

    /// Dispatch at most one request result.
    fn dispatch_request_result(&self) {
        let Some(record) = self.shared.request_results.try_pop_one() else { return };
        let (pending, state) = {
            let mut core = self.shared.lock_core();
            (core.requests.remove(record.id), core.state.current())
        };
        let Some(pending) = pending else {
            tracing::debug!(id = %record.id, "request completion without registration discarded");
            return;
        };

        if state.is_down() {
            // A stop() on another thread began teardown after this record
            // was popped; it owns the connection, so the record resolves
            // the way the forced drain would.
            (pending.callback)(RequestResult {
                status: CompletionStatus::Aborted,
                route: pending.route,
                payload: None,
            });
            return;
        }

        let (status, payload) = if record.status == 0 {
            match self.codec.decode(&record.payload) {
                Ok(value) => (CompletionStatus::Ok, Some(value)),
                Err(err) => {
                    tracing::warn!(route = %pending.route, %err, "undecodable request reply");
                    (CompletionStatus::DecodeFailed, None)
                },
            }
        } else {
            (CompletionStatus::Transport(record.status), None)
        };

        (pending.callback)(RequestResult { status, route: pending.route, payload });
    }

    /// Dispatch at most one notify send-acknowledgement.
    fn dispatch_notify_result(&self) {
        let Some(record) = self.shared.notify_results.try_pop_one() else { return };
        let (pending, state) = {
            let mut core = self.shared.lock_core();
            (core.notifies.remove(record.id), core.state.current())
        };
        let Some(pending) = pending else {
            tracing::debug!(id = %record.id, "notify completion without registration discarded");
            return;
        };

        let status = if state.is_down() {
            CompletionStatus::Aborted
        } else {
            CompletionStatus::from_transport(record.status)
        };
        (pending.callback)(NotifyResult { status, route: pending.route });
    }

    /// Dispatch at most one event or disconnect notice.
    fn dispatch_event(&self) {
        let Some(record) = self.shared.events.try_pop_one() else { return };
        match record {
            EventCompletion::Disconnect => {
                tracing::debug!("transport disconnect notice; tearing session down");
                self.stop();
                let callback = self.shared.lock_core().on_disconnect.clone();
                if let Some(callback) = callback {
                    let mut guard = callback.lock().unwrap_or_else(PoisonError::into_inner);
                    (guard)();
                }
            },
            EventCompletion::Event { name, payload } => {
                let Some(subscriber) = self.shared.lock_core().subscriptions.get(&name).cloned()
                else {
                    // Unsubscribed between enqueue and dispatch.
                    tracing::debug!(event = %name, "event without subscriber discarded");
                    return;
                };

                let payload = match self.codec.decode(&payload) {
                    Ok(value) => Some(value),
                    Err(err) => {
                        tracing::warn!(event = %name, %err, "undecodable event payload");
                        None
                    },
                };

                let mut guard = subscriber.lock().unwrap_or_else(PoisonError::into_inner);
                (guard)(EventMessage { event: name, payload });
            },
        }
    }
}

impl<T: Transport, C: Codec> Drop for Session<T, C> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<T: Transport, C: Codec> std::fmt::Debug for Session<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.shared.lock_core();
        f.debug_struct("Session")
            .field("state", &core.state.current())
            .field("in_flight_requests", &core.requests.len())
            .field("in_flight_notifies", &core.notifies.len())
            .field("subscriptions", &core.subscriptions.len())
            .finish_non_exhaustive()
    }
}
